// 🗺️ Mapping Profiles - Rules as Data
// One profile per (retailer, transaction set). Each rule says: take element N
// of segment S (optionally only when its qualifier matches) and put it in field F.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// RULE DEFINITION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingRule {
    /// Segment tag, e.g. "BEG", "N1", "PO1"
    pub segment_id: String,

    /// 1-based element index (BEG03 = 3)
    pub element_position: usize,

    /// Field name in the normalized document
    pub target_field: String,

    /// Missing value is a validation failure
    #[serde(default)]
    pub required: bool,

    /// Used when the element is absent or empty and the rule is optional
    #[serde(default)]
    pub default_value: Option<String>,

    /// "NN:VALUE" (element NN must equal VALUE) or bare "VALUE" (element 01)
    #[serde(default)]
    pub qualifier: Option<String>,

    /// Rule belongs to the repeating line-item loop
    #[serde(default)]
    pub line_level: bool,
}

/// Parsed form of `MappingRule::qualifier`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Qualifier {
    pub position: usize,
    pub value: String,
}

impl Qualifier {
    /// Position of the qualifier element when a rule gives only the value
    pub const DEFAULT_POSITION: usize = 1;

    pub fn parse(text: &str) -> Result<Self, String> {
        let text = text.trim();
        if text.is_empty() {
            return Err("qualifier is empty".to_string());
        }

        match text.split_once(':') {
            Some((position, value)) => {
                let position: usize = position
                    .trim()
                    .parse()
                    .map_err(|_| format!("qualifier position '{}' is not a number", position))?;
                if position == 0 {
                    return Err("qualifier position must be >= 1".to_string());
                }
                if value.trim().is_empty() {
                    return Err(format!("qualifier '{}' has no value", text));
                }
                Ok(Qualifier {
                    position,
                    value: value.trim().to_string(),
                })
            }
            None => Ok(Qualifier {
                position: Self::DEFAULT_POSITION,
                value: text.to_string(),
            }),
        }
    }

    /// Case-insensitive comparison against the segment's qualifier element
    pub fn matches(&self, element: Option<&str>) -> bool {
        element.map_or(false, |e| e.trim().eq_ignore_ascii_case(&self.value))
    }
}

impl MappingRule {
    pub fn new(segment_id: &str, element_position: usize, target_field: &str) -> Self {
        MappingRule {
            segment_id: segment_id.to_string(),
            element_position,
            target_field: target_field.to_string(),
            required: false,
            default_value: None,
            qualifier: None,
            line_level: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: &str) -> Self {
        self.default_value = Some(value.to_string());
        self
    }

    pub fn with_qualifier(mut self, qualifier: &str) -> Self {
        self.qualifier = Some(qualifier.to_string());
        self
    }

    pub fn line_level(mut self) -> Self {
        self.line_level = true;
        self
    }

    /// Parsed qualifier; `None` when the rule has none or it does not parse
    pub fn parsed_qualifier(&self) -> Option<Qualifier> {
        self.qualifier
            .as_deref()
            .filter(|q| !q.trim().is_empty())
            .and_then(|q| Qualifier::parse(q).ok())
    }

    /// X12 reference notation, e.g. "BEG03"
    pub fn reference(&self) -> String {
        format!("{}{:02}", self.segment_id, self.element_position)
    }
}

// ============================================================================
// PROFILE
// ============================================================================

fn default_delimiter() -> char {
    '*'
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingProfile {
    /// Canonical retailer id, upper case ("TARGET")
    pub retailer_id: String,

    /// X12 transaction set ("850")
    pub transaction_set_code: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub version: String,

    /// Separator between elements in this partner's segments
    #[serde(default = "default_delimiter")]
    pub element_delimiter: char,

    /// Overrides the transaction set's standard loop-start segment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_loop_segment: Option<String>,

    #[serde(default)]
    pub header_mappings: Vec<MappingRule>,

    #[serde(default)]
    pub line_mappings: Vec<MappingRule>,
}

/// One reason a profile cannot be loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileIssue {
    pub scope: &'static str,
    pub message: String,
}

impl fmt::Display for ProfileIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.scope, self.message)
    }
}

impl MappingProfile {
    /// Registry key: "TARGET:850"
    pub fn key(&self) -> String {
        profile_key(&self.retailer_id, &self.transaction_set_code)
    }

    /// Segment that starts each line-item iteration
    pub fn loop_segment(&self) -> Option<&str> {
        match self.line_loop_segment.as_deref() {
            Some(segment) if !segment.trim().is_empty() => Some(segment.trim()),
            _ => standard_loop_segment(&self.transaction_set_code),
        }
    }

    /// Check the invariants a profile must hold before it is used
    pub fn validate(&self) -> Result<(), Vec<ProfileIssue>> {
        let mut issues = Vec::new();

        if self.retailer_id.trim().is_empty() {
            issues.push(ProfileIssue {
                scope: "profile",
                message: "retailerId is empty".to_string(),
            });
        }
        if self.transaction_set_code.trim().is_empty() {
            issues.push(ProfileIssue {
                scope: "profile",
                message: "transactionSetCode is empty".to_string(),
            });
        }
        if self.element_delimiter.is_alphanumeric() || self.element_delimiter.is_whitespace() {
            issues.push(ProfileIssue {
                scope: "profile",
                message: format!("elementDelimiter '{}' is not a separator", self.element_delimiter),
            });
        }

        check_rules("header", &self.header_mappings, false, &mut issues);
        check_rules("line", &self.line_mappings, true, &mut issues);

        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}

fn check_rules(
    scope: &'static str,
    rules: &[MappingRule],
    line_level: bool,
    issues: &mut Vec<ProfileIssue>,
) {
    let mut by_target: HashMap<&str, Vec<&MappingRule>> = HashMap::new();

    for rule in rules {
        let reference = rule.reference();
        if rule.segment_id.trim().is_empty() {
            issues.push(ProfileIssue {
                scope,
                message: format!("rule for '{}' has an empty segmentId", rule.target_field),
            });
        }
        if rule.element_position == 0 {
            issues.push(ProfileIssue {
                scope,
                message: format!("{}: elementPosition must be >= 1", reference),
            });
        }
        if rule.target_field.trim().is_empty() {
            issues.push(ProfileIssue {
                scope,
                message: format!("{}: targetField is empty", reference),
            });
        }
        if rule.line_level != line_level {
            issues.push(ProfileIssue {
                scope,
                message: format!(
                    "{} -> {}: lineLevel={} does not match its {} scope",
                    reference, rule.target_field, rule.line_level, scope
                ),
            });
        }
        if let Some(q) = rule.qualifier.as_deref().filter(|q| !q.trim().is_empty()) {
            if let Err(message) = Qualifier::parse(q) {
                issues.push(ProfileIssue {
                    scope,
                    message: format!("{}: {}", reference, message),
                });
            }
        }
        by_target.entry(rule.target_field.as_str()).or_default().push(rule);
    }

    // Same target twice is only allowed when every rule has its own qualifier
    let mut targets: Vec<_> = by_target.into_iter().filter(|(_, r)| r.len() > 1).collect();
    targets.sort_by_key(|(target, _)| *target);
    for (target, sharing) in targets {
        let mut seen: Vec<Qualifier> = Vec::new();
        for rule in sharing {
            match rule.parsed_qualifier() {
                Some(q) if !seen.iter().any(|s| s.position == q.position && s.value.eq_ignore_ascii_case(&q.value)) => {
                    seen.push(q)
                }
                _ => {
                    issues.push(ProfileIssue {
                        scope,
                        message: format!(
                            "targetField '{}' is mapped more than once without distinct qualifiers",
                            target
                        ),
                    });
                    break;
                }
            }
        }
    }
}

/// Registry key format shared by profiles and lookups
pub fn profile_key(retailer_id: &str, transaction_set_code: &str) -> String {
    format!(
        "{}:{}",
        retailer_id.trim().to_uppercase(),
        transaction_set_code.trim()
    )
}

/// Loop-start segment for the transaction sets we know
pub fn standard_loop_segment(transaction_set_code: &str) -> Option<&'static str> {
    match transaction_set_code.trim() {
        "850" | "855" | "875" => Some("PO1"),
        "810" | "880" => Some("IT1"),
        "860" | "865" => Some("POC"),
        "846" | "852" => Some("LIN"),
        "856" => Some("HL"),
        _ => None,
    }
}

// ============================================================================
// TESTS
// ============================================================================
