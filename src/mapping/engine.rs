// ⚙️ Mapping Engine - Segments → Normalized Document
// Pure: a profile plus a segment stream in, a document plus validation errors out.
// Values stay raw strings here; typing happens in `order`.

use serde::Serialize;
use std::collections::BTreeMap;

use super::profile::{MappingProfile, MappingRule, Qualifier};
use crate::error::ValidationError;

/// Segments that close the line-item loop
const LOOP_TERMINATORS: [&str; 2] = ["CTT", "SE"];

// ============================================================================
// OUTPUT
// ============================================================================

/// Field name → raw value, for the header and each line iteration.
/// Ordered maps keep serialization byte-stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NormalizedDocument {
    pub header: BTreeMap<String, String>,
    pub lines: Vec<BTreeMap<String, String>>,
}

impl NormalizedDocument {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.header.get(field).map(String::as_str)
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }
}

// ============================================================================
// SEGMENT VIEW
// ============================================================================

/// A raw segment split on the profile's delimiter. Index 0 is the tag.
struct SegmentView<'a> {
    parts: Vec<&'a str>,
}

impl<'a> SegmentView<'a> {
    fn split(raw: &'a str, delimiter: char) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        Some(SegmentView {
            parts: raw.split(delimiter).collect(),
        })
    }

    fn id(&self) -> &str {
        self.parts[0].trim()
    }

    /// 1-based element
    fn element(&self, position: usize) -> Option<&'a str> {
        if position == 0 {
            return None;
        }
        self.parts.get(position).copied()
    }

    fn matches(&self, rule: &MappingRule, qualifier: Option<&Qualifier>) -> bool {
        if !self.id().eq_ignore_ascii_case(rule.segment_id.trim()) {
            return false;
        }
        qualifier.map_or(true, |q| q.matches(self.element(q.position)))
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Apply a profile to one transaction set's segments.
///
/// `segments` are raw segments without terminators, in document order.
/// The header region ends at the first loop-start segment; each loop-start
/// opens a new line that runs until the next loop-start or a trailer (CTT/SE).
pub fn apply<S: AsRef<str>>(
    profile: &MappingProfile,
    segments: &[S],
) -> (NormalizedDocument, Vec<ValidationError>) {
    let views: Vec<SegmentView> = segments
        .iter()
        .filter_map(|s| SegmentView::split(s.as_ref(), profile.element_delimiter))
        .collect();

    let (header_region, line_regions) = split_regions(&views, profile.loop_segment());

    let mut document = NormalizedDocument::default();
    let mut errors = Vec::new();

    let header_missing = apply_rules(&profile.header_mappings, header_region, &mut document.header);
    errors.extend(header_missing.into_iter().map(|f| ValidationError::missing(&f)));

    for (index, region) in line_regions.into_iter().enumerate() {
        let mut line = BTreeMap::new();
        let line_missing = apply_rules(&profile.line_mappings, region, &mut line);
        errors.extend(
            line_missing
                .into_iter()
                .map(|f| ValidationError::missing_on_line(&f, index + 1)),
        );
        document.lines.push(line);
    }

    (document, errors)
}

/// Header slice plus one slice per line iteration
fn split_regions<'v, 'a>(
    views: &'v [SegmentView<'a>],
    loop_segment: Option<&str>,
) -> (&'v [SegmentView<'a>], Vec<&'v [SegmentView<'a>]>) {
    let is_loop_start = |v: &SegmentView| loop_segment.map_or(false, |l| v.id().eq_ignore_ascii_case(l));
    let is_terminator = |v: &SegmentView| LOOP_TERMINATORS.iter().any(|t| v.id().eq_ignore_ascii_case(t));

    let first_loop = match views.iter().position(|v| is_loop_start(v)) {
        Some(i) => i,
        None => return (views, Vec::new()),
    };

    let mut lines = Vec::new();
    let mut start = first_loop;
    let mut i = first_loop + 1;
    while i <= views.len() {
        let boundary = i == views.len() || is_loop_start(&views[i]) || is_terminator(&views[i]);
        if boundary {
            lines.push(&views[start..i]);
            if i == views.len() || is_terminator(&views[i]) {
                break;
            }
            start = i;
        }
        i += 1;
    }

    (&views[..first_loop], lines)
}

/// Fill `out` from `region`; returns target fields of required rules that produced nothing.
///
/// Rules sharing a target field are all tried for a real value before any of
/// their defaults is used.
fn apply_rules(
    rules: &[MappingRule],
    region: &[SegmentView],
    out: &mut BTreeMap<String, String>,
) -> Vec<String> {
    for rule in rules {
        // Another rule for the same field already filled it
        if out.contains_key(&rule.target_field) {
            continue;
        }

        let qualifier = rule.parsed_qualifier();
        let value = region
            .iter()
            .find(|segment| segment.matches(rule, qualifier.as_ref()))
            .and_then(|segment| segment.element(rule.element_position))
            .filter(|v| !v.trim().is_empty());

        if let Some(v) = value {
            out.insert(rule.target_field.clone(), v.to_string());
        }
    }

    for rule in rules {
        if out.contains_key(&rule.target_field) {
            continue;
        }
        if let Some(default) = rule.default_value.as_deref() {
            out.insert(rule.target_field.clone(), default.to_string());
        }
    }

    let mut missing = Vec::new();
    for rule in rules {
        if rule.required && !out.contains_key(&rule.target_field) && !missing.contains(&rule.target_field) {
            missing.push(rule.target_field.clone());
        }
    }
    missing
}

// ============================================================================
// TESTS
// ============================================================================
