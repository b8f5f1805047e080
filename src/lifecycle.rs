// 🔁 Document Lifecycle - explicit state machine
//
// RECEIVED → PARSED → VALIDATED → TRANSMITTED → ACKNOWLEDGED
//     └─────────┴──────────┴────────────┴──→ FAILED
//
// ACKNOWLEDGED and FAILED are terminal. A terminal document is never reopened:
// resubmission always starts a new correlation id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdiStatus {
    /// File arrived and was stored
    Received,
    /// Segments read and mapped into a normalized document
    Parsed,
    /// Normalized document passed validation
    Validated,
    /// Sent to the downstream sink
    Transmitted,
    /// Downstream confirmed receipt (terminal)
    Acknowledged,
    /// Dead-lettered (terminal)
    Failed,
}

impl EdiStatus {
    /// Every state, in pipeline order
    pub const ALL: [EdiStatus; 6] = [
        EdiStatus::Received,
        EdiStatus::Parsed,
        EdiStatus::Validated,
        EdiStatus::Transmitted,
        EdiStatus::Acknowledged,
        EdiStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EdiStatus::Received => "RECEIVED",
            EdiStatus::Parsed => "PARSED",
            EdiStatus::Validated => "VALIDATED",
            EdiStatus::Transmitted => "TRANSMITTED",
            EdiStatus::Acknowledged => "ACKNOWLEDGED",
            EdiStatus::Failed => "FAILED",
        }
    }

    /// The transition table
    pub fn allowed_next(&self) -> &'static [EdiStatus] {
        match self {
            EdiStatus::Received => &[EdiStatus::Parsed, EdiStatus::Failed],
            EdiStatus::Parsed => &[EdiStatus::Validated, EdiStatus::Failed],
            EdiStatus::Validated => &[EdiStatus::Transmitted, EdiStatus::Failed],
            EdiStatus::Transmitted => &[EdiStatus::Acknowledged, EdiStatus::Failed],
            EdiStatus::Acknowledged | EdiStatus::Failed => &[],
        }
    }

    pub fn can_transition_to(&self, next: EdiStatus) -> bool {
        self.allowed_next().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_next().is_empty()
    }

    /// Parked in the dead-letter set
    pub fn is_dead_letter(&self) -> bool {
        *self == EdiStatus::Failed
    }
}

impl fmt::Display for EdiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for EdiStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EdiStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown lifecycle status '{}'", s))
    }
}

// ============================================================================
// AUDIT LOG
// ============================================================================

/// One immutable record per lifecycle transition.
///
/// `id` is the storage row id and doubles as insertion order, which breaks
/// ties between records sharing a `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLog {
    pub id: i64,
    pub correlation_id: String,
    pub retailer_id: String,
    pub transaction_set_code: Option<String>,
    pub po_number: Option<String>,
    pub status: EdiStatus,
    pub source_file_path: Option<String>,
    pub message: String,
    pub error_detail: Option<String>,
    pub duration_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// TRANSITION REQUEST
// ============================================================================

/// A request to move one document from `from_expected` to `to`.
///
/// Identity fields left as `None` are carried forward from the document's
/// latest record, so `po_number` only has to be supplied once it is known.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from_expected: EdiStatus,
    pub to: EdiStatus,
    pub message: String,
    pub error_detail: Option<String>,
    pub duration_ms: Option<i64>,
    pub transaction_set_code: Option<String>,
    pub po_number: Option<String>,
}

impl Transition {
    pub fn new(from_expected: EdiStatus, to: EdiStatus, message: impl Into<String>) -> Self {
        Transition {
            from_expected,
            to,
            message: message.into(),
            error_detail: None,
            duration_ms: None,
            transaction_set_code: None,
            po_number: None,
        }
    }

    /// Shorthand for a move into FAILED
    pub fn failure(
        from_expected: EdiStatus,
        message: impl Into<String>,
        error_detail: impl Into<String>,
    ) -> Self {
        Transition::new(from_expected, EdiStatus::Failed, message).with_error_detail(error_detail)
    }

    pub fn with_error_detail(mut self, detail: impl Into<String>) -> Self {
        self.error_detail = Some(detail.into());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: i64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_transaction_set_code(mut self, code: impl Into<String>) -> Self {
        self.transaction_set_code = Some(code.into());
        self
    }

    pub fn with_po_number(mut self, po_number: Option<String>) -> Self {
        self.po_number = po_number;
        self
    }
}

// ============================================================================
// TESTS
// ============================================================================
