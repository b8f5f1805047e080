// ⚠️ Error Taxonomy
// Domain errors for the lifecycle tracker, mapping engine, and segment reader

use crate::lifecycle::EdiStatus;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

pub type Result<T, E = EdiError> = std::result::Result<T, E>;

// ============================================================================
// EDI ERROR
// ============================================================================

#[derive(Debug, Error)]
pub enum EdiError {
    /// No mapping profile is loaded for the (retailer, transaction set) pair.
    /// Fatal for the document: profiles only change on restart.
    #[error(
        "no mapping profile found for retailer '{retailer_id}' and transaction set '{transaction_set_code}'"
    )]
    ProfileNotFound {
        retailer_id: String,
        transaction_set_code: String,
    },

    /// A required rule produced no value.
    #[error("missing required field '{0}'")]
    MissingRequiredField(String),

    /// The document is not in the expected state, or the target state is not reachable from it.
    #[error(
        "invalid transition for {correlation_id}: expected {expected}, found {}, requested {to}",
        actual.map(|s| s.as_str()).unwrap_or("nothing")
    )]
    InvalidTransition {
        correlation_id: String,
        expected: EdiStatus,
        actual: Option<EdiStatus>,
        to: EdiStatus,
    },

    /// Input that could not be read as an X12 segment stream.
    #[error("malformed segment {segment_id} (segment #{line}): {message}")]
    MalformedSegment {
        segment_id: String,
        line: usize,
        message: String,
    },

    #[error("unknown correlation id: {0}")]
    UnknownCorrelation(String),

    #[error("correlation id already exists: {0}")]
    DuplicateCorrelation(String),

    #[error("transition to FAILED for {0} requires a non-empty error detail")]
    MissingErrorDetail(String),

    #[error("transmission via {sink} failed: {message}")]
    Transmission { sink: String, message: String },

    #[error("audit purge is disabled in the {0} environment")]
    PurgeDisabled(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EdiError {
    /// Losing a transition race is recoverable: nothing was written.
    pub fn is_conflict(&self) -> bool {
        matches!(self, EdiError::InvalidTransition { .. })
    }

    /// Short machine-readable kind, used in API error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            EdiError::ProfileNotFound { .. } => "ProfileNotFound",
            EdiError::MissingRequiredField(_) => "MissingRequiredField",
            EdiError::InvalidTransition { .. } => "InvalidTransition",
            EdiError::MalformedSegment { .. } => "MalformedSegment",
            EdiError::UnknownCorrelation(_) => "UnknownCorrelation",
            EdiError::DuplicateCorrelation(_) => "DuplicateCorrelation",
            EdiError::MissingErrorDetail(_) => "MissingErrorDetail",
            EdiError::Transmission { .. } => "Transmission",
            EdiError::PurgeDisabled(_) => "PurgeDisabled",
            EdiError::Storage(_) => "Storage",
            EdiError::Io(_) => "Io",
            EdiError::Json(_) => "Json",
        }
    }

    pub(crate) fn malformed(segment_id: &str, line: usize, message: impl Into<String>) -> Self {
        EdiError::MalformedSegment {
            segment_id: segment_id.to_string(),
            line,
            message: message.into(),
        }
    }
}

// ============================================================================
// VALIDATION ERRORS (values, not failures of the engine itself)
// ============================================================================

/// One problem found while mapping or coercing a document.
/// `line` is the 1-based line-item number for line-level problems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ValidationError {
    MissingRequiredField {
        target_field: String,
        line: Option<usize>,
    },
    InvalidValue {
        field: String,
        value: String,
        expected: String,
        line: Option<usize>,
    },
    Constraint {
        field: String,
        message: String,
        line: Option<usize>,
    },
}

impl ValidationError {
    pub fn missing(target_field: &str) -> Self {
        ValidationError::MissingRequiredField {
            target_field: target_field.to_string(),
            line: None,
        }
    }

    pub fn missing_on_line(target_field: &str, line: usize) -> Self {
        ValidationError::MissingRequiredField {
            target_field: target_field.to_string(),
            line: Some(line),
        }
    }

    pub fn field(&self) -> &str {
        match self {
            ValidationError::MissingRequiredField { target_field, .. } => target_field,
            ValidationError::InvalidValue { field, .. } => field,
            ValidationError::Constraint { field, .. } => field,
        }
    }
}

fn write_line(f: &mut fmt::Formatter<'_>, line: &Option<usize>) -> fmt::Result {
    match line {
        Some(n) => write!(f, " on line {}", n),
        None => Ok(()),
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingRequiredField { target_field, line } => {
                write!(f, "MissingRequiredField({})", target_field)?;
                write_line(f, line)
            }
            ValidationError::InvalidValue {
                field,
                value,
                expected,
                line,
            } => {
                write!(f, "InvalidValue({}): '{}' is not {}", field, value, expected)?;
                write_line(f, line)
            }
            ValidationError::Constraint {
                field,
                message,
                line,
            } => {
                write!(f, "Constraint({}): {}", field, message)?;
                write_line(f, line)
            }
        }
    }
}

/// Joins validation errors into the single `errorDetail` string of a FAILED record.
pub fn join_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
