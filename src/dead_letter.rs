// 🪦 Dead-Letter Entries
// A FAILED document is parked here with its original content and an error report.
// Nothing is ever retried from this set; remediation is a resubmission under a new id.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEntry {
    pub id: String,
    pub correlation_id: String,
    pub retailer_id: String,
    pub file_name: String,
    pub content_sha256: String,
    pub original_content: String,
    pub error_report: String,
    pub created_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn new(
        correlation_id: &str,
        retailer_id: &str,
        file_name: &str,
        original_content: &str,
        error: &str,
    ) -> Self {
        let created_at = Utc::now();
        DeadLetterEntry {
            id: uuid::Uuid::new_v4().to_string(),
            correlation_id: correlation_id.to_string(),
            retailer_id: retailer_id.trim().to_uppercase(),
            file_name: file_name.to_string(),
            content_sha256: content_digest(original_content),
            original_content: original_content.to_string(),
            error_report: build_error_report(
                correlation_id,
                retailer_id,
                file_name,
                error,
                created_at,
            ),
            created_at,
        }
    }
}

/// SHA-256 of the raw file, hex encoded
pub fn content_digest(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn build_error_report(
    correlation_id: &str,
    retailer_id: &str,
    file_name: &str,
    error: &str,
    at: DateTime<Utc>,
) -> String {
    let mut report = String::new();
    report.push_str("=== EDI Dead Letter Report ===\n");
    report.push_str(&format!(
        "Timestamp     : {}\n",
        at.to_rfc3339_opts(SecondsFormat::Millis, true)
    ));
    report.push_str(&format!("Correlation ID: {}\n", correlation_id));
    report.push_str(&format!("Retailer      : {}\n", retailer_id));
    report.push_str(&format!("Original File : {}\n", file_name));
    report.push_str("\n--- Error ---\n");
    report.push_str(error);
    report.push('\n');
    report.push_str("\n--- Resolution Steps ---\n");
    report.push_str("1. Correct the segment or element identified in the error above.\n");
    report.push_str("2. Resubmit the corrected file to POST /api/v1/edi/ingest.\n");
    report.push_str("   The resubmission is tracked under a NEW correlation id;\n");
    report.push_str(&format!(
        "   the history of {} is kept as-is.\n",
        correlation_id
    ));
    report.push_str("==============================\n");
    report
}
