use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;

use crate::dead_letter::DeadLetterEntry;
use crate::lifecycle::{AuditLog, EdiStatus};

/// Timestamps are stored as fixed-width RFC 3339 text (microseconds, `Z`)
/// so that lexical order in SQL equals chronological order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL keeps readers going while the tracker appends
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("Failed to enable WAL mode")?;

    // ==========================================================================
    // Audit log (append-only, one row per lifecycle transition)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS edi_audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            correlation_id TEXT NOT NULL,
            retailer_id TEXT NOT NULL,
            transaction_set_code TEXT,
            po_number TEXT,
            status TEXT NOT NULL,
            source_file_path TEXT,
            message TEXT NOT NULL,
            error_detail TEXT,
            duration_ms INTEGER,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Dead letters
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS dead_letter_entry (
            id TEXT PRIMARY KEY,
            correlation_id TEXT NOT NULL,
            retailer_id TEXT NOT NULL,
            file_name TEXT NOT NULL,
            content_sha256 TEXT NOT NULL,
            original_content TEXT NOT NULL,
            error_report TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_correlation_id ON edi_audit_log(correlation_id, created_at)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_retailer_status ON edi_audit_log(retailer_id, status)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_created_at ON edi_audit_log(created_at)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_dlq_correlation_id ON dead_letter_entry(correlation_id)",
        [],
    )?;

    Ok(())
}

/// Opens (or creates) the database file and applies the schema
pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database: {:?}", path))?;
    setup_database(&conn)?;
    Ok(conn)
}

// ============================================================================
// AUDIT LOG
// ============================================================================

const AUDIT_COLUMNS: &str = "id, correlation_id, retailer_id, transaction_set_code, po_number,
     status, source_file_path, message, error_detail, duration_ms, created_at";

fn audit_from_row(row: &Row) -> rusqlite::Result<AuditLog> {
    let status_text: String = row.get(5)?;
    let status = status_text
        .parse::<EdiStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, e.into()))?;
    let created_at: String = row.get(10)?;

    Ok(AuditLog {
        id: row.get(0)?,
        correlation_id: row.get(1)?,
        retailer_id: row.get(2)?,
        transaction_set_code: row.get(3)?,
        po_number: row.get(4)?,
        status,
        source_file_path: row.get(6)?,
        message: row.get(7)?,
        error_detail: row.get(8)?,
        duration_ms: row.get(9)?,
        created_at: parse_timestamp(10, &created_at)?,
    })
}

/// Appends one audit record and returns its row id. The record's own `id` is ignored.
pub fn insert_audit_log(conn: &Connection, record: &AuditLog) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO edi_audit_log (
            correlation_id, retailer_id, transaction_set_code, po_number, status,
            source_file_path, message, error_detail, duration_ms, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            record.correlation_id,
            record.retailer_id,
            record.transaction_set_code,
            record.po_number,
            record.status.as_str(),
            record.source_file_path,
            record.message,
            record.error_detail,
            record.duration_ms,
            format_timestamp(&record.created_at),
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

/// Latest record for a correlation id: max `created_at`, then last written
pub fn latest_audit_log(conn: &Connection, correlation_id: &str) -> rusqlite::Result<Option<AuditLog>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM edi_audit_log
             WHERE correlation_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT 1",
            AUDIT_COLUMNS
        ),
        [correlation_id],
        audit_from_row,
    )
    .optional()
}

/// Full history for one document, oldest first
pub fn get_audit_trail(conn: &Connection, correlation_id: &str) -> rusqlite::Result<Vec<AuditLog>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM edi_audit_log
         WHERE correlation_id = ?1
         ORDER BY created_at ASC, id ASC",
        AUDIT_COLUMNS
    ))?;

    let logs = stmt
        .query_map([correlation_id], audit_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(logs)
}

/// Every audit record, in write order
pub fn get_all_audit_logs(conn: &Connection) -> rusqlite::Result<Vec<AuditLog>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM edi_audit_log ORDER BY id ASC",
        AUDIT_COLUMNS
    ))?;

    let logs = stmt
        .query_map([], audit_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(logs)
}

pub fn count_audit_logs(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM edi_audit_log", [], |row| row.get(0))
}

/// Deletes every audit record. Callers must check the environment guard first.
pub fn purge_audit_logs(conn: &Connection) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM edi_audit_log", [])
}

/// Cheap liveness probe for the health endpoint
pub fn ping(conn: &Connection) -> bool {
    conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
        .map(|v| v == 1)
        .unwrap_or(false)
}

// ============================================================================
// DEAD LETTERS
// ============================================================================

pub fn insert_dead_letter(conn: &Connection, entry: &DeadLetterEntry) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO dead_letter_entry (
            id, correlation_id, retailer_id, file_name, content_sha256,
            original_content, error_report, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            entry.id,
            entry.correlation_id,
            entry.retailer_id,
            entry.file_name,
            entry.content_sha256,
            entry.original_content,
            entry.error_report,
            format_timestamp(&entry.created_at),
        ],
    )?;

    Ok(())
}

/// Dead letters, newest first
pub fn list_dead_letters(conn: &Connection) -> rusqlite::Result<Vec<DeadLetterEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, correlation_id, retailer_id, file_name, content_sha256,
                original_content, error_report, created_at
         FROM dead_letter_entry
         ORDER BY created_at DESC, rowid DESC",
    )?;

    let entries = stmt
        .query_map([], |row| {
            let created_at: String = row.get(7)?;
            Ok(DeadLetterEntry {
                id: row.get(0)?,
                correlation_id: row.get(1)?,
                retailer_id: row.get(2)?,
                file_name: row.get(3)?,
                content_sha256: row.get(4)?,
                original_content: row.get(5)?,
                error_report: row.get(6)?,
                created_at: parse_timestamp(7, &created_at)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(entries)
}

// ============================================================================
// CSV EXPORT
// ============================================================================

#[derive(Debug, Serialize)]
struct AuditCsvRow<'a> {
    #[serde(rename = "Correlation_Id")]
    correlation_id: &'a str,
    #[serde(rename = "Retailer")]
    retailer_id: &'a str,
    #[serde(rename = "Transaction_Set")]
    transaction_set_code: &'a str,
    #[serde(rename = "PO_Number")]
    po_number: &'a str,
    #[serde(rename = "Status")]
    status: &'a str,
    #[serde(rename = "Source_File")]
    source_file_path: &'a str,
    #[serde(rename = "Message")]
    message: &'a str,
    #[serde(rename = "Error_Detail")]
    error_detail: &'a str,
    #[serde(rename = "Duration_Ms")]
    duration_ms: Option<i64>,
    #[serde(rename = "Created_At")]
    created_at: String,
}

/// Writes the whole audit trail to a CSV file, returns the number of rows
pub fn export_audit_csv(conn: &Connection, csv_path: &Path) -> Result<usize> {
    let logs = get_all_audit_logs(conn)?;
    let mut writer = csv::Writer::from_path(csv_path)
        .with_context(|| format!("Failed to create CSV file: {:?}", csv_path))?;

    for log in &logs {
        writer
            .serialize(AuditCsvRow {
                correlation_id: &log.correlation_id,
                retailer_id: &log.retailer_id,
                transaction_set_code: log.transaction_set_code.as_deref().unwrap_or(""),
                po_number: log.po_number.as_deref().unwrap_or(""),
                status: log.status.as_str(),
                source_file_path: log.source_file_path.as_deref().unwrap_or(""),
                message: &log.message,
                error_detail: log.error_detail.as_deref().unwrap_or(""),
                duration_ms: log.duration_ms,
                created_at: format_timestamp(&log.created_at),
            })
            .context("Failed to write audit row")?;
    }

    writer.flush().context("Failed to flush CSV file")?;
    Ok(logs.len())
}
