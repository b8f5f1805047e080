// 🧭 Lifecycle Tracker
// The only writer of audit records. Every transition is validated against the
// state machine and appended atomically; nothing is ever updated in place.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use rusqlite::{Connection, TransactionBehavior};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::aggregator::{self, CorrelationGroup, StatusSummary};
use crate::config::Environment;
use crate::db;
use crate::dead_letter::DeadLetterEntry;
use crate::error::{EdiError, Result};
use crate::lifecycle::{AuditLog, EdiStatus, Transition};

/// Shared handle over the audit database.
///
/// Cloning is cheap; all clones serialize through the same connection, so
/// two writers racing on one correlation id are ordered and the loser sees
/// the winner's state.
#[derive(Clone)]
pub struct LifecycleTracker {
    db: Arc<Mutex<Connection>>,
}

impl LifecycleTracker {
    /// Wrap a connection whose schema is already set up
    pub fn new(conn: Connection) -> Self {
        LifecycleTracker {
            db: Arc::new(Mutex::new(conn)),
        }
    }

    /// In-memory tracker with schema applied (tests, dry runs)
    pub fn in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        db::setup_database(&conn)?;
        Ok(LifecycleTracker::new(conn))
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-write leaves an uncommitted sqlite transaction that is
        // rolled back on drop, so the connection is still consistent.
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Mint a new correlation id and write its RECEIVED record
    pub fn mint(
        &self,
        retailer_id: &str,
        source_file_path: Option<&str>,
        message: &str,
    ) -> Result<AuditLog> {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        self.open(&correlation_id, retailer_id, source_file_path, message, None)
    }

    /// Write the initial RECEIVED record for a caller-chosen correlation id
    pub fn open(
        &self,
        correlation_id: &str,
        retailer_id: &str,
        source_file_path: Option<&str>,
        message: &str,
        duration_ms: Option<i64>,
    ) -> Result<AuditLog> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if db::latest_audit_log(&tx, correlation_id)?.is_some() {
            return Err(EdiError::DuplicateCorrelation(correlation_id.to_string()));
        }

        let mut record = AuditLog {
            id: 0,
            correlation_id: correlation_id.to_string(),
            retailer_id: retailer_id.to_uppercase(),
            transaction_set_code: None,
            po_number: None,
            status: EdiStatus::Received,
            source_file_path: source_file_path.map(str::to_string),
            message: message.to_string(),
            error_detail: None,
            duration_ms,
            created_at: Utc::now().trunc_subsecs(6),
        };
        record.id = db::insert_audit_log(&tx, &record)?;
        tx.commit()?;

        info!(
            correlation_id = %record.correlation_id,
            retailer = %record.retailer_id,
            "document RECEIVED"
        );
        Ok(record)
    }

    /// Append exactly one record moving the document from `from_expected` to `to`.
    ///
    /// Fails with `InvalidTransition` (and writes nothing) when the document's
    /// latest state is not `from_expected` or `to` is not reachable from it.
    pub fn record_transition(&self, correlation_id: &str, transition: Transition) -> Result<AuditLog> {
        if transition.to == EdiStatus::Failed
            && transition
                .error_detail
                .as_deref()
                .map_or(true, |detail| detail.trim().is_empty())
        {
            return Err(EdiError::MissingErrorDetail(correlation_id.to_string()));
        }

        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let latest = db::latest_audit_log(&tx, correlation_id)?
            .ok_or_else(|| EdiError::UnknownCorrelation(correlation_id.to_string()))?;

        if latest.status != transition.from_expected
            || !transition.from_expected.can_transition_to(transition.to)
        {
            debug!(
                correlation_id,
                expected = %transition.from_expected,
                actual = %latest.status,
                to = %transition.to,
                "transition rejected"
            );
            return Err(EdiError::InvalidTransition {
                correlation_id: correlation_id.to_string(),
                expected: transition.from_expected,
                actual: Some(latest.status),
                to: transition.to,
            });
        }

        let mut record = AuditLog {
            id: 0,
            correlation_id: correlation_id.to_string(),
            retailer_id: latest.retailer_id.clone(),
            transaction_set_code: transition
                .transaction_set_code
                .or(latest.transaction_set_code.clone()),
            po_number: transition.po_number.or(latest.po_number.clone()),
            status: transition.to,
            source_file_path: latest.source_file_path.clone(),
            message: transition.message,
            error_detail: transition.error_detail,
            duration_ms: transition.duration_ms,
            created_at: next_timestamp(&latest.created_at),
        };
        record.id = db::insert_audit_log(&tx, &record)?;
        tx.commit()?;

        info!(
            correlation_id,
            from = %latest.status,
            to = %record.status,
            duration_ms = record.duration_ms,
            "lifecycle transition"
        );
        Ok(record)
    }

    /// Persist a dead-letter entry for a document that has been moved to FAILED
    pub fn quarantine(&self, entry: &DeadLetterEntry) -> Result<()> {
        let conn = self.lock();
        db::insert_dead_letter(&conn, entry)?;
        Ok(())
    }

    /// Delete every audit record. Only allowed in local and test environments.
    pub fn purge(&self, environment: Environment) -> Result<usize> {
        if !environment.purge_allowed() {
            return Err(EdiError::PurgeDisabled(environment.as_str().to_string()));
        }
        let conn = self.lock();
        let deleted = db::purge_audit_logs(&conn)?;
        info!(deleted, "audit log purged");
        Ok(deleted)
    }

    // ========================================================================
    // READS (point-in-time snapshots)
    // ========================================================================

    pub fn current_status(&self, correlation_id: &str) -> Result<Option<EdiStatus>> {
        let conn = self.lock();
        Ok(db::latest_audit_log(&conn, correlation_id)?.map(|log| log.status))
    }

    pub fn history(&self, correlation_id: &str) -> Result<Vec<AuditLog>> {
        let conn = self.lock();
        Ok(db::get_audit_trail(&conn, correlation_id)?)
    }

    pub fn all_logs(&self) -> Result<Vec<AuditLog>> {
        let conn = self.lock();
        Ok(db::get_all_audit_logs(&conn)?)
    }

    pub fn groups(&self) -> Result<Vec<CorrelationGroup>> {
        Ok(aggregator::group_by_correlation(&self.all_logs()?))
    }

    pub fn summary(&self) -> Result<StatusSummary> {
        Ok(aggregator::status_summary(&self.all_logs()?))
    }

    pub fn dead_letters(&self) -> Result<Vec<DeadLetterEntry>> {
        let conn = self.lock();
        Ok(db::list_dead_letters(&conn)?)
    }

    pub fn is_healthy(&self) -> bool {
        db::ping(&self.lock())
    }

    /// Run a read-only closure against the connection (CSV export, ad-hoc queries)
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> T) -> T {
        f(&self.lock())
    }
}

/// Strictly after `previous`, at the microsecond precision we store
fn next_timestamp(previous: &DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now().trunc_subsecs(6);
    if now > *previous {
        now
    } else {
        *previous + Duration::microseconds(1)
    }
}

// ============================================================================
// TESTS
// ============================================================================
