// 📊 Correlation Aggregator
// Pure functions over audit records: grouping by correlation id and
// counting documents by their latest status.

use serde::Serialize;
use std::collections::HashMap;

use crate::lifecycle::{AuditLog, EdiStatus};

/// All records for one document plus the authoritative latest record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationGroup {
    pub correlation_id: String,
    pub entries: Vec<AuditLog>,
    pub latest: AuditLog,
}

impl CorrelationGroup {
    pub fn status(&self) -> EdiStatus {
        self.latest.status
    }

    pub fn is_dead_letter(&self) -> bool {
        self.latest.status.is_dead_letter()
    }
}

/// Index of the latest entry: max `created_at`, ties go to the later position.
///
/// Input order is treated as insertion order.
pub fn latest_index(entries: &[AuditLog]) -> Option<usize> {
    entries
        .iter()
        .enumerate()
        .fold(None, |best: Option<usize>, (i, entry)| match best {
            Some(b) if entries[b].created_at > entry.created_at => Some(b),
            _ => Some(i),
        })
}

/// Group records by correlation id.
///
/// Groups appear in order of each id's first record; entries keep input order.
pub fn group_by_correlation(logs: &[AuditLog]) -> Vec<CorrelationGroup> {
    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut buckets: Vec<Vec<AuditLog>> = Vec::new();

    for log in logs {
        let slot = *positions
            .entry(log.correlation_id.as_str())
            .or_insert_with(|| {
                buckets.push(Vec::new());
                buckets.len() - 1
            });
        buckets[slot].push(log.clone());
    }

    buckets
        .into_iter()
        .filter_map(|entries| {
            let latest = entries[latest_index(&entries)?].clone();
            Some(CorrelationGroup {
                correlation_id: latest.correlation_id.clone(),
                entries,
                latest,
            })
        })
        .collect()
}

// ============================================================================
// STATUS SUMMARY
// ============================================================================

/// Number of documents whose latest status is each state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub received: usize,
    pub parsed: usize,
    pub validated: usize,
    pub transmitted: usize,
    pub acknowledged: usize,
    pub failed: usize,
}

impl StatusSummary {
    pub fn count(&self, status: EdiStatus) -> usize {
        match status {
            EdiStatus::Received => self.received,
            EdiStatus::Parsed => self.parsed,
            EdiStatus::Validated => self.validated,
            EdiStatus::Transmitted => self.transmitted,
            EdiStatus::Acknowledged => self.acknowledged,
            EdiStatus::Failed => self.failed,
        }
    }

    fn increment(&mut self, status: EdiStatus) {
        let slot = match status {
            EdiStatus::Received => &mut self.received,
            EdiStatus::Parsed => &mut self.parsed,
            EdiStatus::Validated => &mut self.validated,
            EdiStatus::Transmitted => &mut self.transmitted,
            EdiStatus::Acknowledged => &mut self.acknowledged,
            EdiStatus::Failed => &mut self.failed,
        };
        *slot += 1;
    }

    /// Distinct documents counted
    pub fn total(&self) -> usize {
        EdiStatus::ALL.iter().map(|s| self.count(*s)).sum()
    }

    /// Documents not yet in a terminal state
    pub fn in_flight(&self) -> usize {
        self.received + self.parsed + self.validated + self.transmitted
    }
}

/// Count each distinct correlation id once, under its latest status.
pub fn status_summary(logs: &[AuditLog]) -> StatusSummary {
    let mut summary = StatusSummary::default();
    for group in group_by_correlation(logs) {
        summary.increment(group.status());
    }
    summary
}
