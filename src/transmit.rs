// 📤 Transmission Sinks
// Where validated orders go next. The pipeline only sees the trait; real
// sinks own their timeouts, retries and rate limits.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use crate::error::{EdiError, Result};
use crate::order::CanonicalOrder;

/// Proof that a sink took the order
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub sink: String,
    /// Id assigned downstream (e.g. a draft order id)
    pub external_id: String,
    pub transmitted_at: DateTime<Utc>,
}

pub trait TransmissionSink: Send + Sync {
    fn name(&self) -> &str;

    fn transmit(&self, order: &CanonicalOrder) -> Result<Receipt>;

    /// Confirm the downstream side accepted the order. Sinks without an
    /// acknowledgment channel accept on receipt.
    fn acknowledge(&self, _receipt: &Receipt) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// LOCAL DRAFT-ORDER SINK
// ============================================================================

/// Stand-in for a commerce platform: logs the order and hands back a synthetic draft-order id.
#[derive(Debug)]
pub struct LocalDraftOrderSink {
    next_id: AtomicU64,
}

impl LocalDraftOrderSink {
    const FIRST_ID: u64 = 1_000_000;

    pub fn new() -> Self {
        LocalDraftOrderSink {
            next_id: AtomicU64::new(Self::FIRST_ID),
        }
    }
}

impl Default for LocalDraftOrderSink {
    fn default() -> Self {
        Self::new()
    }
}

impl TransmissionSink for LocalDraftOrderSink {
    fn name(&self) -> &str {
        "local-draft-orders"
    }

    fn transmit(&self, order: &CanonicalOrder) -> Result<Receipt> {
        if order.lines.is_empty() {
            return Err(EdiError::Transmission {
                sink: self.name().to_string(),
                message: format!("PO {} has no line items", order.po_number),
            });
        }

        let payload = serde_json::to_string(order)?;
        debug!(payload = %payload, "draft order payload");

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let external_id = format!("gid://local/DraftOrder/{}", id);
        info!(
            po_number = %order.po_number,
            lines = order.lines.len(),
            draft_order = %external_id,
            "draft order created"
        );

        Ok(Receipt {
            sink: self.name().to_string(),
            external_id,
            transmitted_at: Utc::now(),
        })
    }
}
