// 🔄 Pipeline Orchestrator
// RECEIVED → PARSED → VALIDATED → TRANSMITTED → ACKNOWLEDGED, one audit record
// per stage. Any document-level failure moves the document to FAILED from
// wherever it stopped and parks it in the dead-letter set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::db;
use crate::dead_letter::DeadLetterEntry;
use crate::error::{join_validation_errors, EdiError, Result};
use crate::lifecycle::{EdiStatus, Transition};
use crate::mapping::{self, MappingRegistry};
use crate::order::{CanonicalOrder, OrderContext};
use crate::storage::{InboundStore, LocalFileStore};
use crate::tracker::LifecycleTracker;
use crate::transmit::{LocalDraftOrderSink, TransmissionSink};
use crate::x12;

pub const DEFAULT_FILE_NAME: &str = "unknown.edi";

// ============================================================================
// REQUEST / RESPONSE
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    #[serde(default)]
    pub retailer_id: String,
    #[serde(default)]
    pub edi_content: String,
    #[serde(default)]
    pub file_name: Option<String>,
}

/// A stored, RECEIVED document waiting for `process`.
/// Serializes as the ingest response: `{ correlationId, message, acceptedAt }`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Accepted {
    pub correlation_id: String,
    pub message: String,
    pub accepted_at: DateTime<Utc>,
    #[serde(skip)]
    pub retailer_id: String,
    #[serde(skip)]
    pub file_name: String,
    #[serde(skip)]
    pub content: String,
    #[serde(skip)]
    pub source_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum PipelineOutcome {
    #[serde(rename_all = "camelCase")]
    Acknowledged {
        correlation_id: String,
        po_number: String,
        line_count: usize,
        external_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Failed {
        correlation_id: String,
        /// State the document was in when it stopped
        failed_from: EdiStatus,
        message: String,
        error_detail: String,
    },
}

impl PipelineOutcome {
    pub fn correlation_id(&self) -> &str {
        match self {
            PipelineOutcome::Acknowledged { correlation_id, .. } => correlation_id,
            PipelineOutcome::Failed { correlation_id, .. } => correlation_id,
        }
    }

    pub fn status(&self) -> EdiStatus {
        match self {
            PipelineOutcome::Acknowledged { .. } => EdiStatus::Acknowledged,
            PipelineOutcome::Failed { .. } => EdiStatus::Failed,
        }
    }
}

// ============================================================================
// INTERNAL STAGE STATE
// ============================================================================

/// Where a document got to, so a failure can be recorded from the right state
struct Progress {
    status: EdiStatus,
    transaction_set_code: Option<String>,
    po_number: Option<String>,
}

enum Halt {
    /// The document cannot continue; record FAILED and quarantine
    Reject { message: String, detail: String },
    /// The tracker refused a write or storage broke; there is nothing to record
    Abort(EdiError),
}

impl From<EdiError> for Halt {
    fn from(err: EdiError) -> Self {
        Halt::Abort(err)
    }
}

fn reject(message: &str, err: &EdiError) -> Halt {
    Halt::Reject {
        message: message.to_string(),
        detail: format!("{}: {}", err.kind(), err),
    }
}

fn elapsed_ms(start: Instant) -> i64 {
    i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX)
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

#[derive(Clone)]
pub struct Orchestrator {
    tracker: LifecycleTracker,
    registry: Arc<MappingRegistry>,
    store: Arc<dyn InboundStore>,
    sink: Arc<dyn TransmissionSink>,
}

impl Orchestrator {
    pub fn new(
        tracker: LifecycleTracker,
        registry: Arc<MappingRegistry>,
        store: Arc<dyn InboundStore>,
        sink: Arc<dyn TransmissionSink>,
    ) -> Self {
        Orchestrator {
            tracker,
            registry,
            store,
            sink,
        }
    }

    /// Wire the local stack: SQLite audit store, profile directory, file store, draft-order sink
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let conn = db::open_database(&config.db_path)?;
        let registry = MappingRegistry::load_dir(&config.mappings_dir)?;
        Ok(Orchestrator::new(
            LifecycleTracker::new(conn),
            Arc::new(registry),
            Arc::new(LocalFileStore::new(&config.storage_dir)),
            Arc::new(LocalDraftOrderSink::new()),
        ))
    }

    pub fn tracker(&self) -> &LifecycleTracker {
        &self.tracker
    }

    pub fn registry(&self) -> &MappingRegistry {
        &self.registry
    }

    /// Store the raw file and write its RECEIVED record under a fresh correlation id
    pub fn accept(&self, request: IngestRequest) -> Result<Accepted> {
        let retailer_id = request.retailer_id.trim().to_uppercase();
        if retailer_id.is_empty() {
            return Err(EdiError::MissingRequiredField("retailerId".to_string()));
        }
        if request.edi_content.trim().is_empty() {
            return Err(EdiError::MissingRequiredField("ediContent".to_string()));
        }
        let file_name = request
            .file_name
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string());

        let start = Instant::now();
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let accepted_at = Utc::now();

        let source_key =
            self.store
                .store_inbound(&correlation_id, &retailer_id, &request.edi_content, accepted_at)?;
        self.tracker.open(
            &correlation_id,
            &retailer_id,
            Some(&source_key),
            &format!("File received and stored: {}", source_key),
            Some(elapsed_ms(start)),
        )?;

        Ok(Accepted {
            message: format!(
                "EDI file '{}' accepted for processing. Use the correlation id to track status.",
                file_name
            ),
            correlation_id,
            accepted_at,
            retailer_id,
            file_name,
            content: request.edi_content,
            source_key,
        })
    }

    /// Drive a RECEIVED document through every stage.
    ///
    /// Document problems come back as `Ok(PipelineOutcome::Failed)`. `Err` means
    /// the tracker refused a write (for example, another worker moved the
    /// document first) or storage is unavailable.
    pub fn process(&self, accepted: &Accepted) -> Result<PipelineOutcome> {
        info!(
            correlation_id = %accepted.correlation_id,
            retailer = %accepted.retailer_id,
            file = %accepted.file_name,
            "pipeline started"
        );

        let mut progress = Progress {
            status: EdiStatus::Received,
            transaction_set_code: None,
            po_number: None,
        };

        match self.run_stages(accepted, &mut progress) {
            Ok(outcome) => Ok(outcome),
            Err(Halt::Abort(err)) => {
                error!(
                    correlation_id = %accepted.correlation_id,
                    error = %err,
                    "pipeline aborted"
                );
                Err(err)
            }
            Err(Halt::Reject { message, detail }) => self.fail(accepted, &progress, message, detail),
        }
    }

    /// `accept` followed by `process`
    pub fn ingest(&self, request: IngestRequest) -> Result<PipelineOutcome> {
        let accepted = self.accept(request)?;
        self.process(&accepted)
    }

    fn run_stages(
        &self,
        accepted: &Accepted,
        progress: &mut Progress,
    ) -> std::result::Result<PipelineOutcome, Halt> {
        let cid = accepted.correlation_id.as_str();

        // ---- PARSED: envelope, profile, mapping
        let start = Instant::now();
        let interchange = x12::read_interchange(&accepted.content)
            .map_err(|e| reject("EDI envelope could not be read", &e))?;
        let transaction = interchange
            .first_transaction()
            .map_err(|e| reject("EDI envelope could not be read", &e))?;
        let code = transaction.transaction_set_code.clone();
        progress.transaction_set_code = Some(code.clone());

        let profile = self
            .registry
            .require(&accepted.retailer_id, &code)
            .map_err(|e| reject("No mapping profile for document", &e))?;

        let (document, errors) = mapping::apply(profile, &transaction.raw_segments());
        progress.po_number = document.get("poNumber").map(str::to_string);
        if !errors.is_empty() {
            return Err(Halt::Reject {
                message: format!("Mapping failed with {} validation error(s)", errors.len()),
                detail: join_validation_errors(&errors),
            });
        }

        let parsed = Transition::new(
            EdiStatus::Received,
            EdiStatus::Parsed,
            format!(
                "Parsed {} line items from {} transaction using profile {}",
                document.line_count(),
                code,
                profile.key()
            ),
        )
        .with_transaction_set_code(code.clone())
        .with_po_number(progress.po_number.clone())
        .with_duration_ms(elapsed_ms(start));
        self.tracker.record_transition(cid, parsed)?;
        progress.status = EdiStatus::Parsed;

        // ---- VALIDATED: typed canonical order
        let start = Instant::now();
        let context = OrderContext {
            correlation_id: cid.to_string(),
            retailer_id: accepted.retailer_id.clone(),
            interchange_control_number: Some(interchange.control_number.clone()),
            transaction_control_number: Some(transaction.control_number.clone()),
        };
        let order = CanonicalOrder::from_document(context, &document).map_err(|errors| Halt::Reject {
            message: "Canonical order validation failed".to_string(),
            detail: join_validation_errors(&errors),
        })?;

        self.tracker.record_transition(
            cid,
            Transition::new(
                EdiStatus::Parsed,
                EdiStatus::Validated,
                format!("Validation passed: {} lines verified", order.lines.len()),
            )
            .with_duration_ms(elapsed_ms(start)),
        )?;
        progress.status = EdiStatus::Validated;

        // ---- TRANSMITTED
        let start = Instant::now();
        let receipt = self
            .sink
            .transmit(&order)
            .map_err(|e| reject("Transmission failed", &e))?;

        self.tracker.record_transition(
            cid,
            Transition::new(
                EdiStatus::Validated,
                EdiStatus::Transmitted,
                format!(
                    "Transmitted via {}. Draft order: {}",
                    receipt.sink, receipt.external_id
                ),
            )
            .with_duration_ms(elapsed_ms(start)),
        )?;
        progress.status = EdiStatus::Transmitted;

        // ---- ACKNOWLEDGED
        let start = Instant::now();
        self.sink
            .acknowledge(&receipt)
            .map_err(|e| reject("Acknowledgment failed", &e))?;

        self.tracker.record_transition(
            cid,
            Transition::new(
                EdiStatus::Transmitted,
                EdiStatus::Acknowledged,
                format!("Pipeline complete. Draft order: {}", receipt.external_id),
            )
            .with_duration_ms(elapsed_ms(start)),
        )?;
        progress.status = EdiStatus::Acknowledged;

        // Only acknowledged documents leave inbound/
        if let Err(e) = self.store.archive_processed(&accepted.source_key) {
            warn!(correlation_id = cid, error = %e, "could not archive processed file");
        }

        info!(
            correlation_id = cid,
            po_number = %order.po_number,
            draft_order = %receipt.external_id,
            "pipeline complete"
        );

        Ok(PipelineOutcome::Acknowledged {
            correlation_id: cid.to_string(),
            po_number: order.po_number,
            line_count: order.lines.len(),
            external_id: receipt.external_id,
        })
    }

    /// Record FAILED from the document's current state, then quarantine it
    fn fail(
        &self,
        accepted: &Accepted,
        progress: &Progress,
        message: String,
        detail: String,
    ) -> Result<PipelineOutcome> {
        error!(
            correlation_id = %accepted.correlation_id,
            retailer = %accepted.retailer_id,
            stage = %progress.status,
            error = %detail,
            "pipeline FAILED"
        );

        let mut transition = Transition::failure(
            progress.status,
            format!("Processing failed: {}", message),
            detail.clone(),
        )
        .with_po_number(progress.po_number.clone());
        transition.transaction_set_code = progress.transaction_set_code.clone();
        self.tracker.record_transition(&accepted.correlation_id, transition)?;

        let entry = DeadLetterEntry::new(
            &accepted.correlation_id,
            &accepted.retailer_id,
            &accepted.file_name,
            &accepted.content,
            &format!("{}: {}", message, detail),
        );
        self.tracker.quarantine(&entry)?;
        warn!(
            correlation_id = %accepted.correlation_id,
            dead_letter = %entry.id,
            "document quarantined"
        );

        Ok(PipelineOutcome::Failed {
            correlation_id: accepted.correlation_id.clone(),
            failed_from: progress.status,
            message,
            error_detail: detail,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{MappingProfile, MappingRule};
    use crate::order::CanonicalOrder;
    use crate::transmit::Receipt;
    use tempfile::TempDir;

    const SAMPLE_850: &str = "ISA*00*          *00*          *ZZ*TARGET         *ZZ*VENDORABC      *260219*1200*^*00501*000000042*0*P*>~GS*PO*TGTBUY*VENDORABC*20260219*1200*42*X*005010~ST*850*0001~BEG*00*SA*TGT-2026-00042**20260219~REF*DP*042~DTM*002*20260305~N1*ST*Target Store #1742*92*1742~N3*700 Nicollet Mall~N4*Minneapolis*MN*55402~PO1*1*120*EA*24.99**UI*089541234567~PO1*2*60*EA*49.99**UI*089599876543~CTT*2~SE*11*0001~GE*1*42~IEA*1*000000042~";

    struct RefusingSink;

    impl TransmissionSink for RefusingSink {
        fn name(&self) -> &str {
            "refusing"
        }

        fn transmit(&self, order: &CanonicalOrder) -> Result<Receipt> {
            Err(EdiError::Transmission {
                sink: "refusing".to_string(),
                message: format!("store closed for PO {}", order.po_number),
            })
        }
    }

    /// Accepts the order, but another writer fails the document before it can be acknowledged
    struct PreemptedSink {
        tracker: LifecycleTracker,
        correlation_id: std::sync::Mutex<Option<String>>,
    }

    impl TransmissionSink for PreemptedSink {
        fn name(&self) -> &str {
            "preempted"
        }

        fn transmit(&self, _order: &CanonicalOrder) -> Result<Receipt> {
            Ok(Receipt {
                sink: "preempted".to_string(),
                external_id: "ext-1".to_string(),
                transmitted_at: Utc::now(),
            })
        }

        fn acknowledge(&self, _receipt: &Receipt) -> Result<()> {
            if let Some(id) = self.correlation_id.lock().unwrap().as_deref() {
                self.tracker.record_transition(
                    id,
                    Transition::failure(EdiStatus::Transmitted, "cancelled by operator", "order withdrawn"),
                )?;
            }
            Ok(())
        }
    }

    fn target_profile() -> MappingProfile {
        MappingProfile {
            retailer_id: "TARGET".to_string(),
            transaction_set_code: "850".to_string(),
            description: String::new(),
            version: "1".to_string(),
            element_delimiter: '*',
            line_loop_segment: None,
            header_mappings: vec![
                MappingRule::new("BEG", 3, "poNumber").required(),
                MappingRule::new("BEG", 2, "purchaseOrderType").required(),
                MappingRule::new("BEG", 5, "poDate").required(),
                MappingRule::new("N1", 2, "shipToName").with_qualifier("01:ST").required(),
            ],
            line_mappings: vec![
                MappingRule::new("PO1", 7, "sku").required().line_level(),
                MappingRule::new("PO1", 2, "quantityOrdered").required().line_level(),
                MappingRule::new("PO1", 3, "unitOfMeasure").line_level(),
                MappingRule::new("PO1", 4, "unitPrice").line_level(),
            ],
        }
    }

    fn orchestrator(dir: &TempDir, sink: Arc<dyn TransmissionSink>) -> Orchestrator {
        Orchestrator::new(
            LifecycleTracker::in_memory().unwrap(),
            Arc::new(MappingRegistry::from_profiles(vec![target_profile()])),
            Arc::new(LocalFileStore::new(dir.path())),
            sink,
        )
    }

    fn request(retailer: &str, content: &str) -> IngestRequest {
        IngestRequest {
            retailer_id: retailer.to_string(),
            edi_content: content.to_string(),
            file_name: Some("po.edi".to_string()),
        }
    }

    fn statuses(o: &Orchestrator, id: &str) -> Vec<EdiStatus> {
        o.tracker().history(id).unwrap().iter().map(|l| l.status).collect()
    }

    #[test]
    fn test_happy_path_reaches_acknowledged() {
        let dir = TempDir::new().unwrap();
        let o = orchestrator(&dir, Arc::new(LocalDraftOrderSink::new()));

        let outcome = o.ingest(request("target", SAMPLE_850)).unwrap();
        assert_eq!(outcome.status(), EdiStatus::Acknowledged);

        let id = outcome.correlation_id();
        assert_eq!(
            statuses(&o, id),
            vec![
                EdiStatus::Received,
                EdiStatus::Parsed,
                EdiStatus::Validated,
                EdiStatus::Transmitted,
                EdiStatus::Acknowledged,
            ]
        );

        let history = o.tracker().history(id).unwrap();
        assert!(history.iter().all(|l| l.duration_ms.is_some()));
        assert_eq!(history[4].po_number.as_deref(), Some("TGT-2026-00042"));
        assert_eq!(history[4].transaction_set_code.as_deref(), Some("850"));
        assert!(history.windows(2).all(|w| w[0].created_at < w[1].created_at));
        assert!(o.tracker().dead_letters().unwrap().is_empty());
        println!("✅ Pipeline happy path PASSED");
    }

    #[test]
    fn test_missing_profile_fails_from_received() {
        let dir = TempDir::new().unwrap();
        let o = orchestrator(&dir, Arc::new(LocalDraftOrderSink::new()));

        let outcome = o.ingest(request("kroger", SAMPLE_850)).unwrap();
        match &outcome {
            PipelineOutcome::Failed { failed_from, error_detail, .. } => {
                assert_eq!(*failed_from, EdiStatus::Received);
                assert!(error_detail.starts_with("ProfileNotFound"));
            }
            other => panic!("expected failure, got {:?}", other),
        }

        let id = outcome.correlation_id();
        assert_eq!(statuses(&o, id), vec![EdiStatus::Received, EdiStatus::Failed]);

        let dead = o.tracker().dead_letters().unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].correlation_id, id);
        assert_eq!(dead[0].original_content, SAMPLE_850);
    }

    #[test]
    fn test_missing_beg_fails_with_required_field() {
        let dir = TempDir::new().unwrap();
        let o = orchestrator(&dir, Arc::new(LocalDraftOrderSink::new()));

        let without_beg = SAMPLE_850.replace("BEG*00*SA*TGT-2026-00042**20260219~", "");
        let outcome = o.ingest(request("TARGET", &without_beg)).unwrap();

        let history = o.tracker().history(outcome.correlation_id()).unwrap();
        let failed = history.last().unwrap();
        assert_eq!(failed.status, EdiStatus::Failed);
        let detail = failed.error_detail.as_deref().unwrap();
        assert!(detail.contains("MissingRequiredField(poNumber)"));
        assert!(detail.contains("MissingRequiredField(poDate)"));
    }

    #[test]
    fn test_transmission_failure_fails_from_validated() {
        let dir = TempDir::new().unwrap();
        let o = orchestrator(&dir, Arc::new(RefusingSink));

        let outcome = o.ingest(request("TARGET", SAMPLE_850)).unwrap();
        assert!(matches!(
            outcome,
            PipelineOutcome::Failed { failed_from: EdiStatus::Validated, .. }
        ));

        let history = o.tracker().history(outcome.correlation_id()).unwrap();
        let failed = history.last().unwrap();
        assert_eq!(failed.po_number.as_deref(), Some("TGT-2026-00042"));
        assert!(failed.error_detail.as_deref().unwrap().contains("store closed"));
        assert_eq!(o.tracker().summary().unwrap().failed, 1);
    }

    #[test]
    fn test_malformed_envelope_is_dead_lettered() {
        let dir = TempDir::new().unwrap();
        let o = orchestrator(&dir, Arc::new(LocalDraftOrderSink::new()));

        let outcome = o.ingest(request("TARGET", "this is not x12")).unwrap();
        match outcome {
            PipelineOutcome::Failed { error_detail, .. } => {
                assert!(error_detail.starts_with("MalformedSegment"))
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_blank_request_is_rejected_before_minting() {
        let dir = TempDir::new().unwrap();
        let o = orchestrator(&dir, Arc::new(LocalDraftOrderSink::new()));

        assert!(matches!(
            o.accept(request("  ", SAMPLE_850)),
            Err(EdiError::MissingRequiredField(ref f)) if f == "retailerId"
        ));
        assert!(matches!(
            o.accept(request("TARGET", " ")),
            Err(EdiError::MissingRequiredField(ref f)) if f == "ediContent"
        ));
        assert!(o.tracker().all_logs().unwrap().is_empty());
    }

    #[test]
    fn test_accept_then_process_separately() {
        let dir = TempDir::new().unwrap();
        let o = orchestrator(&dir, Arc::new(LocalDraftOrderSink::new()));

        let mut req = request("target", SAMPLE_850);
        req.file_name = None;
        let accepted = o.accept(req).unwrap();
        assert_eq!(accepted.file_name, DEFAULT_FILE_NAME);
        assert_eq!(
            o.tracker().current_status(&accepted.correlation_id).unwrap(),
            Some(EdiStatus::Received)
        );

        let json = serde_json::to_value(&accepted).unwrap();
        assert!(json.get("correlationId").is_some());
        assert!(json.get("acceptedAt").is_some());
        assert!(json.get("content").is_none());

        o.process(&accepted).unwrap();
        // A second worker on the same document loses and writes nothing
        let err = o.process(&accepted).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(o.tracker().history(&accepted.correlation_id).unwrap().len(), 5);
    }

    #[test]
    fn test_lost_acknowledgment_leaves_file_in_inbound() {
        let dir = TempDir::new().unwrap();
        let tracker = LifecycleTracker::in_memory().unwrap();
        let sink = Arc::new(PreemptedSink {
            tracker: tracker.clone(),
            correlation_id: std::sync::Mutex::new(None),
        });
        let store = Arc::new(LocalFileStore::new(dir.path()));
        let o = Orchestrator::new(
            tracker,
            Arc::new(MappingRegistry::from_profiles(vec![target_profile()])),
            store.clone(),
            sink.clone(),
        );

        let accepted = o.accept(request("target", SAMPLE_850)).unwrap();
        *sink.correlation_id.lock().unwrap() = Some(accepted.correlation_id.clone());

        let err = o.process(&accepted).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(
            o.tracker().current_status(&accepted.correlation_id).unwrap(),
            Some(EdiStatus::Failed)
        );
        // Not acknowledged, so not archived
        assert_eq!(store.retrieve(&accepted.source_key).unwrap(), SAMPLE_850);
    }

    #[test]
    fn test_resubmission_gets_new_correlation_id() {
        let dir = TempDir::new().unwrap();
        let o = orchestrator(&dir, Arc::new(LocalDraftOrderSink::new()));

        let first = o.ingest(request("kroger", SAMPLE_850)).unwrap();
        let second = o.ingest(request("target", SAMPLE_850)).unwrap();

        assert_ne!(first.correlation_id(), second.correlation_id());
        assert_eq!(
            statuses(&o, first.correlation_id()),
            vec![EdiStatus::Received, EdiStatus::Failed]
        );
        let summary = o.tracker().summary().unwrap();
        assert_eq!((summary.failed, summary.acknowledged), (1, 1));
    }
}
