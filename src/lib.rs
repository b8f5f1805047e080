// EDI Orchestrator - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod error;          // Error taxonomy + validation errors
pub mod lifecycle;      // Status state machine + audit records
pub mod db;             // SQLite audit store
pub mod tracker;        // Transition-validating writer
pub mod aggregator;     // Correlation groups + status summary
pub mod dead_letter;    // Quarantine records
pub mod mapping;        // Profiles, registry, mapping engine
pub mod x12;            // Envelope/segment reader
pub mod order;          // Canonical purchase order
pub mod storage;        // Inbound file store
pub mod transmit;       // Downstream sinks
pub mod pipeline;       // Stage orchestration
pub mod config;
pub mod logging;

#[cfg(feature = "server")]
pub mod api;            // Axum HTTP surface

// Re-export commonly used types
pub use error::{EdiError, ValidationError};
pub use lifecycle::{AuditLog, EdiStatus, Transition};
pub use tracker::LifecycleTracker;
pub use aggregator::{group_by_correlation, status_summary, CorrelationGroup, StatusSummary};
pub use dead_letter::DeadLetterEntry;
pub use mapping::{MappingProfile, MappingRegistry, MappingRule, NormalizedDocument};
pub use x12::{read_interchange, Interchange, Segment, Transaction};
pub use order::{CanonicalOrder, CanonicalOrderLine};
pub use storage::{InboundStore, LocalFileStore};
pub use transmit::{LocalDraftOrderSink, Receipt, TransmissionSink};
pub use pipeline::{Accepted, IngestRequest, Orchestrator, PipelineOutcome};
pub use config::{AppConfig, Environment};
pub use logging::{init_logging, LogConfig};

/// Crate version, reported by both binaries
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
