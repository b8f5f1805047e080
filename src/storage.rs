// 🗄️ Inbound File Store
// Raw EDI is written to disk on receipt (before any parsing) and moved to
// processed/ once a document is acknowledged. Keys look like
// local://inbound/2026/02/19/target/<correlation id>.edi

use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{EdiError, Result};

pub const LOCAL_SCHEME: &str = "local://";
const INBOUND_PREFIX: &str = "inbound/";
const PROCESSED_PREFIX: &str = "processed/";

/// Where raw documents live. Implementations must be safe to share across threads.
pub trait InboundStore: Send + Sync {
    /// Persist raw content; returns the storage key
    fn store_inbound(
        &self,
        correlation_id: &str,
        retailer_id: &str,
        content: &str,
        received_at: DateTime<Utc>,
    ) -> Result<String>;

    /// Move a stored document to the processed area; returns the new key
    fn archive_processed(&self, key: &str) -> Result<String>;

    fn retrieve(&self, key: &str) -> Result<String>;
}

// ============================================================================
// LOCAL FILESYSTEM STORE
// ============================================================================

#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        LocalFileStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = key.strip_prefix(LOCAL_SCHEME).ok_or_else(|| {
            EdiError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a local storage key: {}", key),
            ))
        })?;
        if relative.split('/').any(|part| part == "..") {
            return Err(EdiError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("storage key escapes the store: {}", key),
            )));
        }
        Ok(self.root.join(relative))
    }
}

/// Retailer ids become directory names
fn path_component(value: &str) -> String {
    let cleaned: String = value
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

/// Relative inbound path for a document received at `received_at`
pub fn inbound_path(correlation_id: &str, retailer_id: &str, received_at: DateTime<Utc>) -> String {
    format!(
        "{}{}/{}/{}.edi",
        INBOUND_PREFIX,
        received_at.format("%Y/%m/%d"),
        path_component(retailer_id),
        path_component(correlation_id)
    )
}

impl InboundStore for LocalFileStore {
    fn store_inbound(
        &self,
        correlation_id: &str,
        retailer_id: &str,
        content: &str,
        received_at: DateTime<Utc>,
    ) -> Result<String> {
        let relative = inbound_path(correlation_id, retailer_id, received_at);
        let path = self.root.join(&relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;

        info!(path = %path.display(), bytes = content.len(), "stored inbound EDI");
        Ok(format!("{}{}", LOCAL_SCHEME, relative))
    }

    fn archive_processed(&self, key: &str) -> Result<String> {
        let archived_key = key.replacen(INBOUND_PREFIX, PROCESSED_PREFIX, 1);
        if archived_key == key {
            return Ok(archived_key);
        }

        let from = self.resolve(key)?;
        let to = self.resolve(&archived_key)?;
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&from, &to)?;

        debug!(from = %key, to = %archived_key, "archived processed EDI");
        Ok(archived_key)
    }

    fn retrieve(&self, key: &str) -> Result<String> {
        Ok(fs::read_to_string(self.resolve(key)?)?)
    }
}

// ============================================================================
// TESTS
// ============================================================================
