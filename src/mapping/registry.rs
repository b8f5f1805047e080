// 📚 Mapping Registry - Profiles by (retailer, transaction set)
// Built once at startup from a directory of JSON files, then read-only.
// Share it behind an Arc; there is no mutation after construction.

use anyhow::{Context as AnyhowContext, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use super::profile::{profile_key, MappingProfile};
use crate::error::EdiError;

// ============================================================================
// REGISTRY
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct MappingRegistry {
    profiles: BTreeMap<String, MappingProfile>,
}

impl MappingRegistry {
    /// Empty registry
    pub fn new() -> Self {
        MappingRegistry::default()
    }

    /// Load a single profile file
    pub fn profile_from_file<P: AsRef<Path>>(path: P) -> Result<MappingProfile> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read mapping profile: {:?}", path.as_ref()))?;

        let profile: MappingProfile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse mapping profile JSON: {:?}", path.as_ref()))?;

        Ok(profile)
    }

    /// Load every `*.json` profile in a directory (sorted by file name).
    ///
    /// Unreadable or invalid files are logged and skipped. A missing
    /// directory yields an empty registry.
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            warn!(path = %dir.display(), "mapping directory not found, no profiles loaded");
            return Ok(MappingRegistry::new());
        }

        let mut paths: Vec<_> = fs::read_dir(dir)
            .with_context(|| format!("Failed to list mapping directory: {:?}", dir))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().map_or(false, |ext| ext.eq_ignore_ascii_case("json")))
            .collect();
        paths.sort();

        let mut profiles = Vec::new();
        for path in paths {
            match Self::profile_from_file(&path) {
                Ok(profile) => profiles.push(profile),
                Err(e) => warn!(path = %path.display(), error = %format!("{:#}", e), "skipping mapping profile"),
            }
        }

        let registry = Self::from_profiles(profiles);
        info!(
            path = %dir.display(),
            profiles = registry.len(),
            "mapping registry loaded"
        );
        Ok(registry)
    }

    /// Build from already-parsed profiles.
    ///
    /// Invalid profiles are skipped. When two profiles share a key the first one wins.
    pub fn from_profiles(profiles: Vec<MappingProfile>) -> Self {
        let mut registry = MappingRegistry::new();

        for mut profile in profiles {
            if let Err(issues) = profile.validate() {
                let reasons: Vec<String> = issues.iter().map(|i| i.to_string()).collect();
                warn!(
                    key = %profile.key(),
                    reasons = %reasons.join("; "),
                    "rejecting invalid mapping profile"
                );
                continue;
            }

            profile.retailer_id = profile.retailer_id.trim().to_uppercase();
            profile.transaction_set_code = profile.transaction_set_code.trim().to_string();

            let key = profile.key();
            if registry.profiles.contains_key(&key) {
                warn!(key = %key, "duplicate mapping profile ignored");
                continue;
            }
            registry.profiles.insert(key, profile);
        }

        registry
    }

    /// Case-insensitive on retailer
    pub fn find(&self, retailer_id: &str, transaction_set_code: &str) -> Option<&MappingProfile> {
        self.profiles.get(&profile_key(retailer_id, transaction_set_code))
    }

    /// Like `find`, but a miss is an error
    pub fn require(
        &self,
        retailer_id: &str,
        transaction_set_code: &str,
    ) -> Result<&MappingProfile, EdiError> {
        self.find(retailer_id, transaction_set_code)
            .ok_or_else(|| EdiError::ProfileNotFound {
                retailer_id: retailer_id.to_string(),
                transaction_set_code: transaction_set_code.to_string(),
            })
    }

    /// All profiles keyed by "RETAILER:CODE", in key order
    pub fn all(&self) -> &BTreeMap<String, MappingProfile> {
        &self.profiles
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================
