//! Engine configuration via `pagoda.toml`
//!
//! On first open a default `pagoda.toml` is written next to the data. To
//! change settings, edit the file and reopen.

use serde::{Deserialize, Serialize};
use std::path::Path;

use pagoda_core::{Error, Result, MAX_DOCUMENT_SIZE};

/// Config file name placed in the data directory.
pub const CONFIG_FILE_NAME: &str = "pagoda.toml";

/// What to log when a matched document has no `_id`
///
/// A logged update normally selects its document by `_id`. Without one the
/// engine either falls back to the caller's filter, which may select a
/// different document on replay, or refuses the update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingIdPolicy {
    /// Log the original filter as the selector
    #[default]
    LogOriginalFilter,
    /// Fail with `MissingIdForReplication`
    Reject,
}

/// Engine configuration loaded from `pagoda.toml`.
///
/// # Example
///
/// ```toml
/// max_document_size = 16777216
/// yield_every = 128
/// missing_id_policy = "log_original_filter"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Largest encoded document an update may produce, in bytes.
    pub max_document_size: usize,
    /// Scanned candidates between periodic yields.
    pub yield_every: u64,
    /// Scanned candidates between yields taken on non-matching documents.
    pub nonmatch_yield_every: u64,
    /// Scanned candidates between yields taken after a write in a multi-update.
    pub write_yield_every: u64,
    /// Oplog appends between write-barrier flushes.
    pub commit_every: usize,
    /// Times one update call is retried after paging a record in.
    pub page_fault_retries: u32,
    /// Record capacity as a multiple of its encoded size.
    pub padding_factor: f64,
    /// Behavior for logged updates of documents without `_id`.
    pub missing_id_policy: MissingIdPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_document_size: MAX_DOCUMENT_SIZE,
            yield_every: 128,
            nonmatch_yield_every: 256,
            write_yield_every: 64,
            commit_every: 32,
            page_fault_retries: 8,
            padding_factor: 1.5,
            missing_id_policy: MissingIdPolicy::LogOriginalFilter,
        }
    }
}

impl EngineConfig {
    /// Check values that parse but make no sense.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for zero cadences or sizes and a padding
    /// factor below 1.0.
    pub fn validate(&self) -> Result<()> {
        if self.max_document_size == 0 {
            return Err(Error::InvalidConfig(
                "max_document_size must be positive".to_string(),
            ));
        }
        if self.yield_every == 0 || self.nonmatch_yield_every == 0 || self.write_yield_every == 0 {
            return Err(Error::InvalidConfig(
                "yield cadences must be positive".to_string(),
            ));
        }
        if self.commit_every == 0 {
            return Err(Error::InvalidConfig(
                "commit_every must be positive".to_string(),
            ));
        }
        if self.padding_factor.is_nan() || self.padding_factor < 1.0 {
            return Err(Error::InvalidConfig(format!(
                "padding_factor {} is below 1.0",
                self.padding_factor
            )));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Pagoda engine configuration

# Largest document an update may produce, in bytes (default: 16 MiB)
max_document_size = 16777216

# Cooperative yield cadences, in scanned candidates
yield_every = 128
nonmatch_yield_every = 256
write_yield_every = 64

# Oplog appends between flushes of the file log
commit_every = 32

# Retries of one update call after a record is paged in
page_fault_retries = 8

# Record capacity as a multiple of its encoded size (>= 1.0)
padding_factor = 1.5

# Logged update of a document without _id:
#   "log_original_filter" = log the caller's filter as the selector
#   "reject"              = fail the update
missing_id_policy = "log_original_filter"
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfig(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: EngineConfig = toml::from_str(&content).map_err(|e| {
            Error::InvalidConfig(format!(
                "failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::InvalidConfig(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
