//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::record::PolicyRecord;
use crate::storage::{RunRecord, RunStatus, StoredPolicy};
use crate::validator::ValidationReport;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for policy storage backends
///
/// Records are keyed by source name plus the validator's dedup key, so storing
/// the same document twice updates the existing row.
pub trait PolicyStore {
    // ===== Run Management =====

    /// Creates a new run for one source
    ///
    /// # Arguments
    ///
    /// * `source` - Name of the source being crawled
    /// * `config_hash` - Hash of the configuration file
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    fn create_run(&mut self, source: &str, config_hash: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Closes a run with its final status and validation counts
    fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        report: &ValidationReport,
    ) -> StorageResult<()>;

    // ===== Policies =====

    /// Inserts a record or refreshes the stored copy
    ///
    /// Attachments are added alongside; known attachment URLs are kept.
    ///
    /// # Returns
    ///
    /// The policy row ID
    fn upsert_policy(&mut self, run_id: i64, record: &PolicyRecord) -> StorageResult<i64>;

    /// Looks a stored policy up by source and dedup key
    fn get_policy(&self, source: &str, dedup_key: &str) -> StorageResult<Option<StoredPolicy>>;

    /// Remembers where an attachment was saved
    fn mark_attachment_downloaded(
        &mut self,
        policy_id: i64,
        url: &str,
        local_path: &str,
    ) -> StorageResult<()>;

    // ===== Statistics =====

    /// Counts stored policies per source, sorted by source name
    fn count_policies_by_source(&self) -> StorageResult<Vec<(String, u64)>>;

    /// Counts attachments as (known, downloaded)
    fn count_attachments(&self) -> StorageResult<(u64, u64)>;
}
