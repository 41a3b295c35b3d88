//! Output handler traits and types
//!
//! This module defines the trait interface for output handlers and
//! associated data structures for crawl summaries.

use crate::record::PolicyRecord;
use crate::storage::{RunStatus, StorageError};
use crate::validator::ValidationReport;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to serialize record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Outcome of one source's run
#[derive(Debug, Clone)]
pub struct SourceSummary {
    pub source: String,
    pub status: RunStatus,
    /// Accepted records returned by the run
    pub policies: usize,
    pub report: ValidationReport,
    pub failed_classifications: Vec<String>,
    pub abort_reason: Option<String>,
    pub attachments_downloaded: usize,
    pub duration_seconds: u64,
}

/// Summary of a whole invocation across sources
#[derive(Debug, Clone, Default)]
pub struct CrawlSummary {
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub sources: Vec<SourceSummary>,
}

impl CrawlSummary {
    pub fn total_policies(&self) -> usize {
        self.sources.iter().map(|s| s.policies).sum()
    }

    /// Validation counts summed over every source
    pub fn combined_report(&self) -> ValidationReport {
        let mut combined = ValidationReport::new();
        for source in &self.sources {
            combined.absorb(&source.report);
        }
        combined
    }
}

/// Trait for output handlers
///
/// Output handlers receive accepted records as they arrive and the
/// summary once all sources have run.
pub trait OutputHandler {
    /// Writes one record, returning the files produced
    fn write_policy(&mut self, record: &PolicyRecord) -> OutputResult<Vec<PathBuf>>;

    /// Writes the run summary, returning its location
    fn write_summary(&mut self, summary: &CrawlSummary) -> OutputResult<PathBuf>;
}
