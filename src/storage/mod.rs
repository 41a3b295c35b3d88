//! Storage module for persisting crawl results
//!
//! This module handles all database operations, including:
//! - SQLite database initialization and schema management
//! - Run tracking with final validation counts
//! - Policy upserts keyed by source and dedup key
//! - Attachment bookkeeping

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{PolicyStore, StorageError, StorageResult};

use crate::state::CrawlPhase;
use std::path::Path;

/// Initializes or opens a policy database, creating parent directories
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStore)` - Successfully initialized storage
/// * `Err(StorageError)` - Failed to initialize storage
pub fn open_store(path: &Path) -> StorageResult<SqliteStore> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    SqliteStore::new(path)
}

/// Represents a crawl run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub source: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
    pub total: u64,
    pub valid: u64,
    pub invalid: u64,
    pub duplicates: u64,
}

/// A policy row as stored
#[derive(Debug, Clone)]
pub struct StoredPolicy {
    pub id: i64,
    pub source: String,
    pub dedup_key: String,
    pub title: String,
    pub url: String,
    pub pub_date: String,
    pub content: String,
    pub first_run: i64,
    pub last_run: i64,
    pub attachment_count: u64,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    /// Maps the coordinator's final phase to a stored status
    pub fn from_phase(phase: CrawlPhase) -> Self {
        match phase {
            CrawlPhase::Done => Self::Completed,
            CrawlPhase::Cancelled => Self::Interrupted,
            CrawlPhase::Failed => Self::Failed,
            _ => Self::Running,
        }
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
