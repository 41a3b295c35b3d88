//! Statistics generation from the policy database
//!
//! This module provides functionality for extracting and displaying
//! stored-policy statistics from the storage layer.

use crate::storage::{PolicyStore, RunRecord, StorageResult};

/// Stored-policy statistics
#[derive(Debug, Clone)]
pub struct StoreStatistics {
    /// Source name -> stored policies, sorted by source
    pub policies_by_source: Vec<(String, u64)>,

    pub total_policies: u64,

    /// Attachments known from detail views
    pub attachments: u64,

    /// Attachments saved to disk
    pub attachments_downloaded: u64,

    pub latest_run: Option<RunRecord>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `store` - The storage backend to query
///
/// # Returns
///
/// * `Ok(StoreStatistics)` - Successfully loaded statistics
/// * `Err(StorageError)` - Failed to query statistics
pub fn load_statistics(store: &dyn PolicyStore) -> StorageResult<StoreStatistics> {
    let policies_by_source = store.count_policies_by_source()?;
    let total_policies = policies_by_source.iter().map(|(_, count)| count).sum();
    let (attachments, attachments_downloaded) = store.count_attachments()?;
    let latest_run = store.get_latest_run()?;

    Ok(StoreStatistics {
        policies_by_source,
        total_policies,
        attachments,
        attachments_downloaded,
        latest_run,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &StoreStatistics) {
    println!("=== Policy Statistics ===\n");

    println!("Overview:");
    println!("  Stored policies: {}", stats.total_policies);
    println!(
        "  Attachments: {} ({} downloaded)",
        stats.attachments, stats.attachments_downloaded
    );
    println!();

    if !stats.policies_by_source.is_empty() {
        println!("Policies by Source:");
        for (source, count) in &stats.policies_by_source {
            let percentage = if stats.total_policies > 0 {
                (*count as f64 / stats.total_policies as f64) * 100.0
            } else {
                0.0
            };
            println!("  {}: {} ({:.1}%)", source, count, percentage);
        }
        println!();
    }

    if let Some(run) = &stats.latest_run {
        println!("Latest Run (#{}, {}):", run.id, run.source);
        println!("  Status: {}", run.status.to_db_string());
        println!("  Started: {}", run.started_at);
        if let Some(finished) = &run.finished_at {
            println!("  Finished: {}", finished);
        }
        println!(
            "  Records: {} total, {} valid, {} invalid, {} duplicates",
            run.total, run.valid, run.invalid, run.duplicates
        );
    }
}
