//! End-to-end run over every configured source
//!
//! Each enabled source gets its own coordinator, validator and database run.
//! Accepted records are stored and rendered as they arrive; attachments are
//! downloaded once the source's crawl has finished.

use crate::config::{Config, SourceKind};
use crate::crawler::coordinator::{Coordinator, CrawlHooks};
use crate::output::{CrawlSummary, FileOutput, OutputHandler, SourceSummary};
use crate::record::PolicyRecord;
use crate::source::{PolicySource, PortalSource, ProvincialSource};
use crate::storage::{open_store, PolicyStore, RunStatus, SqliteStore};
use crate::validator::{DedupKey, ValidationReport};
use crate::TrawlError;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Caller controls for a run
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Crawl only the source with this name
    pub only_source: Option<String>,
    /// Set to request a graceful stop
    pub stop: Arc<AtomicBool>,
}

impl RunOptions {
    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

/// An attachment saved to disk
#[derive(Debug, Clone)]
pub struct DownloadedAttachment {
    /// Dedup key of the owning record
    pub record_key: String,
    pub url: String,
    pub path: PathBuf,
}

/// Runs a complete crawl operation
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Open the policy database
/// 2. Crawl each enabled source with its own coordinator
/// 3. Store and render accepted records as they arrive
/// 4. Download attachments if configured
/// 5. Write the markdown run summary
///
/// # Arguments
///
/// * `config` - The validated configuration
/// * `config_hash` - Hash of the configuration file, recorded on every run
/// * `options` - Source selection and stop signal
///
/// # Returns
///
/// * `Ok(CrawlSummary)` - Every selected source was attempted
/// * `Err(TrawlError)` - Storage or output could not be set up
pub async fn run_crawl(
    config: &Config,
    config_hash: &str,
    options: &RunOptions,
) -> Result<CrawlSummary, TrawlError> {
    let mut store = open_store(Path::new(&config.output.database_path))?;
    let mut output = FileOutput::from_config(&config.output);

    let mut summary = CrawlSummary {
        started_at: Utc::now().to_rfc3339(),
        finished_at: None,
        config_hash: config_hash.to_string(),
        sources: Vec::new(),
    };

    let selected = config.enabled_sources().filter(|s| {
        options
            .only_source
            .as_deref()
            .map_or(true, |name| name == s.name)
    });

    for source_config in selected {
        if options.stop_requested() {
            tracing::info!("Stop requested, skipping remaining sources");
            break;
        }

        tracing::info!("Crawling source '{}' ({:?})", source_config.name, source_config.kind);
        let result = match source_config.kind {
            SourceKind::Portal => match PortalSource::new(source_config, config) {
                Ok(source) => {
                    run_source(source, config, config_hash, &mut store, &mut output, options).await
                }
                Err(e) => Err(e),
            },
            SourceKind::Provincial => match ProvincialSource::new(source_config, config) {
                Ok(source) => {
                    run_source(source, config, config_hash, &mut store, &mut output, options).await
                }
                Err(e) => Err(e),
            },
        };

        match result {
            Ok(source_summary) => summary.sources.push(source_summary),
            Err(e @ (TrawlError::Storage(_) | TrawlError::Output(_))) => return Err(e),
            Err(e) => {
                tracing::error!("Source '{}' failed: {}", source_config.name, e);
                summary.sources.push(SourceSummary {
                    source: source_config.name.clone(),
                    status: RunStatus::Failed,
                    policies: 0,
                    report: ValidationReport::new(),
                    failed_classifications: Vec::new(),
                    abort_reason: Some(e.to_string()),
                    attachments_downloaded: 0,
                    duration_seconds: 0,
                });
            }
        }
    }

    summary.finished_at = Some(Utc::now().to_rfc3339());
    let path = output.write_summary(&summary)?;
    tracing::info!(
        "Crawl finished: {} policies from {} source(s), summary at {}",
        summary.total_policies(),
        summary.sources.len(),
        path.display()
    );

    Ok(summary)
}

async fn run_source<S: PolicySource>(
    source: S,
    config: &Config,
    config_hash: &str,
    store: &mut SqliteStore,
    output: &mut FileOutput,
    options: &RunOptions,
) -> Result<SourceSummary, TrawlError> {
    let name = source.descriptor().name.clone();
    let started = Instant::now();
    let run_id = store.create_run(&name, config_hash)?;
    let mut policy_ids: HashMap<String, i64> = HashMap::new();

    let mut coordinator = Coordinator::new(source, config.pagination.clone(), config.request.delay());
    let result = {
        let hooks = CrawlHooks::new()
            .on_progress(|message| tracing::info!("{}", message))
            .stop_when(|| options.stop_requested())
            .on_policy(|record| {
                let id = store.upsert_policy(run_id, record)?;
                policy_ids.insert(DedupKey::for_record(record).to_string(), id);
                output.write_policy(record)?;
                Ok(())
            });
        coordinator.run(hooks).await
    };

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            store.finish_run(run_id, RunStatus::Failed, &ValidationReport::new())?;
            return Err(e);
        }
    };

    let status = RunStatus::from_phase(outcome.final_phase);
    tracing::info!("[{}] {} ({})", name, outcome.report, status.to_db_string());

    let mut attachments_downloaded = 0;
    if config.output.download_attachments && !options.stop_requested() {
        let mut source = coordinator.into_source();
        let downloaded = download_attachments(
            &mut source,
            &outcome.policies,
            output,
            &config.output.attachment_extensions,
            &options.stop,
        )
        .await?;

        for item in &downloaded {
            if let Some(&policy_id) = policy_ids.get(&item.record_key) {
                store.mark_attachment_downloaded(policy_id, &item.url, &item.path.to_string_lossy())?;
            }
        }
        attachments_downloaded = downloaded.len();
    }

    store.finish_run(run_id, status, &outcome.report)?;

    Ok(SourceSummary {
        source: name,
        status,
        policies: outcome.policies.len(),
        report: outcome.report,
        failed_classifications: outcome.failed_classifications,
        abort_reason: outcome.abort_reason,
        attachments_downloaded,
        duration_seconds: started.elapsed().as_secs(),
    })
}

/// Whether an attachment extension passes the configured filter
///
/// An empty filter accepts everything.
pub fn extension_allowed(extension: &str, allowed: &[String]) -> bool {
    allowed.is_empty()
        || allowed
            .iter()
            .any(|a| a.trim().trim_start_matches('.').eq_ignore_ascii_case(extension))
}

/// Downloads the attachments of `policies` through the source adapter
///
/// Individual failures are logged and skipped. Stops early when `stop` is set.
pub async fn download_attachments<S: PolicySource>(
    source: &mut S,
    policies: &[PolicyRecord],
    output: &FileOutput,
    extensions: &[String],
    stop: &AtomicBool,
) -> Result<Vec<DownloadedAttachment>, TrawlError> {
    let mut downloaded = Vec::new();

    for record in policies {
        for attachment in &record.attachments {
            if stop.load(Ordering::SeqCst) {
                return Ok(downloaded);
            }
            if !extension_allowed(&attachment.extension, extensions) {
                tracing::debug!("Skipping attachment {} (extension filtered)", attachment.name);
                continue;
            }

            let dest = output.attachment_path(record, attachment);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            match source.download_attachment(attachment, &dest).await {
                Ok(true) => {
                    tracing::info!("Saved attachment {}", dest.display());
                    downloaded.push(DownloadedAttachment {
                        record_key: DedupKey::for_record(record).to_string(),
                        url: attachment.url.clone(),
                        path: dest,
                    });
                }
                Ok(false) => {
                    tracing::warn!("Attachment '{}' of '{}' not saved", attachment.name, record.title)
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => tracing::warn!("Attachment '{}' failed: {}", attachment.name, e),
            }
        }
    }

    Ok(downloaded)
}
