//! Crawl coordinator - main crawl orchestration logic
//!
//! The coordinator drives one [`PolicySource`] through its classifications:
//! - Paginating until the classification is exhausted, empty, or capped
//! - Validating and deduplicating each page
//! - Enriching accepted records with their detail view
//! - Reporting progress and honouring the stop signal
//! - Isolating per-classification failures from the rest of the run
//!
//! Everything runs sequentially on the caller's task; the only intentional
//! pause is the politeness delay between pages.

use crate::config::PaginationConfig;
use crate::record::PolicyRecord;
use crate::source::{Classification, PolicySource, SearchPage};
use crate::state::CrawlPhase;
use crate::validator::{DedupKey, InvalidRecord, ValidationReport, Validator};
use crate::TrawlError;
use std::error::Error as StdError;
use std::time::Duration;

/// Granularity at which the politeness delay re-checks the stop signal
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

type ProgressFn<'a> = Box<dyn FnMut(&str) + 'a>;
type StopFn<'a> = Box<dyn Fn() -> bool + 'a>;
type PolicyFn<'a> =
    Box<dyn FnMut(&PolicyRecord) -> Result<(), Box<dyn StdError + Send + Sync>> + 'a>;

/// Caller-supplied integration points of a crawl
///
/// All hooks are optional. They run inline on the crawl task.
#[derive(Default)]
pub struct CrawlHooks<'a> {
    progress: Option<ProgressFn<'a>>,
    stop: Option<StopFn<'a>>,
    on_policy: Option<PolicyFn<'a>>,
}

impl<'a> CrawlHooks<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receives human-readable progress messages
    pub fn on_progress(mut self, hook: impl FnMut(&str) + 'a) -> Self {
        self.progress = Some(Box::new(hook));
        self
    }

    /// Polled before every page fetch and during the politeness delay
    pub fn stop_when(mut self, hook: impl Fn() -> bool + 'a) -> Self {
        self.stop = Some(Box::new(hook));
        self
    }

    /// Receives every accepted record as soon as it is enriched
    ///
    /// Errors are logged and otherwise ignored.
    pub fn on_policy(
        mut self,
        hook: impl FnMut(&PolicyRecord) -> Result<(), Box<dyn StdError + Send + Sync>> + 'a,
    ) -> Self {
        self.on_policy = Some(Box::new(hook));
        self
    }

    fn progress(&mut self, message: &str) {
        tracing::debug!("{}", message);
        if let Some(hook) = self.progress.as_mut() {
            hook(message);
        }
    }

    fn should_stop(&self) -> bool {
        self.stop.as_ref().is_some_and(|hook| hook())
    }

    fn emit(&mut self, record: &PolicyRecord) {
        if let Some(hook) = self.on_policy.as_mut() {
            if let Err(e) = hook(record) {
                tracing::warn!("Policy sink failed for '{}': {}", record.title, e);
            }
        }
    }
}

/// Result of a crawl run
#[derive(Debug)]
pub struct CrawlOutcome {
    /// Accepted, deduplicated and enriched records
    pub policies: Vec<PolicyRecord>,
    /// Records rejected by validation, with their issues
    pub invalid: Vec<InvalidRecord>,
    pub report: ValidationReport,
    /// Done, Cancelled, or Failed when a fatal error cut the run short
    pub final_phase: CrawlPhase,
    /// Labels of classifications that failed and contributed nothing
    pub failed_classifications: Vec<String>,
    /// Fatal error that ended the run early, if any
    pub abort_reason: Option<String>,
}

/// How a classification's page loop ended
enum ClassificationEnd {
    Exhausted,
    Cancelled,
}

/// Records gathered by the run so far
#[derive(Default)]
struct Accumulated {
    policies: Vec<PolicyRecord>,
    invalid: Vec<InvalidRecord>,
    failed: Vec<String>,
}

/// Main crawl coordinator
pub struct Coordinator<S: PolicySource> {
    source: S,
    pagination: PaginationConfig,
    page_delay: Duration,
    validator: Validator,
    phase: CrawlPhase,
}

impl<S: PolicySource> Coordinator<S> {
    /// Creates a coordinator for one source
    ///
    /// # Arguments
    ///
    /// * `source` - The adapter to crawl
    /// * `pagination` - Page size and stop thresholds
    /// * `page_delay` - Politeness pause between pages
    pub fn new(source: S, pagination: PaginationConfig, page_delay: Duration) -> Self {
        Self {
            source,
            pagination,
            page_delay,
            validator: Validator::new(),
            phase: CrawlPhase::Idle,
        }
    }

    pub fn phase(&self) -> CrawlPhase {
        self.phase
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Hands the adapter back, e.g. for attachment downloads after the run
    pub fn into_source(self) -> S {
        self.source
    }

    fn transition(&mut self, next: CrawlPhase) -> Result<(), TrawlError> {
        if self.phase == next {
            return Ok(());
        }
        if !self.phase.can_transition_to(next) {
            return Err(TrawlError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        tracing::trace!("Crawl phase {} -> {}", self.phase, next);
        self.phase = next;
        Ok(())
    }

    /// Runs the crawl over every classification of the source
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlOutcome)` - The run finished, was cancelled, or failed after
    ///   accepting at least one record
    /// * `Err(TrawlError)` - A fatal error occurred before any record was accepted
    pub async fn run(&mut self, mut hooks: CrawlHooks<'_>) -> Result<CrawlOutcome, TrawlError> {
        let name = self.source.descriptor().name.clone();
        self.transition(CrawlPhase::Running)?;

        let classifications = self.source.classifications();
        hooks.progress(&format!(
            "[{}] Starting crawl of {} classification(s)",
            name,
            classifications.len()
        ));

        let mut acc = Accumulated::default();
        let result = self
            .crawl_classifications(&classifications, &mut hooks, &mut acc)
            .await;

        let abort_reason = match result {
            Ok(ClassificationEnd::Cancelled) => {
                self.transition(CrawlPhase::Cancelled)?;
                hooks.progress(&format!(
                    "[{}] Stopped on request with {} policies",
                    name,
                    acc.policies.len()
                ));
                None
            }
            Ok(ClassificationEnd::Exhausted) => {
                self.transition(CrawlPhase::Aggregating)?;
                self.transition(CrawlPhase::Done)?;
                hooks.progress(&format!(
                    "[{}] Crawl complete: {} policies ({})",
                    name,
                    acc.policies.len(),
                    self.validator.report()
                ));
                None
            }
            Err(e) => {
                if self.phase.can_transition_to(CrawlPhase::Failed) {
                    self.phase = CrawlPhase::Failed;
                }
                if acc.policies.is_empty() {
                    return Err(e);
                }
                tracing::error!(
                    "[{}] Crawl aborted, keeping {} policies: {}",
                    name,
                    acc.policies.len(),
                    e
                );
                hooks.progress(&format!(
                    "[{}] Crawl aborted ({}), returning {} policies",
                    name,
                    e,
                    acc.policies.len()
                ));
                Some(e.to_string())
            }
        };

        Ok(CrawlOutcome {
            policies: acc.policies,
            invalid: acc.invalid,
            report: self.validator.report().clone(),
            final_phase: self.phase,
            failed_classifications: acc.failed,
            abort_reason,
        })
    }

    async fn crawl_classifications(
        &mut self,
        classifications: &[Classification],
        hooks: &mut CrawlHooks<'_>,
        acc: &mut Accumulated,
    ) -> Result<ClassificationEnd, TrawlError> {
        let name = self.source.descriptor().name.clone();

        for classification in classifications {
            if hooks.should_stop() {
                return Ok(ClassificationEnd::Cancelled);
            }

            let mut policies = Vec::new();
            let mut invalid = Vec::new();
            let result = self
                .crawl_classification(classification, hooks, &mut policies, &mut invalid)
                .await;

            match result {
                Ok(end) => {
                    hooks.progress(&format!(
                        "[{}] {} finished with {} policies",
                        name,
                        classification,
                        policies.len()
                    ));
                    acc.policies.append(&mut policies);
                    acc.invalid.append(&mut invalid);
                    if let ClassificationEnd::Cancelled = end {
                        return Ok(ClassificationEnd::Cancelled);
                    }
                }
                Err(e) if e.is_fatal() => {
                    acc.policies.append(&mut policies);
                    acc.invalid.append(&mut invalid);
                    return Err(e);
                }
                Err(e) => {
                    tracing::error!("[{}] {} failed: {}", name, classification, e);
                    hooks.progress(&format!("[{}] {} failed: {}", name, classification, e));
                    acc.failed.push(classification.label.clone());

                    // Discarded records must stay acceptable for later classifications
                    let released: Vec<DedupKey> = policies.iter().map(DedupKey::for_record).collect();
                    self.validator.forget(&released);
                    self.transition(CrawlPhase::Running)?;
                }
            }
        }

        Ok(ClassificationEnd::Exhausted)
    }

    /// Pages through one classification
    ///
    /// Accepted records are pushed to `policies` as they are enriched so a
    /// cancelled or fatally failed run can still return them.
    async fn crawl_classification(
        &mut self,
        classification: &Classification,
        hooks: &mut CrawlHooks<'_>,
        policies: &mut Vec<PolicyRecord>,
        invalid: &mut Vec<InvalidRecord>,
    ) -> Result<ClassificationEnd, TrawlError> {
        let name = self.source.descriptor().name.clone();
        let page_size = self.pagination.page_size;
        let mut page = 1u32;
        let mut empty_streak = 0u32;
        let mut rows_seen = 0usize;

        hooks.progress(&format!("[{}] Crawling {}", name, classification));

        loop {
            if hooks.should_stop() {
                return Ok(ClassificationEnd::Cancelled);
            }

            if page > self.pagination.max_pages {
                tracing::info!(
                    "[{}] {} reached the page limit ({})",
                    name,
                    classification,
                    self.pagination.max_pages
                );
                hooks.progress(&format!(
                    "[{}] {}: reached max pages ({})",
                    name, classification, self.pagination.max_pages
                ));
                return Ok(ClassificationEnd::Exhausted);
            }

            self.transition(CrawlPhase::FetchingPage)?;
            let parsed = match self.source.fetch_page(classification, page, page_size).await? {
                Some(payload) => {
                    self.transition(CrawlPhase::Parsing)?;
                    Some(self.source.parse_page(classification, payload)?)
                }
                None => None,
            };

            let SearchPage {
                records,
                raw_rows,
                total,
            } = match parsed {
                Some(page) if page.raw_rows > 0 => page,
                other => {
                    self.transition(CrawlPhase::Running)?;
                    empty_streak += 1;
                    let what = if other.is_none() { "failed" } else { "returned no rows" };
                    hooks.progress(&format!(
                        "[{}] {} page {} {} ({}/{})",
                        name, classification, page, what, empty_streak, self.pagination.max_empty_pages
                    ));

                    if empty_streak >= self.pagination.max_empty_pages {
                        hooks.progress(&format!(
                            "[{}] {}: {} consecutive empty pages, moving on",
                            name, classification, empty_streak
                        ));
                        return Ok(ClassificationEnd::Exhausted);
                    }

                    page += 1;
                    self.pause(hooks).await;
                    continue;
                }
            };
            empty_streak = 0;
            rows_seen += raw_rows;

            self.transition(CrawlPhase::Validating)?;
            let outcome = self.validator.process_batch(records);
            let accepted = outcome.accepted.len();

            for mut record in outcome.accepted {
                if self.source.needs_detail(&record) {
                    match self.source.fetch_detail(&record).await {
                        Ok(Some(detail)) => record.backfill(detail),
                        Ok(None) => {
                            tracing::warn!("Detail unavailable for '{}', keeping record", record.title)
                        }
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => {
                            tracing::warn!("Detail fetch failed for '{}': {}", record.title, e)
                        }
                    }
                }
                hooks.emit(&record);
                policies.push(record);
            }
            invalid.extend(outcome.invalid);

            hooks.progress(&format!(
                "[{}] {} page {}: {} rows, {} accepted, {} invalid, {} duplicates (total {}{})",
                name,
                classification,
                page,
                raw_rows,
                accepted,
                outcome.report.invalid,
                outcome.duplicates,
                policies.len(),
                total.map(|t| format!("/{}", t)).unwrap_or_default()
            ));
            self.transition(CrawlPhase::Running)?;

            let all_consumed = total.is_some_and(|t| rows_seen >= t);
            let short_page = self.source.ends_on_short_page() && raw_rows < page_size as usize;
            if all_consumed || short_page {
                return Ok(ClassificationEnd::Exhausted);
            }

            page += 1;
            self.pause(hooks).await;
        }
    }

    /// Sleeps the politeness delay, waking early when a stop is requested
    async fn pause(&self, hooks: &CrawlHooks<'_>) {
        let mut remaining = self.page_delay;
        while !remaining.is_zero() {
            if hooks.should_stop() {
                return;
            }
            let slice = remaining.min(STOP_POLL_INTERVAL);
            tokio::time::sleep(slice).await;
            remaining -= slice;
        }
    }
}
