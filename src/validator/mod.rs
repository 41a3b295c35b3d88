//! Record validation and deduplication
//!
//! A batch is processed in a fixed order: every record is validated on its
//! own, the batch is split into valid and invalid records, and only the valid
//! records go through deduplication. Invalid records are kept with their
//! issues so they can be reported, but they never reach the accepted set.
//!
//! The set of seen keys lives on the [`Validator`], so one validator spans all
//! pages and classifications of a source's run.

mod report;
mod rules;

pub use report::ValidationReport;
pub use rules::{validate_record, DedupKey, ValidationIssue};

use crate::record::PolicyRecord;
use std::collections::HashMap;

/// A rejected record together with the rules it broke
#[derive(Debug, Clone)]
pub struct InvalidRecord {
    pub record: PolicyRecord,
    pub issues: Vec<ValidationIssue>,
}

impl InvalidRecord {
    pub fn reasons(&self) -> Vec<&'static str> {
        self.issues.iter().map(ValidationIssue::reason).collect()
    }
}

/// Result of processing one batch
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Valid, first-seen records in input order
    pub accepted: Vec<PolicyRecord>,
    pub invalid: Vec<InvalidRecord>,
    /// Valid records dropped because their key was already seen
    pub duplicates: usize,
    pub report: ValidationReport,
}

/// Stateful validator for one source's run
#[derive(Debug, Default)]
pub struct Validator {
    /// Key -> number of times it has been seen
    seen: HashMap<DedupKey, usize>,
    report: ValidationReport,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a single record without touching dedup state
    pub fn validate(&self, record: &PolicyRecord) -> Vec<ValidationIssue> {
        validate_record(record)
    }

    /// Whether a record with this key was already accepted
    pub fn is_seen(&self, key: &DedupKey) -> bool {
        self.seen.contains_key(key)
    }

    /// Releases dedup keys so later batches can accept those records again
    ///
    /// Used when records accepted earlier were discarded before reaching the
    /// caller. Report counts are left as they are.
    pub fn forget<'k>(&mut self, keys: impl IntoIterator<Item = &'k DedupKey>) {
        for key in keys {
            self.seen.remove(key);
        }
    }

    /// Validates, partitions and deduplicates a batch
    ///
    /// # Examples
    ///
    /// ```
    /// use policy_trawl::record::{DataSource, PolicyRecord, PubDate};
    /// use policy_trawl::Validator;
    ///
    /// let source = DataSource { name: "s".into(), base_url: "https://x.cn/".into(), endpoints: vec![] };
    /// let mut record = PolicyRecord::new("Title", "https://x.cn/a", source);
    /// record.pub_date = PubDate::parse("2021-12-30");
    ///
    /// let mut validator = Validator::new();
    /// let outcome = validator.process_batch(vec![record.clone(), record]);
    /// assert_eq!(outcome.accepted.len(), 1);
    /// assert_eq!(outcome.duplicates, 1);
    /// ```
    pub fn process_batch(&mut self, records: Vec<PolicyRecord>) -> BatchOutcome {
        let mut report = ValidationReport {
            total: records.len(),
            ..Default::default()
        };

        let (valid, invalid): (Vec<_>, Vec<_>) = records
            .into_iter()
            .map(|record| {
                let issues = validate_record(&record);
                (record, issues)
            })
            .partition(|(_, issues)| issues.is_empty());

        let invalid: Vec<InvalidRecord> = invalid
            .into_iter()
            .map(|(record, issues)| {
                for issue in &issues {
                    report.record_reason(issue.reason());
                }
                tracing::debug!(
                    "Rejected '{}': {}",
                    record.title,
                    issues
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                InvalidRecord { record, issues }
            })
            .collect();
        report.invalid = invalid.len();

        let mut accepted = Vec::with_capacity(valid.len());
        for (record, _) in valid {
            let key = DedupKey::for_record(&record);
            let count = self.seen.entry(key.clone()).or_insert(0);
            *count += 1;

            if *count > 1 {
                tracing::debug!("Duplicate '{}' (seen {} times)", key, count);
                report.record_duplicate(key.to_string(), *count);
            } else {
                accepted.push(record);
            }
        }
        report.valid = accepted.len();

        self.report.absorb(&report);

        BatchOutcome {
            duplicates: report.duplicates,
            accepted,
            invalid,
            report,
        }
    }

    /// Run-level report across every processed batch
    pub fn report(&self) -> &ValidationReport {
        &self.report
    }
}
