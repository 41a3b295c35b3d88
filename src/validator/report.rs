use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Counts gathered while validating records
///
/// One report describes a single batch; [`ValidationReport::absorb`] folds
/// batch reports into a run-level total.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub duplicates: usize,
    /// Error reason -> number of records carrying it
    pub reasons: BTreeMap<String, usize>,
    /// Duplicate key -> times the key has been seen
    pub duplicate_keys: BTreeMap<String, usize>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_reason(&mut self, reason: &str) {
        *self.reasons.entry(reason.to_string()).or_insert(0) += 1;
    }

    pub(crate) fn record_duplicate(&mut self, key: String, occurrences: usize) {
        self.duplicates += 1;
        self.duplicate_keys.insert(key, occurrences);
    }

    /// Adds another report's counts to this one
    pub fn absorb(&mut self, other: &ValidationReport) {
        self.total += other.total;
        self.valid += other.valid;
        self.invalid += other.invalid;
        self.duplicates += other.duplicates;

        for (reason, count) in &other.reasons {
            *self.reasons.entry(reason.clone()).or_insert(0) += count;
        }
        for (key, count) in &other.duplicate_keys {
            let entry = self.duplicate_keys.entry(key.clone()).or_insert(0);
            *entry = (*entry).max(*count);
        }
    }

    /// Valid records as a share of all records, in percent
    pub fn valid_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.valid as f64 * 100.0 / self.total as f64
        }
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} total, {} valid, {} invalid, {} duplicates",
            self.total, self.valid, self.invalid, self.duplicates
        )?;
        if !self.reasons.is_empty() {
            let reasons: Vec<String> = self
                .reasons
                .iter()
                .map(|(reason, count)| format!("{}={}", reason, count))
                .collect();
            write!(f, " ({})", reasons.join(", "))?;
        }
        Ok(())
    }
}
