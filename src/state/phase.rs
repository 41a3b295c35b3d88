/// Crawl phase definitions for tracking a run
///
/// This module defines the phases a coordinator moves through while crawling
/// one source and the transitions allowed between them.
use std::fmt;

/// Represents the current phase of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrawlPhase {
    // ===== Active Phases =====
    /// Coordinator built but not started
    Idle,

    /// Between pages or classifications
    Running,

    /// Waiting on the upstream search request
    FetchingPage,

    /// Turning a raw page into records
    Parsing,

    /// Validating, deduplicating and enriching the page's records
    Validating,

    /// Assembling the final result set
    Aggregating,

    // ===== Terminal Phases =====
    /// Every classification was processed
    Done,

    /// The stop signal was observed
    Cancelled,

    /// A fatal error ended the run
    Failed,
}

impl CrawlPhase {
    /// Returns true if no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Failed)
    }

    /// Returns true if the transition is part of the crawl state machine
    ///
    /// Any active phase may move to `Cancelled` or `Failed`, and
    /// `Running` may finish early into `Aggregating`.
    pub fn can_transition_to(&self, next: CrawlPhase) -> bool {
        use CrawlPhase::*;

        if self.is_terminal() {
            return false;
        }

        if matches!(next, Cancelled | Failed) {
            return *self != Idle || next == Failed;
        }

        matches!(
            (self, next),
            (Idle, Running)
                | (Running, FetchingPage)
                | (Running, Aggregating)
                | (FetchingPage, Parsing)
                | (FetchingPage, Running)
                | (Parsing, Validating)
                | (Parsing, Running)
                | (Validating, Running)
                | (Aggregating, Done)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::FetchingPage => "fetching_page",
            Self::Parsing => "parsing",
            Self::Validating => "validating",
            Self::Aggregating => "aggregating",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for CrawlPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_terminal() {
        assert!(CrawlPhase::Done.is_terminal());
        assert!(CrawlPhase::Cancelled.is_terminal());
        assert!(CrawlPhase::Failed.is_terminal());

        assert!(!CrawlPhase::Idle.is_terminal());
        assert!(!CrawlPhase::Running.is_terminal());
        assert!(!CrawlPhase::Validating.is_terminal());
    }

    #[test]
    fn test_page_cycle() {
        use CrawlPhase::*;
        let cycle = [Idle, Running, FetchingPage, Parsing, Validating, Running];
        for pair in cycle.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_finish_path() {
        assert!(CrawlPhase::Running.can_transition_to(CrawlPhase::Aggregating));
        assert!(CrawlPhase::Aggregating.can_transition_to(CrawlPhase::Done));
        assert!(!CrawlPhase::Running.can_transition_to(CrawlPhase::Done));
    }

    #[test]
    fn test_cancel_and_fail() {
        assert!(CrawlPhase::FetchingPage.can_transition_to(CrawlPhase::Cancelled));
        assert!(CrawlPhase::Running.can_transition_to(CrawlPhase::Failed));
        assert!(CrawlPhase::Idle.can_transition_to(CrawlPhase::Failed));
        assert!(!CrawlPhase::Idle.can_transition_to(CrawlPhase::Cancelled));
    }

    #[test]
    fn test_terminal_is_final() {
        for next in [CrawlPhase::Running, CrawlPhase::Failed, CrawlPhase::Done] {
            assert!(!CrawlPhase::Done.can_transition_to(next));
            assert!(!CrawlPhase::Cancelled.can_transition_to(next));
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(CrawlPhase::FetchingPage.to_string(), "fetching_page");
        assert_eq!(CrawlPhase::Done.to_string(), "done");
    }
}
