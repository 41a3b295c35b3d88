//! Upstream source adapters
//!
//! Each adapter owns one [`Fetcher`](crate::crawler::Fetcher) and knows how to
//! request a page of search results for a classification, turn that page into
//! [`PolicyRecord`]s, and enrich a record with its detail view. The
//! coordinator drives any adapter through the [`PolicySource`] trait and never
//! sees raw upstream payloads.

mod html;
mod portal;
mod provincial;

pub use html::{clean_text, HtmlLayout};
pub use portal::{portal_category_code, PortalPayload, PortalSource, PORTAL_CATEGORIES};
pub use provincial::{encode_file_path, ProvincialSource};

use crate::record::{DataSource, DetailPayload, FileAttachment, PolicyRecord, RuleType};
use crate::TrawlError;
use std::fmt;
use std::path::Path;

/// One independent sub-run of a crawl (a rule type or a portal category)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Upstream code sent with the search request
    pub code: String,
    /// Human-readable name used in progress messages
    pub label: String,
    /// Set for provincial classifications
    pub rule_type: Option<RuleType>,
}

impl Classification {
    pub fn for_rule_type(rule_type: RuleType) -> Self {
        Self {
            code: rule_type.code().to_string(),
            label: rule_type.label().to_string(),
            rule_type: Some(rule_type),
        }
    }

    pub fn for_category(label: &str, code: &str) -> Self {
        Self {
            code: code.to_string(),
            label: label.to_string(),
            rule_type: None,
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)
    }
}

/// Normalized content of one search-results page
#[derive(Debug, Default)]
pub struct SearchPage {
    /// Records built from the page (possibly filtered)
    pub records: Vec<PolicyRecord>,
    /// Number of rows the upstream returned before any filtering
    pub raw_rows: usize,
    /// Total rows the upstream reports for the classification, if known
    pub total: Option<usize>,
}

/// A crawlable upstream family
///
/// `fetch_*` methods return `Ok(None)` when retries are exhausted; the caller
/// decides whether that page or detail is skippable. `Err` is reserved for
/// failures of the adapter itself.
#[allow(async_fn_in_trait)]
pub trait PolicySource {
    /// Raw page payload handed from `fetch_page` to `parse_page`
    type Payload;

    /// Descriptor stamped on every record
    fn descriptor(&self) -> &DataSource;

    /// Classifications crawled in order
    fn classifications(&self) -> Vec<Classification>;

    /// Whether a page shorter than the page size means the classification is
    /// exhausted
    fn ends_on_short_page(&self) -> bool {
        true
    }

    async fn fetch_page(
        &mut self,
        classification: &Classification,
        page: u32,
        page_size: u32,
    ) -> Result<Option<Self::Payload>, TrawlError>;

    fn parse_page(
        &self,
        classification: &Classification,
        payload: Self::Payload,
    ) -> Result<SearchPage, TrawlError>;

    /// Whether the record still lacks its detail view
    fn needs_detail(&self, record: &PolicyRecord) -> bool {
        record.content.trim().is_empty()
    }

    async fn fetch_detail(
        &mut self,
        record: &PolicyRecord,
    ) -> Result<Option<DetailPayload>, TrawlError>;

    /// Downloads one attachment of an accepted record to `dest`
    async fn download_attachment(
        &mut self,
        attachment: &FileAttachment,
        dest: &Path,
    ) -> Result<bool, TrawlError>;
}
