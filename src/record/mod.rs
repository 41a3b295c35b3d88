//! Policy record model
//!
//! A [`PolicyRecord`] is built by a source parser from one upstream row, enriched
//! by a detail fetch, and then only read. Fields that a single adapter needs for
//! its own follow-up requests live in [`SourceExtension`] and never reach the
//! serialized form consumed by storage.

mod date;

pub use date::{parse_date, PubDate, ACCEPTED_DATE_FORMATS};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Originating data-source descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataSource {
    pub name: String,
    pub base_url: String,
    pub endpoints: Vec<String>,
}

/// Provincial document classification ("rule type")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleType {
    /// 地方性法规
    LocalRegulation,
    /// 政府规章
    GovernmentRule,
    /// 规范性文件
    NormativeDocument,
}

impl RuleType {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::LocalRegulation),
            2 => Some(Self::GovernmentRule),
            3 => Some(Self::NormativeDocument),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::LocalRegulation => 1,
            Self::GovernmentRule => 2,
            Self::NormativeDocument => 3,
        }
    }

    /// Category label a record of this type must carry
    pub fn label(&self) -> &'static str {
        match self {
            Self::LocalRegulation => "地方性法规",
            Self::GovernmentRule => "政府规章",
            Self::NormativeDocument => "规范性文件",
        }
    }

    pub fn all() -> [Self; 3] {
        [
            Self::LocalRegulation,
            Self::GovernmentRule,
            Self::NormativeDocument,
        ]
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A file attached to a policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileAttachment {
    pub name: String,
    /// Remote location; for provincial records this is the upstream file path
    pub url: String,
    pub extension: String,
}

impl FileAttachment {
    pub fn new(name: &str, url: &str, extension: &str) -> Self {
        let extension = if extension.trim().is_empty() {
            name.rsplit_once('.')
                .map(|(_, ext)| ext.to_string())
                .unwrap_or_default()
        } else {
            extension.trim().to_string()
        };

        Self {
            name: name.trim().to_string(),
            url: url.trim().to_string(),
            extension: extension.trim_start_matches('.').to_lowercase(),
        }
    }
}

/// Adapter-private fields of a provincial record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvincialExtension {
    /// Opaque upstream identifier; the dedup key for this source
    pub upstream_id: String,
    pub rule_type: RuleType,
    pub formulate_mode: String,
    pub file_type: String,
    pub tag_names: String,
    /// Filled by the detail fetch
    pub keywords: String,
    /// Filled by the detail fetch
    pub associate_id: String,
}

/// Per-source extension carried by a record
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SourceExtension {
    /// Search portal record, identified by title and URL
    #[default]
    Portal,
    /// Paginated-API record, identified by its upstream ID
    Provincial(ProvincialExtension),
}

/// The canonical unit of crawled data
#[derive(Debug, Clone, Serialize)]
pub struct PolicyRecord {
    pub title: String,
    pub pub_date: PubDate,
    pub doc_number: String,
    /// Canonical source URL
    pub url: String,
    pub content: String,
    pub category: String,
    /// Institution level, e.g. ministry or province
    pub level: String,
    pub validity: String,
    pub effective_date: PubDate,
    pub publisher: String,
    pub crawled_at: DateTime<Utc>,
    pub data_source: DataSource,
    pub attachments: Vec<FileAttachment>,
    #[serde(skip)]
    pub extension: SourceExtension,
}

impl PolicyRecord {
    /// Creates a record with only the identity fields set
    pub fn new(title: &str, url: &str, data_source: DataSource) -> Self {
        Self {
            title: title.trim().to_string(),
            pub_date: PubDate::Empty,
            doc_number: String::new(),
            url: url.trim().to_string(),
            content: String::new(),
            category: String::new(),
            level: String::new(),
            validity: String::new(),
            effective_date: PubDate::Empty,
            publisher: String::new(),
            crawled_at: Utc::now(),
            data_source,
            attachments: Vec::new(),
            extension: SourceExtension::Portal,
        }
    }

    pub fn provincial(&self) -> Option<&ProvincialExtension> {
        match &self.extension {
            SourceExtension::Provincial(ext) => Some(ext),
            SourceExtension::Portal => None,
        }
    }

    /// Merges a detail payload without overwriting any non-empty field
    ///
    /// List-view values always win over detail-view values. Attachments are
    /// only attached when the record has none yet.
    pub fn backfill(&mut self, detail: DetailPayload) {
        fill_text(&mut self.content, detail.content);
        fill_text(&mut self.doc_number, detail.doc_number);
        fill_text(&mut self.category, detail.category);
        fill_text(&mut self.validity, detail.validity);
        fill_text(&mut self.publisher, detail.publisher);
        fill_date(&mut self.pub_date, detail.pub_date);
        fill_date(&mut self.effective_date, detail.effective_date);

        if self.attachments.is_empty() {
            self.attachments = detail.attachments;
        }

        if let SourceExtension::Provincial(ext) = &mut self.extension {
            fill_text(&mut ext.keywords, detail.keywords);
            fill_text(&mut ext.associate_id, detail.associate_id);
        }
    }
}

fn fill_text(slot: &mut String, value: Option<String>) {
    if !slot.trim().is_empty() {
        return;
    }
    if let Some(value) = value.map(|v| v.trim().to_string()) {
        if !value.is_empty() {
            *slot = value;
        }
    }
}

fn fill_date(slot: &mut PubDate, value: Option<PubDate>) {
    if slot.is_empty() {
        if let Some(value) = value {
            *slot = value;
        }
    }
}

/// Full content and metadata returned by a detail fetch
#[derive(Debug, Clone, Default)]
pub struct DetailPayload {
    pub content: Option<String>,
    pub pub_date: Option<PubDate>,
    pub doc_number: Option<String>,
    pub category: Option<String>,
    pub validity: Option<String>,
    pub publisher: Option<String>,
    pub effective_date: Option<PubDate>,
    pub attachments: Vec<FileAttachment>,
    pub keywords: Option<String>,
    pub associate_id: Option<String>,
}
