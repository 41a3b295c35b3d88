use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Policy-Trawl
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub request: RequestConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    pub output: OutputConfig,
    #[serde(default, rename = "source")]
    pub sources: Vec<SourceConfig>,
}

impl Config {
    /// Returns the sources that are switched on
    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }
}

/// Request pacing and resilience knobs shared by every HTTP adapter
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    /// Politeness pause between successive pages (milliseconds)
    #[serde(rename = "delay-ms")]
    pub delay_ms: u64,

    /// Timeout applied to every outbound request (seconds)
    #[serde(rename = "timeout-secs")]
    pub timeout_secs: u64,

    /// Maximum attempts per logical request
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Base backoff after a transient failure, multiplied by the attempt number
    #[serde(rename = "retry-delay-ms")]
    pub retry_delay_ms: u64,

    /// Base cooldown after an upstream rate-limit signal, multiplied by the attempt number
    #[serde(rename = "rate-limit-delay-ms")]
    pub rate_limit_delay_ms: u64,

    /// Number of requests after which the session (and User-Agent) is replaced
    #[serde(rename = "session-rotate-interval")]
    pub session_rotate_interval: u32,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            delay_ms: 500,
            timeout_secs: 30,
            max_retries: 3,
            retry_delay_ms: 5_000,
            rate_limit_delay_ms: 30_000,
            session_rotate_interval: 50,
        }
    }
}

impl RequestConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Linear backoff: `retry-delay-ms * attempt`
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_delay_ms.saturating_mul(attempt as u64))
    }

    /// Rate-limit cooldown: `rate-limit-delay-ms * attempt`
    pub fn rate_limit_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.rate_limit_delay_ms.saturating_mul(attempt as u64))
    }
}

/// Pagination limits applied by the coordinator
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    #[serde(rename = "page-size")]
    pub page_size: u32,

    #[serde(rename = "max-pages")]
    pub max_pages: u32,

    /// Consecutive empty (or failed) pages after which a classification stops
    #[serde(rename = "max-empty-pages")]
    pub max_empty_pages: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            max_pages: 999_999,
            max_empty_pages: 3,
        }
    }
}

/// Keyword and date-window filtering for search-based sources
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub keywords: Vec<String>,

    /// Inclusive lower bound, `YYYY-MM-DD`
    #[serde(rename = "start-date")]
    pub start_date: Option<String>,

    /// Inclusive upper bound, `YYYY-MM-DD`
    #[serde(rename = "end-date")]
    pub end_date: Option<String>,
}

/// Third-party proxy pool settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub enabled: bool,

    #[serde(rename = "api-url")]
    pub api_url: Option<String>,

    #[serde(rename = "secret-id")]
    pub secret_id: Option<String>,

    #[serde(rename = "secret-key")]
    pub secret_key: Option<String>,

    /// Legacy combined credential in the form `secret_id:secret_key`
    #[serde(rename = "api-key")]
    pub api_key: Option<String>,
}

impl ProxyConfig {
    /// Resolves the credential pair, preferring the explicit fields over the
    /// legacy combined key.
    pub fn credentials(&self) -> Option<(String, String)> {
        let id = self.secret_id.as_deref().map(str::trim).unwrap_or("");
        let key = self.secret_key.as_deref().map(str::trim).unwrap_or("");
        if !id.is_empty() && !key.is_empty() {
            return Some((id.to_string(), key.to_string()));
        }

        let (id, key) = self.api_key.as_deref()?.split_once(':')?;
        let (id, key) = (id.trim(), key.trim());
        if id.is_empty() || key.is_empty() {
            None
        } else {
            Some((id.to_string(), key.to_string()))
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving rendered records, attachments and the run summary
    pub directory: String,

    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    #[serde(default = "default_true", rename = "save-json")]
    pub save_json: bool,

    #[serde(default = "default_true", rename = "save-markdown")]
    pub save_markdown: bool,

    #[serde(default, rename = "download-attachments")]
    pub download_attachments: bool,

    /// Attachment extensions to download; empty means every attachment
    #[serde(default, rename = "attachment-extensions")]
    pub attachment_extensions: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// Upstream family a source belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Search + detail portal answering in JSON or HTML
    Portal,
    /// Paginated JSON API partitioned by rule type
    Provincial,
}

/// One data-source definition
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,

    pub kind: SourceKind,

    /// Site root (portal) or API root (provincial)
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Search endpoint (portal only)
    #[serde(default, rename = "search-api")]
    pub search_api: Option<String>,

    /// Search channel identifier (portal only)
    #[serde(default, rename = "channel-id")]
    pub channel_id: Option<String>,

    /// Category names crawled as separate classifications (portal only)
    #[serde(default)]
    pub categories: Vec<String>,

    /// Rule types crawled as separate classifications (provincial only)
    #[serde(default, rename = "rule-types")]
    pub rule_types: Vec<u8>,

    /// Institution level recorded on every policy of this source
    #[serde(default)]
    pub level: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}
