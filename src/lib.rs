//! Policy-Trawl: a resilient policy-document harvester
//!
//! This crate crawls government policy portals, normalizes their inconsistent
//! search results into a common record shape, validates and deduplicates the
//! records, and hands the accepted batch back to the caller.

pub mod config;
pub mod crawler;
pub mod output;
pub mod record;
pub mod source;
pub mod state;
pub mod storage;
pub mod url;
pub mod validator;

use thiserror::Error;

/// Main error type for Policy-Trawl operations
#[derive(Debug, Error)]
pub enum TrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("HTTP error for {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("Unexpected payload from {url}: {message}")]
    Payload { url: String, message: String },

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::CrawlPhase,
        to: state::CrawlPhase,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Output error: {0}")]
    Output(#[from] output::OutputError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrawlError {
    /// Returns true if the error must abort the whole run rather than a
    /// single classification.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::Client(_)
                | Self::InvalidTransition { .. }
                | Self::Storage(_)
                | Self::Output(_)
                | Self::Io(_)
        )
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,
}

/// Result type alias for Policy-Trawl operations
pub type Result<T> = std::result::Result<T, TrawlError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{Coordinator, CrawlHooks, CrawlOutcome};
pub use record::{FileAttachment, PolicyRecord, PubDate};
pub use state::CrawlPhase;
pub use validator::{ValidationReport, Validator};
