//! Crawler module for page fetching and run coordination
//!
//! This module contains the core crawling logic, including:
//! - HTTP requests with retry, backoff and session rotation
//! - Proxy pool lookups
//! - Per-source crawl coordination
//! - The end-to-end run over all configured sources

mod coordinator;
mod fetcher;
mod pipeline;
mod proxy;

pub use coordinator::{Coordinator, CrawlHooks, CrawlOutcome};
pub use fetcher::{
    is_benign_download_error, Attempt, Fetcher, RawResponse, DOWNLOAD_CHUNK_SIZE,
};
pub use pipeline::{
    download_attachments, extension_allowed, run_crawl, DownloadedAttachment, RunOptions,
};
pub use proxy::{ProxyError, ProxyPool, DEFAULT_PROXY_API};
