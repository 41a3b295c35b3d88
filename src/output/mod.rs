//! Output module for rendering crawl results
//!
//! This module handles:
//! - Rendering accepted records as JSON and markdown files
//! - Generating the markdown run summary
//! - Printing stored-policy statistics

mod files;
mod markdown;
pub mod stats;
mod traits;

pub use files::{record_stem, sanitize_filename, FileOutput, SUMMARY_FILE};
pub use markdown::{format_markdown_summary, generate_markdown_summary, render_policy};
pub use stats::{load_statistics, print_statistics, StoreStatistics};
pub use traits::{CrawlSummary, OutputError, OutputHandler, OutputResult, SourceSummary};
