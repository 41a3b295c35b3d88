//! Per-record files on disk
//!
//! Layout under the output directory:
//!
//! ```text
//! <dir>/crawl-summary.md
//! <dir>/<source>/<stem>.json
//! <dir>/<source>/<stem>.md
//! <dir>/<source>/attachments/<stem>_<attachment name>
//! ```

use crate::config::OutputConfig;
use crate::output::markdown::{generate_markdown_summary, render_policy};
use crate::output::traits::{CrawlSummary, OutputHandler, OutputResult};
use crate::record::{FileAttachment, PolicyRecord};
use crate::validator::DedupKey;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;

/// Name of the run summary written at the output root
pub const SUMMARY_FILE: &str = "crawl-summary.md";

const MAX_NAME_CHARS: usize = 80;

/// Makes a string safe to use as a single path component
///
/// # Examples
///
/// ```
/// use policy_trawl::output::sanitize_filename;
///
/// assert_eq!(sanitize_filename("a/b: c?"), "a_b_ c");
/// assert_eq!(sanitize_filename("  ..  "), "untitled");
/// ```
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .take(MAX_NAME_CHARS)
        .collect();

    let trimmed = replaced.trim_matches(|c: char| c.is_whitespace() || c == '.' || c == '_');
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

/// File stem for a record: sanitized title plus a short hash of its dedup key
pub fn record_stem(record: &PolicyRecord) -> String {
    let key = DedupKey::for_record(record).to_string();
    let digest = hex::encode(Sha256::digest(key.as_bytes()));
    format!("{}_{}", sanitize_filename(&record.title), &digest[..8])
}

/// Writes records and summaries below one root directory
pub struct FileOutput {
    root: PathBuf,
    save_json: bool,
    save_markdown: bool,
}

impl FileOutput {
    pub fn new(root: impl Into<PathBuf>, save_json: bool, save_markdown: bool) -> Self {
        Self {
            root: root.into(),
            save_json,
            save_markdown,
        }
    }

    pub fn from_config(config: &OutputConfig) -> Self {
        Self::new(&config.directory, config.save_json, config.save_markdown)
    }

    pub fn source_dir(&self, source: &str) -> PathBuf {
        self.root.join(sanitize_filename(source))
    }

    pub fn attachment_dir(&self, source: &str) -> PathBuf {
        self.source_dir(source).join("attachments")
    }

    /// Destination of one attachment of `record`
    pub fn attachment_path(&self, record: &PolicyRecord, attachment: &FileAttachment) -> PathBuf {
        let mut name = sanitize_filename(&attachment.name);
        if !attachment.extension.is_empty()
            && !name
                .to_lowercase()
                .ends_with(&format!(".{}", attachment.extension))
        {
            name = format!("{}.{}", name, attachment.extension);
        }
        self.attachment_dir(&record.data_source.name)
            .join(format!("{}_{}", record_stem(record), name))
    }
}

impl OutputHandler for FileOutput {
    fn write_policy(&mut self, record: &PolicyRecord) -> OutputResult<Vec<PathBuf>> {
        if !self.save_json && !self.save_markdown {
            return Ok(Vec::new());
        }

        let dir = self.source_dir(&record.data_source.name);
        fs::create_dir_all(&dir)?;
        let stem = record_stem(record);
        let mut written = Vec::new();

        if self.save_json {
            let path = dir.join(format!("{}.json", stem));
            fs::write(&path, serde_json::to_string_pretty(record)?)?;
            written.push(path);
        }

        if self.save_markdown {
            let path = dir.join(format!("{}.md", stem));
            fs::write(&path, render_policy(record))?;
            written.push(path);
        }

        tracing::trace!("Wrote {} file(s) for '{}'", written.len(), record.title);
        Ok(written)
    }

    fn write_summary(&mut self, summary: &CrawlSummary) -> OutputResult<PathBuf> {
        fs::create_dir_all(&self.root)?;
        let path = self.root.join(SUMMARY_FILE);
        generate_markdown_summary(summary, &path)?;
        Ok(path)
    }
}
