//! Markdown rendering
//!
//! This module renders single policy records as markdown documents and the
//! run summary as a markdown report.

use crate::output::traits::{CrawlSummary, OutputResult};
use crate::record::PolicyRecord;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Renders one record as a markdown document: title, metadata list, body
pub fn render_policy(record: &PolicyRecord) -> String {
    let mut md = String::new();

    md.push_str(&format!("# {}\n\n", record.title));

    let fields = [
        ("Document Number", record.doc_number.clone()),
        ("Published", record.pub_date.to_string()),
        ("Effective", record.effective_date.to_string()),
        ("Publisher", record.publisher.clone()),
        ("Category", record.category.clone()),
        ("Level", record.level.clone()),
        ("Validity", record.validity.clone()),
        ("Source", record.data_source.name.clone()),
        ("URL", record.url.clone()),
    ];
    for (label, value) in fields {
        if !value.trim().is_empty() {
            md.push_str(&format!("- **{}**: {}\n", label, value));
        }
    }
    md.push_str(&format!(
        "- **Crawled**: {}\n\n",
        record.crawled_at.format("%Y-%m-%d %H:%M:%S")
    ));

    if !record.attachments.is_empty() {
        md.push_str("## Attachments\n\n");
        for attachment in &record.attachments {
            md.push_str(&format!("- {} ({})\n", attachment.name, attachment.url));
        }
        md.push('\n');
    }

    md.push_str("## Content\n\n");
    if record.content.trim().is_empty() {
        md.push_str("_No content available._\n");
    } else {
        md.push_str(record.content.trim());
        md.push('\n');
    }

    md
}

/// Generates a markdown summary from a crawl summary
///
/// # Arguments
///
/// * `summary` - The crawl summary data
/// * `output_path` - Path where the markdown file should be written
///
/// # Returns
///
/// * `Ok(())` - Successfully wrote markdown summary
/// * `Err(OutputError)` - Failed to write summary
pub fn generate_markdown_summary(summary: &CrawlSummary, output_path: &Path) -> OutputResult<()> {
    let markdown = format_markdown_summary(summary);

    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats a crawl summary as markdown
pub fn format_markdown_summary(summary: &CrawlSummary) -> String {
    let mut md = String::new();

    md.push_str("# Policy-Trawl Crawl Summary\n\n");

    md.push_str("## Run Information\n\n");
    md.push_str(&format!("- **Started**: {}\n", summary.started_at));
    if let Some(finished) = &summary.finished_at {
        md.push_str(&format!("- **Finished**: {}\n", finished));
    }
    md.push_str(&format!("- **Config Hash**: {}\n", summary.config_hash));
    md.push_str(&format!("- **Sources**: {}\n", summary.sources.len()));
    md.push_str(&format!("- **Policies**: {}\n\n", summary.total_policies()));

    md.push_str("## Sources\n\n");
    md.push_str("| Source | Status | Policies | Total | Valid | Invalid | Duplicates | Attachments | Duration |\n");
    md.push_str("|--------|--------|----------|-------|-------|---------|------------|-------------|----------|\n");
    for source in &summary.sources {
        md.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} | {} | {}s |\n",
            source.source,
            source.status.to_db_string(),
            source.policies,
            source.report.total,
            source.report.valid,
            source.report.invalid,
            source.report.duplicates,
            source.attachments_downloaded,
            source.duration_seconds
        ));
    }
    md.push('\n');

    let combined = summary.combined_report();
    md.push_str("## Validation\n\n");
    md.push_str(&format!("- **Valid Rate**: {:.2}%\n\n", combined.valid_rate()));

    if !combined.reasons.is_empty() {
        md.push_str("| Reason | Count |\n");
        md.push_str("|--------|-------|\n");
        let mut reasons: Vec<_> = combined.reasons.iter().collect();
        reasons.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        for (reason, count) in reasons {
            md.push_str(&format!("| {} | {} |\n", reason, count));
        }
        md.push('\n');
    }

    let problems: Vec<_> = summary
        .sources
        .iter()
        .filter(|s| !s.failed_classifications.is_empty() || s.abort_reason.is_some())
        .collect();
    if !problems.is_empty() {
        md.push_str("## Problems\n\n");
        for source in problems {
            if let Some(reason) = &source.abort_reason {
                md.push_str(&format!("- **{}** aborted: {}\n", source.source, reason));
            }
            for classification in &source.failed_classifications {
                md.push_str(&format!(
                    "- **{}** classification failed: {}\n",
                    source.source, classification
                ));
            }
        }
        md.push('\n');
    }

    md.push_str("---\n\n");
    md.push_str("*Generated by Policy-Trawl*\n");

    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::traits::SourceSummary;
    use crate::record::{DataSource, FileAttachment, PubDate};
    use crate::storage::RunStatus;
    use crate::validator::ValidationReport;

    fn record() -> PolicyRecord {
        let mut record = PolicyRecord::new(
            "自然资源部关于规范土地储备的通知",
            "https://gi.mnr.gov.cn/202112/t20211230_1.html",
            DataSource {
                name: "mnr".to_string(),
                base_url: "https://gi.mnr.gov.cn/".to_string(),
                endpoints: vec![],
            },
        );
        record.pub_date = PubDate::parse("2021-12-30");
        record.doc_number = "自然资发〔2021〕1号".to_string();
        record.content = "第一条 为规范土地储备……".to_string();
        record
    }

    #[test]
    fn test_render_policy() {
        let md = render_policy(&record());

        assert!(md.starts_with("# 自然资源部关于规范土地储备的通知\n"));
        assert!(md.contains("- **Document Number**: 自然资发〔2021〕1号"));
        assert!(md.contains("- **Published**: 2021-12-30"));
        assert!(md.contains("## Content\n\n第一条"));
        assert!(!md.contains("**Publisher**"));
        assert!(!md.contains("## Attachments"));
    }

    #[test]
    fn test_render_policy_with_attachments_and_no_content() {
        let mut record = record();
        record.content.clear();
        record.attachments = vec![FileAttachment::new("附件1.pdf", "/files/1.pdf", "")];

        let md = render_policy(&record);
        assert!(md.contains("## Attachments\n\n- 附件1.pdf (/files/1.pdf)"));
        assert!(md.contains("_No content available._"));
    }

    #[test]
    fn test_format_summary() {
        let mut report = ValidationReport {
            total: 5,
            valid: 4,
            invalid: 1,
            ..Default::default()
        };
        report.reasons.insert("missing_date".to_string(), 1);

        let summary = CrawlSummary {
            started_at: "2026-01-01T00:00:00Z".to_string(),
            finished_at: None,
            config_hash: "abc".to_string(),
            sources: vec![SourceSummary {
                source: "gd".to_string(),
                status: RunStatus::Interrupted,
                policies: 4,
                report,
                failed_classifications: vec!["政府规章".to_string()],
                abort_reason: None,
                attachments_downloaded: 2,
                duration_seconds: 12,
            }],
        };

        let md = format_markdown_summary(&summary);
        assert!(md.contains("| gd | interrupted | 4 | 5 | 4 | 1 | 0 | 2 | 12s |"));
        assert!(md.contains("| missing_date | 1 |"));
        assert!(md.contains("- **Valid Rate**: 80.00%"));
        assert!(md.contains("classification failed: 政府规章"));
    }
}
