use crate::record::{PolicyRecord, PubDate, SourceExtension};
use crate::url::parse_http_url;
use std::fmt;

/// One reason a record was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    MissingTitle,
    /// Provincial record without an upstream identifier
    MissingId,
    MissingDate,
    /// Publication date present but not in an accepted format
    InvalidDateFormat(String),
    MissingUrl,
    /// URL does not parse or is not HTTP(S)
    InvalidUrl(String),
    /// Category differs from the label of the rule type it was fetched under
    CategoryMismatch { expected: String, found: String },
}

impl ValidationIssue {
    /// Stable reason name used as a report key
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingTitle => "missing_title",
            Self::MissingId => "missing_id",
            Self::MissingDate => "missing_date",
            Self::InvalidDateFormat(_) => "invalid_date_format",
            Self::MissingUrl => "missing_url",
            Self::InvalidUrl(_) => "invalid_url",
            Self::CategoryMismatch { .. } => "category mismatch",
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDateFormat(raw) => write!(f, "invalid_date_format ({})", raw),
            Self::InvalidUrl(url) => write!(f, "invalid_url ({})", url),
            Self::CategoryMismatch { expected, found } => {
                write!(f, "category mismatch (expected '{}', found '{}')", expected, found)
            }
            other => write!(f, "{}", other.reason()),
        }
    }
}

/// Checks one record against every structural rule
///
/// Returns an empty list for a valid record. The check only reads the
/// record, so validating it again yields the same list.
pub fn validate_record(record: &PolicyRecord) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if record.title.trim().is_empty() {
        issues.push(ValidationIssue::MissingTitle);
    }

    if let SourceExtension::Provincial(ext) = &record.extension {
        if ext.upstream_id.trim().is_empty() {
            issues.push(ValidationIssue::MissingId);
        }
    }

    match &record.pub_date {
        PubDate::Empty => issues.push(ValidationIssue::MissingDate),
        PubDate::Raw(raw) => issues.push(ValidationIssue::InvalidDateFormat(raw.clone())),
        PubDate::Date(_) => {}
    }

    let url = record.url.trim();
    if url.is_empty() {
        issues.push(ValidationIssue::MissingUrl);
    } else if parse_http_url(url).is_err() {
        issues.push(ValidationIssue::InvalidUrl(url.to_string()));
    }

    // Only the provincial source declares which category a record must carry
    if let SourceExtension::Provincial(ext) = &record.extension {
        let expected = ext.rule_type.label();
        if record.category != expected {
            issues.push(ValidationIssue::CategoryMismatch {
                expected: expected.to_string(),
                found: record.category.clone(),
            });
        }
    }

    issues
}

/// Identity used to detect the same document appearing more than once
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    /// Portal records: title plus canonical URL
    Composite { title: String, url: String },
    /// Provincial records: the upstream's opaque ID, which stays the same when
    /// a document is listed under several rule types
    Upstream(String),
}

impl DedupKey {
    pub fn for_record(record: &PolicyRecord) -> Self {
        match &record.extension {
            SourceExtension::Provincial(ext) => Self::Upstream(ext.upstream_id.trim().to_string()),
            SourceExtension::Portal => Self::Composite {
                title: record.title.trim().to_string(),
                url: record.url.trim().to_string(),
            },
        }
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Composite { title, url } => write!(f, "{}|{}", title, url),
            Self::Upstream(id) => write!(f, "id:{}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{DataSource, ProvincialExtension, RuleType};

    fn portal(title: &str, date: &str, url: &str) -> PolicyRecord {
        let mut record = PolicyRecord::new(
            title,
            url,
            DataSource {
                name: "mnr".to_string(),
                base_url: "https://gi.mnr.gov.cn/".to_string(),
                endpoints: vec![],
            },
        );
        record.pub_date = PubDate::parse(date);
        record
    }

    fn provincial(id: &str, rule_type: RuleType, category: &str) -> PolicyRecord {
        let mut record = portal("Title", "2021-01-01", "https://example.com/d?id=1");
        record.category = category.to_string();
        record.extension = SourceExtension::Provincial(ProvincialExtension {
            upstream_id: id.to_string(),
            rule_type,
            formulate_mode: String::new(),
            file_type: String::new(),
            tag_names: String::new(),
            keywords: String::new(),
            associate_id: String::new(),
        });
        record
    }

    fn reasons(record: &PolicyRecord) -> Vec<&'static str> {
        validate_record(record).iter().map(|i| i.reason()).collect()
    }

    #[test]
    fn test_valid_portal_record() {
        let record = portal("Title", "2021年12月30日", "https://gi.mnr.gov.cn/a.html");
        assert!(validate_record(&record).is_empty());
    }

    #[test]
    fn test_missing_fields() {
        let record = portal("  ", "", "");
        assert_eq!(reasons(&record), vec!["missing_title", "missing_date", "missing_url"]);
    }

    #[test]
    fn test_invalid_date_and_url() {
        let record = portal("Title", "unknown", "ftp://example.com/a");
        assert_eq!(reasons(&record), vec!["invalid_date_format", "invalid_url"]);

        let record = portal("Title", "2021-01-01", "/relative/path");
        assert_eq!(reasons(&record), vec!["invalid_url"]);
    }

    #[test]
    fn test_provincial_rules() {
        let ok = provincial("1", RuleType::LocalRegulation, "地方性法规");
        assert!(validate_record(&ok).is_empty());

        let missing = provincial(" ", RuleType::LocalRegulation, "地方性法规");
        assert_eq!(reasons(&missing), vec!["missing_id"]);

        let mismatch = provincial("2", RuleType::GovernmentRule, "地方性法规");
        assert_eq!(
            validate_record(&mismatch),
            vec![ValidationIssue::CategoryMismatch {
                expected: "政府规章".to_string(),
                found: "地方性法规".to_string(),
            }]
        );
        assert_eq!(reasons(&mismatch), vec!["category mismatch"]);
    }

    #[test]
    fn test_portal_category_is_not_checked() {
        let mut record = portal("Title", "2021-01-01", "https://gi.mnr.gov.cn/a.html");
        record.category = "anything".to_string();
        assert!(validate_record(&record).is_empty());
    }

    #[test]
    fn test_validation_is_idempotent() {
        let records = [
            portal("Title", "2021-01-01", "https://gi.mnr.gov.cn/a.html"),
            portal("", "bad", "nope"),
            provincial("", RuleType::NormativeDocument, "x"),
        ];
        for record in &records {
            assert_eq!(validate_record(record), validate_record(record));
        }
    }

    #[test]
    fn test_dedup_keys() {
        let a = portal("Title", "2021-01-01", "https://x.cn/a");
        let b = portal(" Title ", "2022-01-01", "https://x.cn/a");
        assert_eq!(DedupKey::for_record(&a), DedupKey::for_record(&b));

        let c = provincial("42", RuleType::LocalRegulation, "地方性法规");
        let mut d = provincial("42", RuleType::GovernmentRule, "政府规章");
        d.title = "Different title".to_string();
        assert_eq!(DedupKey::for_record(&c), DedupKey::for_record(&d));
        assert_eq!(DedupKey::for_record(&c).to_string(), "id:42");
    }
}
