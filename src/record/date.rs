//! Publication-date normalization
//!
//! Upstream dates arrive in several shapes. A date either parses into one of
//! the accepted formats, is kept verbatim as raw text, or is empty.

use chrono::NaiveDate;
use serde::{Serialize, Serializer};
use std::fmt;

/// Formats accepted for publication and effective dates
pub const ACCEPTED_DATE_FORMATS: &[&str] = &["%Y年%m月%d日", "%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d"];

/// A normalized upstream date
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PubDate {
    /// No date was supplied
    #[default]
    Empty,

    /// Parsed into a calendar date
    Date(NaiveDate),

    /// Unparseable input preserved as trimmed text
    Raw(String),
}

impl PubDate {
    /// Normalizes an upstream date string
    ///
    /// Timestamps such as `2021-12-30 00:00:00` or `2021-12-30T08:00:00` are
    /// reduced to their date part before parsing.
    ///
    /// # Examples
    ///
    /// ```
    /// use policy_trawl::record::PubDate;
    /// use chrono::NaiveDate;
    ///
    /// let expected = NaiveDate::from_ymd_opt(2021, 12, 30).unwrap();
    /// assert_eq!(PubDate::parse("2021年12月30日"), PubDate::Date(expected));
    /// assert_eq!(PubDate::parse("2021.12.30"), PubDate::Date(expected));
    /// assert_eq!(PubDate::parse(" unknown "), PubDate::Raw("unknown".to_string()));
    /// ```
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::Empty;
        }

        if let Some(date) = parse_date(trimmed) {
            return Self::Date(date);
        }

        let head = trimmed
            .split(|c: char| c.is_whitespace() || c == 'T')
            .next()
            .unwrap_or(trimmed);
        if head != trimmed {
            if let Some(date) = parse_date(head) {
                return Self::Date(date);
            }
        }

        Self::Raw(trimmed.to_string())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(date) => Some(*date),
            _ => None,
        }
    }
}

/// Parses a date against the accepted formats
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    ACCEPTED_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

impl fmt::Display for PubDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            Self::Raw(raw) => write!(f, "{}", raw),
        }
    }
}

impl From<&str> for PubDate {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl Serialize for PubDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec_30() -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 12, 30).unwrap()
    }

    #[test]
    fn test_accepted_formats_agree() {
        for raw in ["2021年12月30日", "2021-12-30", "2021/12/30", "2021.12.30"] {
            assert_eq!(PubDate::parse(raw), PubDate::Date(dec_30()), "{}", raw);
        }
    }

    #[test]
    fn test_unparseable_kept_verbatim() {
        assert_eq!(PubDate::parse("unknown"), PubDate::Raw("unknown".to_string()));
        assert_eq!(PubDate::parse("  2021年底 "), PubDate::Raw("2021年底".to_string()));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(PubDate::parse(""), PubDate::Empty);
        assert_eq!(PubDate::parse("   "), PubDate::Empty);
    }

    #[test]
    fn test_timestamp_truncated_to_date() {
        assert_eq!(PubDate::parse("2021-12-30 00:00:00"), PubDate::Date(dec_30()));
        assert_eq!(PubDate::parse("2021-12-30T08:15:00"), PubDate::Date(dec_30()));
    }

    #[test]
    fn test_display() {
        assert_eq!(PubDate::Date(dec_30()).to_string(), "2021-12-30");
        assert_eq!(PubDate::Raw("n/a".to_string()).to_string(), "n/a");
        assert_eq!(PubDate::Empty.to_string(), "");
    }

    #[test]
    fn test_serializes_as_string() {
        let json = serde_json::to_string(&PubDate::Date(dec_30())).unwrap();
        assert_eq!(json, "\"2021-12-30\"");
    }
}
