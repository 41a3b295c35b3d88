//! HTML extraction for the search portal
//!
//! The portal answers some searches with HTML instead of JSON, and the markup
//! depends on which site the data source points at. A [`HtmlLayout`] is picked
//! once from the source's base URL and then used for every listing page.
//! Detail pages share one extraction routine: body text from the first
//! matching content container, metadata from labelled table cells.

use crate::record::{parse_date, DetailPayload, FileAttachment, PubDate};
use crate::url::{host_matches, host_of, resolve_href};
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Containers tried in order when extracting a detail page's body
const CONTENT_SELECTORS: &[&str] = &[
    "#content",
    ".content",
    ".TRS_Editor",
    ".article",
    "article",
    "body",
];

/// Link targets treated as downloadable attachments on detail pages
const ATTACHMENT_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "wps", "xls", "xlsx", "ofd", "zip", "rar",
];

/// Per-site listing markup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HtmlLayout {
    /// Government information disclosure site (list items with a date span)
    GovInfo,
    /// Laws and regulations database (table rows)
    LawDatabase,
    /// Anything else; best-effort selectors
    Generic,
}

struct ListingSelectors {
    rows: &'static str,
    link: &'static str,
    date: Option<&'static str>,
    doc_number: Option<&'static str>,
    publisher: Option<&'static str>,
}

/// One row of an HTML listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRow {
    pub title: String,
    /// Absolute URL of the detail page
    pub url: String,
    pub pub_date: PubDate,
    pub doc_number: String,
    pub publisher: String,
}

impl HtmlLayout {
    /// Selects the layout matching a data source's base URL
    pub fn for_base_url(base_url: &str) -> Self {
        let Some(host) = host_of(base_url) else {
            return Self::Generic;
        };

        if host_matches("gi.mnr.gov.cn", &host) {
            Self::GovInfo
        } else if host_matches("f.mnr.gov.cn", &host) {
            Self::LawDatabase
        } else {
            Self::Generic
        }
    }

    fn selectors(&self) -> ListingSelectors {
        match self {
            Self::GovInfo => ListingSelectors {
                rows: "div.list ul li, ul.list li",
                link: "a[href]",
                date: Some("span"),
                doc_number: None,
                publisher: None,
            },
            Self::LawDatabase => ListingSelectors {
                rows: "table tbody tr",
                link: "td a[href]",
                date: Some("td:nth-child(4)"),
                doc_number: Some("td:nth-child(2)"),
                publisher: Some("td:nth-child(3)"),
            },
            Self::Generic => ListingSelectors {
                rows: ".result-item, .search-result li, ul.list li",
                link: "a[href]",
                date: Some(".date, .time"),
                doc_number: Some(".filenum, .doc-number"),
                publisher: Some(".publisher, .source"),
            },
        }
    }

    /// Extracts every listing row that carries a resolvable link
    ///
    /// # Arguments
    ///
    /// * `html` - The listing page
    /// * `page_url` - Base for resolving relative links
    pub fn parse_listing(&self, html: &str, page_url: &Url) -> Vec<ListingRow> {
        let selectors = self.selectors();
        let document = Html::parse_document(html);

        let (Some(row_sel), Some(link_sel)) =
            (selector(selectors.rows), selector(selectors.link))
        else {
            return Vec::new();
        };
        let date_sel = selectors.date.and_then(selector);
        let doc_sel = selectors.doc_number.and_then(selector);
        let publisher_sel = selectors.publisher.and_then(selector);

        let mut rows = Vec::new();
        for row in document.select(&row_sel) {
            let Some(link) = row.select(&link_sel).next() else {
                continue;
            };
            let Some(url) = link
                .value()
                .attr("href")
                .and_then(|href| resolve_href(href, page_url))
            else {
                continue;
            };

            // Long titles are truncated in the link text but kept whole in the attribute
            let title = link
                .value()
                .attr("title")
                .map(clean_text)
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| collapse(&link.text().collect::<String>()));

            let date_text = date_sel
                .as_ref()
                .and_then(|sel| first_text(row, sel))
                .unwrap_or_default();
            let pub_date = match find_date(&date_text).or_else(|| find_date(&row_text(row))) {
                Some(date) => PubDate::Date(date),
                None => PubDate::parse(date_text.trim_matches(|c| c == '[' || c == ']')),
            };

            rows.push(ListingRow {
                title,
                url,
                pub_date,
                doc_number: doc_sel
                    .as_ref()
                    .and_then(|sel| first_text(row, sel))
                    .unwrap_or_default(),
                publisher: publisher_sel
                    .as_ref()
                    .and_then(|sel| first_text(row, sel))
                    .unwrap_or_default(),
            });
        }

        rows
    }
}

/// Metadata fields recognised in detail-page tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetaField {
    PubDate,
    DocNumber,
    Publisher,
    EffectiveDate,
    Validity,
    Category,
}

fn meta_field(label: &str) -> Option<MetaField> {
    match label {
        "发布日期" | "成文日期" => Some(MetaField::PubDate),
        "发文字号" | "文号" => Some(MetaField::DocNumber),
        "发布机构" | "发文机关" => Some(MetaField::Publisher),
        "生效日期" | "实施日期" => Some(MetaField::EffectiveDate),
        "有效性" | "时效性" => Some(MetaField::Validity),
        "主题分类" | "分类" => Some(MetaField::Category),
        _ => None,
    }
}

/// Extracts body text, metadata and attachment links from a detail page
pub fn parse_detail(html: &str, page_url: &Url) -> DetailPayload {
    let document = Html::parse_document(html);
    let mut detail = DetailPayload {
        content: extract_content(&document),
        ..Default::default()
    };

    if let Some(cell_sel) = selector("td, th") {
        let cells: Vec<String> = document
            .select(&cell_sel)
            .map(|cell| collapse(&cell.text().collect::<String>()))
            .collect();

        for (i, cell) in cells.iter().enumerate() {
            let (field, value) = match split_inline_label(cell) {
                Some(pair) => pair,
                None => match meta_field(&normalize_label(cell)) {
                    Some(field) => match cells.get(i + 1) {
                        Some(next) => (field, next.clone()),
                        None => continue,
                    },
                    None => continue,
                },
            };
            apply_meta(&mut detail, field, value);
        }
    }

    if let Some(link_sel) = selector("a[href]") {
        for link in document.select(&link_sel) {
            let Some(url) = link
                .value()
                .attr("href")
                .and_then(|href| resolve_href(href, page_url))
            else {
                continue;
            };
            let Some(ext) = attachment_extension(&url) else {
                continue;
            };
            if detail.attachments.iter().any(|a| a.url == url) {
                continue;
            }

            let mut name = collapse(&link.text().collect::<String>());
            if name.is_empty() {
                name = url.rsplit('/').next().unwrap_or_default().to_string();
            }
            detail
                .attachments
                .push(FileAttachment::new(&name, &url, &ext));
        }
    }

    detail
}

fn apply_meta(detail: &mut DetailPayload, field: MetaField, value: String) {
    if value.is_empty() || meta_field(&normalize_label(&value)).is_some() {
        return;
    }

    let slot_empty = match field {
        MetaField::PubDate => detail.pub_date.is_none(),
        MetaField::DocNumber => detail.doc_number.is_none(),
        MetaField::Publisher => detail.publisher.is_none(),
        MetaField::EffectiveDate => detail.effective_date.is_none(),
        MetaField::Validity => detail.validity.is_none(),
        MetaField::Category => detail.category.is_none(),
    };
    if !slot_empty {
        return;
    }

    match field {
        MetaField::PubDate => detail.pub_date = Some(PubDate::parse(&value)),
        MetaField::DocNumber => detail.doc_number = Some(value),
        MetaField::Publisher => detail.publisher = Some(value),
        MetaField::EffectiveDate => detail.effective_date = Some(PubDate::parse(&value)),
        MetaField::Validity => detail.validity = Some(value),
        MetaField::Category => detail.category = Some(value),
    }
}

/// Splits cells of the form `发布日期：2021-01-01`
fn split_inline_label(cell: &str) -> Option<(MetaField, String)> {
    let (label, value) = cell.split_once('：').or_else(|| cell.split_once(':'))?;
    let field = meta_field(&normalize_label(label))?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some((field, value.to_string()))
    }
}

fn normalize_label(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .trim_end_matches(['：', ':'])
        .to_string()
}

fn extract_content(document: &Html) -> Option<String> {
    CONTENT_SELECTORS.iter().find_map(|css| {
        let sel = selector(css)?;
        document.select(&sel).find_map(|element| {
            let text = visible_text(element).join("\n");
            if text.is_empty() {
                None
            } else {
                Some(text)
            }
        })
    })
}

/// Text nodes under `element`, skipping scripts and styles
fn visible_text(element: ElementRef<'_>) -> Vec<String> {
    element
        .descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let parent = node
                .parent()
                .and_then(|p| p.value().as_element().map(|e| e.name().to_string()));
            if matches!(parent.as_deref(), Some("script" | "style")) {
                return None;
            }
            let text = text.trim();
            if text.is_empty() {
                None
            } else {
                Some(text.to_string())
            }
        })
        .collect()
}

fn attachment_extension(url: &str) -> Option<String> {
    let path = Url::parse(url).ok()?.path().to_lowercase();
    let ext = path.rsplit_once('.')?.1.to_string();
    ATTACHMENT_EXTENSIONS
        .contains(&ext.as_str())
        .then_some(ext)
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn first_text(row: ElementRef<'_>, sel: &Selector) -> Option<String> {
    row.select(sel)
        .map(|el| collapse(&el.text().collect::<String>()))
        .find(|t| !t.is_empty())
}

fn row_text(row: ElementRef<'_>) -> String {
    row.text().collect::<Vec<_>>().join(" ")
}

/// Finds the first token in `text` that parses as an accepted date
fn find_date(text: &str) -> Option<chrono::NaiveDate> {
    text.split(|c: char| c.is_whitespace() || matches!(c, '[' | ']' | '(' | ')' | '（' | '）'))
        .filter(|token| !token.is_empty())
        .find_map(parse_date)
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strips markup (search-term highlighting and the like) and collapses whitespace
///
/// # Examples
///
/// ```
/// use policy_trawl::source::clean_text;
///
/// assert_eq!(clean_text("<em>土地</em>管理  办法"), "土地管理 办法");
/// assert_eq!(clean_text(" plain "), "plain");
/// ```
pub fn clean_text(raw: &str) -> String {
    if !raw.contains('<') {
        return collapse(raw);
    }
    let fragment = Html::parse_fragment(raw);
    collapse(&fragment.root_element().text().collect::<String>())
}
