//! Ministry search-portal adapter
//!
//! Searches go to a full-text search API that answers in JSON on some
//! deployments and in HTML on others. Records carry a listing URL, and their
//! body text and remaining metadata come from fetching that detail page.

use super::html::{clean_text, parse_detail, HtmlLayout};
use super::{Classification, PolicySource, SearchPage};
use crate::config::{parse_filter_date, Config, SourceConfig};
use crate::crawler::{Attempt, Fetcher, ProxyPool};
use crate::record::{DataSource, DetailPayload, FileAttachment, PolicyRecord, PubDate};
use crate::url::{parse_http_url, resolve_href};
use crate::{ConfigError, TrawlError};
use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER};
use serde_json::Value;
use std::path::Path;
use url::Url;

/// Ministry category names and their upstream codes
pub const PORTAL_CATEGORIES: &[(&str, &str)] = &[
    ("自然资源调查监测", "1318"),
    ("自然资源确权登记", "1319"),
    ("自然资源合理开发利用", "1320"),
    ("自然资源有偿使用", "1321"),
    ("国土空间规划", "1322"),
    ("国土空间用途管制", "1663"),
    ("国土空间生态修复", "1324"),
    ("耕地保护", "1325"),
    ("地质勘查", "1326"),
    ("矿产勘查", "1327"),
    ("矿产保护", "1328"),
    ("矿产开发", "1329"),
    ("地质环境保护", "1330"),
    ("海洋资源", "1331"),
    ("测绘地理信息", "1332"),
    ("地质灾害防治", "1334"),
    ("地质公园", "1335"),
    ("地质遗迹保护", "1336"),
    ("矿业权评估", "1338"),
    ("机构建设", "1339"),
    ("综合管理", "1340"),
    ("其他", "1341"),
];

/// Label of the catch-all classification used when no categories are configured
const ALL_CATEGORIES: &str = "全部";

/// Looks up the upstream code of a category name
pub fn portal_category_code(name: &str) -> Option<&'static str> {
    PORTAL_CATEGORIES
        .iter()
        .find(|(label, _)| *label == name)
        .map(|(_, code)| *code)
}

/// Search response as delivered by the portal
#[derive(Debug)]
pub enum PortalPayload {
    Json(Value),
    Html { url: Url, body: String },
}

/// Adapter for the generic search + detail portal
pub struct PortalSource {
    fetcher: Fetcher,
    descriptor: DataSource,
    base_url: Url,
    search_api: String,
    channel_id: String,
    categories: Vec<String>,
    level: String,
    keywords: Vec<String>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    layout: HtmlLayout,
}

impl PortalSource {
    /// Builds the adapter and its fetcher from a `kind = "portal"` source entry
    pub fn new(source: &SourceConfig, config: &Config) -> Result<Self, TrawlError> {
        let base_url = parse_http_url(&source.base_url)?;
        let search_api = source.search_api.clone().ok_or_else(|| {
            ConfigError::Validation(format!("source '{}' requires search-api", source.name))
        })?;
        let channel_id = source.channel_id.clone().ok_or_else(|| {
            ConfigError::Validation(format!("source '{}' requires channel-id", source.name))
        })?;

        let start_date = parse_filter_date("start_date", config.filter.start_date.as_deref())?;
        let end_date = parse_filter_date("end_date", config.filter.end_date.as_deref())?;

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/html;q=0.9, */*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("zh-CN,zh;q=0.9"));
        if let Ok(referer) = HeaderValue::from_str(base_url.as_str()) {
            headers.insert(REFERER, referer);
        }

        let proxy_pool = ProxyPool::from_config(&config.proxy, config.request.timeout());
        let fetcher = Fetcher::new(config.request.clone(), headers, proxy_pool)?;

        Ok(Self {
            fetcher,
            descriptor: DataSource {
                name: source.name.clone(),
                base_url: base_url.to_string(),
                endpoints: vec![search_api.clone()],
            },
            layout: HtmlLayout::for_base_url(base_url.as_str()),
            base_url,
            search_api,
            channel_id,
            categories: source.categories.clone(),
            level: source.level.clone().unwrap_or_default(),
            keywords: config
                .filter
                .keywords
                .iter()
                .map(|k| k.trim().to_string())
                .collect(),
            start_date,
            end_date,
        })
    }

    pub fn layout(&self) -> HtmlLayout {
        self.layout
    }

    /// Applies the title-keyword filter and the publication-date window
    fn within_filter(&self, record: &PolicyRecord) -> bool {
        if !self.keywords.is_empty() && !self.keywords.iter().any(|k| record.title.contains(k)) {
            return false;
        }

        // Records without a parseable date are kept; validation reports them
        if let Some(date) = record.pub_date.as_date() {
            if self.start_date.is_some_and(|start| date < start) {
                return false;
            }
            if self.end_date.is_some_and(|end| date > end) {
                return false;
            }
        }

        true
    }

    /// Scopes a record to the classification it was fetched under
    ///
    /// Returns false when the upstream reports a different category.
    fn scope_to(&self, classification: &Classification, record: &mut PolicyRecord) -> bool {
        if classification.code.is_empty() {
            return true;
        }
        if record.category.is_empty() {
            record.category = classification.label.clone();
            return true;
        }
        record.category == classification.label
    }

    fn record_from_json(&self, item: &Value) -> PolicyRecord {
        let raw_url = json_text(item, &["url", "link"]);
        let url = resolve_href(&raw_url, &self.base_url).unwrap_or(raw_url);

        let mut record = PolicyRecord::new(
            &clean_text(&json_text(item, &["title"])),
            &url,
            self.descriptor.clone(),
        );
        record.pub_date = PubDate::parse(&json_text(item, &["pubdate", "publishdate"]));
        record.doc_number = json_text(item, &["filenum"]);
        record.content = clean_text(&json_text(item, &["content", "summary"]));
        record.category = json_text(item, &["category"]);
        record.validity = json_text(item, &["status"]);
        record.effective_date = PubDate::parse(&json_text(item, &["effectivedate"]));
        record.level = self.level.clone();
        record
    }
}

impl PolicySource for PortalSource {
    type Payload = PortalPayload;

    fn descriptor(&self) -> &DataSource {
        &self.descriptor
    }

    fn classifications(&self) -> Vec<Classification> {
        if self.categories.is_empty() {
            return vec![Classification::for_category(ALL_CATEGORIES, "")];
        }

        self.categories
            .iter()
            .map(|name| {
                Classification::for_category(name, portal_category_code(name).unwrap_or(name.as_str()))
            })
            .collect()
    }

    fn ends_on_short_page(&self) -> bool {
        false
    }

    async fn fetch_page(
        &mut self,
        classification: &Classification,
        page: u32,
        page_size: u32,
    ) -> Result<Option<PortalPayload>, TrawlError> {
        let mut query: Vec<(&str, String)> = vec![
            ("channelid", self.channel_id.clone()),
            ("searchword", self.keywords.join(" ")),
            ("page", page.to_string()),
            ("perpage", page_size.to_string()),
            ("searchtype", "title".to_string()),
            ("orderby", "RELEVANCE".to_string()),
        ];
        if let Some(start) = self.start_date {
            query.push(("starttime", start.format("%Y-%m-%d").to_string()));
        }
        if let Some(end) = self.end_date {
            query.push(("endtime", end.format("%Y-%m-%d").to_string()));
        }

        let search_api = self.search_api.clone();
        let label = format!("{} search page {}", classification, page);

        self.fetcher
            .execute(
                &label,
                |client| client.get(&search_api).query(&query),
                |response| {
                    let body = response.body.trim();
                    if body.is_empty() {
                        return Attempt::Retry("empty response body".to_string());
                    }
                    if let Ok(value) = serde_json::from_str::<Value>(body) {
                        if value.is_object() || value.is_array() {
                            return Attempt::Done(PortalPayload::Json(value));
                        }
                    }

                    match Url::parse(&response.url) {
                        Ok(url) => Attempt::Done(PortalPayload::Html {
                            url,
                            body: response.body.clone(),
                        }),
                        Err(e) => Attempt::GiveUp(format!("bad response URL: {}", e)),
                    }
                },
            )
            .await
    }

    fn parse_page(
        &self,
        classification: &Classification,
        payload: PortalPayload,
    ) -> Result<SearchPage, TrawlError> {
        let (mut records, total) = match payload {
            PortalPayload::Json(value) => {
                let records: Vec<PolicyRecord> = json_rows(&value)
                    .iter()
                    .map(|item| self.record_from_json(item))
                    .collect();
                (records, json_total(&value))
            }
            PortalPayload::Html { url, body } => {
                let records = self
                    .layout
                    .parse_listing(&body, &url)
                    .into_iter()
                    .map(|row| {
                        let mut record =
                            PolicyRecord::new(&row.title, &row.url, self.descriptor.clone());
                        record.pub_date = row.pub_date;
                        record.doc_number = row.doc_number;
                        record.publisher = row.publisher;
                        record.level = self.level.clone();
                        record
                    })
                    .collect();
                (records, None)
            }
        };

        let raw_rows = records.len();
        records.retain_mut(|record| self.scope_to(classification, record) && self.within_filter(record));

        if records.len() < raw_rows {
            tracing::debug!(
                "{}: {} of {} rows outside the keyword/date/category filter",
                classification,
                raw_rows - records.len(),
                raw_rows
            );
        }

        Ok(SearchPage {
            records,
            raw_rows,
            total,
        })
    }

    fn needs_detail(&self, record: &PolicyRecord) -> bool {
        record.content.trim().is_empty() && !record.url.is_empty()
    }

    async fn fetch_detail(
        &mut self,
        record: &PolicyRecord,
    ) -> Result<Option<DetailPayload>, TrawlError> {
        let url = record.url.clone();
        let label = format!("detail {}", url);

        self.fetcher
            .execute(
                &label,
                |client| client.get(&url),
                |response| {
                    if response.body.trim().is_empty() {
                        return Attempt::Retry("empty detail page".to_string());
                    }
                    match Url::parse(&response.url) {
                        Ok(page_url) => Attempt::Done(parse_detail(&response.body, &page_url)),
                        Err(e) => Attempt::GiveUp(format!("bad response URL: {}", e)),
                    }
                },
            )
            .await
    }

    async fn download_attachment(
        &mut self,
        attachment: &FileAttachment,
        dest: &Path,
    ) -> Result<bool, TrawlError> {
        self.fetcher.download(&attachment.url, dest).await
    }
}

/// Result rows of a JSON search response
fn json_rows(value: &Value) -> &[Value] {
    match value {
        Value::Array(items) => items,
        Value::Object(map) => ["results", "data"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array))
            .map(Vec::as_slice)
            .unwrap_or(&[]),
        _ => &[],
    }
}

fn json_total(value: &Value) -> Option<usize> {
    ["total", "totalCount"].iter().find_map(|key| {
        let field = value.get(*key)?;
        field
            .as_u64()
            .map(|n| n as usize)
            .or_else(|| field.as_str()?.trim().parse().ok())
    })
}

/// First non-empty value among `keys`, numbers rendered as text
pub(crate) fn json_text(item: &Value, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|key| match item.get(*key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_default()
}
