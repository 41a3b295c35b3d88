//! Provincial regulation-database adapter
//!
//! The upstream is a paginated JSON API partitioned by rule type. Every search
//! response hands back a token in its `msg` field that the next search request
//! must echo in the `Q-Token` header. Detail requests are keyed by the
//! upstream's opaque record ID and also carry the attachment list.

use super::portal::json_text;
use super::{Classification, PolicySource, SearchPage};
use crate::config::{Config, SourceConfig};
use crate::crawler::{Attempt, Fetcher, ProxyPool};
use crate::record::{
    DataSource, DetailPayload, FileAttachment, PolicyRecord, ProvincialExtension, PubDate,
    RuleType, SourceExtension,
};
use crate::url::parse_http_url;
use crate::TrawlError;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, ORIGIN, REFERER};
use serde_json::{json, Value};
use std::path::Path;

const SEARCH_PATH: &str = "/nfrr/law-rule!noSession_es_regulation_search.gx";
const DETAIL_PATH: &str = "/nfrr/law-rule!noSession_getById.gx";
const DETAIL_PAGE_PATH: &str = "/securityJsp/nfrr_inner/internet/lawRule/lawRuleDetail.jsp";
const DOWNLOAD_PATH: &str = "/downloadFile";

/// Success code of the search envelope
const SEARCH_OK: i64 = 200;

/// Upstream file paths use these substitutions for bracket characters
const PATH_SUBSTITUTIONS: &[(char, &str)] = &[
    ('(', "left"),
    (')', "right"),
    ('（', "zLeft"),
    ('）', "zRight"),
    ('[', "lBracket"),
    (']', "rBracket"),
];

/// Rewrites bracket characters and form-encodes an upstream file path
///
/// # Examples
///
/// ```
/// use policy_trawl::source::encode_file_path;
///
/// assert_eq!(encode_file_path("/up/a(1).pdf"), "%2Fup%2Faleft1right.pdf");
/// ```
pub fn encode_file_path(path: &str) -> String {
    let mut rewritten = String::with_capacity(path.len());
    for c in path.chars() {
        match PATH_SUBSTITUTIONS.iter().find(|(from, _)| *from == c) {
            Some((_, to)) => rewritten.push_str(to),
            None => rewritten.push(c),
        }
    }
    url::form_urlencoded::byte_serialize(rewritten.as_bytes()).collect()
}

fn is_rate_limit_message(message: &str) -> bool {
    message.contains("Too many requests") || message.to_lowercase().contains("rate limit")
}

/// Token to send with the next search, taken from a successful response
///
/// Error responses and values that cannot travel as a header keep the
/// current token in place.
fn next_q_token(payload: &Value) -> Option<String> {
    if payload.get("code").and_then(Value::as_i64) != Some(SEARCH_OK) {
        return None;
    }
    payload
        .get("msg")
        .and_then(Value::as_str)
        .filter(|msg| msg.is_ascii() && HeaderValue::from_str(msg).is_ok())
        .map(str::to_string)
}

/// Adapter for the provincial paginated API
pub struct ProvincialSource {
    fetcher: Fetcher,
    descriptor: DataSource,
    /// API root without a trailing slash
    api_base: String,
    rule_types: Vec<RuleType>,
    level: String,
    /// Token echoed in the `Q-Token` header of the next search
    q_token: String,
}

impl ProvincialSource {
    /// Builds the adapter and its fetcher from a `kind = "provincial"` source entry
    ///
    /// An empty `rule-types` list crawls all three rule types.
    pub fn new(source: &SourceConfig, config: &Config) -> Result<Self, TrawlError> {
        let base_url = parse_http_url(&source.base_url)?;
        let api_base = base_url.as_str().trim_end_matches('/').to_string();

        let rule_types = if source.rule_types.is_empty() {
            RuleType::all().to_vec()
        } else {
            source
                .rule_types
                .iter()
                .filter_map(|code| RuleType::from_code(*code))
                .collect()
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("zh-CN,zh;q=0.9"));
        let origin = base_url.origin().ascii_serialization();
        if let Ok(value) = HeaderValue::from_str(&origin) {
            headers.insert(ORIGIN, value);
        }
        if let Ok(value) = HeaderValue::from_str(base_url.as_str()) {
            headers.insert(REFERER, value);
        }

        let proxy_pool = ProxyPool::from_config(&config.proxy, config.request.timeout());
        let fetcher = Fetcher::new(config.request.clone(), headers, proxy_pool)?;

        Ok(Self {
            fetcher,
            descriptor: DataSource {
                name: source.name.clone(),
                base_url: base_url.to_string(),
                endpoints: [SEARCH_PATH, DETAIL_PATH, DOWNLOAD_PATH]
                    .iter()
                    .map(|path| format!("{}{}", api_base, path))
                    .collect(),
            },
            api_base,
            rule_types,
            level: source.level.clone().unwrap_or_default(),
            q_token: String::new(),
        })
    }

    /// Synthetic detail-page URL of a record
    pub fn detail_url(&self, id: &str, rule_type: RuleType) -> String {
        format!(
            "{}{}?id={}&lawRuleType={}",
            self.api_base,
            DETAIL_PAGE_PATH,
            id,
            rule_type.code()
        )
    }

    /// Download URL for an upstream file path
    pub fn download_url(&self, file_path: &str) -> String {
        format!(
            "{}{}?fileFolder={}",
            self.api_base,
            DOWNLOAD_PATH,
            encode_file_path(file_path)
        )
    }

    pub fn q_token(&self) -> &str {
        &self.q_token
    }

    /// Builds a record from one search row
    fn record_from_row(&self, row: &Value, rule_type: RuleType) -> PolicyRecord {
        let id = json_text(row, &["id"]);
        let publisher = row
            .get("officeVo")
            .map(|office| json_text(office, &["groupName"]))
            .unwrap_or_default();

        let mut record = PolicyRecord::new(
            &json_text(row, &["title"]),
            &self.detail_url(&id, rule_type),
            self.descriptor.clone(),
        );
        record.pub_date = PubDate::parse(&json_text(row, &["passDate"]));
        record.category = rule_type.label().to_string();
        record.validity = json_text(row, &["timeliness"]);
        record.publisher = publisher;
        record.level = self.level.clone();
        record.extension = SourceExtension::Provincial(ProvincialExtension {
            upstream_id: id,
            rule_type,
            formulate_mode: json_text(row, &["formulateMode"]),
            file_type: json_text(row, &["fileType"]),
            tag_names: json_text(row, &["tagNames"]),
            keywords: String::new(),
            associate_id: String::new(),
        });
        record
    }
}

impl PolicySource for ProvincialSource {
    type Payload = Value;

    fn descriptor(&self) -> &DataSource {
        &self.descriptor
    }

    fn classifications(&self) -> Vec<Classification> {
        self.rule_types
            .iter()
            .map(|rule_type| Classification::for_rule_type(*rule_type))
            .collect()
    }

    async fn fetch_page(
        &mut self,
        classification: &Classification,
        page: u32,
        page_size: u32,
    ) -> Result<Option<Value>, TrawlError> {
        let url = format!("{}{}", self.api_base, SEARCH_PATH);
        let body = json!({
            "pageNum": page,
            "pageSize": page_size,
            "lawRuleType": classification.rule_type.map(|t| t.code()).unwrap_or_default(),
            "orderByColumn": "passDate",
        });
        let token = self.q_token.clone();
        let label = format!("{} search page {}", classification, page);
        let mut next_token: Option<String> = None;

        let result = self
            .fetcher
            .execute(
                &label,
                |client| {
                    client
                        .post(&url)
                        .header("Q-Token", token.as_str())
                        .json(&body)
                },
                |response| {
                    let value: Value = match serde_json::from_str(&response.body) {
                        Ok(value) => value,
                        Err(e) => return Attempt::Retry(format!("invalid JSON: {}", e)),
                    };

                    if let Some(token) = next_q_token(&value) {
                        next_token = Some(token);
                    }

                    let message = value
                        .get("msg")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    let code = value.get("code").and_then(Value::as_i64);
                    if code == Some(SEARCH_OK) {
                        return Attempt::Done(value);
                    }

                    let message = message.unwrap_or_else(|| "unknown error".to_string());
                    if is_rate_limit_message(&message) {
                        Attempt::RateLimited(message)
                    } else {
                        Attempt::GiveUp(format!("code {:?}: {}", code, message))
                    }
                },
            )
            .await?;

        if let Some(token) = next_token {
            self.q_token = token;
        }

        Ok(result)
    }

    fn parse_page(
        &self,
        classification: &Classification,
        payload: Value,
    ) -> Result<SearchPage, TrawlError> {
        let rule_type = classification.rule_type.ok_or_else(|| TrawlError::Payload {
            url: self.descriptor.base_url.clone(),
            message: format!("classification '{}' has no rule type", classification),
        })?;

        let data = payload.get("data");
        let rows = data
            .and_then(|d| d.get("rows"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let total = data
            .and_then(|d| d.get("total"))
            .and_then(Value::as_u64)
            .map(|n| n as usize);

        let records = rows
            .iter()
            .map(|row| self.record_from_row(row, rule_type))
            .collect();

        Ok(SearchPage {
            records,
            raw_rows: rows.len(),
            total,
        })
    }

    async fn fetch_detail(
        &mut self,
        record: &PolicyRecord,
    ) -> Result<Option<DetailPayload>, TrawlError> {
        let Some(ext) = record.provincial() else {
            tracing::warn!("Record '{}' has no upstream ID, skipping detail", record.title);
            return Ok(None);
        };
        let id = ext.upstream_id.clone();
        let url = format!("{}{}", self.api_base, DETAIL_PATH);
        let label = format!("detail {}", id);

        let value = self
            .fetcher
            .execute(
                &label,
                |client| client.post(&url).form(&[("id", id.as_str())]),
                |response| match serde_json::from_str::<Value>(&response.body) {
                    Ok(value) if value.get("lawRule").is_some() || value.get("list").is_some() => {
                        Attempt::Done(value)
                    }
                    Ok(_) => Attempt::Retry("unexpected detail payload".to_string()),
                    Err(e) => Attempt::Retry(format!("invalid JSON: {}", e)),
                },
            )
            .await?;

        Ok(value.map(|v| detail_from_value(&v)))
    }

    async fn download_attachment(
        &mut self,
        attachment: &FileAttachment,
        dest: &Path,
    ) -> Result<bool, TrawlError> {
        let url = self.download_url(&attachment.url);
        self.fetcher.download(&url, dest).await
    }
}

/// Converts a detail response into a backfill payload
fn detail_from_value(value: &Value) -> DetailPayload {
    let empty = Value::Null;
    let law_rule = value.get("lawRule").unwrap_or(&empty);
    let optional = |keys: &[&str]| Some(json_text(law_rule, keys)).filter(|s| !s.is_empty());

    let attachments = value
        .get("list")
        .and_then(Value::as_array)
        .map(|files| {
            files
                .iter()
                .map(|file| {
                    FileAttachment::new(
                        &json_text(file, &["fileName"]),
                        &json_text(file, &["filePath"]),
                        &json_text(file, &["fileExt"]),
                    )
                })
                .filter(|attachment| !attachment.url.is_empty())
                .collect()
        })
        .unwrap_or_default();

    DetailPayload {
        content: optional(&["content"]),
        effective_date: optional(&["effectiveDate"]).map(|d| PubDate::parse(&d)),
        keywords: optional(&["keywords"]),
        associate_id: optional(&["associate"]),
        attachments,
        ..Default::default()
    }
}
