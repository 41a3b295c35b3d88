use crate::config::types::{
    Config, FilterConfig, OutputConfig, PaginationConfig, ProxyConfig, RequestConfig,
    SourceConfig, SourceKind,
};
use crate::record::RuleType;
use crate::source::portal_category_code;
use crate::ConfigError;
use chrono::NaiveDate;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_request_config(&config.request)?;
    validate_pagination_config(&config.pagination)?;
    validate_filter_config(&config.filter)?;
    validate_proxy_config(&config.proxy)?;
    validate_output_config(&config.output)?;
    validate_sources(&config.sources)?;
    Ok(())
}

/// Validates request pacing configuration
fn validate_request_config(config: &RequestConfig) -> Result<(), ConfigError> {
    if config.max_retries < 1 || config.max_retries > 10 {
        return Err(ConfigError::Validation(format!(
            "max_retries must be between 1 and 10, got {}",
            config.max_retries
        )));
    }

    if config.timeout_secs < 1 || config.timeout_secs > 600 {
        return Err(ConfigError::Validation(format!(
            "timeout_secs must be between 1 and 600, got {}",
            config.timeout_secs
        )));
    }

    if config.session_rotate_interval < 1 {
        return Err(ConfigError::Validation(format!(
            "session_rotate_interval must be >= 1, got {}",
            config.session_rotate_interval
        )));
    }

    // A day-long pause is certainly a typo in milliseconds
    const MAX_PAUSE_MS: u64 = 3_600_000;
    for (name, value) in [
        ("delay_ms", config.delay_ms),
        ("retry_delay_ms", config.retry_delay_ms),
        ("rate_limit_delay_ms", config.rate_limit_delay_ms),
    ] {
        if value > MAX_PAUSE_MS {
            return Err(ConfigError::Validation(format!(
                "{} must be <= {}ms, got {}ms",
                name, MAX_PAUSE_MS, value
            )));
        }
    }

    Ok(())
}

/// Validates pagination limits
fn validate_pagination_config(config: &PaginationConfig) -> Result<(), ConfigError> {
    if config.page_size < 1 || config.page_size > 100 {
        return Err(ConfigError::Validation(format!(
            "page_size must be between 1 and 100, got {}",
            config.page_size
        )));
    }

    if config.max_pages < 1 {
        return Err(ConfigError::Validation(format!(
            "max_pages must be >= 1, got {}",
            config.max_pages
        )));
    }

    if config.max_empty_pages < 1 {
        return Err(ConfigError::Validation(format!(
            "max_empty_pages must be >= 1, got {}",
            config.max_empty_pages
        )));
    }

    Ok(())
}

/// Validates the keyword/date filter
fn validate_filter_config(config: &FilterConfig) -> Result<(), ConfigError> {
    let start = parse_filter_date("start_date", config.start_date.as_deref())?;
    let end = parse_filter_date("end_date", config.end_date.as_deref())?;

    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(ConfigError::Validation(format!(
                "start_date {} is after end_date {}",
                start, end
            )));
        }
    }

    if config.keywords.iter().any(|k| k.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "keywords cannot contain empty entries".to_string(),
        ));
    }

    Ok(())
}

/// Parses an optional `YYYY-MM-DD` filter bound; empty strings count as unset
pub(crate) fn parse_filter_date(
    name: &str,
    value: Option<&str>,
) -> Result<Option<NaiveDate>, ConfigError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| {
                ConfigError::Validation(format!(
                    "{} must use the YYYY-MM-DD format, got '{}'",
                    name, raw
                ))
            }),
    }
}

/// Validates proxy pool configuration
fn validate_proxy_config(config: &ProxyConfig) -> Result<(), ConfigError> {
    if !config.enabled {
        return Ok(());
    }

    if let Some(api_url) = &config.api_url {
        validate_http_url("proxy api_url", api_url)?;
    }

    if config.credentials().is_none() {
        return Err(ConfigError::Validation(
            "proxy is enabled but secret_id/secret_key (or api_key) are missing".to_string(),
        ));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.directory.is_empty() {
        return Err(ConfigError::Validation(
            "output directory cannot be empty".to_string(),
        ));
    }

    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config
        .attachment_extensions
        .iter()
        .any(|ext| ext.trim().trim_start_matches('.').is_empty())
    {
        return Err(ConfigError::Validation(
            "attachment_extensions cannot contain empty entries".to_string(),
        ));
    }

    Ok(())
}

/// Validates every source entry and their names' uniqueness
fn validate_sources(sources: &[SourceConfig]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();

    for source in sources {
        if source.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "source name cannot be empty".to_string(),
            ));
        }

        if !names.insert(source.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate source name '{}'",
                source.name
            )));
        }

        validate_http_url(&format!("base_url of '{}'", source.name), &source.base_url)?;

        match source.kind {
            SourceKind::Portal => validate_portal_source(source)?,
            SourceKind::Provincial => validate_provincial_source(source)?,
        }
    }

    Ok(())
}

fn validate_portal_source(source: &SourceConfig) -> Result<(), ConfigError> {
    let search_api = source.search_api.as_deref().ok_or_else(|| {
        ConfigError::Validation(format!(
            "portal source '{}' requires search_api",
            source.name
        ))
    })?;
    validate_http_url(&format!("search_api of '{}'", source.name), search_api)?;

    if source
        .channel_id
        .as_deref()
        .map_or(true, |id| id.trim().is_empty())
    {
        return Err(ConfigError::Validation(format!(
            "portal source '{}' requires channel_id",
            source.name
        )));
    }

    for category in &source.categories {
        if portal_category_code(category).is_none() {
            return Err(ConfigError::Validation(format!(
                "unknown category '{}' for source '{}'",
                category, source.name
            )));
        }
    }

    Ok(())
}

fn validate_provincial_source(source: &SourceConfig) -> Result<(), ConfigError> {
    for code in &source.rule_types {
        if RuleType::from_code(*code).is_none() {
            return Err(ConfigError::Validation(format!(
                "rule type {} of source '{}' is not one of 1, 2, 3",
                code, source.name
            )));
        }
    }

    Ok(())
}

/// Validates that a configured URL parses and uses HTTP(S)
fn validate_http_url(what: &str, raw: &str) -> Result<(), ConfigError> {
    let url = Url::parse(raw)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", what, raw, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "{} '{}' must use http or https",
            what, raw
        )));
    }

    Ok(())
}
