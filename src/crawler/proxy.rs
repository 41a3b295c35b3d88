//! Proxy-pool API client
//!
//! Asks a third-party pool for fresh `host:port` endpoints. Every failure here
//! is recoverable: the fetcher simply falls back to direct connections.

use crate::config::ProxyConfig;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Endpoint used when the config does not name one
pub const DEFAULT_PROXY_API: &str = "https://dps.kdlapi.com/api/getdps/";

/// Errors returned by the proxy pool
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("proxy pool request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("proxy pool answered code {code}: {message}")]
    Api { code: i64, message: String },

    #[error("proxy pool returned no endpoints")]
    Empty,
}

#[derive(Debug, Deserialize)]
struct PoolResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Option<PoolData>,
}

#[derive(Debug, Deserialize)]
struct PoolData {
    #[serde(default)]
    proxy_list: Vec<String>,
}

/// Client for the proxy-pool API
#[derive(Debug, Clone)]
pub struct ProxyPool {
    http: Client,
    api_url: String,
    secret_id: String,
    secret_key: String,
}

impl ProxyPool {
    /// Builds a pool client when proxying is enabled and usable
    ///
    /// Returns None (after logging why) when the proxy is disabled, the
    /// credentials are missing, or the client cannot be built.
    pub fn from_config(config: &ProxyConfig, timeout: Duration) -> Option<Self> {
        if !config.enabled {
            tracing::debug!("Proxy pool disabled");
            return None;
        }

        let Some((secret_id, secret_key)) = config.credentials() else {
            tracing::warn!("Proxy pool enabled but no credentials configured, using direct connections");
            return None;
        };

        let http = match Client::builder().timeout(timeout).build() {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("Failed to build proxy pool client: {}", e);
                return None;
            }
        };

        Some(Self {
            http,
            api_url: config
                .api_url
                .clone()
                .unwrap_or_else(|| DEFAULT_PROXY_API.to_string()),
            secret_id,
            secret_key,
        })
    }

    /// Requests `count` endpoints in the given response format (`json` or `text`)
    pub async fn fetch(&self, count: u32, format: &str) -> Result<Vec<String>, ProxyError> {
        let count = count.to_string();
        let response = self
            .http
            .get(&self.api_url)
            .query(&[
                ("secret_id", self.secret_id.as_str()),
                ("signature", self.secret_key.as_str()),
                ("num", count.as_str()),
                ("format", format),
            ])
            .send()
            .await?
            .error_for_status()?;

        let proxies = if format == "json" {
            let body: PoolResponse = response.json().await?;
            if body.code != 0 {
                return Err(ProxyError::Api {
                    code: body.code,
                    message: body.msg,
                });
            }
            body.data.map(|d| d.proxy_list).unwrap_or_default()
        } else {
            response
                .text()
                .await?
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()
        };

        if proxies.is_empty() {
            return Err(ProxyError::Empty);
        }

        Ok(proxies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_config() -> ProxyConfig {
        ProxyConfig {
            enabled: true,
            api_url: None,
            secret_id: Some("id".to_string()),
            secret_key: Some("key".to_string()),
            api_key: None,
        }
    }

    #[test]
    fn test_disabled_pool() {
        let config = ProxyConfig::default();
        assert!(ProxyPool::from_config(&config, Duration::from_secs(5)).is_none());
    }

    #[test]
    fn test_missing_credentials_degrade() {
        let mut config = enabled_config();
        config.secret_key = None;
        assert!(ProxyPool::from_config(&config, Duration::from_secs(5)).is_none());
    }

    #[test]
    fn test_default_endpoint() {
        let pool = ProxyPool::from_config(&enabled_config(), Duration::from_secs(5)).unwrap();
        assert_eq!(pool.api_url, DEFAULT_PROXY_API);
    }

    #[test]
    fn test_legacy_api_key() {
        let config = ProxyConfig {
            enabled: true,
            api_key: Some("legacy-id:legacy-key".to_string()),
            ..Default::default()
        };
        let pool = ProxyPool::from_config(&config, Duration::from_secs(5)).unwrap();
        assert_eq!(pool.secret_id, "legacy-id");
        assert_eq!(pool.secret_key, "legacy-key");
    }
}
