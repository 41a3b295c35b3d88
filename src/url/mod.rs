//! URL helpers for Policy-Trawl
//!
//! Link resolution for scraped HTML, scheme checks for record validation, and
//! host-pattern matching used to pick a per-site HTML layout.

use crate::{UrlError, UrlResult};
use url::Url;

/// Parses a URL and requires an HTTP(S) scheme and a host
pub fn parse_http_url(raw: &str) -> UrlResult<Url> {
    let url = Url::parse(raw.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(url.scheme().to_string()));
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlError::MissingHost);
    }

    Ok(url)
}

/// Returns the lowercase host of a URL string
///
/// # Examples
///
/// ```
/// use policy_trawl::url::host_of;
///
/// assert_eq!(host_of("https://GI.mnr.gov.cn/list"), Some("gi.mnr.gov.cn".to_string()));
/// assert_eq!(host_of("not a url"), None);
/// ```
pub fn host_of(raw: &str) -> Option<String> {
    Url::parse(raw.trim())
        .ok()?
        .host_str()
        .map(|h| h.to_lowercase())
}

/// Checks if a host matches a pattern
///
/// `"*.example.com"` matches the bare domain and any subdomain; any other
/// pattern must match exactly.
pub fn host_matches(pattern: &str, host: &str) -> bool {
    if let Some(base) = pattern.strip_prefix("*.") {
        host == base || host.ends_with(&format!(".{}", base))
    } else {
        host == pattern
    }
}

/// Resolves a scraped href against the page it was found on
///
/// Returns None for links that can never be a policy document:
/// `javascript:`, `mailto:`, `tel:`, `data:`, fragment-only links and
/// anything that does not resolve to HTTP(S).
pub fn resolve_href(href: &str, base: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    match base.join(href) {
        Ok(absolute) if absolute.scheme() == "http" || absolute.scheme() == "https" => {
            Some(absolute.to_string())
        }
        _ => None,
    }
}
