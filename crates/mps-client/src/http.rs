//! Shared reqwest plumbing for adapters: client construction, status
//! classification, and body decoding.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::error::CallError;

/// Error bodies are truncated to this many characters in messages.
const MAX_ERROR_BODY: usize = 300;

pub fn build_http(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("mps/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build marketplace HTTP client")
}

pub fn transport_error(e: reqwest::Error) -> CallError {
    if e.is_timeout() {
        CallError::Timeout(e.to_string())
    } else if e.is_decode() {
        CallError::Decode(e.to_string())
    } else {
        CallError::Transport(e.to_string())
    }
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Send and turn any non-2xx into a [`CallError::Status`].
pub async fn send(req: RequestBuilder) -> Result<Response, CallError> {
    let resp = req.send().await.map_err(transport_error)?;
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let retry_after = parse_retry_after(resp.headers());
    let body = resp.text().await.unwrap_or_default();
    let mut message: String = body.chars().take(MAX_ERROR_BODY).collect();
    if message.is_empty() {
        message = status.canonical_reason().unwrap_or("error").to_string();
    }
    Err(CallError::Status {
        status: status.as_u16(),
        message,
        retry_after,
    })
}

pub async fn send_json<T: DeserializeOwned>(req: RequestBuilder) -> Result<T, CallError> {
    let resp = send(req).await?;
    let bytes = resp.bytes().await.map_err(transport_error)?;
    serde_json::from_slice(&bytes).map_err(|e| CallError::Decode(e.to_string()))
}

pub async fn send_empty(req: RequestBuilder) -> Result<(), CallError> {
    send(req).await.map(|_| ())
}

/// Trim a trailing slash so `format!("{base}/path")` never doubles it.
pub fn normalize_base(base: &str) -> String {
    base.trim_end_matches('/').to_string()
}

/// Append percent-encoded path segments (SKUs, order ids) to `base`.
pub fn join_segments(base: &str, segments: &[&str]) -> Result<reqwest::Url, CallError> {
    let mut url = reqwest::Url::parse(base)
        .map_err(|e| CallError::Rejected(format!("invalid base url '{base}': {e}")))?;
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| CallError::Rejected(format!("base url '{base}' cannot carry a path")))?;
        path.pop_if_empty();
        path.extend(segments);
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn retry_after_seconds_parse() {
        let mut h = HeaderMap::new();
        h.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(parse_retry_after(&h), Some(Duration::from_secs(7)));
    }

    #[test]
    fn retry_after_http_date_is_ignored() {
        let mut h = HeaderMap::new();
        h.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2026 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&h), None);
    }

    #[test]
    fn base_trailing_slash_trimmed() {
        assert_eq!(normalize_base("https://x.test/api/"), "https://x.test/api");
    }

    #[test]
    fn segments_are_percent_encoded() {
        let url = join_segments("https://x.test/api/", &["items", "SKU 1/A"]).unwrap();
        assert_eq!(url.as_str(), "https://x.test/api/items/SKU%201%2FA");
    }
}
