//! Common utilities shared by the HTTP based stores.
//!
//! This module provides HTTP client creation, URL validation, and status code
//! to error mapping.

use crate::error::{Error, Result};
use reqwest::Client;
use std::time::Duration;

/// Default HTTP timeout for all remote stores.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default retry delay when a store answers 429 without saying how long to wait.
pub const DEFAULT_RATE_LIMIT_SECS: u64 = 60;

/// Creates a configured HTTP client with timeout.
#[must_use]
pub fn create_http_client() -> Client {
    Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Validates a URL for safety (anti-SSRF).
pub fn validate_url(url: &str) -> Result<()> {
    let valid_schemes = ["http://", "https://"];
    let has_valid_scheme = valid_schemes.iter().any(|s| url.starts_with(s));

    if !has_valid_scheme {
        return Err(Error::Config(format!(
            "Invalid URL scheme in '{}'. Allowed: http, https",
            url
        )));
    }

    // Scheme plus at least a host
    let host = url.split("://").nth(1).unwrap_or_default();
    if host.is_empty() || host.starts_with('/') {
        return Err(Error::Config(format!("Invalid URL format: {}", url)));
    }

    Ok(())
}

/// Handles HTTP error responses from a legacy store.
pub fn handle_http_error(status_code: u16, body: &str, store_name: &str) -> Error {
    match status_code {
        429 => Error::RateLimit(DEFAULT_RATE_LIMIT_SECS),
        401 | 403 => Error::Authentication(format!("{} auth failed: {}", store_name, body)),
        _ => Error::SourceConnection(format!("{} error {}: {}", store_name, status_code, body)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_http_error_rate_limit() {
        let err = handle_http_error(429, "too many requests", "MongoDB");
        assert!(matches!(err, Error::RateLimit(60)));
    }

    #[test]
    fn test_handle_http_error_auth() {
        let err = handle_http_error(401, "unauthorized", "MongoDB");
        assert!(matches!(err, Error::Authentication(_)));
        let err = handle_http_error(403, "forbidden", "MongoDB");
        assert!(matches!(err, Error::Authentication(_)));
    }

    #[test]
    fn test_handle_http_error_other() {
        let err = handle_http_error(500, "internal error", "Test");
        assert!(matches!(err, Error::SourceConnection(msg) if msg.contains("500")));
    }

    #[test]
    fn test_validate_url_valid() {
        assert!(validate_url("http://localhost:50053").is_ok());
        assert!(validate_url("https://data.mongodb-api.com/app/x/endpoint/data/v1").is_ok());
    }

    #[test]
    fn test_validate_url_invalid_scheme() {
        assert!(validate_url("ftp://files.example.com").is_err());
        assert!(validate_url("file:///etc/passwd").is_err());
        assert!(validate_url("mongodb://localhost:27017").is_err());
    }

    #[test]
    fn test_validate_url_missing_host() {
        assert!(validate_url("http://").is_err());
        assert!(validate_url("https:///path").is_err());
    }

    #[test]
    fn test_create_http_client() {
        let client = create_http_client();
        assert!(client.get("http://example.com").build().is_ok());
    }
}
