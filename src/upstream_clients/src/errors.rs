//! Error type shared by all upstream clients, plus the single transient/permanent
//! classifier the rest of the workspace relies on.

use reqwest::StatusCode;
use thiserror::Error;

use crate::redact::mask_url;

/// Errors that can occur while talking to an upstream API.
///
/// URLs embedded in variants are already masked — constructors go through
/// [`mask_url`], so it is safe to log these as-is.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Network-level failure (connect, timeout, protocol, body read).
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Non-success HTTP status.
    #[error("{url} returned HTTP {status}: {body}")]
    Status {
        status: StatusCode,
        url: String,
        body: String,
    },

    /// Session-token acquisition failed after all retries.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The upstream accepted the request but rejected the document
    /// (e.g. the POS import API answers 200 with `<valid>false</valid>`).
    #[error("upstream rejected document: {0}")]
    Validation(String),

    /// Response body could not be decoded (bad JSON / bad XML).
    #[error("could not decode response from {url}: {reason}")]
    Decode { url: String, reason: String },
}

impl UpstreamError {
    pub fn http(url: &str, source: reqwest::Error) -> Self {
        Self::Http {
            url: mask_url(url),
            source,
        }
    }

    pub fn status(url: &str, status: StatusCode, body: &str) -> Self {
        let mut body = body.to_string();
        body.truncate(500);
        Self::Status {
            status,
            url: mask_url(url),
            body,
        }
    }

    pub fn decode(url: &str, reason: impl Into<String>) -> Self {
        Self::Decode {
            url: mask_url(url),
            reason: reason.into(),
        }
    }
}

/// The single source of truth for "is this worth retrying".
///
/// Transient: network-class failures (connect/timeout/protocol), HTTP 429 and
/// 5xx. Everything else — including validation rejections and decode failures —
/// is permanent.
pub fn is_transient(err: &UpstreamError) -> bool {
    match err {
        UpstreamError::Http { source, .. } => {
            source.is_timeout() || source.is_connect() || source.is_body() || source.is_request()
        }
        UpstreamError::Status { status, .. } => {
            *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
        }
        UpstreamError::Auth(_) | UpstreamError::Validation(_) | UpstreamError::Decode { .. } => {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_429_and_5xx_are_transient() {
        for code in [429u16, 500, 502, 503, 504] {
            let err = UpstreamError::status(
                "https://x?key=s",
                StatusCode::from_u16(code).unwrap(),
                "",
            );
            assert!(is_transient(&err), "HTTP {code} should be transient");
        }
    }

    #[test]
    fn status_4xx_is_permanent() {
        for code in [400u16, 401, 403, 404, 422] {
            let err = UpstreamError::status("https://x", StatusCode::from_u16(code).unwrap(), "");
            assert!(!is_transient(&err), "HTTP {code} should be permanent");
        }
    }

    #[test]
    fn validation_and_decode_are_permanent() {
        assert!(!is_transient(&UpstreamError::Validation("bad doc".into())));
        assert!(!is_transient(&UpstreamError::decode("https://x", "truncated")));
    }

    #[test]
    fn status_error_masks_url() {
        let err = UpstreamError::status("https://pos/api?key=tok123", StatusCode::BAD_GATEWAY, "");
        assert!(!err.to_string().contains("tok123"));
    }
}
