//! Session-token cache for the POS API.
//!
//! The POS hands out a session token valid for ~15 minutes; we cache it for
//! 10 (monotonic clock, immune to wall-clock jumps). The cache slot sits
//! behind a single async mutex held across the refresh request, so concurrent
//! callers wait on one in-flight refresh instead of stampeding the auth
//! endpoint.

use std::time::{Duration, Instant};

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::errors::UpstreamError;

const TOKEN_TTL: Duration = Duration::from_secs(10 * 60);
const AUTH_ATTEMPTS: u32 = 4;
const AUTH_RETRY_DELAY: Duration = Duration::from_secs(3);

struct CachedToken {
    token: String,
    fetched_at: Instant,
}

pub(crate) struct TokenCache {
    slot: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Drops the cached token so the next caller refreshes. Called when a
    /// data request comes back 403 (server expired the session early).
    pub(crate) async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }

    /// Returns a valid session token, refreshing if the cached one is stale.
    ///
    /// Refresh retries up to 4 times with a fixed 3 s delay on network
    /// failures and 403 responses.
    pub(crate) async fn get_or_refresh(
        &self,
        http: &reqwest::Client,
        base: &str,
        login: &str,
        password_sha1: &SecretString,
    ) -> Result<String, UpstreamError> {
        let mut slot = self.slot.lock().await;
        if let Some(cached) = slot.as_ref() {
            if cached.fetched_at.elapsed() < TOKEN_TTL {
                return Ok(cached.token.clone());
            }
        }

        let url = format!("{base}/resto/api/auth");
        let mut last_err: Option<UpstreamError> = None;

        for attempt in 1..=AUTH_ATTEMPTS {
            let result = http
                .post(&url)
                .form(&[("login", login), ("pass", password_sha1.expose_secret())])
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    let token = resp
                        .text()
                        .await
                        .map_err(|e| UpstreamError::http(&url, e))?
                        .trim()
                        .to_string();
                    if token.is_empty() {
                        return Err(UpstreamError::Auth("empty token response".into()));
                    }
                    debug!("POS token refreshed, cached for 10 minutes");
                    *slot = Some(CachedToken {
                        token: token.clone(),
                        fetched_at: Instant::now(),
                    });
                    return Ok(token);
                }
                Ok(resp) => {
                    let status = resp.status();
                    let retryable = status == reqwest::StatusCode::FORBIDDEN;
                    let err = UpstreamError::status(&url, status, "");
                    if retryable && attempt < AUTH_ATTEMPTS {
                        warn!(attempt, "POS auth got 403, retrying in 3s");
                        tokio::time::sleep(AUTH_RETRY_DELAY).await;
                        last_err = Some(err);
                    } else {
                        return Err(err);
                    }
                }
                Err(e) => {
                    let err = UpstreamError::http(&url, e);
                    if attempt < AUTH_ATTEMPTS {
                        warn!(attempt, "POS auth network error, retrying in 3s");
                        tokio::time::sleep(AUTH_RETRY_DELAY).await;
                        last_err = Some(err);
                    } else {
                        return Err(err);
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| UpstreamError::Auth("token refresh exhausted".into())))
    }
}
