//! Client for the cloud finance system.
//!
//! All list endpoints look alike: `GET /v1/{resource}` with a Bearer token
//! returns `{"status": 200, "items": [...]}` — no pagination, the full set in
//! one response. The upstream rate limit is 300 req/min; a semaphore of 4
//! in-flight requests keeps us well under it, and 429s back off exponentially
//! (2 → 4 → 8 → 16 → 32 s, five attempts).

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::errors::UpstreamError;

const MAX_CONCURRENCY: usize = 4;
const MAX_RETRIES: u32 = 5;
const RETRY_BASE_DELAY: u64 = 2;

pub struct FinanceConfig {
    pub base_url: String,
    pub token: SecretString,
}

pub struct FinanceClient {
    http: reqwest::Client,
    base: String,
    token: SecretString,
    gate: Semaphore,
}

impl FinanceClient {
    pub fn new(config: FinanceConfig) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(20)
            .pool_idle_timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| UpstreamError::Auth(format!("client build failed: {e}")))?;
        Ok(Self {
            http,
            base: config.base_url.trim_end_matches('/').to_string(),
            token: config.token,
            gate: Semaphore::new(MAX_CONCURRENCY),
        })
    }

    /// One fetch fits all finance list endpoints.
    pub async fn fetch_list(&self, endpoint: &str) -> Result<Vec<Value>, UpstreamError> {
        let url = format!("{}/v1/{endpoint}", self.base);
        // Closed semaphore is impossible here; the permit bounds concurrency.
        let _permit = self.gate.acquire().await.expect("semaphore closed");

        for attempt in 1..=MAX_RETRIES {
            let resp = self
                .http
                .get(&url)
                .bearer_auth(self.token.expose_secret())
                .header("Accept", "application/json")
                .send()
                .await
                .map_err(|e| UpstreamError::http(&url, e))?;

            let status = resp.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS && attempt < MAX_RETRIES {
                let delay = RETRY_BASE_DELAY * 2u64.pow(attempt - 1);
                warn!(endpoint, attempt, "finance 429, backing off {delay}s");
                tokio::time::sleep(Duration::from_secs(delay)).await;
                continue;
            }
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(UpstreamError::status(&url, status, &body));
            }

            let value: Value = resp
                .json()
                .await
                .map_err(|e| UpstreamError::http(&url, e))?;
            let items = value
                .get("items")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            info!(endpoint, records = items.len(), "finance GET ok");
            return Ok(items);
        }

        Err(UpstreamError::status(
            &url,
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            "still rate-limited after 5 attempts",
        ))
    }

    pub async fn fetch_categories(&self) -> Result<Vec<Value>, UpstreamError> {
        self.fetch_list("category").await
    }

    pub async fn fetch_moneybags(&self) -> Result<Vec<Value>, UpstreamError> {
        self.fetch_list("moneybag").await
    }

    pub async fn fetch_moneybag_groups(&self) -> Result<Vec<Value>, UpstreamError> {
        self.fetch_list("moneybag-group").await
    }

    pub async fn fetch_partners(&self) -> Result<Vec<Value>, UpstreamError> {
        self.fetch_list("partner").await
    }

    pub async fn fetch_directions(&self) -> Result<Vec<Value>, UpstreamError> {
        self.fetch_list("direction").await
    }

    pub async fn fetch_goods(&self) -> Result<Vec<Value>, UpstreamError> {
        self.fetch_list("goods").await
    }

    pub async fn fetch_obtainings(&self) -> Result<Vec<Value>, UpstreamError> {
        self.fetch_list("obtaining").await
    }

    pub async fn fetch_jobs(&self) -> Result<Vec<Value>, UpstreamError> {
        self.fetch_list("job").await
    }

    pub async fn fetch_deals(&self) -> Result<Vec<Value>, UpstreamError> {
        self.fetch_list("deal").await
    }

    pub async fn fetch_obligation_statuses(&self) -> Result<Vec<Value>, UpstreamError> {
        self.fetch_list("obligation-status").await
    }

    pub async fn fetch_obligations(&self) -> Result<Vec<Value>, UpstreamError> {
        self.fetch_list("obligation").await
    }

    pub async fn fetch_pnl_categories(&self) -> Result<Vec<Value>, UpstreamError> {
        self.fetch_list("pnl-category").await
    }

    pub async fn fetch_employees(&self) -> Result<Vec<Value>, UpstreamError> {
        self.fetch_list("employees").await
    }
}
