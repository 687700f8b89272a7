//! Client for the on-prem POS REST API.
//!
//! The POS speaks two dialects: the v2 endpoints return JSON, the older
//! reference endpoints return XML. Every request carries a session token as
//! the `key` query parameter; tokens live ~15 minutes server-side and are
//! cached for 10 (see [`auth`]).
//!
//! GETs go through a retry wrapper (3 attempts, 1 s → 3 s → 7 s) for
//! transient failures. Document POSTs are deliberately *not* behind that
//! wrapper — only [`documents::send_writeoff`] retries, because its payload
//! carries a client-generated UUID that acts as an idempotency key.

mod auth;
pub mod documents;
pub mod reports;
pub(crate) mod xml;

use std::time::Duration;

use secrecy::SecretString;
use serde_json::Value;
use tracing::{info, warn};

use crate::errors::{is_transient, UpstreamError};
use crate::redact::mask_url;

use auth::TokenCache;

/// Connection settings for [`PosClient::new`].
pub struct PosConfig {
    /// Base URL without a trailing slash, e.g. `https://pos.example:443`.
    pub base_url: String,
    pub login: String,
    /// SHA-1 of the API password, as the POS auth endpoint expects.
    pub password_sha1: SecretString,
}

/// The 16 reference kinds served by the shared `entities/list` endpoint.
pub const ENTITY_ROOT_TYPES: [&str; 16] = [
    "Account",
    "AccountingCategory",
    "AlcoholClass",
    "AllergenGroup",
    "AttendanceType",
    "Conception",
    "CookingPlaceType",
    "DiscountType",
    "MeasureUnit",
    "OrderType",
    "PaymentType",
    "ProductCategory",
    "ProductScale",
    "ProductSize",
    "ScheduleType",
    "TaxCategory",
];

const MAX_RETRIES: u32 = 3;
const RETRY_DELAYS: [u64; 3] = [1, 3, 7];

pub struct PosClient {
    http: reqwest::Client,
    base: String,
    login: String,
    password_sha1: SecretString,
    token: TokenCache,
}

impl PosClient {
    /// Builds the long-lived client. One instance per process — the
    /// connection pool (20 connections, 10 kept alive) is only effective when
    /// the client is shared.
    pub fn new(config: PosConfig) -> Result<Self, UpstreamError> {
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
            login: config.login,
            password_sha1: config.password_sha1,
            token: TokenCache::new(),
        })
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    pub(crate) async fn session_key(&self) -> Result<String, UpstreamError> {
        self.token
            .get_or_refresh(&self.http, &self.base, &self.login, &self.password_sha1)
            .await
    }

    /// GET with the session key, transient-class retries and 403-triggered
    /// token refresh. Returns the response body as text.
    pub(crate) async fn get_with_retry(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<String, UpstreamError> {
        let url = self.url(path);
        let mut last: Option<UpstreamError> = None;

        for attempt in 1..=MAX_RETRIES {
            let key = self.session_key().await?;
            let mut query: Vec<(&str, &str)> = vec![("key", key.as_str())];
            query.extend(params.iter().map(|(k, v)| (*k, v.as_str())));

            let outcome = match self.http.get(&url).query(&query).send().await {
                Err(e) => Err(UpstreamError::http(&url, e)),
                Ok(resp) => {
                    let status = resp.status();
                    if status == reqwest::StatusCode::FORBIDDEN {
                        // Session expired server-side before our TTL ran out.
                        self.token.invalidate().await;
                        Err(UpstreamError::status(&url, status, ""))
                    } else if !status.is_success() {
                        let body = resp.text().await.unwrap_or_default();
                        Err(UpstreamError::status(&url, status, &body))
                    } else {
                        match resp.text().await {
                            Ok(body) => Ok(body),
                            Err(e) => Err(UpstreamError::http(&url, e)),
                        }
                    }
                }
            };

            match outcome {
                Ok(body) => return Ok(body),
                Err(err) => {
                    let retryable = is_transient(&err)
                        || matches!(
                            &err,
                            UpstreamError::Status { status, .. }
                                if *status == reqwest::StatusCode::FORBIDDEN
                        );
                    if retryable && attempt < MAX_RETRIES {
                        let delay = RETRY_DELAYS[(attempt - 1) as usize];
                        warn!(
                            url = %mask_url(&url),
                            attempt,
                            "GET failed ({err}), retrying in {delay}s"
                        );
                        tokio::time::sleep(Duration::from_secs(delay)).await;
                        last = Some(err);
                    } else {
                        return Err(err);
                    }
                }
            }
        }
        Err(last.unwrap_or_else(|| UpstreamError::Auth("retry loop exhausted".into())))
    }

    async fn get_json_array(
        &self,
        path: &str,
        params: &[(&str, String)],
        label: &str,
    ) -> Result<Vec<Value>, UpstreamError> {
        let body = self.get_with_retry(path, params).await?;
        let value: Value = serde_json::from_str(&body)
            .map_err(|e| UpstreamError::decode(&self.url(path), e.to_string()))?;
        let items = match value {
            Value::Array(items) => items,
            other => {
                return Err(UpstreamError::decode(
                    &self.url(path),
                    format!("expected array, got {}", kind_of(&other)),
                ))
            }
        };
        info!(label, records = items.len(), "POS GET ok");
        Ok(items)
    }

    // ── reference fetches (JSON) ──

    /// `GET /resto/api/v2/entities/list` for one root type.
    pub async fn fetch_entities(&self, root_type: &str) -> Result<Vec<Value>, UpstreamError> {
        self.get_json_array(
            "/resto/api/v2/entities/list",
            &[
                ("rootType", root_type.to_string()),
                ("includeDeleted", "true".to_string()),
            ],
            "entities",
        )
        .await
    }

    pub async fn fetch_products(
        &self,
        include_deleted: bool,
    ) -> Result<Vec<Value>, UpstreamError> {
        self.get_json_array(
            "/resto/api/v2/entities/products/list",
            &[("includeDeleted", include_deleted.to_string())],
            "products",
        )
        .await
    }

    pub async fn fetch_product_groups(&self) -> Result<Vec<Value>, UpstreamError> {
        self.get_json_array(
            "/resto/api/v2/entities/products/group/list",
            &[],
            "product_groups",
        )
        .await
    }

    // ── reference fetches (XML) ──

    /// Suppliers share the employee DTO; nested same-named tags inside each
    /// record are boolean flags, which is why parsing never recurses.
    pub async fn fetch_suppliers(&self) -> Result<Vec<Value>, UpstreamError> {
        let body = self.get_with_retry("/resto/api/suppliers", &[]).await?;
        xml::parse_child_records(&body, "employee", &self.url("/resto/api/suppliers"))
    }

    pub async fn fetch_employees(&self, include_deleted: bool) -> Result<Vec<Value>, UpstreamError> {
        let mut params: Vec<(&str, String)> = Vec::new();
        if include_deleted {
            params.push(("includeDeleted", "true".into()));
        }
        let body = self.get_with_retry("/resto/api/employees", &params).await?;
        xml::parse_child_records(&body, "employee", &self.url("/resto/api/employees"))
    }

    pub async fn fetch_employee_roles(&self) -> Result<Vec<Value>, UpstreamError> {
        let body = self.get_with_retry("/resto/api/employees/roles", &[]).await?;
        xml::parse_named_records(&body, &["role"], &self.url("/resto/api/employees/roles"))
    }

    pub async fn fetch_departments(&self) -> Result<Vec<Value>, UpstreamError> {
        let body = self
            .get_with_retry("/resto/api/corporation/departments", &[])
            .await?;
        xml::parse_corporate_items(&body, &self.url("/resto/api/corporation/departments"))
    }

    pub async fn fetch_stores(&self) -> Result<Vec<Value>, UpstreamError> {
        let body = self
            .get_with_retry("/resto/api/corporation/stores", &[])
            .await?;
        xml::parse_corporate_items(&body, &self.url("/resto/api/corporation/stores"))
    }

    pub async fn fetch_groups(&self) -> Result<Vec<Value>, UpstreamError> {
        let body = self
            .get_with_retry("/resto/api/corporation/groups", &[])
            .await?;
        xml::parse_corporate_items(&body, &self.url("/resto/api/corporation/groups"))
    }
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
