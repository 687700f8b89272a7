//! Client for the POS cloud API (stop-lists, terminal groups, webhooks).
//!
//! The API token is issued by an external process that writes rows into the
//! `cloud_token` table; this client takes the current token per call and holds
//! no credential state of its own.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::info;

use crate::errors::UpstreamError;

pub struct CloudClient {
    http: reqwest::Client,
    base: String,
}

impl CloudClient {
    pub fn new(base_url: &str) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| UpstreamError::Auth(format!("client build failed: {e}")))?;
        Ok(Self {
            http,
            base: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post(&self, path: &str, token: &str, body: Value) -> Result<Value, UpstreamError> {
        let url = format!("{}{path}", self.base);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| UpstreamError::http(&url, e))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(UpstreamError::status(&url, status, &text));
        }
        resp.json().await.map_err(|e| UpstreamError::http(&url, e))
    }

    /// Terminal groups of one organization.
    pub async fn fetch_terminal_groups(
        &self,
        token: &str,
        organization_id: &str,
    ) -> Result<Vec<Value>, UpstreamError> {
        let value = self
            .post(
                "/api/1/terminal_groups",
                token,
                json!({ "organizationIds": [organization_id] }),
            )
            .await?;
        // terminalGroups: [{organizationId, items: [{id, name}, ...]}]
        let mut groups = Vec::new();
        if let Some(orgs) = value.get("terminalGroups").and_then(Value::as_array) {
            for org in orgs {
                if let Some(items) = org.get("items").and_then(Value::as_array) {
                    groups.extend(items.iter().cloned());
                }
            }
        }
        info!(organization_id, groups = groups.len(), "terminal groups fetched");
        Ok(groups)
    }

    /// Current stop-list for the given terminal groups. Returns the raw
    /// per-organization groups; flattening is the workflow's job.
    pub async fn fetch_stop_lists(
        &self,
        token: &str,
        organization_id: &str,
        terminal_group_ids: &[String],
    ) -> Result<Vec<Value>, UpstreamError> {
        let value = self
            .post(
                "/api/1/stop_lists",
                token,
                json!({
                    "organizationIds": [organization_id],
                    "terminalGroupIds": terminal_group_ids,
                }),
            )
            .await?;
        Ok(value
            .get("terminalGroupStopLists")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }
}

/// Webhook authentication: the cloud sends the shared secret in the
/// `authToken` header. Comparison is length-gated and byte-wise.
pub fn webhook_token_matches(expected: &str, presented: Option<&str>) -> bool {
    match presented {
        Some(presented) if presented.len() == expected.len() => {
            // xor-accumulate so the comparison does not short-circuit
            presented
                .bytes()
                .zip(expected.bytes())
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::webhook_token_matches;

    #[test]
    fn token_match() {
        assert!(webhook_token_matches("secret", Some("secret")));
        assert!(!webhook_token_matches("secret", Some("Secret")));
        assert!(!webhook_token_matches("secret", Some("secret2")));
        assert!(!webhook_token_matches("secret", None));
    }
}
