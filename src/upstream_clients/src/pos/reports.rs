//! Report fetches: store balances and the two OLAP entry points.

use serde_json::Value;
use tracing::info;

use crate::errors::UpstreamError;

use super::{xml, PosClient};

/// Dimensions and metrics for the v1 transactions report used by the
/// negative-consumable transfer.
const OLAP_V1_DIMENSIONS: [&str; 4] = [
    "Account.Name",
    "Product.TopParent",
    "Product.Name",
    "Product.MeasureUnit",
];
const OLAP_V1_METRICS: [&str; 2] = ["FinalBalance.Amount", "FinalBalance.Money"];

impl PosClient {
    /// `GET /resto/api/v2/reports/balance/stores`.
    ///
    /// `timestamp` is the accounting instant in `yyyy-MM-ddTHH:mm:ss`. Passing
    /// a bare date means 00:00:00 — the *start* of the day — so today's
    /// postings would be invisible; callers must always pass a full instant.
    pub async fn fetch_stock_balances(
        &self,
        timestamp: &str,
    ) -> Result<Vec<Value>, UpstreamError> {
        let path = "/resto/api/v2/reports/balance/stores";
        let body = self
            .get_with_retry(path, &[("timestamp", timestamp.to_string())])
            .await?;
        let items: Vec<Value> = serde_json::from_str(&body)
            .map_err(|e| UpstreamError::decode(&self.url(path), e.to_string()))?;
        info!(records = items.len(), timestamp, "stock balances fetched");
        Ok(items)
    }

    /// `GET /resto/api/v2/reports/olap/byPresetId/{preset}` — server-saved
    /// aggregation, JSON rows under `data`.
    pub async fn fetch_olap_by_preset(
        &self,
        preset_id: &str,
        date_from: &str,
        date_to: &str,
        department_ids: &[String],
    ) -> Result<Vec<Value>, UpstreamError> {
        let path = format!("/resto/api/v2/reports/olap/byPresetId/{preset_id}");
        let mut params = vec![
            ("dateFrom", date_from.to_string()),
            ("dateTo", date_to.to_string()),
            ("summary", "true".to_string()),
        ];
        if !department_ids.is_empty() {
            params.push(("departmentIds", department_ids.join(",")));
        }
        let body = self.get_with_retry(&path, &params).await?;
        let value: Value = serde_json::from_str(&body)
            .map_err(|e| UpstreamError::decode(&self.url(&path), e.to_string()))?;
        let rows = value
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        info!(preset_id, rows = rows.len(), "OLAP preset fetched");
        Ok(rows)
    }

    /// `GET /resto/api/reports/olap` (v1, report=TRANSACTIONS), grouped by
    /// `Account.Name × Product.TopParent × Product.Name × Product.MeasureUnit`.
    ///
    /// Dates are `DD.MM.YYYY`. The server answers JSON or XML depending on
    /// deployment; both are accepted, JSON preferred.
    pub async fn fetch_olap_transactions(
        &self,
        date_from: &str,
        date_to: &str,
    ) -> Result<Vec<Value>, UpstreamError> {
        let path = "/resto/api/reports/olap";
        let mut params = vec![
            ("report", "TRANSACTIONS".to_string()),
            ("from", date_from.to_string()),
            ("to", date_to.to_string()),
        ];
        for dim in OLAP_V1_DIMENSIONS {
            params.push(("groupRow", dim.to_string()));
        }
        for metric in OLAP_V1_METRICS {
            params.push(("agr", metric.to_string()));
        }

        let body = self.get_with_retry(path, &params).await?;
        let rows = match serde_json::from_str::<Value>(&body) {
            Ok(value) => value
                .get("data")
                .or_else(|| value.get("rows"))
                .or_else(|| value.get("report"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            Err(_) => xml::parse_olap_rows(&body, &self.url(path))?,
        };
        info!(rows = rows.len(), date_from, date_to, "OLAP v1 fetched");
        Ok(rows)
    }

    /// Incoming-invoice export for a date range (`YYYY-MM-DD`).
    pub async fn fetch_incoming_invoices(
        &self,
        date_from: &str,
        date_to: &str,
    ) -> Result<Vec<Value>, UpstreamError> {
        let path = "/resto/api/documents/export/incomingInvoice";
        let body = self
            .get_with_retry(
                path,
                &[("from", date_from.to_string()), ("to", date_to.to_string())],
            )
            .await?;
        xml::parse_incoming_invoices(&body, &self.url(path))
    }
}
