//! Document submission: write-off acts, internal transfers, invoices.
//!
//! POSTs are not behind the generic GET retry wrapper. Only the write-off
//! retries (twice, 2 s then 5 s) and only because the caller-generated
//! document UUID is an idempotency key on the POS side. Everything else fails
//! fast and lets the workflow decide.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::errors::{is_transient, UpstreamError};

use super::xml::{parse_import_result, XmlWriter};
use super::PosClient;

const WRITEOFF_RETRIES: u32 = 2;
const WRITEOFF_BACKOFF: [u64; 2] = [2, 5];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteoffItem {
    pub product_id: Uuid,
    pub amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measure_unit_id: Option<Uuid>,
}

/// Write-off act, JSON POST. `id` is client-generated and serves as the
/// idempotency key — submitting the same id twice yields one POS document.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteoffDocument {
    pub id: Uuid,
    pub date_incoming: String,
    pub status: String,
    pub comment: String,
    pub store_id: Uuid,
    pub account_id: Uuid,
    pub items: Vec<WriteoffItem>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferItem {
    pub product_id: Uuid,
    pub amount: f64,
    pub measure_unit_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalTransferDocument {
    pub date_incoming: String,
    pub status: String,
    pub comment: String,
    pub store_from_id: Uuid,
    pub store_to_id: Uuid,
    pub items: Vec<TransferItem>,
}

/// One line of an invoice (outgoing or incoming import).
#[derive(Debug, Clone)]
pub struct InvoiceItem {
    pub product_id: Uuid,
    pub amount: f64,
    pub measure_unit_id: Option<Uuid>,
    pub container_id: Option<Uuid>,
    pub price: f64,
    pub sum: f64,
}

#[derive(Debug, Clone)]
pub struct InvoiceDocument {
    /// Left empty to let the builder assign a `BOT-`/`INC-` number.
    pub document_number: Option<String>,
    pub date_incoming: String,
    pub status: String,
    pub comment: String,
    pub store_id: Uuid,
    /// Counteragent for outgoing, supplier for incoming.
    pub counteragent_id: Uuid,
    pub items: Vec<InvoiceItem>,
}

impl PosClient {
    async fn post_json(&self, path: &str, body: &Value) -> Result<(), UpstreamError> {
        let key = self.session_key().await?;
        let url = self.url(path);
        let resp = self
            .http
            .post(&url)
            .query(&[("key", key.as_str())])
            .json(body)
            .send()
            .await
            .map_err(|e| UpstreamError::http(&url, e))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            error!(path, %status, "POS document POST failed");
            return Err(UpstreamError::status(&url, status, &text));
        }
        Ok(())
    }

    /// `POST /resto/api/v2/documents/writeoff`, retried on transient errors.
    pub async fn send_writeoff(&self, document: &WriteoffDocument) -> Result<(), UpstreamError> {
        let body = serde_json::to_value(document)
            .map_err(|e| UpstreamError::decode("writeoff document", e.to_string()))?;

        let mut attempt = 0;
        loop {
            match self.post_json("/resto/api/v2/documents/writeoff", &body).await {
                Ok(()) => {
                    info!(doc_id = %document.id, items = document.items.len(), "write-off sent");
                    return Ok(());
                }
                Err(err) if attempt < WRITEOFF_RETRIES && is_transient(&err) => {
                    let delay = WRITEOFF_BACKOFF[attempt as usize];
                    warn!(doc_id = %document.id, attempt, "write-off POST retry in {delay}s: {err}");
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// `POST /resto/api/v2/documents/internalTransfer`. Not retried: the
    /// payload has no idempotency key.
    pub async fn send_internal_transfer(
        &self,
        document: &InternalTransferDocument,
    ) -> Result<(), UpstreamError> {
        let body = serde_json::to_value(document)
            .map_err(|e| UpstreamError::decode("transfer document", e.to_string()))?;
        self.post_json("/resto/api/v2/documents/internalTransfer", &body)
            .await?;
        info!(
            from = %document.store_from_id,
            to = %document.store_to_id,
            items = document.items.len(),
            "internal transfer sent"
        );
        Ok(())
    }

    async fn post_xml_import(&self, path: &str, xml_body: String) -> Result<(), UpstreamError> {
        let key = self.session_key().await?;
        let url = self.url(path);
        let resp = self
            .http
            .post(&url)
            .query(&[("key", key.as_str())])
            .header("Content-Type", "application/xml; charset=utf-8")
            .body(xml_body)
            .send()
            .await
            .map_err(|e| UpstreamError::http(&url, e))?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(UpstreamError::status(&url, status, &text));
        }

        // HTTP 200 is not a verdict here.
        if let Some(result) = parse_import_result(&text) {
            if !result.valid {
                let msg = result
                    .error_message
                    .unwrap_or_else(|| "неизвестная ошибка".to_string());
                error!(
                    path,
                    doc = result.document_number.as_deref().unwrap_or("?"),
                    "invoice import validation failed: {msg}"
                );
                return Err(UpstreamError::Validation(msg));
            }
        }
        Ok(())
    }

    /// Outgoing invoice via XML import. The outgoing DTO uses
    /// `defaultStoreId`/`counteragentId`/`productId` tag names.
    pub async fn send_outgoing_invoice(
        &self,
        document: &InvoiceDocument,
    ) -> Result<(), UpstreamError> {
        let number = document
            .document_number
            .clone()
            .unwrap_or_else(|| format!("BOT-{}", short_number()));

        let mut w = XmlWriter::new();
        w.open("document");
        w.leaf("documentNumber", &number);
        w.leaf("dateIncoming", &document.date_incoming);
        w.leaf("useDefaultDocumentTime", "false");
        w.leaf("status", &document.status);
        if !document.comment.is_empty() {
            w.leaf("comment", &document.comment);
        }
        w.leaf("defaultStoreId", &document.store_id.to_string());
        w.leaf("counteragentId", &document.counteragent_id.to_string());
        w.open("items");
        for (idx, item) in document.items.iter().enumerate() {
            w.open("item");
            w.leaf("num", &(idx + 1).to_string());
            w.leaf("productId", &item.product_id.to_string());
            w.leaf("productArticle", "");
            w.leaf("amount", &format!("{:.4}", item.amount));
            if let Some(unit) = item.measure_unit_id {
                w.leaf("amountUnit", &unit.to_string());
            }
            if let Some(container) = item.container_id {
                w.leaf("containerId", &container.to_string());
            }
            w.leaf("price", &format!("{:.2}", item.price));
            w.leaf("sum", &format!("{:.2}", item.sum));
            w.close("item");
        }
        w.close("items");
        w.close("document");

        self.post_xml_import("/resto/api/documents/import/outgoingInvoice", w.finish())
            .await
    }

    /// Incoming invoice via XML import. The incoming DTO uses
    /// `defaultStore`/`supplier`/`product` tag names — not the outgoing ones.
    pub async fn send_incoming_invoice(
        &self,
        document: &InvoiceDocument,
    ) -> Result<(), UpstreamError> {
        let number = document
            .document_number
            .clone()
            .unwrap_or_else(|| format!("INC-{}", short_number()));
        let store = document.store_id.to_string();

        let mut w = XmlWriter::new();
        w.open("document");
        w.leaf("documentNumber", &number);
        w.leaf("dateIncoming", &document.date_incoming);
        w.leaf("useDefaultDocumentTime", "false");
        w.leaf("status", &document.status);
        if !document.comment.is_empty() {
            w.leaf("comment", &document.comment);
        }
        w.leaf("defaultStore", &store);
        w.leaf("supplier", &document.counteragent_id.to_string());
        w.open("items");
        for (idx, item) in document.items.iter().enumerate() {
            w.open("item");
            w.leaf("num", &(idx + 1).to_string());
            w.leaf("product", &item.product_id.to_string());
            w.leaf("productArticle", "");
            w.leaf("store", &store);
            w.leaf("amount", &format!("{:.4}", item.amount));
            if let Some(unit) = item.measure_unit_id {
                w.leaf("amountUnit", &unit.to_string());
            }
            if let Some(container) = item.container_id {
                w.leaf("containerId", &container.to_string());
            }
            w.leaf("price", &format!("{:.2}", item.price));
            w.leaf("sum", &format!("{:.2}", item.sum));
            w.close("item");
        }
        w.close("items");
        w.close("document");

        self.post_xml_import("/resto/api/documents/import/incomingInvoice", w.finish())
            .await
    }
}

fn short_number() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_uppercase()
}
