//! Row structs for the operational and workflow tables.

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::stock_balance)]
pub struct StockBalanceRow {
    pub store_id: Uuid,
    pub store_name: Option<String>,
    pub product_id: Uuid,
    pub product_name: Option<String>,
    pub amount: BigDecimal,
    pub money: Option<BigDecimal>,
    pub synced_at: NaiveDateTime,
    pub raw_json: Option<Value>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::stock_balance)]
pub struct StockBalance {
    pub pk: i64,
    pub store_id: Uuid,
    pub store_name: Option<String>,
    pub product_id: Uuid,
    pub product_name: Option<String>,
    pub amount: BigDecimal,
    pub money: Option<BigDecimal>,
    pub synced_at: NaiveDateTime,
    pub raw_json: Option<Value>,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::min_stock_level)]
pub struct MinStockLevelRow {
    pub product_id: Uuid,
    pub department_id: Uuid,
    pub product_name: Option<String>,
    pub min_level: BigDecimal,
    pub max_level: Option<BigDecimal>,
    pub synced_at: NaiveDateTime,
}

/// A write-off act waiting for admin review. The row is the document: it is
/// created on submission, locked by the first admin to act (conditional
/// update on `is_locked`) and deleted on approve/reject. Rows older than 24 h
/// are swept.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::pending_writeoff)]
pub struct PendingWriteoffRow {
    pub doc_id: String,
    pub document_uuid: Uuid,
    pub created_at: NaiveDateTime,
    pub author_chat_id: i64,
    pub author_name: String,
    pub store_id: Uuid,
    pub store_name: String,
    pub account_id: Uuid,
    pub account_name: String,
    pub reason: String,
    pub department_id: Option<Uuid>,
    /// `[{id, name, quantity, unit_label, main_unit}, ...]`
    pub items: Value,
    /// `{admin_chat_id: message_id}` for keyboard cleanup on resolution.
    pub admin_msg_ids: Value,
    pub is_locked: bool,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::pending_writeoff)]
pub struct PendingWriteoff {
    pub doc_id: String,
    pub document_uuid: Uuid,
    pub created_at: NaiveDateTime,
    pub author_chat_id: i64,
    pub author_name: String,
    pub store_id: Uuid,
    pub store_name: String,
    pub account_id: Uuid,
    pub account_name: String,
    pub reason: String,
    pub department_id: Option<Uuid>,
    pub items: Value,
    pub admin_msg_ids: Value,
    pub is_locked: bool,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::writeoff_history)]
pub struct WriteoffHistoryRow {
    pub author_chat_id: i64,
    pub author_name: Option<String>,
    pub document_uuid: Uuid,
    pub store_name: Option<String>,
    pub account_name: Option<String>,
    pub reason: Option<String>,
    pub items: Value,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::invoice_template)]
pub struct InvoiceTemplateRow {
    pub owner_chat_id: i64,
    pub name: String,
    pub store_id: Uuid,
    pub supplier_id: Uuid,
    pub items: Value,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::invoice_template)]
pub struct InvoiceTemplate {
    pub id: i64,
    pub owner_chat_id: i64,
    pub name: String,
    pub store_id: Uuid,
    pub supplier_id: Uuid,
    pub items: Value,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::product_request)]
pub struct ProductRequestRow {
    pub created_at: NaiveDateTime,
    pub author_chat_id: i64,
    pub author_name: String,
    pub department_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
    pub section: String,
    pub items: Value,
    pub status: String,
    pub receiver_msg_ids: Value,
    pub is_locked: bool,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::product_request)]
pub struct ProductRequest {
    pub id: i64,
    pub created_at: NaiveDateTime,
    pub author_chat_id: i64,
    pub author_name: String,
    pub department_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
    pub section: String,
    pub items: Value,
    pub status: String,
    pub receiver_msg_ids: Value,
    pub is_locked: bool,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::active_stoplist)]
pub struct ActiveStoplistRow {
    pub product_id: String,
    pub name: Option<String>,
    pub balance: BigDecimal,
    pub terminal_group_id: Option<String>,
    pub organization_id: Option<String>,
    pub synced_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::active_stoplist)]
pub struct ActiveStoplist {
    pub pk: i64,
    pub product_id: String,
    pub name: Option<String>,
    pub balance: BigDecimal,
    pub terminal_group_id: Option<String>,
    pub organization_id: Option<String>,
    pub synced_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::stoplist_history)]
pub struct StoplistHistoryRow {
    pub product_id: String,
    pub name: Option<String>,
    pub terminal_group_id: Option<String>,
    pub started_at: NaiveDateTime,
    pub ended_at: Option<NaiveDateTime>,
    pub duration_seconds: Option<i64>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::ocr_document)]
pub struct OcrDocumentRow {
    pub chat_id: i64,
    pub supplier_id: Option<Uuid>,
    pub supplier_name: Option<String>,
    pub store_id: Option<Uuid>,
    pub status: String,
    pub warnings: Value,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::ocr_item)]
pub struct OcrItemRow {
    pub document_id: i64,
    pub line_no: i32,
    pub name: String,
    pub product_id: Option<Uuid>,
    pub amount: BigDecimal,
    pub price: Option<BigDecimal>,
    pub total: Option<BigDecimal>,
    pub vat_percent: Option<BigDecimal>,
    pub rate_unknown: bool,
}
