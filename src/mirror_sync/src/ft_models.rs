//! Row structs for the finance mirror — thirteen flat tables, one per list
//! endpoint, keyed by the upstream 64-bit integer id.

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde_json::Value;

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::fin_category)]
pub struct FinCategoryRow {
    pub id: i64,
    pub name: Option<String>,
    pub parent_id: Option<i64>,
    /// income / outcome / transfer
    pub group_name: Option<String>,
    /// operating / financial / investment
    pub kind: Option<String>,
    pub pnl_type: Option<String>,
    pub description: Option<String>,
    pub is_built_in: Option<bool>,
    pub synced_at: NaiveDateTime,
    pub raw_json: Option<Value>,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::fin_moneybag)]
pub struct FinMoneybagRow {
    pub id: i64,
    pub name: Option<String>,
    pub kind: Option<String>,
    pub number: Option<String>,
    pub currency: Option<String>,
    pub balance: Option<BigDecimal>,
    pub surplus: Option<BigDecimal>,
    pub surplus_timestamp: Option<i64>,
    pub group_id: Option<i64>,
    pub archived: Option<bool>,
    pub synced_at: NaiveDateTime,
    pub raw_json: Option<Value>,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::fin_moneybag_group)]
pub struct FinMoneybagGroupRow {
    pub id: i64,
    pub name: Option<String>,
    pub synced_at: NaiveDateTime,
    pub raw_json: Option<Value>,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::fin_partner)]
pub struct FinPartnerRow {
    pub id: i64,
    pub name: Option<String>,
    pub inn: Option<String>,
    pub group_id: Option<i64>,
    pub comment: Option<String>,
    pub synced_at: NaiveDateTime,
    pub raw_json: Option<Value>,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::fin_direction)]
pub struct FinDirectionRow {
    pub id: i64,
    pub name: Option<String>,
    pub parent_id: Option<i64>,
    pub description: Option<String>,
    pub archived: Option<bool>,
    pub synced_at: NaiveDateTime,
    pub raw_json: Option<Value>,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::fin_goods)]
pub struct FinGoodsRow {
    pub id: i64,
    pub name: Option<String>,
    pub price: Option<BigDecimal>,
    pub unit: Option<String>,
    pub archived: Option<bool>,
    pub synced_at: NaiveDateTime,
    pub raw_json: Option<Value>,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::fin_obtaining)]
pub struct FinObtainingRow {
    pub id: i64,
    pub name: Option<String>,
    pub partner_id: Option<i64>,
    pub date: Option<String>,
    pub sum: Option<BigDecimal>,
    pub synced_at: NaiveDateTime,
    pub raw_json: Option<Value>,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::fin_job)]
pub struct FinJobRow {
    pub id: i64,
    pub name: Option<String>,
    pub price: Option<BigDecimal>,
    pub unit: Option<String>,
    pub archived: Option<bool>,
    pub synced_at: NaiveDateTime,
    pub raw_json: Option<Value>,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::fin_deal)]
pub struct FinDealRow {
    pub id: i64,
    pub name: Option<String>,
    pub partner_id: Option<i64>,
    pub direction_id: Option<i64>,
    pub status: Option<String>,
    pub synced_at: NaiveDateTime,
    pub raw_json: Option<Value>,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::fin_obligation_status)]
pub struct FinObligationStatusRow {
    pub id: i64,
    pub name: Option<String>,
    pub synced_at: NaiveDateTime,
    pub raw_json: Option<Value>,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::fin_obligation)]
pub struct FinObligationRow {
    pub id: i64,
    pub name: Option<String>,
    pub partner_id: Option<i64>,
    pub status_id: Option<i64>,
    pub sum: Option<BigDecimal>,
    pub date: Option<String>,
    pub synced_at: NaiveDateTime,
    pub raw_json: Option<Value>,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::fin_pnl_category)]
pub struct FinPnlCategoryRow {
    pub id: i64,
    pub name: Option<String>,
    pub parent_id: Option<i64>,
    pub kind: Option<String>,
    pub synced_at: NaiveDateTime,
    pub raw_json: Option<Value>,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::fin_employee)]
pub struct FinEmployeeRow {
    pub id: i64,
    pub name: Option<String>,
    pub post: Option<String>,
    pub archived: Option<bool>,
    pub synced_at: NaiveDateTime,
    pub raw_json: Option<Value>,
}
