//! Row structs for the POS reference mirror.
//!
//! Each mirror table gets an owned `*Row` struct (Insertable + AsChangeset)
//! built by the mappers from raw API payloads, plus — where the bot reads the
//! table — a Queryable/Selectable counterpart. `raw_json` keeps the verbatim
//! upstream payload; typed columns are denormalised extracts and are never
//! re-derived from the snapshot in hot paths.

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde_json::Value;
use uuid::Uuid;

/// One row of the shared `entities/list` mirror. Uniqueness is
/// `(id, root_type)` — upstream UUIDs may theoretically collide across root
/// types, hence the surrogate pk on the table.
#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::pos_entity)]
pub struct EntityRow {
    pub id: Uuid,
    pub root_type: String,
    pub name: Option<String>,
    pub code: Option<String>,
    pub deleted: bool,
    pub synced_at: NaiveDateTime,
    pub raw_json: Option<Value>,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::pos_supplier)]
pub struct SupplierRow {
    pub id: Uuid,
    pub name: Option<String>,
    pub code: Option<String>,
    pub deleted: bool,
    pub card_number: Option<String>,
    pub taxpayer_id_number: Option<String>,
    pub synced_at: NaiveDateTime,
    pub raw_json: Option<Value>,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::pos_department)]
pub struct DepartmentRow {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: Option<String>,
    pub code: Option<String>,
    pub department_type: Option<String>,
    pub deleted: bool,
    pub synced_at: NaiveDateTime,
    pub raw_json: Option<Value>,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::pos_store)]
pub struct StoreRow {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: Option<String>,
    pub code: Option<String>,
    pub department_type: Option<String>,
    pub deleted: bool,
    pub synced_at: NaiveDateTime,
    pub raw_json: Option<Value>,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::pos_group)]
pub struct GroupRow {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: Option<String>,
    pub code: Option<String>,
    pub department_type: Option<String>,
    pub deleted: bool,
    pub synced_at: NaiveDateTime,
    pub raw_json: Option<Value>,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::pos_product_group)]
pub struct ProductGroupRow {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: Option<String>,
    pub code: Option<String>,
    pub num: Option<String>,
    pub deleted: bool,
    pub synced_at: NaiveDateTime,
    pub raw_json: Option<Value>,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::pos_product)]
pub struct ProductRow {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: Option<String>,
    pub code: Option<String>,
    pub num: Option<String>,
    pub description: Option<String>,
    pub product_type: Option<String>,
    pub deleted: bool,
    pub main_unit: Option<Uuid>,
    pub category: Option<Uuid>,
    pub accounting_category: Option<Uuid>,
    pub tax_category: Option<Uuid>,
    pub default_sale_price: Option<BigDecimal>,
    pub unit_weight: Option<BigDecimal>,
    pub unit_capacity: Option<BigDecimal>,
    pub synced_at: NaiveDateTime,
    pub raw_json: Option<Value>,
}

/// Employee rows carry two bot-owned columns (`chat_id`, `department_id`)
/// that sync must not clobber — the upsert SET-clause excludes them.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::pos_employee)]
pub struct EmployeeRow {
    pub id: Uuid,
    pub name: Option<String>,
    pub code: Option<String>,
    pub deleted: bool,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub role_id: Option<Uuid>,
    pub synced_at: NaiveDateTime,
    pub raw_json: Option<Value>,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::pos_employee_role)]
pub struct EmployeeRoleRow {
    pub id: Uuid,
    pub name: Option<String>,
    pub code: Option<String>,
    pub deleted: bool,
    pub payment_per_hour: Option<BigDecimal>,
    pub steady_salary: Option<BigDecimal>,
    pub schedule_type: Option<String>,
    pub synced_at: NaiveDateTime,
    pub raw_json: Option<Value>,
}

// ── read-side structs ──

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::pos_employee)]
pub struct Employee {
    pub id: Uuid,
    pub name: Option<String>,
    pub code: Option<String>,
    pub deleted: bool,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub role_id: Option<Uuid>,
    pub chat_id: Option<i64>,
    pub department_id: Option<Uuid>,
    pub synced_at: NaiveDateTime,
    pub raw_json: Option<Value>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::pos_store)]
pub struct Store {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: Option<String>,
    pub code: Option<String>,
    pub department_type: Option<String>,
    pub deleted: bool,
    pub synced_at: NaiveDateTime,
    pub raw_json: Option<Value>,
}
