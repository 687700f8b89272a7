//! Raw API payload → mirror row mapping.
//!
//! Upstream data is messy: UUIDs arrive as strings, booleans as `"true"`,
//! numbers as either JSON numbers or strings. The `safe_*` extractors accept
//! all of it and answer `None` on garbage; a mapper returning `None` drops the
//! record (counted by the engine, never fatal).

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use serde_json::Value;
use std::str::FromStr;
use uuid::Uuid;

use crate::ft_models::*;
use crate::models::*;

pub fn safe_uuid(v: Option<&Value>) -> Option<Uuid> {
    v.and_then(Value::as_str).and_then(|s| Uuid::parse_str(s).ok())
}

pub fn safe_bool(v: Option<&Value>) -> bool {
    match v {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        Some(Value::Number(n)) => n.as_i64().is_some_and(|i| i != 0),
        _ => false,
    }
}

pub fn safe_opt_bool(v: Option<&Value>) -> Option<bool> {
    match v {
        None | Some(Value::Null) => None,
        some => Some(safe_bool(some)),
    }
}

/// Exact decimal from a JSON number or numeric string. Numbers go through
/// their literal representation, not through f64.
pub fn safe_decimal(v: Option<&Value>) -> Option<BigDecimal> {
    match v? {
        Value::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        Value::String(s) => BigDecimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

pub fn safe_i64(v: Option<&Value>) -> Option<i64> {
    match v? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn safe_str(v: Option<&Value>) -> Option<String> {
    v.and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn safe_f64(v: Option<&Value>) -> Option<f64> {
    match v? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ── POS mappers ──

pub fn map_entity(root_type: &str, item: &Value, now: NaiveDateTime) -> Option<EntityRow> {
    Some(EntityRow {
        id: safe_uuid(item.get("id"))?,
        root_type: root_type.to_string(),
        name: safe_str(item.get("name")),
        code: safe_str(item.get("code")),
        deleted: safe_bool(item.get("deleted")),
        synced_at: now,
        raw_json: Some(item.clone()),
    })
}

pub fn map_supplier(item: &Value, now: NaiveDateTime) -> Option<SupplierRow> {
    Some(SupplierRow {
        id: safe_uuid(item.get("id"))?,
        name: safe_str(item.get("name")),
        code: safe_str(item.get("code")),
        deleted: safe_bool(item.get("deleted")),
        card_number: safe_str(item.get("cardNumber")),
        taxpayer_id_number: safe_str(item.get("taxpayerIdNumber")),
        synced_at: now,
        raw_json: Some(item.clone()),
    })
}

// departments / stores / groups share the corporate DTO shape

pub fn map_department(item: &Value, now: NaiveDateTime) -> Option<DepartmentRow> {
    Some(DepartmentRow {
        id: safe_uuid(item.get("id"))?,
        parent_id: safe_uuid(item.get("parentId")),
        name: safe_str(item.get("name")),
        code: safe_str(item.get("code")),
        department_type: safe_str(item.get("type")),
        deleted: safe_bool(item.get("deleted")),
        synced_at: now,
        raw_json: Some(item.clone()),
    })
}

pub fn map_store(item: &Value, now: NaiveDateTime) -> Option<StoreRow> {
    let d = map_department(item, now)?;
    Some(StoreRow {
        id: d.id,
        parent_id: d.parent_id,
        name: d.name,
        code: d.code,
        department_type: d.department_type,
        deleted: d.deleted,
        synced_at: d.synced_at,
        raw_json: d.raw_json,
    })
}

pub fn map_group(item: &Value, now: NaiveDateTime) -> Option<GroupRow> {
    let d = map_department(item, now)?;
    Some(GroupRow {
        id: d.id,
        parent_id: d.parent_id,
        name: d.name,
        code: d.code,
        department_type: d.department_type,
        deleted: d.deleted,
        synced_at: d.synced_at,
        raw_json: d.raw_json,
    })
}

pub fn map_product_group(item: &Value, now: NaiveDateTime) -> Option<ProductGroupRow> {
    Some(ProductGroupRow {
        id: safe_uuid(item.get("id"))?,
        parent_id: safe_uuid(item.get("parent")),
        name: safe_str(item.get("name")),
        code: safe_str(item.get("code")),
        num: safe_str(item.get("num")),
        deleted: safe_bool(item.get("deleted")),
        synced_at: now,
        raw_json: Some(item.clone()),
    })
}

pub fn map_product(item: &Value, now: NaiveDateTime) -> Option<ProductRow> {
    Some(ProductRow {
        id: safe_uuid(item.get("id"))?,
        parent_id: safe_uuid(item.get("parent")),
        name: safe_str(item.get("name")),
        code: safe_str(item.get("code")),
        num: safe_str(item.get("num")),
        description: safe_str(item.get("description")),
        product_type: safe_str(item.get("type")),
        deleted: safe_bool(item.get("deleted")),
        main_unit: safe_uuid(item.get("mainUnit")),
        category: safe_uuid(item.get("category")),
        accounting_category: safe_uuid(item.get("accountingCategory")),
        tax_category: safe_uuid(item.get("taxCategory")),
        default_sale_price: safe_decimal(item.get("defaultSalePrice")),
        unit_weight: safe_decimal(item.get("unitWeight")),
        unit_capacity: safe_decimal(item.get("unitCapacity")),
        synced_at: now,
        raw_json: Some(item.clone()),
    })
}

pub fn map_employee(item: &Value, now: NaiveDateTime) -> Option<EmployeeRow> {
    let id = safe_uuid(item.get("id"))?;
    // Full name out of the three parts; fall back to the flat `name` field.
    let parts: Vec<String> = ["lastName", "firstName", "middleName"]
        .iter()
        .filter_map(|f| safe_str(item.get(*f)))
        .collect();
    let name = if parts.is_empty() {
        safe_str(item.get("name"))
    } else {
        Some(parts.join(" "))
    };
    Some(EmployeeRow {
        id,
        name,
        code: safe_str(item.get("code")),
        deleted: safe_bool(item.get("deleted")),
        first_name: safe_str(item.get("firstName")),
        middle_name: safe_str(item.get("middleName")),
        last_name: safe_str(item.get("lastName")),
        role_id: safe_uuid(item.get("mainRoleId")),
        synced_at: now,
        raw_json: Some(item.clone()),
    })
}

pub fn map_employee_role(item: &Value, now: NaiveDateTime) -> Option<EmployeeRoleRow> {
    Some(EmployeeRoleRow {
        id: safe_uuid(item.get("id"))?,
        name: safe_str(item.get("name")),
        code: safe_str(item.get("code")),
        deleted: safe_bool(item.get("deleted")),
        payment_per_hour: safe_decimal(item.get("paymentPerHour")),
        steady_salary: safe_decimal(item.get("steadySalary")),
        schedule_type: safe_str(item.get("scheduleType")),
        synced_at: now,
        raw_json: Some(item.clone()),
    })
}

// ── finance mappers ──

pub fn map_fin_category(item: &Value, now: NaiveDateTime) -> Option<FinCategoryRow> {
    Some(FinCategoryRow {
        id: safe_i64(item.get("id"))?,
        name: safe_str(item.get("name")),
        parent_id: safe_i64(item.get("parentId")),
        group_name: safe_str(item.get("group")),
        kind: safe_str(item.get("type")),
        pnl_type: safe_str(item.get("pnlType")),
        description: safe_str(item.get("description")),
        is_built_in: safe_opt_bool(item.get("isBuiltIn")),
        synced_at: now,
        raw_json: Some(item.clone()),
    })
}

pub fn map_fin_moneybag(item: &Value, now: NaiveDateTime) -> Option<FinMoneybagRow> {
    Some(FinMoneybagRow {
        id: safe_i64(item.get("id"))?,
        name: safe_str(item.get("name")),
        kind: safe_str(item.get("type")),
        number: safe_str(item.get("number")),
        currency: safe_str(item.get("currency")),
        balance: safe_decimal(item.get("balance")),
        surplus: safe_decimal(item.get("surplus")),
        surplus_timestamp: safe_i64(item.get("surplusTimestamp")),
        group_id: safe_i64(item.get("groupId")),
        archived: safe_opt_bool(item.get("archived")),
        synced_at: now,
        raw_json: Some(item.clone()),
    })
}

pub fn map_fin_moneybag_group(item: &Value, now: NaiveDateTime) -> Option<FinMoneybagGroupRow> {
    Some(FinMoneybagGroupRow {
        id: safe_i64(item.get("id"))?,
        name: safe_str(item.get("name")),
        synced_at: now,
        raw_json: Some(item.clone()),
    })
}

pub fn map_fin_partner(item: &Value, now: NaiveDateTime) -> Option<FinPartnerRow> {
    Some(FinPartnerRow {
        id: safe_i64(item.get("id"))?,
        name: safe_str(item.get("name")),
        inn: safe_str(item.get("inn")),
        group_id: safe_i64(item.get("groupId")),
        comment: safe_str(item.get("comment")),
        synced_at: now,
        raw_json: Some(item.clone()),
    })
}

pub fn map_fin_direction(item: &Value, now: NaiveDateTime) -> Option<FinDirectionRow> {
    Some(FinDirectionRow {
        id: safe_i64(item.get("id"))?,
        name: safe_str(item.get("name")),
        parent_id: safe_i64(item.get("parentId")),
        description: safe_str(item.get("description")),
        archived: safe_opt_bool(item.get("archived")),
        synced_at: now,
        raw_json: Some(item.clone()),
    })
}

pub fn map_fin_goods(item: &Value, now: NaiveDateTime) -> Option<FinGoodsRow> {
    Some(FinGoodsRow {
        id: safe_i64(item.get("id"))?,
        name: safe_str(item.get("name")),
        price: safe_decimal(item.get("price")),
        unit: safe_str(item.get("unit")),
        archived: safe_opt_bool(item.get("archived")),
        synced_at: now,
        raw_json: Some(item.clone()),
    })
}

pub fn map_fin_obtaining(item: &Value, now: NaiveDateTime) -> Option<FinObtainingRow> {
    Some(FinObtainingRow {
        id: safe_i64(item.get("id"))?,
        name: safe_str(item.get("name")),
        partner_id: safe_i64(item.get("partnerId")),
        date: safe_str(item.get("date")),
        sum: safe_decimal(item.get("sum")),
        synced_at: now,
        raw_json: Some(item.clone()),
    })
}

pub fn map_fin_job(item: &Value, now: NaiveDateTime) -> Option<FinJobRow> {
    Some(FinJobRow {
        id: safe_i64(item.get("id"))?,
        name: safe_str(item.get("name")),
        price: safe_decimal(item.get("price")),
        unit: safe_str(item.get("unit")),
        archived: safe_opt_bool(item.get("archived")),
        synced_at: now,
        raw_json: Some(item.clone()),
    })
}

pub fn map_fin_deal(item: &Value, now: NaiveDateTime) -> Option<FinDealRow> {
    Some(FinDealRow {
        id: safe_i64(item.get("id"))?,
        name: safe_str(item.get("name")),
        partner_id: safe_i64(item.get("partnerId")),
        direction_id: safe_i64(item.get("directionId")),
        status: safe_str(item.get("status")),
        synced_at: now,
        raw_json: Some(item.clone()),
    })
}

pub fn map_fin_obligation_status(
    item: &Value,
    now: NaiveDateTime,
) -> Option<FinObligationStatusRow> {
    Some(FinObligationStatusRow {
        id: safe_i64(item.get("id"))?,
        name: safe_str(item.get("name")),
        synced_at: now,
        raw_json: Some(item.clone()),
    })
}

pub fn map_fin_obligation(item: &Value, now: NaiveDateTime) -> Option<FinObligationRow> {
    Some(FinObligationRow {
        id: safe_i64(item.get("id"))?,
        name: safe_str(item.get("name")),
        partner_id: safe_i64(item.get("partnerId")),
        status_id: safe_i64(item.get("statusId")),
        sum: safe_decimal(item.get("sum")),
        date: safe_str(item.get("date")),
        synced_at: now,
        raw_json: Some(item.clone()),
    })
}

pub fn map_fin_pnl_category(item: &Value, now: NaiveDateTime) -> Option<FinPnlCategoryRow> {
    Some(FinPnlCategoryRow {
        id: safe_i64(item.get("id"))?,
        name: safe_str(item.get("name")),
        parent_id: safe_i64(item.get("parentId")),
        kind: safe_str(item.get("type")),
        synced_at: now,
        raw_json: Some(item.clone()),
    })
}

pub fn map_fin_employee(item: &Value, now: NaiveDateTime) -> Option<FinEmployeeRow> {
    Some(FinEmployeeRow {
        id: safe_i64(item.get("id"))?,
        name: safe_str(item.get("name")),
        post: safe_str(item.get("post")),
        archived: safe_opt_bool(item.get("archived")),
        synced_at: now,
        raw_json: Some(item.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2026, 1, 10)
            .unwrap()
            .and_hms_opt(7, 0, 0)
            .unwrap()
    }

    #[test]
    fn entity_without_valid_uuid_is_dropped() {
        let bad = json!({"id": "not-a-uuid", "name": "x"});
        assert!(map_entity("Account", &bad, now()).is_none());
    }

    #[test]
    fn entity_maps_string_booleans() {
        let item = json!({
            "id": "6f2a4f50-0000-0000-0000-000000000001",
            "name": "Списание бар",
            "deleted": "true"
        });
        let row = map_entity("Account", &item, now()).unwrap();
        assert!(row.deleted);
        assert_eq!(row.root_type, "Account");
        assert_eq!(row.name.as_deref(), Some("Списание бар"));
    }

    #[test]
    fn employee_full_name_is_joined_from_parts() {
        let item = json!({
            "id": "6f2a4f50-0000-0000-0000-000000000002",
            "lastName": "Иванов", "firstName": "Иван",
        });
        let row = map_employee(&item, now()).unwrap();
        assert_eq!(row.name.as_deref(), Some("Иванов Иван"));
        assert_eq!(row.last_name.as_deref(), Some("Иванов"));
    }

    #[test]
    fn decimal_extraction_is_exact() {
        let item = json!({"defaultSalePrice": 199.90});
        let d = safe_decimal(item.get("defaultSalePrice")).unwrap();
        assert_eq!(d.to_string(), "199.9");
    }

    #[test]
    fn fin_category_maps_integer_id_and_keywordish_fields() {
        let item = json!({
            "id": 42, "name": "Закупка продуктов",
            "group": "outcome", "type": "operating", "isBuiltIn": 1
        });
        let row = map_fin_category(&item, now()).unwrap();
        assert_eq!(row.id, 42);
        assert_eq!(row.group_name.as_deref(), Some("outcome"));
        assert_eq!(row.kind.as_deref(), Some("operating"));
        assert_eq!(row.is_built_in, Some(true));
    }
}
