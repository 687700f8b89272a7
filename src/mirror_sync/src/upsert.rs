//! Batched UPSERT statements, one function per mirror table.
//!
//! Every function chunks its input at [`BATCH_SIZE`](crate::BATCH_SIZE) rows
//! per statement and updates all mapped columns from `excluded` on conflict.
//! The employee upsert is the one deliberate exception: `chat_id` and
//! `department_id` belong to the bot, sync never touches them.

use diesel::upsert::excluded;
use diesel::ExpressionMethods;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use tracing::debug;

use crate::ft_models::*;
use crate::models::*;
use crate::BATCH_SIZE;

type Result<T> = std::result::Result<T, diesel::result::Error>;

pub async fn upsert_entities(conn: &mut AsyncPgConnection, rows: &[EntityRow]) -> Result<usize> {
    use crate::schema::pos_entity::dsl as t;
    let mut total = 0;
    for chunk in rows.chunks(BATCH_SIZE) {
        total += diesel::insert_into(t::pos_entity)
            .values(chunk)
            .on_conflict((t::id, t::root_type))
            .do_update()
            .set((
                t::name.eq(excluded(t::name)),
                t::code.eq(excluded(t::code)),
                t::deleted.eq(excluded(t::deleted)),
                t::synced_at.eq(excluded(t::synced_at)),
                t::raw_json.eq(excluded(t::raw_json)),
            ))
            .execute(conn)
            .await?;
        debug!(total, "entity batch upserted");
    }
    Ok(total)
}

pub async fn upsert_suppliers(conn: &mut AsyncPgConnection, rows: &[SupplierRow]) -> Result<usize> {
    use crate::schema::pos_supplier::dsl as t;
    let mut total = 0;
    for chunk in rows.chunks(BATCH_SIZE) {
        total += diesel::insert_into(t::pos_supplier)
            .values(chunk)
            .on_conflict(t::id)
            .do_update()
            .set((
                t::name.eq(excluded(t::name)),
                t::code.eq(excluded(t::code)),
                t::deleted.eq(excluded(t::deleted)),
                t::card_number.eq(excluded(t::card_number)),
                t::taxpayer_id_number.eq(excluded(t::taxpayer_id_number)),
                t::synced_at.eq(excluded(t::synced_at)),
                t::raw_json.eq(excluded(t::raw_json)),
            ))
            .execute(conn)
            .await?;
    }
    Ok(total)
}

pub async fn upsert_departments(
    conn: &mut AsyncPgConnection,
    rows: &[DepartmentRow],
) -> Result<usize> {
    use crate::schema::pos_department::dsl as t;
    let mut total = 0;
    for chunk in rows.chunks(BATCH_SIZE) {
        total += diesel::insert_into(t::pos_department)
            .values(chunk)
            .on_conflict(t::id)
            .do_update()
            .set((
                t::parent_id.eq(excluded(t::parent_id)),
                t::name.eq(excluded(t::name)),
                t::code.eq(excluded(t::code)),
                t::department_type.eq(excluded(t::department_type)),
                t::deleted.eq(excluded(t::deleted)),
                t::synced_at.eq(excluded(t::synced_at)),
                t::raw_json.eq(excluded(t::raw_json)),
            ))
            .execute(conn)
            .await?;
    }
    Ok(total)
}

pub async fn upsert_stores(conn: &mut AsyncPgConnection, rows: &[StoreRow]) -> Result<usize> {
    use crate::schema::pos_store::dsl as t;
    let mut total = 0;
    for chunk in rows.chunks(BATCH_SIZE) {
        total += diesel::insert_into(t::pos_store)
            .values(chunk)
            .on_conflict(t::id)
            .do_update()
            .set((
                t::parent_id.eq(excluded(t::parent_id)),
                t::name.eq(excluded(t::name)),
                t::code.eq(excluded(t::code)),
                t::department_type.eq(excluded(t::department_type)),
                t::deleted.eq(excluded(t::deleted)),
                t::synced_at.eq(excluded(t::synced_at)),
                t::raw_json.eq(excluded(t::raw_json)),
            ))
            .execute(conn)
            .await?;
    }
    Ok(total)
}

pub async fn upsert_groups(conn: &mut AsyncPgConnection, rows: &[GroupRow]) -> Result<usize> {
    use crate::schema::pos_group::dsl as t;
    let mut total = 0;
    for chunk in rows.chunks(BATCH_SIZE) {
        total += diesel::insert_into(t::pos_group)
            .values(chunk)
            .on_conflict(t::id)
            .do_update()
            .set((
                t::parent_id.eq(excluded(t::parent_id)),
                t::name.eq(excluded(t::name)),
                t::code.eq(excluded(t::code)),
                t::department_type.eq(excluded(t::department_type)),
                t::deleted.eq(excluded(t::deleted)),
                t::synced_at.eq(excluded(t::synced_at)),
                t::raw_json.eq(excluded(t::raw_json)),
            ))
            .execute(conn)
            .await?;
    }
    Ok(total)
}

pub async fn upsert_product_groups(
    conn: &mut AsyncPgConnection,
    rows: &[ProductGroupRow],
) -> Result<usize> {
    use crate::schema::pos_product_group::dsl as t;
    let mut total = 0;
    for chunk in rows.chunks(BATCH_SIZE) {
        total += diesel::insert_into(t::pos_product_group)
            .values(chunk)
            .on_conflict(t::id)
            .do_update()
            .set((
                t::parent_id.eq(excluded(t::parent_id)),
                t::name.eq(excluded(t::name)),
                t::code.eq(excluded(t::code)),
                t::num.eq(excluded(t::num)),
                t::deleted.eq(excluded(t::deleted)),
                t::synced_at.eq(excluded(t::synced_at)),
                t::raw_json.eq(excluded(t::raw_json)),
            ))
            .execute(conn)
            .await?;
    }
    Ok(total)
}

pub async fn upsert_products(conn: &mut AsyncPgConnection, rows: &[ProductRow]) -> Result<usize> {
    use crate::schema::pos_product::dsl as t;
    let mut total = 0;
    for chunk in rows.chunks(BATCH_SIZE) {
        total += diesel::insert_into(t::pos_product)
            .values(chunk)
            .on_conflict(t::id)
            .do_update()
            .set((
                t::parent_id.eq(excluded(t::parent_id)),
                t::name.eq(excluded(t::name)),
                t::code.eq(excluded(t::code)),
                t::num.eq(excluded(t::num)),
                t::description.eq(excluded(t::description)),
                t::product_type.eq(excluded(t::product_type)),
                t::deleted.eq(excluded(t::deleted)),
                t::main_unit.eq(excluded(t::main_unit)),
                t::category.eq(excluded(t::category)),
                t::accounting_category.eq(excluded(t::accounting_category)),
                t::tax_category.eq(excluded(t::tax_category)),
                t::default_sale_price.eq(excluded(t::default_sale_price)),
                t::unit_weight.eq(excluded(t::unit_weight)),
                t::unit_capacity.eq(excluded(t::unit_capacity)),
                t::synced_at.eq(excluded(t::synced_at)),
                t::raw_json.eq(excluded(t::raw_json)),
            ))
            .execute(conn)
            .await?;
    }
    Ok(total)
}

/// `chat_id` / `department_id` are bot-owned and absent from the SET clause.
pub async fn upsert_employees(conn: &mut AsyncPgConnection, rows: &[EmployeeRow]) -> Result<usize> {
    use crate::schema::pos_employee::dsl as t;
    let mut total = 0;
    for chunk in rows.chunks(BATCH_SIZE) {
        total += diesel::insert_into(t::pos_employee)
            .values(chunk)
            .on_conflict(t::id)
            .do_update()
            .set((
                t::name.eq(excluded(t::name)),
                t::code.eq(excluded(t::code)),
                t::deleted.eq(excluded(t::deleted)),
                t::first_name.eq(excluded(t::first_name)),
                t::middle_name.eq(excluded(t::middle_name)),
                t::last_name.eq(excluded(t::last_name)),
                t::role_id.eq(excluded(t::role_id)),
                t::synced_at.eq(excluded(t::synced_at)),
                t::raw_json.eq(excluded(t::raw_json)),
            ))
            .execute(conn)
            .await?;
    }
    Ok(total)
}

pub async fn upsert_employee_roles(
    conn: &mut AsyncPgConnection,
    rows: &[EmployeeRoleRow],
) -> Result<usize> {
    use crate::schema::pos_employee_role::dsl as t;
    let mut total = 0;
    for chunk in rows.chunks(BATCH_SIZE) {
        total += diesel::insert_into(t::pos_employee_role)
            .values(chunk)
            .on_conflict(t::id)
            .do_update()
            .set((
                t::name.eq(excluded(t::name)),
                t::code.eq(excluded(t::code)),
                t::deleted.eq(excluded(t::deleted)),
                t::payment_per_hour.eq(excluded(t::payment_per_hour)),
                t::steady_salary.eq(excluded(t::steady_salary)),
                t::schedule_type.eq(excluded(t::schedule_type)),
                t::synced_at.eq(excluded(t::synced_at)),
                t::raw_json.eq(excluded(t::raw_json)),
            ))
            .execute(conn)
            .await?;
    }
    Ok(total)
}

// ── finance tables ──

pub async fn upsert_fin_categories(
    conn: &mut AsyncPgConnection,
    rows: &[FinCategoryRow],
) -> Result<usize> {
    use crate::schema::fin_category::dsl as t;
    let mut total = 0;
    for chunk in rows.chunks(BATCH_SIZE) {
        total += diesel::insert_into(t::fin_category)
            .values(chunk)
            .on_conflict(t::id)
            .do_update()
            .set((
                t::name.eq(excluded(t::name)),
                t::parent_id.eq(excluded(t::parent_id)),
                t::group_name.eq(excluded(t::group_name)),
                t::kind.eq(excluded(t::kind)),
                t::pnl_type.eq(excluded(t::pnl_type)),
                t::description.eq(excluded(t::description)),
                t::is_built_in.eq(excluded(t::is_built_in)),
                t::synced_at.eq(excluded(t::synced_at)),
                t::raw_json.eq(excluded(t::raw_json)),
            ))
            .execute(conn)
            .await?;
    }
    Ok(total)
}

pub async fn upsert_fin_moneybags(
    conn: &mut AsyncPgConnection,
    rows: &[FinMoneybagRow],
) -> Result<usize> {
    use crate::schema::fin_moneybag::dsl as t;
    let mut total = 0;
    for chunk in rows.chunks(BATCH_SIZE) {
        total += diesel::insert_into(t::fin_moneybag)
            .values(chunk)
            .on_conflict(t::id)
            .do_update()
            .set((
                t::name.eq(excluded(t::name)),
                t::kind.eq(excluded(t::kind)),
                t::number.eq(excluded(t::number)),
                t::currency.eq(excluded(t::currency)),
                t::balance.eq(excluded(t::balance)),
                t::surplus.eq(excluded(t::surplus)),
                t::surplus_timestamp.eq(excluded(t::surplus_timestamp)),
                t::group_id.eq(excluded(t::group_id)),
                t::archived.eq(excluded(t::archived)),
                t::synced_at.eq(excluded(t::synced_at)),
                t::raw_json.eq(excluded(t::raw_json)),
            ))
            .execute(conn)
            .await?;
    }
    Ok(total)
}

pub async fn upsert_fin_moneybag_groups(
    conn: &mut AsyncPgConnection,
    rows: &[FinMoneybagGroupRow],
) -> Result<usize> {
    use crate::schema::fin_moneybag_group::dsl as t;
    let mut total = 0;
    for chunk in rows.chunks(BATCH_SIZE) {
        total += diesel::insert_into(t::fin_moneybag_group)
            .values(chunk)
            .on_conflict(t::id)
            .do_update()
            .set((
                t::name.eq(excluded(t::name)),
                t::synced_at.eq(excluded(t::synced_at)),
                t::raw_json.eq(excluded(t::raw_json)),
            ))
            .execute(conn)
            .await?;
    }
    Ok(total)
}

pub async fn upsert_fin_partners(
    conn: &mut AsyncPgConnection,
    rows: &[FinPartnerRow],
) -> Result<usize> {
    use crate::schema::fin_partner::dsl as t;
    let mut total = 0;
    for chunk in rows.chunks(BATCH_SIZE) {
        total += diesel::insert_into(t::fin_partner)
            .values(chunk)
            .on_conflict(t::id)
            .do_update()
            .set((
                t::name.eq(excluded(t::name)),
                t::inn.eq(excluded(t::inn)),
                t::group_id.eq(excluded(t::group_id)),
                t::comment.eq(excluded(t::comment)),
                t::synced_at.eq(excluded(t::synced_at)),
                t::raw_json.eq(excluded(t::raw_json)),
            ))
            .execute(conn)
            .await?;
    }
    Ok(total)
}

pub async fn upsert_fin_directions(
    conn: &mut AsyncPgConnection,
    rows: &[FinDirectionRow],
) -> Result<usize> {
    use crate::schema::fin_direction::dsl as t;
    let mut total = 0;
    for chunk in rows.chunks(BATCH_SIZE) {
        total += diesel::insert_into(t::fin_direction)
            .values(chunk)
            .on_conflict(t::id)
            .do_update()
            .set((
                t::name.eq(excluded(t::name)),
                t::parent_id.eq(excluded(t::parent_id)),
                t::description.eq(excluded(t::description)),
                t::archived.eq(excluded(t::archived)),
                t::synced_at.eq(excluded(t::synced_at)),
                t::raw_json.eq(excluded(t::raw_json)),
            ))
            .execute(conn)
            .await?;
    }
    Ok(total)
}

pub async fn upsert_fin_goods(conn: &mut AsyncPgConnection, rows: &[FinGoodsRow]) -> Result<usize> {
    use crate::schema::fin_goods::dsl as t;
    let mut total = 0;
    for chunk in rows.chunks(BATCH_SIZE) {
        total += diesel::insert_into(t::fin_goods)
            .values(chunk)
            .on_conflict(t::id)
            .do_update()
            .set((
                t::name.eq(excluded(t::name)),
                t::price.eq(excluded(t::price)),
                t::unit.eq(excluded(t::unit)),
                t::archived.eq(excluded(t::archived)),
                t::synced_at.eq(excluded(t::synced_at)),
                t::raw_json.eq(excluded(t::raw_json)),
            ))
            .execute(conn)
            .await?;
    }
    Ok(total)
}

pub async fn upsert_fin_obtainings(
    conn: &mut AsyncPgConnection,
    rows: &[FinObtainingRow],
) -> Result<usize> {
    use crate::schema::fin_obtaining::dsl as t;
    let mut total = 0;
    for chunk in rows.chunks(BATCH_SIZE) {
        total += diesel::insert_into(t::fin_obtaining)
            .values(chunk)
            .on_conflict(t::id)
            .do_update()
            .set((
                t::name.eq(excluded(t::name)),
                t::partner_id.eq(excluded(t::partner_id)),
                t::date.eq(excluded(t::date)),
                t::sum.eq(excluded(t::sum)),
                t::synced_at.eq(excluded(t::synced_at)),
                t::raw_json.eq(excluded(t::raw_json)),
            ))
            .execute(conn)
            .await?;
    }
    Ok(total)
}

pub async fn upsert_fin_jobs(conn: &mut AsyncPgConnection, rows: &[FinJobRow]) -> Result<usize> {
    use crate::schema::fin_job::dsl as t;
    let mut total = 0;
    for chunk in rows.chunks(BATCH_SIZE) {
        total += diesel::insert_into(t::fin_job)
            .values(chunk)
            .on_conflict(t::id)
            .do_update()
            .set((
                t::name.eq(excluded(t::name)),
                t::price.eq(excluded(t::price)),
                t::unit.eq(excluded(t::unit)),
                t::archived.eq(excluded(t::archived)),
                t::synced_at.eq(excluded(t::synced_at)),
                t::raw_json.eq(excluded(t::raw_json)),
            ))
            .execute(conn)
            .await?;
    }
    Ok(total)
}

pub async fn upsert_fin_deals(conn: &mut AsyncPgConnection, rows: &[FinDealRow]) -> Result<usize> {
    use crate::schema::fin_deal::dsl as t;
    let mut total = 0;
    for chunk in rows.chunks(BATCH_SIZE) {
        total += diesel::insert_into(t::fin_deal)
            .values(chunk)
            .on_conflict(t::id)
            .do_update()
            .set((
                t::name.eq(excluded(t::name)),
                t::partner_id.eq(excluded(t::partner_id)),
                t::direction_id.eq(excluded(t::direction_id)),
                t::status.eq(excluded(t::status)),
                t::synced_at.eq(excluded(t::synced_at)),
                t::raw_json.eq(excluded(t::raw_json)),
            ))
            .execute(conn)
            .await?;
    }
    Ok(total)
}

pub async fn upsert_fin_obligation_statuses(
    conn: &mut AsyncPgConnection,
    rows: &[FinObligationStatusRow],
) -> Result<usize> {
    use crate::schema::fin_obligation_status::dsl as t;
    let mut total = 0;
    for chunk in rows.chunks(BATCH_SIZE) {
        total += diesel::insert_into(t::fin_obligation_status)
            .values(chunk)
            .on_conflict(t::id)
            .do_update()
            .set((
                t::name.eq(excluded(t::name)),
                t::synced_at.eq(excluded(t::synced_at)),
                t::raw_json.eq(excluded(t::raw_json)),
            ))
            .execute(conn)
            .await?;
    }
    Ok(total)
}

pub async fn upsert_fin_obligations(
    conn: &mut AsyncPgConnection,
    rows: &[FinObligationRow],
) -> Result<usize> {
    use crate::schema::fin_obligation::dsl as t;
    let mut total = 0;
    for chunk in rows.chunks(BATCH_SIZE) {
        total += diesel::insert_into(t::fin_obligation)
            .values(chunk)
            .on_conflict(t::id)
            .do_update()
            .set((
                t::name.eq(excluded(t::name)),
                t::partner_id.eq(excluded(t::partner_id)),
                t::status_id.eq(excluded(t::status_id)),
                t::sum.eq(excluded(t::sum)),
                t::date.eq(excluded(t::date)),
                t::synced_at.eq(excluded(t::synced_at)),
                t::raw_json.eq(excluded(t::raw_json)),
            ))
            .execute(conn)
            .await?;
    }
    Ok(total)
}

pub async fn upsert_fin_pnl_categories(
    conn: &mut AsyncPgConnection,
    rows: &[FinPnlCategoryRow],
) -> Result<usize> {
    use crate::schema::fin_pnl_category::dsl as t;
    let mut total = 0;
    for chunk in rows.chunks(BATCH_SIZE) {
        total += diesel::insert_into(t::fin_pnl_category)
            .values(chunk)
            .on_conflict(t::id)
            .do_update()
            .set((
                t::name.eq(excluded(t::name)),
                t::parent_id.eq(excluded(t::parent_id)),
                t::kind.eq(excluded(t::kind)),
                t::synced_at.eq(excluded(t::synced_at)),
                t::raw_json.eq(excluded(t::raw_json)),
            ))
            .execute(conn)
            .await?;
    }
    Ok(total)
}

pub async fn upsert_fin_employees(
    conn: &mut AsyncPgConnection,
    rows: &[FinEmployeeRow],
) -> Result<usize> {
    use crate::schema::fin_employee::dsl as t;
    let mut total = 0;
    for chunk in rows.chunks(BATCH_SIZE) {
        total += diesel::insert_into(t::fin_employee)
            .values(chunk)
            .on_conflict(t::id)
            .do_update()
            .set((
                t::name.eq(excluded(t::name)),
                t::post.eq(excluded(t::post)),
                t::archived.eq(excluded(t::archived)),
                t::synced_at.eq(excluded(t::synced_at)),
                t::raw_json.eq(excluded(t::raw_json)),
            ))
            .execute(conn)
            .await?;
    }
    Ok(total)
}
