//! Minimum stock levels: spreadsheet import and below-minimum checks.
//!
//! The spreadsheet is the source of truth for `(product, department) →
//! (min, max)`; the table is a cache refreshed by the daily chain and on
//! demand. The check joins current balances against the levels per
//! department (summing a product across the department's stores).

use std::collections::HashMap;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use std::str::FromStr;
use tracing::{info, warn};
use uuid::Uuid;

use mirror_sync::db::pool::get_conn;
use mirror_sync::ops_models::MinStockLevelRow;
use mirror_sync::BATCH_SIZE;

use crate::app::App;
use crate::chat::{InlineButton, Markup, Outgoing, Update};
use crate::notify::with_progress;
use crate::workflows::delete_user_message;

pub const MIN_STOCK_TAB: &str = "Мин. остатки";

/// One product sitting below its configured minimum.
#[derive(Debug, Clone, PartialEq)]
pub struct BelowMin {
    pub product_id: Uuid,
    pub product_name: String,
    pub department_id: Uuid,
    pub total_amount: BigDecimal,
    pub min_level: BigDecimal,
}

/// Pure join: levels × (store → department) × balances.
pub fn find_below_min(
    levels: &[(Uuid, Uuid, Option<String>, BigDecimal)],
    store_departments: &HashMap<Uuid, Uuid>,
    balances: &[(Uuid, Uuid, BigDecimal)],
) -> Vec<BelowMin> {
    // (department, product) → total on hand
    let mut totals: HashMap<(Uuid, Uuid), BigDecimal> = HashMap::new();
    for (store_id, product_id, amount) in balances {
        if let Some(department_id) = store_departments.get(store_id) {
            *totals
                .entry((*department_id, *product_id))
                .or_insert_with(|| BigDecimal::from(0)) += amount.clone();
        }
    }

    let mut below: Vec<BelowMin> = levels
        .iter()
        .filter_map(|(product_id, department_id, name, min_level)| {
            let total = totals
                .get(&(*department_id, *product_id))
                .cloned()
                .unwrap_or_else(|| BigDecimal::from(0));
            (total < *min_level).then(|| BelowMin {
                product_id: *product_id,
                product_name: name.clone().unwrap_or_default(),
                department_id: *department_id,
                total_amount: total,
                min_level: min_level.clone(),
            })
        })
        .collect();
    below.sort_by(|a, b| {
        (a.department_id, a.product_name.as_str()).cmp(&(b.department_id, b.product_name.as_str()))
    });
    below
}

/// The full named-product list, through the TTL cache — both the min/max
/// import and the catalogue export walk it.
pub async fn product_list(app: &Arc<App>) -> anyhow::Result<Vec<(Uuid, String)>> {
    if let Some(products) = app.caches.products.get(&()) {
        return Ok(products);
    }
    use mirror_sync::schema::pos_product::dsl as p;
    let mut conn = get_conn(&app.ctx.pool).await?;
    let rows: Vec<(Uuid, Option<String>)> = p::pos_product
        .filter(p::deleted.eq(false))
        .select((p::id, p::name))
        .order(p::name.asc())
        .load(&mut conn)
        .await?;
    let products: Vec<(Uuid, String)> = rows
        .into_iter()
        .filter_map(|(id, name)| name.map(|n| (id, n)))
        .collect();
    app.caches.products.insert(
        (),
        products.clone(),
        crate::app::ListCaches::lists_ttl(),
    );
    Ok(products)
}

/// Imports `(product, department) → (min, max)` rows from the sheet.
/// Products are matched by exact name against the mirror; unknown names are
/// skipped with a warning.
pub async fn sync_min_stock_from_sheet(app: &Arc<App>) -> anyhow::Result<usize> {
    let records = app.sheets.read_records(MIN_STOCK_TAB).await?;

    let products = product_list(app).await?;
    let mut conn = get_conn(&app.ctx.pool).await?;
    let by_name: HashMap<String, Uuid> = products
        .into_iter()
        .map(|(id, name)| (name.trim().to_string(), id))
        .collect();

    let now = app.ctx.clock.now();
    let mut rows: Vec<MinStockLevelRow> = Vec::new();
    let mut skipped = 0usize;
    for record in &records {
        let Some(product_name) = record.get("product_name").map(|s| s.trim()) else {
            continue;
        };
        let (Some(product_id), Some(department_id), Some(min_level)) = (
            by_name.get(product_name).copied(),
            record
                .get("department_id")
                .and_then(|s| Uuid::parse_str(s.trim()).ok()),
            record
                .get("min")
                .and_then(|s| BigDecimal::from_str(&s.trim().replace(',', ".")).ok()),
        ) else {
            skipped += 1;
            continue;
        };
        rows.push(MinStockLevelRow {
            product_id,
            department_id,
            product_name: Some(product_name.to_string()),
            min_level,
            max_level: record
                .get("max")
                .and_then(|s| BigDecimal::from_str(&s.trim().replace(',', ".")).ok()),
            synced_at: now,
        });
    }
    if skipped > 0 {
        warn!(skipped, "min-stock rows skipped (unknown product or bad value)");
    }

    use diesel::upsert::excluded;
    use mirror_sync::schema::min_stock_level::dsl as m;
    let mut written = 0;
    for chunk in rows.chunks(BATCH_SIZE) {
        written += diesel::insert_into(m::min_stock_level)
            .values(chunk)
            .on_conflict((m::product_id, m::department_id))
            .do_update()
            .set((
                m::product_name.eq(excluded(m::product_name)),
                m::min_level.eq(excluded(m::min_level)),
                m::max_level.eq(excluded(m::max_level)),
                m::synced_at.eq(excluded(m::synced_at)),
            ))
            .execute(&mut conn)
            .await?;
    }
    info!(written, "min-stock levels imported from sheet");
    Ok(written)
}

/// Loads everything and reports products below minimum.
pub async fn check_min_stock(app: &Arc<App>) -> anyhow::Result<Vec<BelowMin>> {
    let mut conn = get_conn(&app.ctx.pool).await?;

    use mirror_sync::schema::min_stock_level::dsl as m;
    use mirror_sync::schema::pos_store::dsl as s;
    use mirror_sync::schema::stock_balance::dsl as sb;

    let levels: Vec<(Uuid, Uuid, Option<String>, BigDecimal)> = m::min_stock_level
        .select((m::product_id, m::department_id, m::product_name, m::min_level))
        .load(&mut conn)
        .await?;
    let stores: Vec<(Uuid, Option<Uuid>)> = s::pos_store
        .filter(s::deleted.eq(false))
        .select((s::id, s::parent_id))
        .load(&mut conn)
        .await?;
    let balances: Vec<(Uuid, Uuid, BigDecimal)> = sb::stock_balance
        .select((sb::store_id, sb::product_id, sb::amount))
        .load(&mut conn)
        .await?;

    let store_departments: HashMap<Uuid, Uuid> = stores
        .into_iter()
        .filter_map(|(id, parent)| parent.map(|p| (id, p)))
        .collect();

    Ok(find_below_min(&levels, &store_departments, &balances))
}

pub fn format_below_min(items: &[BelowMin]) -> String {
    if items.is_empty() {
        return "✅ Все остатки выше минимума".to_string();
    }
    let mut lines = vec![format!("📦 Ниже минимума: {} позиций", items.len())];
    for item in items.iter().take(50) {
        lines.push(format!(
            "▫️ {} — {} (мин. {})",
            item.product_name, item.total_amount, item.min_level
        ));
    }
    if items.len() > 50 {
        lines.push(format!("...и ещё {}", items.len() - 50));
    }
    lines.join("\n")
}

/// Stable hash of a below-minimum snapshot plus its total, for the
/// pinned-message gate.
pub fn stock_snapshot_hash(items: &[BelowMin]) -> (String, f64) {
    use sha2::{Digest, Sha256};
    let mut lines: Vec<String> = items
        .iter()
        .map(|item| {
            format!(
                "{}|{}|{}|{}",
                item.department_id, item.product_name, item.total_amount, item.min_level
            )
        })
        .collect();
    lines.sort();
    let mut hasher = Sha256::new();
    for line in &lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    let total: f64 = items
        .iter()
        .filter_map(|item| item.total_amount.to_string().parse::<f64>().ok())
        .sum();
    (format!("{:x}", hasher.finalize()), total)
}

/// Updates every stock subscriber's pinned "below minimum" message, hash- and
/// threshold-gated by the caller.
pub async fn update_stock_alert_messages(
    app: &Arc<App>,
    items: &[BelowMin],
    hash: &str,
) -> anyhow::Result<usize> {
    let subscribers = app.permissions.stock_subscriber_ids().await;
    let text = format_below_min(items);
    let now = app.ctx.clock.now();
    let mut updated = 0;

    use mirror_sync::schema::stock_alert_message::dsl as m;
    let mut conn = get_conn(&app.ctx.pool).await?;

    for chat_id in subscribers {
        let existing: Option<(i64, String)> = m::stock_alert_message
            .filter(m::chat_id.eq(chat_id))
            .select((m::message_id, m::snapshot_hash))
            .first(&mut conn)
            .await
            .optional()?;

        match existing {
            Some((_, old_hash)) if old_hash == hash => continue,
            Some((message_id, _)) => {
                if app
                    .transport
                    .edit_message(chat_id, message_id, Outgoing::text(text.clone()))
                    .await
                    .is_err()
                {
                    let message_id = app
                        .transport
                        .send_message(chat_id, Outgoing::text(text.clone()))
                        .await?;
                    let _ = app.transport.pin_message(chat_id, message_id).await;
                    diesel::update(m::stock_alert_message.filter(m::chat_id.eq(chat_id)))
                        .set((m::message_id.eq(message_id), m::snapshot_hash.eq(hash), m::updated_at.eq(now)))
                        .execute(&mut conn)
                        .await?;
                    updated += 1;
                    continue;
                }
                diesel::update(m::stock_alert_message.filter(m::chat_id.eq(chat_id)))
                    .set((m::snapshot_hash.eq(hash), m::updated_at.eq(now)))
                    .execute(&mut conn)
                    .await?;
                updated += 1;
            }
            None => {
                let message_id = app
                    .transport
                    .send_message(chat_id, Outgoing::text(text.clone()))
                    .await?;
                let _ = app.transport.pin_message(chat_id, message_id).await;
                diesel::insert_into(m::stock_alert_message)
                    .values((
                        m::chat_id.eq(chat_id),
                        m::message_id.eq(message_id),
                        m::snapshot_hash.eq(hash),
                        m::updated_at.eq(now),
                    ))
                    .execute(&mut conn)
                    .await?;
                updated += 1;
            }
        }
    }
    Ok(updated)
}

// ── handlers ──

pub async fn on_menu(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    let chat_id = update.chat_id();
    if let Update::Text { message_id, .. } = &update {
        delete_user_message(&app, chat_id, *message_id).await;
    }
    app.transport
        .send_message(
            chat_id,
            Outgoing::with_inline(
                "📋 Минимальные остатки:",
                vec![
                    vec![InlineButton::new("🔄 Импорт из таблицы", "minstock_sync:go")],
                    vec![InlineButton::new("🔍 Проверить остатки", "minstock_check:go")],
                ],
            ),
        )
        .await?;
    Ok(())
}

pub async fn on_sync(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    let chat_id = update.chat_id();
    let app2 = Arc::clone(&app);
    with_progress(&app.transport, chat_id, "Импорт min/max", || async move {
        let count = sync_min_stock_from_sheet(&app2).await?;
        Ok(format!("{count} записей"))
    })
    .await;
    Ok(())
}

pub async fn on_check(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    let chat_id = update.chat_id();
    let items = check_min_stock(&app).await?;
    app.transport
        .send_message(chat_id, Outgoing::text(format_below_min(&items)))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn below_min_sums_across_department_stores() {
        let dept = Uuid::new_v4();
        let bar = Uuid::new_v4();
        let kitchen = Uuid::new_v4();
        let milk = Uuid::new_v4();

        let levels = vec![(milk, dept, Some("Молоко".to_string()), dec("10"))];
        let store_departments: HashMap<Uuid, Uuid> =
            [(bar, dept), (kitchen, dept)].into_iter().collect();

        // 4 + 5 = 9 < 10 → below
        let balances = vec![(bar, milk, dec("4")), (kitchen, milk, dec("5"))];
        let below = find_below_min(&levels, &store_departments, &balances);
        assert_eq!(below.len(), 1);
        assert_eq!(below[0].total_amount, dec("9"));

        // 4 + 6.5 = 10.5 ≥ 10 → fine
        let balances = vec![(bar, milk, dec("4")), (kitchen, milk, dec("6.5"))];
        assert!(find_below_min(&levels, &store_departments, &balances).is_empty());
    }

    #[test]
    fn missing_balance_counts_as_zero() {
        let dept = Uuid::new_v4();
        let product = Uuid::new_v4();
        let levels = vec![(product, dept, None, dec("1"))];
        let below = find_below_min(&levels, &HashMap::new(), &[]);
        assert_eq!(below.len(), 1);
        assert_eq!(below[0].total_amount, dec("0"));
    }
}
