//! Cloud stop-list: mirror, enter/leave history, pinned-message updates.
//!
//! A flush fetches the cloud stop-list, diffs it against `active_stoplist`,
//! opens/closes `stoplist_history` intervals and rewrites the mirror, then
//! updates every subscriber's pinned message — but only when the content hash
//! changed, so identical snapshots cause zero edits (no flicker, no
//! rate-limit burn).

use std::collections::HashMap;
use std::sync::Arc;

use bigdecimal::{BigDecimal, FromPrimitive, Zero};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::info;

use mirror_sync::db::pool::get_conn;
use mirror_sync::ops_models::{ActiveStoplist, ActiveStoplistRow, StoplistHistoryRow};

use crate::app::App;
use crate::chat::{InlineButton, Markup, Outgoing, Update};
use crate::notify::fan_out;
use crate::workflows::delete_user_message;

/// One product currently stopped (or low) on one terminal group.
#[derive(Debug, Clone, PartialEq)]
pub struct StopItem {
    pub product_id: String,
    pub name: String,
    pub balance: f64,
    pub terminal_group_id: String,
    pub organization_id: String,
}

impl StopItem {
    pub fn key(&self) -> String {
        format!("{}:{}", self.product_id, self.terminal_group_id)
    }
}

/// Unpacks the nested cloud payload:
/// `[{organizationId, items: [{terminalGroupId, items: [...]}]}]`.
pub fn flatten_stop_groups(raw_groups: &[Value]) -> Vec<StopItem> {
    let mut flat = Vec::new();
    for org_group in raw_groups {
        let org_id = org_group
            .get("organizationId")
            .and_then(Value::as_str)
            .unwrap_or_default();
        for tg in org_group
            .get("items")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let tg_id = tg
                .get("terminalGroupId")
                .and_then(Value::as_str)
                .unwrap_or_default();
            for item in tg.get("items").and_then(Value::as_array).into_iter().flatten() {
                let Some(product_id) = item.get("productId").and_then(Value::as_str) else {
                    continue;
                };
                flat.push(StopItem {
                    product_id: product_id.to_string(),
                    name: String::new(),
                    balance: item.get("balance").and_then(Value::as_f64).unwrap_or(0.0),
                    terminal_group_id: tg_id.to_string(),
                    organization_id: org_id.to_string(),
                });
            }
        }
    }
    flat
}

pub struct StoplistDiff {
    pub added: Vec<StopItem>,
    pub removed: Vec<StopItem>,
    pub existing: Vec<StopItem>,
}

/// `(key → balance)` old state vs new items. A balance change counts as an
/// addition (the user-visible number changed).
pub fn diff_stoplist(old: &HashMap<String, (StopItem, f64)>, new_items: &[StopItem]) -> StoplistDiff {
    let mut added = Vec::new();
    let mut existing = Vec::new();
    let new_keys: HashMap<String, &StopItem> =
        new_items.iter().map(|item| (item.key(), item)).collect();

    for item in new_items {
        match old.get(&item.key()) {
            None => added.push(item.clone()),
            Some((_, old_balance)) if (*old_balance - item.balance).abs() > f64::EPSILON => {
                added.push(item.clone())
            }
            Some(_) => existing.push(item.clone()),
        }
    }
    let removed = old
        .values()
        .filter(|(item, _)| !new_keys.contains_key(&item.key()))
        .map(|(item, _)| item.clone())
        .collect();

    StoplistDiff {
        added,
        removed,
        existing,
    }
}

/// Stable content hash of a snapshot; identical stop-lists hash identically
/// regardless of item order.
pub fn snapshot_hash(items: &[StopItem]) -> String {
    let mut lines: Vec<String> = items
        .iter()
        .map(|item| format!("{}|{}|{:.3}", item.key(), item.name, item.balance))
        .collect();
    lines.sort();
    let mut hasher = Sha256::new();
    for line in &lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

pub fn format_stoplist_message(diff: &StoplistDiff) -> String {
    fn fmt(item: &StopItem) -> String {
        if item.balance > 0.0 {
            format!("{} ({})", item.name, item.balance as i64)
        } else {
            format!("{} — стоп", item.name)
        }
    }
    fn section(lines: &mut Vec<String>, title: &str, items: &[StopItem], with_balance: bool) {
        lines.push(title.to_string());
        if items.is_empty() {
            lines.push("▫️ —".to_string());
        } else {
            let mut sorted: Vec<&StopItem> = items.iter().collect();
            sorted.sort_by(|a, b| a.name.cmp(&b.name));
            for item in sorted.iter().take(50) {
                lines.push(format!(
                    "▫️ {}",
                    if with_balance { fmt(item) } else { item.name.clone() }
                ));
            }
            if sorted.len() > 50 {
                lines.push(format!("...и ещё {}", sorted.len() - 50));
            }
        }
        lines.push(String::new());
    }

    let mut lines = Vec::new();
    section(&mut lines, "Новые блюда в стоп-листе 🚫", &diff.added, true);
    section(&mut lines, "Удалены из стоп-листа ✅", &diff.removed, false);
    section(&mut lines, "Остались в стоп-листе", &diff.existing, true);
    lines.push("#стоплист".to_string());

    let mut text = lines.join("\n");
    if text.len() > 4000 {
        text.truncate(3950);
        text.push_str("\n\n...обрезано");
    }
    text
}

// ── database side ──

async fn product_names(
    app: &Arc<App>,
    product_ids: &[String],
) -> anyhow::Result<HashMap<String, String>> {
    let uuids: Vec<uuid::Uuid> = product_ids
        .iter()
        .filter_map(|id| id.parse().ok())
        .collect();
    if uuids.is_empty() {
        return Ok(HashMap::new());
    }
    use mirror_sync::schema::pos_product::dsl as p;
    let mut conn = get_conn(&app.ctx.pool).await?;
    let rows: Vec<(uuid::Uuid, Option<String>)> = p::pos_product
        .filter(p::id.eq_any(&uuids))
        .select((p::id, p::name))
        .load(&mut conn)
        .await?;
    Ok(rows
        .into_iter()
        .map(|(id, name)| (id.to_string(), name.unwrap_or_else(|| "[без названия]".into())))
        .collect())
}

/// Fetches the current cloud stop-list as named flat items.
pub async fn fetch_stoplist_items(app: &Arc<App>) -> anyhow::Result<Vec<StopItem>> {
    let Some(org_id) = app.config.cloud_org_id.clone() else {
        info!("cloud org id not configured, stop-list unavailable");
        return Ok(Vec::new());
    };
    let token = current_cloud_token(app).await?;

    let groups = app.cloud.fetch_terminal_groups(&token, &org_id).await?;
    let tg_ids: Vec<String> = groups
        .iter()
        .filter_map(|g| g.get("id").and_then(Value::as_str))
        .map(str::to_string)
        .collect();
    if tg_ids.is_empty() {
        return Ok(Vec::new());
    }

    let raw = app.cloud.fetch_stop_lists(&token, &org_id, &tg_ids).await?;
    let mut items = flatten_stop_groups(&raw);

    let ids: Vec<String> = items.iter().map(|i| i.product_id.clone()).collect();
    let names = product_names(app, &ids).await?;
    for item in &mut items {
        item.name = names
            .get(&item.product_id)
            .cloned()
            .unwrap_or_else(|| "[НЕ НАЙДЕНО]".into());
    }
    Ok(items)
}

async fn current_cloud_token(app: &Arc<App>) -> anyhow::Result<String> {
    use mirror_sync::schema::cloud_token::dsl as t;
    let mut conn = get_conn(&app.ctx.pool).await?;
    let token: Option<String> = t::cloud_token
        .select(t::token)
        .order(t::id.desc())
        .first(&mut conn)
        .await
        .optional()?;
    token.ok_or_else(|| anyhow::anyhow!("no cloud token in table"))
}

/// Applies one snapshot: history in/out, mirror rewrite. Returns the diff.
pub async fn sync_and_diff(
    app: &Arc<App>,
    new_items: &[StopItem],
) -> anyhow::Result<StoplistDiff> {
    let now = app.ctx.clock.now();
    let org_scope = app.config.cloud_org_id.as_deref();

    let mut conn = get_conn(&app.ctx.pool).await?;
    use mirror_sync::schema::active_stoplist::dsl as a;
    use mirror_sync::schema::stoplist_history::dsl as h;

    let old_rows: Vec<ActiveStoplist> = match org_scope {
        Some(org) => {
            a::active_stoplist
                .filter(a::organization_id.eq(org))
                .select(ActiveStoplist::as_select())
                .load(&mut conn)
                .await?
        }
        None => {
            a::active_stoplist
                .select(ActiveStoplist::as_select())
                .load(&mut conn)
                .await?
        }
    };

    let old: HashMap<String, (StopItem, f64)> = old_rows
        .iter()
        .map(|row| {
            let item = StopItem {
                product_id: row.product_id.clone(),
                name: row.name.clone().unwrap_or_default(),
                balance: row.balance.to_string().parse().unwrap_or(0.0),
                terminal_group_id: row.terminal_group_id.clone().unwrap_or_default(),
                organization_id: row.organization_id.clone().unwrap_or_default(),
            };
            (item.key(), (item.clone(), item.balance))
        })
        .collect();

    let diff = diff_stoplist(&old, new_items);

    // History: full stop (balance 0) entered / left.
    let old_zero: Vec<&StopItem> = old
        .values()
        .filter(|(_, balance)| *balance == 0.0)
        .map(|(item, _)| item)
        .collect();
    let new_keys: HashMap<String, &StopItem> =
        new_items.iter().map(|item| (item.key(), item)).collect();

    for item in new_items.iter().filter(|i| i.balance == 0.0) {
        let was_zero = old
            .get(&item.key())
            .is_some_and(|(_, balance)| *balance == 0.0);
        if !was_zero {
            diesel::insert_into(h::stoplist_history)
                .values(&StoplistHistoryRow {
                    product_id: item.product_id.clone(),
                    name: Some(item.name.clone()),
                    terminal_group_id: Some(item.terminal_group_id.clone()),
                    started_at: now,
                    ended_at: None,
                    duration_seconds: None,
                })
                .execute(&mut conn)
                .await?;
        }
    }
    for item in &old_zero {
        let still_zero = new_keys
            .get(&item.key())
            .is_some_and(|new| new.balance == 0.0);
        if !still_zero {
            // Close every open interval of this pair.
            let open: Vec<(i64, chrono::NaiveDateTime)> = h::stoplist_history
                .filter(h::product_id.eq(&item.product_id))
                .filter(h::terminal_group_id.eq(&item.terminal_group_id))
                .filter(h::ended_at.is_null())
                .select((h::id, h::started_at))
                .load(&mut conn)
                .await?;
            for (id, started_at) in open {
                let duration = (now - started_at).num_seconds();
                diesel::update(h::stoplist_history.filter(h::id.eq(id)))
                    .set((h::ended_at.eq(now), h::duration_seconds.eq(duration)))
                    .execute(&mut conn)
                    .await?;
            }
        }
    }

    // Mirror rewrite, scoped to our organization.
    match org_scope {
        Some(org) => {
            diesel::delete(a::active_stoplist.filter(a::organization_id.eq(org)))
                .execute(&mut conn)
                .await?;
        }
        None => {
            diesel::delete(a::active_stoplist).execute(&mut conn).await?;
        }
    }
    let rows: Vec<ActiveStoplistRow> = new_items
        .iter()
        .map(|item| ActiveStoplistRow {
            product_id: item.product_id.clone(),
            name: Some(item.name.clone()),
            balance: BigDecimal::from_f64(item.balance).unwrap_or_else(BigDecimal::zero),
            terminal_group_id: Some(item.terminal_group_id.clone()),
            organization_id: Some(item.organization_id.clone()),
            synced_at: now,
        })
        .collect();
    if !rows.is_empty() {
        diesel::insert_into(a::active_stoplist)
            .values(&rows)
            .execute(&mut conn)
            .await?;
    }

    info!(
        added = diff.added.len(),
        removed = diff.removed.len(),
        existing = diff.existing.len(),
        "stop-list reconciled"
    );
    Ok(diff)
}

/// Updates every subscriber's pinned stop-list message, gated by the content
/// hash: two identical snapshots in a row produce zero edits.
pub async fn update_pinned_messages(
    app: &Arc<App>,
    text: &str,
    hash: &str,
) -> anyhow::Result<usize> {
    let subscribers = app.permissions.stoplist_subscriber_ids().await;
    let now = app.ctx.clock.now();
    let mut updated = 0;

    use mirror_sync::schema::stoplist_message::dsl as m;
    let mut conn = get_conn(&app.ctx.pool).await?;

    for chat_id in subscribers {
        let existing: Option<(i64, String)> = m::stoplist_message
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
                    .edit_message(chat_id, message_id, Outgoing::text(text.to_string()))
                    .await
                    .is_ok()
                {
                    diesel::update(m::stoplist_message.filter(m::chat_id.eq(chat_id)))
                        .set((m::snapshot_hash.eq(hash), m::updated_at.eq(now)))
                        .execute(&mut conn)
                        .await?;
                    updated += 1;
                    continue;
                }
                // The pinned message is gone — fall through and recreate it.
                let message_id = app
                    .transport
                    .send_message(chat_id, Outgoing::text(text.to_string()))
                    .await?;
                let _ = app.transport.pin_message(chat_id, message_id).await;
                diesel::update(m::stoplist_message.filter(m::chat_id.eq(chat_id)))
                    .set((
                        m::message_id.eq(message_id),
                        m::snapshot_hash.eq(hash),
                        m::updated_at.eq(now),
                    ))
                    .execute(&mut conn)
                    .await?;
                updated += 1;
            }
            None => {
                let message_id = app
                    .transport
                    .send_message(chat_id, Outgoing::text(text.to_string()))
                    .await?;
                let _ = app.transport.pin_message(chat_id, message_id).await;
                diesel::insert_into(m::stoplist_message)
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

/// One full cycle: fetch → reconcile → pinned updates.
pub async fn run_stoplist_cycle(app: &Arc<App>) -> anyhow::Result<()> {
    let items = fetch_stoplist_items(app).await?;
    let diff = sync_and_diff(app, &items).await?;
    let text = format_stoplist_message(&diff);
    let hash = snapshot_hash(&items);
    let updated = update_pinned_messages(app, &text, &hash).await?;
    info!(updated, "stop-list cycle complete");
    Ok(())
}

/// Evening aggregation: per-product time in stop today.
pub async fn send_evening_report(app: &Arc<App>) -> anyhow::Result<usize> {
    use mirror_sync::schema::stoplist_history::dsl as h;

    let today = app
        .ctx
        .clock
        .now()
        .date()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time");
    let mut conn = get_conn(&app.ctx.pool).await?;
    let rows: Vec<(String, Option<String>, Option<i64>)> = h::stoplist_history
        .filter(h::started_at.ge(today))
        .select((h::product_id, h::name, h::duration_seconds))
        .load(&mut conn)
        .await?;

    let mut totals: HashMap<String, (String, i64)> = HashMap::new();
    for (product_id, name, duration) in rows {
        let entry = totals
            .entry(product_id)
            .or_insert_with(|| (name.unwrap_or_default(), 0));
        entry.1 += duration.unwrap_or(0);
    }

    let mut lines = vec!["🌙 Стоп-лист за день".to_string()];
    if totals.is_empty() {
        lines.push("▫️ Стопов сегодня не было ✅".to_string());
    } else {
        let mut sorted: Vec<(String, i64)> = totals.into_values().collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1));
        for (name, seconds) in sorted.into_iter().take(50) {
            let hours = seconds / 3600;
            let minutes = (seconds % 3600) / 60;
            lines.push(format!("▫️ {name} — {hours}ч {minutes}м в стопе"));
        }
    }
    let text = lines.join("\n");

    let subscribers = app.permissions.stoplist_subscriber_ids().await;
    Ok(fan_out(&app.transport, &subscribers, &text).await)
}

// ── handlers ──

pub async fn on_reports_menu(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    let chat_id = update.chat_id();
    if let Update::Text { message_id, .. } = &update {
        delete_user_message(&app, chat_id, *message_id).await;
    }
    app.transport
        .send_message(
            chat_id,
            Outgoing::with_inline(
                "📊 Отчёты:",
                vec![vec![InlineButton::new(
                    "🚫 Стоп-лист за день",
                    "report_stoplist:go",
                )]],
            ),
        )
        .await?;
    Ok(())
}

pub async fn on_stoplist_report(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    let chat_id = update.chat_id();
    let sent = send_evening_report(&app).await?;
    app.transport
        .send_message(chat_id, Outgoing::text(format!("📨 Отчёт разослан: {sent}")))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(product: &str, tg: &str, balance: f64) -> StopItem {
        StopItem {
            product_id: product.to_string(),
            name: format!("товар {product}"),
            balance,
            terminal_group_id: tg.to_string(),
            organization_id: "org".to_string(),
        }
    }

    fn old_map(items: &[StopItem]) -> HashMap<String, (StopItem, f64)> {
        items
            .iter()
            .map(|i| (i.key(), (i.clone(), i.balance)))
            .collect()
    }

    #[test]
    fn flatten_unpacks_nested_payload() {
        let raw = vec![json!({
            "organizationId": "org1",
            "items": [{
                "terminalGroupId": "tg1",
                "items": [
                    {"productId": "p1", "balance": 0},
                    {"productId": "p2", "balance": 3.0}
                ]
            }]
        })];
        let flat = flatten_stop_groups(&raw);
        assert_eq!(flat.len(), 2);
        assert_eq!(flat[0].terminal_group_id, "tg1");
        assert_eq!(flat[1].balance, 3.0);
    }

    #[test]
    fn diff_classifies_added_removed_existing() {
        let old = old_map(&[item("p1", "tg", 0.0), item("p2", "tg", 5.0)]);
        let new_items = vec![item("p1", "tg", 0.0), item("p3", "tg", 0.0)];
        let diff = diff_stoplist(&old, &new_items);

        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].product_id, "p3");
        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.removed[0].product_id, "p2");
        assert_eq!(diff.existing.len(), 1);
    }

    #[test]
    fn balance_change_counts_as_added() {
        let old = old_map(&[item("p1", "tg", 5.0)]);
        let new_items = vec![item("p1", "tg", 2.0)];
        let diff = diff_stoplist(&old, &new_items);
        assert_eq!(diff.added.len(), 1);
        assert!(diff.existing.is_empty());
    }

    #[test]
    fn identical_snapshots_hash_identically_regardless_of_order() {
        let a = vec![item("p1", "tg", 0.0), item("p2", "tg", 1.0)];
        let b = vec![item("p2", "tg", 1.0), item("p1", "tg", 0.0)];
        assert_eq!(snapshot_hash(&a), snapshot_hash(&b));

        let c = vec![item("p1", "tg", 0.0), item("p2", "tg", 2.0)];
        assert_ne!(snapshot_hash(&a), snapshot_hash(&c));
    }

    #[test]
    fn message_format_has_three_sections_and_tag() {
        let diff = StoplistDiff {
            added: vec![item("p1", "tg", 0.0)],
            removed: vec![],
            existing: vec![item("p2", "tg", 4.0)],
        };
        let text = format_stoplist_message(&diff);
        assert!(text.contains("Новые блюда в стоп-листе 🚫"));
        assert!(text.contains("Удалены из стоп-листа ✅"));
        assert!(text.contains("Остались в стоп-листе"));
        assert!(text.contains("— стоп"));
        assert!(text.contains("(4)"));
        assert!(text.ends_with("#стоплист"));
    }
}
