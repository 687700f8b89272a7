//! Nightly auto-transfer of negative consumable balances.
//!
//! Store names follow the `"TYPE (RESTAURANT)"` convention, which is how
//! restaurants are derived: each needs a source store (`Хоз. товары (X)`) and
//! at least one target (`Бар (X)`, `Кухня (X)`). One OLAP pull covers all
//! restaurants; for every target store with a negative consumable balance an
//! internal transfer source → target is emitted for the absolute quantity.
//! Adding a restaurant upstream needs no code change here.

use std::collections::HashMap;
use std::sync::Arc;

use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use mirror_sync::db::pool::get_conn;
use mirror_sync::mappers::safe_f64;
use mirror_sync::sync_log;
use upstream_clients::pos::documents::{InternalTransferDocument, TransferItem};

use crate::app::App;
use crate::notify::fan_out;

const LABEL: &str = "NegativeTransfer";

/// `"Бар (Центр)"` → `("Бар", "Центр")`.
pub fn parse_store_name(name: &str) -> Option<(String, String)> {
    let name = name.trim();
    let open = name.rfind('(')?;
    let close = name.rfind(')')?;
    if close < open {
        return None;
    }
    let prefix = name[..open].trim();
    let restaurant = name[open + 1..close].trim();
    if prefix.is_empty() || restaurant.is_empty() {
        return None;
    }
    Some((prefix.to_string(), restaurant.to_string()))
}

#[derive(Debug, Clone)]
pub struct RestaurantStores {
    pub source: (Uuid, String),
    pub targets: Vec<(Uuid, String)>,
}

/// Restaurants that have both the source store and at least one target.
pub fn build_restaurant_map(
    stores: &[(Uuid, String)],
    source_prefix: &str,
    target_prefixes: &[String],
) -> HashMap<String, RestaurantStores> {
    let mut by_restaurant: HashMap<String, (Option<(Uuid, String)>, Vec<(Uuid, String)>)> =
        HashMap::new();
    for (id, name) in stores {
        let Some((prefix, restaurant)) = parse_store_name(name) else {
            continue;
        };
        let entry = by_restaurant.entry(restaurant).or_default();
        if prefix == source_prefix {
            entry.0 = Some((*id, name.clone()));
        } else if target_prefixes.iter().any(|p| *p == prefix) {
            entry.1.push((*id, name.clone()));
        }
    }

    by_restaurant
        .into_iter()
        .filter_map(|(restaurant, (source, targets))| {
            let source = source?;
            if targets.is_empty() {
                return None;
            }
            Some((restaurant, RestaurantStores { source, targets }))
        })
        .collect()
}

/// Negative consumable positions per target store name, from OLAP rows.
/// A null amount means "skip", never "zero or more".
pub fn collect_negative_items(
    rows: &[Value],
    target_store_names: &[String],
    product_group: &str,
) -> HashMap<String, Vec<(String, f64)>> {
    let mut result: HashMap<String, Vec<(String, f64)>> = HashMap::new();
    for row in rows {
        let store_name = row
            .get("Account.Name")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        if !target_store_names.iter().any(|n| n == store_name) {
            continue;
        }
        let top_parent = row
            .get("Product.TopParent")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        if top_parent != product_group {
            continue;
        }
        let Some(amount) = safe_f64(row.get("FinalBalance.Amount")) else {
            continue; // null amount: unknown, not negative
        };
        if amount >= 0.0 {
            continue;
        }
        let Some(product_name) = row
            .get("Product.Name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|n| !n.is_empty())
        else {
            continue;
        };
        result
            .entry(store_name.to_string())
            .or_default()
            .push((product_name.to_string(), amount.abs()));
    }
    result
}

pub struct TransferReport {
    pub transfers: usize,
    pub skipped_products: Vec<String>,
}

/// The nightly job. Guarded by the shared sync lock so a manual trigger and
/// the scheduler never overlap.
pub async fn run_negative_transfer(
    app: &Arc<App>,
    triggered_by: &str,
) -> anyhow::Result<TransferReport> {
    let Some(_guard) = app.ctx.locks.try_acquire(LABEL) else {
        info!("negative transfer already running, skipping");
        return Ok(TransferReport {
            transfers: 0,
            skipped_products: Vec::new(),
        });
    };

    let started = app.ctx.clock.now();
    let source_prefix = &app.config.negative_transfer_source_prefix;
    let target_prefixes = &app.config.negative_transfer_target_prefixes;
    let product_group = &app.config.negative_transfer_product_group;

    let result = async {
        // 1. Stores → restaurant map.
        use mirror_sync::schema::pos_store::dsl as s;
        let mut conn = get_conn(&app.ctx.pool).await?;
        let stores: Vec<(Uuid, Option<String>)> = s::pos_store
            .filter(s::deleted.eq(false))
            .select((s::id, s::name))
            .load(&mut conn)
            .await?;
        let stores: Vec<(Uuid, String)> = stores
            .into_iter()
            .map(|(id, name)| (id, name.unwrap_or_default()))
            .collect();
        let restaurant_map = build_restaurant_map(&stores, source_prefix, target_prefixes);
        if restaurant_map.is_empty() {
            warn!("no restaurant has a source+target store pair, nothing to transfer");
            return Ok(TransferReport {
                transfers: 0,
                skipped_products: Vec::new(),
            });
        }

        // 2. One OLAP pull for everything.
        let today = app.ctx.clock.today_olap();
        let rows = app.pos.fetch_olap_transactions(&today, &today).await?;

        // 3. Negative consumables on any target store.
        let all_targets: Vec<String> = restaurant_map
            .values()
            .flat_map(|r| r.targets.iter().map(|(_, name)| name.clone()))
            .collect();
        let negative = collect_negative_items(&rows, &all_targets, product_group);
        if negative.is_empty() {
            info!("no negative consumable balances today");
            return Ok(TransferReport {
                transfers: 0,
                skipped_products: Vec::new(),
            });
        }

        // 4. Product UUIDs and units by name.
        let names: Vec<String> = negative
            .values()
            .flat_map(|items| items.iter().map(|(name, _)| name.clone()))
            .collect();
        use mirror_sync::schema::pos_product::dsl as p;
        let products: Vec<(Uuid, Option<String>, Option<Uuid>)> = p::pos_product
            .filter(p::deleted.eq(false))
            .filter(p::name.eq_any(&names))
            .select((p::id, p::name, p::main_unit))
            .load(&mut conn)
            .await?;
        let by_name: HashMap<String, (Uuid, Option<Uuid>)> = products
            .into_iter()
            .filter_map(|(id, name, unit)| name.map(|n| (n.trim().to_string(), (id, unit))))
            .collect();

        // 5. Emit transfers per restaurant/target.
        let mut transfers = 0usize;
        let mut skipped: Vec<String> = Vec::new();
        let date_incoming = app.ctx.clock.now_pos_timestamp();

        let mut restaurants: Vec<(&String, &RestaurantStores)> = restaurant_map.iter().collect();
        restaurants.sort_by(|a, b| a.0.cmp(b.0));

        for (restaurant, rest) in restaurants {
            for (target_id, target_name) in &rest.targets {
                let Some(items) = negative.get(target_name) else {
                    continue;
                };
                let transfer_items: Vec<TransferItem> = items
                    .iter()
                    .filter_map(|(name, amount)| match by_name.get(name.as_str()) {
                        Some((product_id, Some(unit))) => Some(TransferItem {
                            product_id: *product_id,
                            amount: (*amount * 1e6).round() / 1e6,
                            measure_unit_id: *unit,
                        }),
                        _ => {
                            skipped.push(name.clone());
                            None
                        }
                    })
                    .collect();
                if transfer_items.is_empty() {
                    continue;
                }

                let document = InternalTransferDocument {
                    date_incoming: date_incoming.clone(),
                    status: "PROCESSED".into(),
                    comment: format!(
                        "Авто-перемещение расх.мат. ({restaurant}) {}",
                        app.ctx.clock.now().format("%d.%m.%Y")
                    ),
                    store_from_id: rest.source.0,
                    store_to_id: *target_id,
                    items: transfer_items,
                };
                match app.pos.send_internal_transfer(&document).await {
                    Ok(()) => {
                        transfers += 1;
                        info!(restaurant, target = %target_name, "transfer sent");
                    }
                    Err(err) => {
                        warn!(restaurant, target = %target_name, "transfer failed: {err}");
                    }
                }
            }
        }

        skipped.sort();
        skipped.dedup();
        if !skipped.is_empty() {
            warn!(
                skipped = skipped.len(),
                "products absent from the mirror (or without a unit) were skipped"
            );
        }
        Ok::<_, anyhow::Error>(TransferReport {
            transfers,
            skipped_products: skipped,
        })
    }
    .await;

    // Audit row + admin aggregate, both best-effort.
    let finished = app.ctx.clock.now();
    let (status, records, error) = match &result {
        Ok(report) => ("success", report.transfers as i32, None),
        Err(err) => ("error", 0, Some(err.to_string())),
    };
    if let Ok(mut conn) = get_conn(&app.ctx.pool).await {
        let _ = sync_log::record_terminal(
            &mut conn,
            LABEL,
            started,
            finished,
            status,
            records,
            error.as_deref(),
            Some(triggered_by),
        )
        .await;
    }

    if let Ok(report) = &result {
        if report.transfers > 0 || !report.skipped_products.is_empty() {
            if let Ok(admins) = app.permissions.admin_ids(&app.ctx.pool).await {
                let mut text = format!(
                    "🌙 Авто-перемещение расх.мат.: {} перемещений",
                    report.transfers
                );
                if !report.skipped_products.is_empty() {
                    text.push_str(&format!(
                        "\n⚠️ Пропущено товаров: {}",
                        report.skipped_products.len()
                    ));
                }
                fan_out(&app.transport, &admins, &text).await;
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn store_name_parsing() {
        assert_eq!(
            parse_store_name("Бар (Центр)"),
            Some(("Бар".to_string(), "Центр".to_string()))
        );
        assert_eq!(
            parse_store_name("Хоз. товары (На горе)"),
            Some(("Хоз. товары".to_string(), "На горе".to_string()))
        );
        assert_eq!(parse_store_name("Главный склад"), None);
        assert_eq!(parse_store_name("(Центр)"), None);
    }

    #[test]
    fn restaurant_map_requires_source_and_target() {
        let stores = vec![
            (Uuid::new_v4(), "Хоз. товары (Центр)".to_string()),
            (Uuid::new_v4(), "Бар (Центр)".to_string()),
            (Uuid::new_v4(), "Кухня (Центр)".to_string()),
            // A restaurant without the source store is excluded entirely.
            (Uuid::new_v4(), "Бар (Юг)".to_string()),
        ];
        let map = build_restaurant_map(
            &stores,
            "Хоз. товары",
            &["Бар".to_string(), "Кухня".to_string()],
        );
        assert_eq!(map.len(), 1);
        assert_eq!(map["Центр"].targets.len(), 2);
    }

    #[test]
    fn negative_collection_skips_null_amounts_and_wrong_group() {
        let rows = vec![
            json!({"Account.Name": "Бар (Центр)", "Product.TopParent": "Расходные материалы",
                   "Product.Name": "Трубочки", "FinalBalance.Amount": -3.0}),
            json!({"Account.Name": "Бар (Центр)", "Product.TopParent": "Расходные материалы",
                   "Product.Name": "Салфетки", "FinalBalance.Amount": null}),
            json!({"Account.Name": "Бар (Центр)", "Product.TopParent": "Продукты",
                   "Product.Name": "Молоко", "FinalBalance.Amount": -5.0}),
            json!({"Account.Name": "Бар (Центр)", "Product.TopParent": "Расходные материалы",
                   "Product.Name": "Стаканы", "FinalBalance.Amount": 2.0}),
        ];
        let negative = collect_negative_items(
            &rows,
            &["Бар (Центр)".to_string()],
            "Расходные материалы",
        );
        assert_eq!(negative.len(), 1);
        let items = &negative["Бар (Центр)"];
        assert_eq!(items.len(), 1);
        assert_eq!(items[0], ("Трубочки".to_string(), 3.0));
    }
}
