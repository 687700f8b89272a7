//! Stock-balance sync — the one full-replace table.
//!
//! The balance report is a complete snapshot of the current instant, so the
//! mirror is replaced wholesale: DELETE + batched INSERT inside one
//! transaction. Readers see the previous snapshot or the new one, nothing in
//! between. Store and product names are denormalised at write time (a JOIN
//! per read would dominate the hot min-stock queries).

use std::sync::Arc;
use std::time::Instant;

use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use std::collections::HashMap;
use tracing::{error, info};
use uuid::Uuid;

use upstream_clients::pos::PosClient;

use crate::db::pool::get_conn;
use crate::engine::SyncContext;
use crate::error::MirrorError;
use crate::mappers::{safe_decimal, safe_uuid};
use crate::ops_models::StockBalanceRow;
use crate::sync_log;
use crate::BATCH_SIZE;

const LABEL: &str = "StockBalance";

async fn load_name_maps(
    conn: &mut AsyncPgConnection,
) -> Result<(HashMap<Uuid, String>, HashMap<Uuid, String>), diesel::result::Error> {
    use crate::schema::pos_product::dsl as p;
    use crate::schema::pos_store::dsl as s;

    let stores: Vec<(Uuid, Option<String>)> = s::pos_store
        .filter(s::deleted.eq(false))
        .select((s::id, s::name))
        .load(conn)
        .await?;
    let products: Vec<(Uuid, Option<String>)> = p::pos_product
        .filter(p::deleted.eq(false))
        .select((p::id, p::name))
        .load(conn)
        .await?;

    let to_map = |rows: Vec<(Uuid, Option<String>)>| {
        rows.into_iter()
            .filter_map(|(id, name)| name.map(|n| (id, n)))
            .collect::<HashMap<_, _>>()
    };
    Ok((to_map(stores), to_map(products)))
}

/// Runs the full-replace sync. Returns the number of rows written.
pub async fn sync_stock_balances(
    ctx: &SyncContext,
    pos: &Arc<PosClient>,
    triggered_by: Option<&str>,
    timestamp: Option<String>,
) -> Result<usize, MirrorError> {
    let Some(_guard) = ctx.locks.try_acquire(LABEL) else {
        info!("stock balance sync already running, skipping");
        return Err(MirrorError::AlreadyRunning(LABEL.into()));
    };

    let started = ctx.clock.now();
    let t0 = Instant::now();
    // Full instant, not a bare date: midnight would exclude today's postings.
    let timestamp = timestamp.unwrap_or_else(|| ctx.clock.now_pos_timestamp());

    let mut conn = get_conn(&ctx.pool).await?;
    let run_id = sync_log::start_run(&mut conn, LABEL, started, triggered_by).await?;

    // The API call and the name-map load are independent.
    let (items, maps) = futures::join!(pos.fetch_stock_balances(&timestamp), async {
        let mut conn = get_conn(&ctx.pool).await?;
        load_name_maps(&mut conn)
            .await
            .map_err(MirrorError::from)
    });

    let (items, (store_names, product_names)) = match (items, maps) {
        (Ok(items), Ok(maps)) => (items, maps),
        (Err(e), _) => {
            record_error(ctx, run_id, &e.to_string()).await;
            return Err(e.into());
        }
        (_, Err(e)) => {
            record_error(ctx, run_id, &e.to_string()).await;
            return Err(e);
        }
    };

    let now = ctx.clock.now();
    let mut rows: Vec<StockBalanceRow> = Vec::with_capacity(items.len());
    let mut skipped = 0usize;
    let mut unnamed = 0usize;

    for item in &items {
        let amount = match safe_decimal(item.get("amount")) {
            Some(a) if !bigdecimal::Zero::is_zero(&a) => a,
            _ => {
                skipped += 1;
                continue;
            }
        };
        let (Some(store_id), Some(product_id)) =
            (safe_uuid(item.get("store")), safe_uuid(item.get("product")))
        else {
            skipped += 1;
            continue;
        };

        // Keep rows whose names are unknown — the UUID is enough, names catch
        // up on the next reference sync.
        let store_name = store_names.get(&store_id).cloned().unwrap_or_else(|| {
            unnamed += 1;
            format!("unknown:{store_id}")
        });
        let product_name = product_names.get(&product_id).cloned().unwrap_or_else(|| {
            unnamed += 1;
            format!("unknown:{product_id}")
        });

        rows.push(StockBalanceRow {
            store_id,
            store_name: Some(store_name),
            product_id,
            product_name: Some(product_name),
            amount,
            money: safe_decimal(item.get("sum")),
            synced_at: now,
            raw_json: Some(item.clone()),
        });
    }
    info!(
        kept = rows.len(),
        skipped,
        unnamed,
        "balance rows filtered (amount = 0 and invalid ids dropped)"
    );

    let clock = ctx.clock;
    let txn = conn
        .transaction::<usize, diesel::result::Error, _>(|conn| {
            async move {
                use crate::schema::stock_balance::dsl as sb;
                diesel::delete(sb::stock_balance).execute(conn).await?;
                let mut written = 0;
                for chunk in rows.chunks(BATCH_SIZE) {
                    written += diesel::insert_into(sb::stock_balance)
                        .values(chunk)
                        .execute(conn)
                        .await?;
                }
                sync_log::finish_success(conn, run_id, clock.now(), written as i32).await?;
                Ok(written)
            }
            .scope_boxed()
        })
        .await;

    match txn {
        Ok(written) => {
            info!(
                written,
                elapsed_ms = t0.elapsed().as_millis() as u64,
                "stock balances replaced"
            );
            Ok(written)
        }
        Err(err) => {
            error!("stock balance apply failed: {err}");
            record_error(ctx, run_id, &err.to_string()).await;
            Err(err.into())
        }
    }
}

async fn record_error(ctx: &SyncContext, run_id: i64, message: &str) {
    let finished = ctx.clock.now();
    if let Ok(mut conn) = get_conn(&ctx.pool).await {
        let _ = sync_log::finish_error(&mut conn, run_id, finished, message).await;
    }
}
