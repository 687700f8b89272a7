//! The reconcile engine.
//!
//! One template fits every reference set:
//!
//! 1. try-acquire the entity lock (busy → `AlreadyRunning`, nothing queues);
//! 2. insert the `running` audit row;
//! 3. fetch raw records from the upstream (timed);
//! 4. in ONE transaction: map → batched upsert → mirror-delete → terminal
//!    audit update. Readers observe either the previous snapshot or the new
//!    one, never a half-applied state;
//! 5. on error: the transaction rolls back and a second short transaction
//!    records the `error` row. The lock always releases.
//!
//! Entities differ only in their [`Reconcile`] implementation. The fan-outs
//! at the bottom run the POS set (8), the finance set (13) and the 16
//! `root_type` slices of the shared entity table — the latter in a single
//! commit, because the slices target one physical table.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection};
use futures::future::join_all;
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use upstream_clients::errors::UpstreamError;
use upstream_clients::finance::FinanceClient;
use upstream_clients::pos::{PosClient, ENTITY_ROOT_TYPES};

use crate::db::pool::get_conn;
use crate::db::DbPool;
use crate::error::MirrorError;
use crate::locks::SyncLocks;
use crate::mappers;
use crate::mirror_delete::{mirror_delete, MirrorKeys, MirrorScope};
use crate::sync_log;
use crate::tz::LocalClock;
use crate::upsert;

/// Shared handles every sync entry point needs.
#[derive(Clone)]
pub struct SyncContext {
    pub pool: DbPool,
    pub locks: Arc<SyncLocks>,
    pub clock: LocalClock,
}

/// What one apply step did.
#[derive(Debug, Default, Clone, Copy)]
pub struct Applied {
    pub upserted: usize,
    pub deleted: usize,
    /// Raw records dropped by the mapper (bad id etc.).
    pub skipped: usize,
}

#[derive(Debug)]
pub enum SyncOutcome {
    /// Another run holds this entity's lock.
    AlreadyRunning,
    Completed(Applied),
}

/// One reconcilable entity: how to fetch it and how to apply it.
#[async_trait]
pub trait Reconcile: Send + Sync {
    fn label(&self) -> &str;
    async fn fetch(&self) -> Result<Vec<Value>, UpstreamError>;
    async fn apply(
        &self,
        conn: &mut AsyncPgConnection,
        raws: &[Value],
        now: NaiveDateTime,
    ) -> Result<Applied, diesel::result::Error>;
}

/// Runs one reconcile through the template.
pub async fn run_reconcile(
    ctx: &SyncContext,
    job: &dyn Reconcile,
    triggered_by: Option<&str>,
) -> Result<SyncOutcome, MirrorError> {
    let label = job.label().to_string();
    let Some(_guard) = ctx.locks.try_acquire(&label) else {
        info!(%label, "sync already running, skipping");
        return Ok(SyncOutcome::AlreadyRunning);
    };

    let started = ctx.clock.now();
    let t0 = Instant::now();

    let mut conn = get_conn(&ctx.pool).await?;
    let run_id = sync_log::start_run(&mut conn, &label, started, triggered_by).await?;

    let raws = match job.fetch().await {
        Ok(raws) => raws,
        Err(err) => {
            error!(%label, "fetch failed: {err}");
            record_error(ctx, run_id, &err.to_string()).await;
            return Err(err.into());
        }
    };
    info!(
        %label,
        records = raws.len(),
        elapsed_ms = t0.elapsed().as_millis() as u64,
        "upstream fetch done"
    );

    let now = ctx.clock.now();
    let clock = ctx.clock;
    let txn = conn
        .transaction::<Applied, diesel::result::Error, _>(|conn| {
            async move {
                let applied = job.apply(conn, &raws, now).await?;
                sync_log::finish_success(conn, run_id, clock.now(), applied.upserted as i32)
                    .await?;
                Ok(applied)
            }
            .scope_boxed()
        })
        .await;

    match txn {
        Ok(applied) => {
            info!(
                %label,
                upserted = applied.upserted,
                deleted = applied.deleted,
                skipped = applied.skipped,
                elapsed_ms = t0.elapsed().as_millis() as u64,
                "sync finished"
            );
            Ok(SyncOutcome::Completed(applied))
        }
        Err(err) => {
            error!(%label, "apply failed: {err}");
            record_error(ctx, run_id, &err.to_string()).await;
            Err(err.into())
        }
    }
}

/// Best-effort terminal `error` row in its own short transaction. Failure to
/// record the failure is logged and swallowed — the original error wins.
async fn record_error(ctx: &SyncContext, run_id: i64, message: &str) {
    let finished = ctx.clock.now();
    match get_conn(&ctx.pool).await {
        Ok(mut conn) => {
            if let Err(e) = sync_log::finish_error(&mut conn, run_id, finished, message).await {
                error!("could not record sync error in audit log: {e}");
            }
        }
        Err(e) => error!("could not get connection for error audit row: {e}"),
    }
}

// ── POS reconcilers ──

/// Which POS reference set a [`PosSync`] instance mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PosResource {
    Suppliers,
    Departments,
    Stores,
    Groups,
    ProductGroups,
    Products,
    Employees,
    EmployeeRoles,
}

pub struct PosSync {
    pub client: Arc<PosClient>,
    pub resource: PosResource,
}

#[async_trait]
impl Reconcile for PosSync {
    fn label(&self) -> &str {
        match self.resource {
            PosResource::Suppliers => "Supplier",
            PosResource::Departments => "Department",
            PosResource::Stores => "Store",
            PosResource::Groups => "Group",
            PosResource::ProductGroups => "ProductGroup",
            PosResource::Products => "Product",
            PosResource::Employees => "Employee",
            PosResource::EmployeeRoles => "EmployeeRole",
        }
    }

    async fn fetch(&self) -> Result<Vec<Value>, UpstreamError> {
        match self.resource {
            PosResource::Suppliers => self.client.fetch_suppliers().await,
            PosResource::Departments => self.client.fetch_departments().await,
            PosResource::Stores => self.client.fetch_stores().await,
            PosResource::Groups => self.client.fetch_groups().await,
            PosResource::ProductGroups => self.client.fetch_product_groups().await,
            PosResource::Products => self.client.fetch_products(true).await,
            // Soft-deleted employees stay out; mirror-delete prunes them.
            PosResource::Employees => self.client.fetch_employees(false).await,
            PosResource::EmployeeRoles => self.client.fetch_employee_roles().await,
        }
    }

    async fn apply(
        &self,
        conn: &mut AsyncPgConnection,
        raws: &[Value],
        now: NaiveDateTime,
    ) -> Result<Applied, diesel::result::Error> {
        macro_rules! mirror {
            ($mapper:path, $upsert:path, $table:literal) => {{
                let rows: Vec<_> = raws.iter().filter_map(|r| $mapper(r, now)).collect();
                let skipped = raws.len() - rows.len();
                if skipped > 0 {
                    warn!(label = self.label(), skipped, "records dropped by mapper");
                }
                let upserted = $upsert(conn, &rows).await?;
                let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
                let deleted = mirror_delete(
                    conn,
                    self.label(),
                    $table,
                    "id",
                    MirrorKeys::Uuid(&ids),
                    None,
                )
                .await?;
                Applied {
                    upserted,
                    deleted,
                    skipped,
                }
            }};
        }

        Ok(match self.resource {
            PosResource::Suppliers => {
                mirror!(mappers::map_supplier, upsert::upsert_suppliers, "pos_supplier")
            }
            PosResource::Departments => mirror!(
                mappers::map_department,
                upsert::upsert_departments,
                "pos_department"
            ),
            PosResource::Stores => {
                mirror!(mappers::map_store, upsert::upsert_stores, "pos_store")
            }
            PosResource::Groups => {
                mirror!(mappers::map_group, upsert::upsert_groups, "pos_group")
            }
            PosResource::ProductGroups => mirror!(
                mappers::map_product_group,
                upsert::upsert_product_groups,
                "pos_product_group"
            ),
            PosResource::Products => {
                mirror!(mappers::map_product, upsert::upsert_products, "pos_product")
            }
            PosResource::Employees => {
                mirror!(mappers::map_employee, upsert::upsert_employees, "pos_employee")
            }
            PosResource::EmployeeRoles => mirror!(
                mappers::map_employee_role,
                upsert::upsert_employee_roles,
                "pos_employee_role"
            ),
        })
    }
}

// ── finance reconcilers ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinResource {
    Categories,
    Moneybags,
    MoneybagGroups,
    Partners,
    Directions,
    Goods,
    Obtainings,
    Jobs,
    Deals,
    ObligationStatuses,
    Obligations,
    PnlCategories,
    Employees,
}

pub const ALL_FIN_RESOURCES: [FinResource; 13] = [
    FinResource::Categories,
    FinResource::Moneybags,
    FinResource::MoneybagGroups,
    FinResource::Partners,
    FinResource::Directions,
    FinResource::Goods,
    FinResource::Obtainings,
    FinResource::Jobs,
    FinResource::Deals,
    FinResource::ObligationStatuses,
    FinResource::Obligations,
    FinResource::PnlCategories,
    FinResource::Employees,
];

pub struct FinanceSync {
    pub client: Arc<FinanceClient>,
    pub resource: FinResource,
}

#[async_trait]
impl Reconcile for FinanceSync {
    fn label(&self) -> &str {
        match self.resource {
            FinResource::Categories => "FinCategory",
            FinResource::Moneybags => "FinMoneybag",
            FinResource::MoneybagGroups => "FinMoneybagGroup",
            FinResource::Partners => "FinPartner",
            FinResource::Directions => "FinDirection",
            FinResource::Goods => "FinGoods",
            FinResource::Obtainings => "FinObtaining",
            FinResource::Jobs => "FinJob",
            FinResource::Deals => "FinDeal",
            FinResource::ObligationStatuses => "FinObligationStatus",
            FinResource::Obligations => "FinObligation",
            FinResource::PnlCategories => "FinPnlCategory",
            FinResource::Employees => "FinEmployee",
        }
    }

    async fn fetch(&self) -> Result<Vec<Value>, UpstreamError> {
        match self.resource {
            FinResource::Categories => self.client.fetch_categories().await,
            FinResource::Moneybags => self.client.fetch_moneybags().await,
            FinResource::MoneybagGroups => self.client.fetch_moneybag_groups().await,
            FinResource::Partners => self.client.fetch_partners().await,
            FinResource::Directions => self.client.fetch_directions().await,
            FinResource::Goods => self.client.fetch_goods().await,
            FinResource::Obtainings => self.client.fetch_obtainings().await,
            FinResource::Jobs => self.client.fetch_jobs().await,
            FinResource::Deals => self.client.fetch_deals().await,
            FinResource::ObligationStatuses => self.client.fetch_obligation_statuses().await,
            FinResource::Obligations => self.client.fetch_obligations().await,
            FinResource::PnlCategories => self.client.fetch_pnl_categories().await,
            FinResource::Employees => self.client.fetch_employees().await,
        }
    }

    async fn apply(
        &self,
        conn: &mut AsyncPgConnection,
        raws: &[Value],
        now: NaiveDateTime,
    ) -> Result<Applied, diesel::result::Error> {
        macro_rules! mirror {
            ($mapper:path, $upsert:path, $table:literal) => {{
                let rows: Vec<_> = raws.iter().filter_map(|r| $mapper(r, now)).collect();
                let skipped = raws.len() - rows.len();
                let upserted = $upsert(conn, &rows).await?;
                let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
                let deleted = mirror_delete(
                    conn,
                    self.label(),
                    $table,
                    "id",
                    MirrorKeys::BigInt(&ids),
                    None,
                )
                .await?;
                Applied {
                    upserted,
                    deleted,
                    skipped,
                }
            }};
        }

        Ok(match self.resource {
            FinResource::Categories => mirror!(
                mappers::map_fin_category,
                upsert::upsert_fin_categories,
                "fin_category"
            ),
            FinResource::Moneybags => mirror!(
                mappers::map_fin_moneybag,
                upsert::upsert_fin_moneybags,
                "fin_moneybag"
            ),
            FinResource::MoneybagGroups => mirror!(
                mappers::map_fin_moneybag_group,
                upsert::upsert_fin_moneybag_groups,
                "fin_moneybag_group"
            ),
            FinResource::Partners => mirror!(
                mappers::map_fin_partner,
                upsert::upsert_fin_partners,
                "fin_partner"
            ),
            FinResource::Directions => mirror!(
                mappers::map_fin_direction,
                upsert::upsert_fin_directions,
                "fin_direction"
            ),
            FinResource::Goods => {
                mirror!(mappers::map_fin_goods, upsert::upsert_fin_goods, "fin_goods")
            }
            FinResource::Obtainings => mirror!(
                mappers::map_fin_obtaining,
                upsert::upsert_fin_obtainings,
                "fin_obtaining"
            ),
            FinResource::Jobs => {
                mirror!(mappers::map_fin_job, upsert::upsert_fin_jobs, "fin_job")
            }
            FinResource::Deals => {
                mirror!(mappers::map_fin_deal, upsert::upsert_fin_deals, "fin_deal")
            }
            FinResource::ObligationStatuses => mirror!(
                mappers::map_fin_obligation_status,
                upsert::upsert_fin_obligation_statuses,
                "fin_obligation_status"
            ),
            FinResource::Obligations => mirror!(
                mappers::map_fin_obligation,
                upsert::upsert_fin_obligations,
                "fin_obligation"
            ),
            FinResource::PnlCategories => mirror!(
                mappers::map_fin_pnl_category,
                upsert::upsert_fin_pnl_categories,
                "fin_pnl_category"
            ),
            FinResource::Employees => mirror!(
                mappers::map_fin_employee,
                upsert::upsert_fin_employees,
                "fin_employee"
            ),
        })
    }
}

// ── fan-outs ──

/// Per-entity result of a fan-out; errors do not abort the batch.
pub struct FanoutResult {
    pub label: String,
    pub result: Result<SyncOutcome, MirrorError>,
}

/// Runs the 8 POS reference reconcilers concurrently.
pub async fn sync_all_pos(
    ctx: &SyncContext,
    client: &Arc<PosClient>,
    triggered_by: Option<&str>,
) -> Vec<FanoutResult> {
    let jobs: Vec<PosSync> = [
        PosResource::Departments,
        PosResource::Stores,
        PosResource::Groups,
        PosResource::ProductGroups,
        PosResource::Products,
        PosResource::Suppliers,
        PosResource::Employees,
        PosResource::EmployeeRoles,
    ]
    .into_iter()
    .map(|resource| PosSync {
        client: Arc::clone(client),
        resource,
    })
    .collect();

    join_all(jobs.iter().map(|job| async move {
        FanoutResult {
            label: job.label().to_string(),
            result: run_reconcile(ctx, job, triggered_by).await,
        }
    }))
    .await
}

/// Runs the 13 finance reconcilers concurrently; the client's semaphore
/// keeps actual upstream concurrency at 4.
pub async fn sync_all_finance(
    ctx: &SyncContext,
    client: &Arc<FinanceClient>,
    triggered_by: Option<&str>,
) -> Vec<FanoutResult> {
    let jobs: Vec<FinanceSync> = ALL_FIN_RESOURCES
        .into_iter()
        .map(|resource| FinanceSync {
            client: Arc::clone(client),
            resource,
        })
        .collect();

    join_all(jobs.iter().map(|job| async move {
        FanoutResult {
            label: job.label().to_string(),
            result: run_reconcile(ctx, job, triggered_by).await,
        }
    }))
    .await
}

/// Per-slice outcome of [`sync_all_entities`].
pub struct EntitySliceOutcome {
    pub root_type: &'static str,
    pub result: Result<usize, String>,
}

/// Reconciles all 16 `root_type` slices of the shared entity table.
///
/// Fetches run concurrently; the apply is ONE transaction with one commit —
/// per-slice upserts and scope-narrowed mirror-deletes against a single
/// physical table, then one terminal audit row per slice.
pub async fn sync_all_entities(
    ctx: &SyncContext,
    client: &Arc<PosClient>,
    triggered_by: Option<&str>,
) -> Result<Vec<EntitySliceOutcome>, MirrorError> {
    let Some(_guard) = ctx.locks.try_acquire("entities_all") else {
        info!("entity sync already running, skipping");
        return Err(MirrorError::AlreadyRunning("entities_all".into()));
    };

    let started = ctx.clock.now();
    let t0 = Instant::now();

    let fetched: Vec<(_, Result<Vec<Value>, UpstreamError>)> =
        join_all(ENTITY_ROOT_TYPES.iter().map(|rt| async move {
            (*rt, client.fetch_entities(rt).await)
        }))
        .await;
    info!(
        elapsed_ms = t0.elapsed().as_millis() as u64,
        "all {} entity root types fetched",
        ENTITY_ROOT_TYPES.len()
    );

    let now = ctx.clock.now();
    let clock = ctx.clock;
    let triggered = triggered_by.map(str::to_string);

    let mut conn = get_conn(&ctx.pool).await?;
    let outcomes = conn
        .transaction::<Vec<EntitySliceOutcome>, diesel::result::Error, _>(|conn| {
            async move {
                let mut outcomes = Vec::with_capacity(fetched.len());
                for (root_type, result) in &fetched {
                    let root_type: &'static str = *root_type;
                    let outcome = match result {
                        Err(err) => Err(err.to_string()),
                        Ok(raws) => {
                            let rows: Vec<_> = raws
                                .iter()
                                .filter_map(|r| mappers::map_entity(root_type, r, now))
                                .collect();
                            upsert::upsert_entities(conn, &rows).await?;
                            let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
                            mirror_delete(
                                conn,
                                &format!("entity:{root_type}"),
                                "pos_entity",
                                "id",
                                MirrorKeys::Uuid(&ids),
                                Some(MirrorScope {
                                    column: "root_type",
                                    value: root_type,
                                }),
                            )
                            .await?;
                            Ok(rows.len())
                        }
                    };
                    let (status, records, error) = match &outcome {
                        Ok(n) => ("success", *n as i32, None),
                        Err(e) => ("error", 0, Some(e.as_str())),
                    };
                    sync_log::record_terminal(
                        conn,
                        root_type,
                        started,
                        clock.now(),
                        status,
                        records,
                        error,
                        triggered.as_deref(),
                    )
                    .await?;
                    outcomes.push(EntitySliceOutcome { root_type, result: outcome });
                }
                Ok(outcomes)
            }
            .scope_boxed()
        })
        .await?;

    let ok = outcomes.iter().filter(|o| o.result.is_ok()).count();
    info!(
        ok,
        failed = outcomes.len() - ok,
        elapsed_ms = t0.elapsed().as_millis() as u64,
        "entity slices reconciled in one commit"
    );
    Ok(outcomes)
}
