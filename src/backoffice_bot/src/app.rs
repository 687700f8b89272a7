//! Application state and wiring.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use uuid::Uuid;

use mirror_sync::cache::{IdSet, SharedCache, TtlCache, TTL_LISTS, TTL_UNITS};
use mirror_sync::db::pool::build_pool;
use mirror_sync::engine::SyncContext;
use mirror_sync::locks::SyncLocks;
use mirror_sync::tz::LocalClock;
use upstream_clients::cloud::CloudClient;
use upstream_clients::finance::{FinanceClient, FinanceConfig};
use upstream_clients::pos::{PosClient, PosConfig};

use crate::chat::fsm::{FsmStorage, MemoryStorage, SharedStorage};
use crate::chat::middleware::{Decision, Gatekeeper};
use crate::chat::router::{Handler, Router};
use crate::chat::{ChatTransport, Update};
use crate::config::Config;
use crate::ocr::InvoiceExtractor;
use crate::permissions::{callback_rule, text_permission, CallbackRule, PermissionService};
use crate::sheets::SheetTransport;
use crate::user_context::UserContextCache;
use crate::webhook::WebhookState;
use crate::workflows;

/// TTL caches for the hot list lookups (tier two of three).
pub struct ListCaches {
    pub stores_by_department: TtlCache<Uuid, Vec<(Uuid, String)>>,
    /// Keyed by store segment (`bar` / `kitchen` / `all`).
    pub writeoff_accounts: TtlCache<String, Vec<(Uuid, String)>>,
    pub measure_units: TtlCache<(), HashMap<Uuid, String>>,
    pub products: TtlCache<(), Vec<(Uuid, String)>>,
}

impl ListCaches {
    pub fn new() -> Self {
        Self {
            stores_by_department: TtlCache::new(),
            writeoff_accounts: TtlCache::new(),
            measure_units: TtlCache::new(),
            products: TtlCache::new(),
        }
    }

    pub fn lists_ttl() -> std::time::Duration {
        TTL_LISTS
    }

    pub fn units_ttl() -> std::time::Duration {
        TTL_UNITS
    }
}

impl Default for ListCaches {
    fn default() -> Self {
        Self::new()
    }
}

pub struct App {
    pub ctx: SyncContext,
    pub pos: Arc<PosClient>,
    pub finance: Arc<FinanceClient>,
    pub cloud: Arc<CloudClient>,
    pub transport: Arc<dyn ChatTransport>,
    pub storage: Arc<dyn FsmStorage>,
    pub sheets: Arc<dyn SheetTransport>,
    pub extractor: Arc<dyn InvoiceExtractor>,
    pub permissions: PermissionService,
    pub user_ctx: UserContextCache,
    pub caches: ListCaches,
    pub admin_set: IdSet,
    pub webhook_state: WebhookState,
    pub config: Config,
}

impl App {
    /// Builds the full application graph. `transport`, `sheets` and
    /// `extractor` are injected so deployments (and tests) pick their own
    /// adapters.
    pub fn build(
        config: Config,
        transport: Arc<dyn ChatTransport>,
        sheets: Arc<dyn SheetTransport>,
        extractor: Arc<dyn InvoiceExtractor>,
    ) -> anyhow::Result<Arc<Self>> {
        let clock = LocalClock::new(&config.project_tz)?;
        let pool = build_pool(config.database_url.expose_secret())?;
        let ctx = SyncContext {
            pool,
            locks: Arc::new(SyncLocks::new()),
            clock,
        };

        let pos = Arc::new(PosClient::new(PosConfig {
            base_url: config.pos_base_url.clone(),
            login: config.pos_login.clone(),
            password_sha1: config.pos_password_sha1.clone(),
        })?);
        let finance = Arc::new(FinanceClient::new(FinanceConfig {
            base_url: config.finance_base_url.clone(),
            token: config.finance_token.clone(),
        })?);
        let cloud = Arc::new(CloudClient::new(&config.cloud_base_url)?);

        let shared_cache = |prefix: &str| match &config.redis_url {
            Some(url) => SharedCache::redis(url, prefix),
            None => Ok(SharedCache::in_memory()),
        };

        let storage: Arc<dyn FsmStorage> = match &config.redis_url {
            Some(url) => Arc::new(SharedStorage::new(SharedCache::redis(url, "backoffice")?)),
            None => Arc::new(MemoryStorage::new()),
        };

        let permissions = PermissionService::new(
            Arc::clone(&sheets),
            shared_cache("perm")?,
            config.legacy_admin_tables,
        );
        let user_ctx = UserContextCache::new(shared_cache("ctx")?);
        let webhook_state = WebhookState::new(&config);

        Ok(Arc::new(Self {
            ctx,
            pos,
            finance,
            cloud,
            transport,
            storage,
            sheets,
            extractor,
            permissions,
            user_ctx,
            caches: ListCaches::new(),
            admin_set: IdSet::new(),
            webhook_state,
            config,
        }))
    }

    pub async fn is_admin(&self, chat_id: i64) -> bool {
        if self.admin_set.contains(chat_id) {
            return true;
        }
        self.permissions.is_admin(&self.ctx.pool, chat_id).await
    }

    /// Refreshes the warm admin snapshot; called after permission export and
    /// on a timer by the scheduler chain.
    pub async fn refresh_admin_set(&self) {
        if let Ok(ids) = self.permissions.admin_ids(&self.ctx.pool).await {
            self.admin_set.replace(ids);
        }
    }

    /// Fire-and-forget cache warm-up when a user enters a document-authoring
    /// section: stores for their department, write-off accounts, admin set.
    pub fn prewarm(self: &Arc<Self>, department_id: Option<Uuid>) {
        let app = Arc::clone(self);
        tokio::spawn(async move {
            if let Some(dept) = department_id {
                let _ = workflows::writeoff::stores_for_department(&app, dept).await;
            }
            let _ = workflows::writeoff::writeoff_accounts(&app, "all").await;
            app.refresh_admin_set().await;
        });
    }
}

pub const MAIN_MENU_BUTTONS: [&str; 7] = [
    "📝 Создать списание",
    "🛒 Заявка на продукты",
    "📦 Накладные",
    "📋 Мин. остатки",
    "🔄 Синхронизация",
    "📊 Отчёты",
    "🏠 Главное меню",
];

pub fn main_menu_rows() -> Vec<Vec<String>> {
    vec![
        vec!["📝 Создать списание".into(), "🛒 Заявка на продукты".into()],
        vec!["📦 Накладные".into(), "📋 Мин. остатки".into()],
        vec!["🔄 Синхронизация".into(), "📊 Отчёты".into()],
        vec!["🏠 Главное меню".into()],
    ]
}

#[async_trait]
impl Gatekeeper for App {
    async fn allow_text(&self, user_id: i64, text: &str) -> Decision {
        let Some(perm) = text_permission(text) else {
            return Decision::Allow;
        };
        if self.is_admin(user_id).await || self.permissions.has_permission(user_id, perm).await {
            Decision::Allow
        } else {
            Decision::Deny("⛔ Нет доступа".into())
        }
    }

    async fn allow_callback(&self, user_id: i64, data: &str) -> Decision {
        let Some(rule) = callback_rule(data) else {
            return Decision::Allow;
        };
        let allowed = match rule {
            CallbackRule::AdminOnly => self.is_admin(user_id).await,
            CallbackRule::ReceiverOrAdmin => {
                self.is_admin(user_id).await
                    || self.permissions.is_receiver(&self.ctx.pool, user_id).await
            }
            CallbackRule::Perm(perm) => {
                self.is_admin(user_id).await
                    || self.permissions.has_permission(user_id, perm).await
            }
        };
        if allowed {
            Decision::Allow
        } else {
            Decision::Deny("⛔ Нет доступа".into())
        }
    }
}

macro_rules! handler {
    ($f:path) => {{
        let h: Handler<App> = Arc::new(|app: Arc<App>, update: Update| Box::pin($f(app, update)));
        h
    }};
}

/// Registers every command, button, callback prefix and FSM state.
pub fn build_router(app: &Arc<App>) -> Router<App> {
    let gate: Arc<dyn Gatekeeper> = Arc::clone(app) as Arc<dyn Gatekeeper>;
    let mut router = Router::new(Arc::clone(&app.transport), Arc::clone(&app.storage), gate);

    router.navigation(&MAIN_MENU_BUTTONS);

    // global commands
    router.command("start", handler!(workflows::auth::on_start));
    router.command("cancel", handler!(workflows::auth::on_cancel));

    // authorisation
    router.state("auth:last_name", handler!(workflows::auth::on_last_name));
    router.callback("auth_pick:", "nav", handler!(workflows::auth::on_pick_employee));
    router.callback("auth_dept:", "nav", handler!(workflows::auth::on_pick_department));
    router.button("🏠 Главное меню", "nav", handler!(workflows::auth::on_main_menu));

    // write-off authoring
    router.button(
        "📝 Создать списание",
        "nav",
        handler!(workflows::writeoff::on_start_writeoff),
    );
    router.callback("wo_store:", "nav", handler!(workflows::writeoff::on_pick_store));
    router.callback("wo_account:", "nav", handler!(workflows::writeoff::on_pick_account));
    router.callback("wo_accpage:", "nav", handler!(workflows::writeoff::on_account_page));
    router.state("wo:reason", handler!(workflows::writeoff::on_reason));
    router.state("wo:item", handler!(workflows::writeoff::on_item_search));
    router.callback("wo_item:", "search_item", handler!(workflows::writeoff::on_pick_item));
    router.state("wo:qty", handler!(workflows::writeoff::on_quantity));
    router.callback(
        "wo_send:",
        "writeoff_send",
        handler!(workflows::writeoff::on_send_for_review),
    );

    // write-off review (admin)
    router.callback(
        "woa_approve:",
        "admin_approve",
        handler!(workflows::writeoff_review::on_approve),
    );
    router.callback(
        "woa_reject:",
        "admin_reject",
        handler!(workflows::writeoff_review::on_reject),
    );
    router.callback(
        "woa_edit:",
        "admin_edit",
        handler!(workflows::writeoff_review::on_edit),
    );
    router.callback(
        "woa_item:",
        "admin_edit",
        handler!(workflows::writeoff_review::on_edit_pick_item),
    );
    router.state("woa:qty", handler!(workflows::writeoff_review::on_edit_quantity));
    router.callback(
        "woa_done:",
        "admin_edit",
        handler!(workflows::writeoff_review::on_edit_done),
    );

    // outgoing invoices and templates
    router.button("📦 Накладные", "nav", handler!(workflows::invoice::on_start_invoice));
    router.callback("inv_store:", "nav", handler!(workflows::invoice::on_pick_store));
    router.state("inv:supplier", handler!(workflows::invoice::on_supplier_search));
    router.callback("inv_supplier:", "search_supplier", handler!(workflows::invoice::on_pick_supplier));
    router.state("inv:item", handler!(workflows::invoice::on_item_search));
    router.callback("inv_item:", "search_item", handler!(workflows::invoice::on_pick_item));
    router.state("inv:qty", handler!(workflows::invoice::on_quantity));
    router.callback("inv_send:", "writeoff_send", handler!(workflows::invoice::on_send));
    router.callback("inv_tpl_save:", "nav", handler!(workflows::invoice::on_template_save));
    router.state("inv:tpl_name", handler!(workflows::invoice::on_template_name));
    router.callback("inv_tpl:", "nav", handler!(workflows::invoice::on_template_use));

    // product requests
    router.button(
        "🛒 Заявка на продукты",
        "nav",
        handler!(workflows::requests::on_start_request),
    );
    router.state("req:item", handler!(workflows::requests::on_item_search));
    router.callback("req_item:", "search_item", handler!(workflows::requests::on_pick_item));
    router.state("req:qty", handler!(workflows::requests::on_quantity));
    router.callback("req_send:", "writeoff_send", handler!(workflows::requests::on_send));
    router.callback("req_approve:", "admin_approve", handler!(workflows::requests::on_approve));
    router.callback("req_edit:", "admin_edit", handler!(workflows::requests::on_edit));
    router.state("req_edit:qty", handler!(workflows::requests::on_edit_quantity));
    router.callback("req_cancel:", "admin_reject", handler!(workflows::requests::on_cancel));

    // min stock
    router.button("📋 Мин. остатки", "nav", handler!(workflows::min_stock::on_menu));
    router.callback("minstock_sync:", "sync_minstock", handler!(workflows::min_stock::on_sync));
    router.callback("minstock_check:", "sync_minstock", handler!(workflows::min_stock::on_check));

    // sync & reports
    router.button("🔄 Синхронизация", "nav", handler!(workflows::sync_ops::on_sync_menu));
    router.callback("sync:", "sync_run", handler!(workflows::sync_ops::on_sync_run));
    router.button("📊 Отчёты", "nav", handler!(workflows::stoplist::on_reports_menu));
    router.callback(
        "report_stoplist:",
        "admin_report",
        handler!(workflows::stoplist::on_stoplist_report),
    );
    router.callback(
        "perm_export:",
        "admin_export",
        handler!(workflows::sync_ops::on_perm_export),
    );

    // incoming-invoice OCR
    router.photos(handler!(workflows::ocr_invoice::on_photo));
    router.callback("ocr_store:", "nav", handler!(workflows::ocr_invoice::on_pick_store));

    router
}
