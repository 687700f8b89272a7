//! Permission and role resolution.
//!
//! Source of truth is a spreadsheet tab: one row per employee, one column per
//! capability token, `✅` grants. The matrix is cached for five minutes; when
//! the spreadsheet is unreachable the last good matrix is served stale — the
//! floor keeps working through a sheets outage.
//!
//! Role sets (admins, receivers) have a legacy second source: the `bot_admin`
//! and `request_receiver` tables. Which source wins is a deployment decision
//! (`LEGACY_ADMIN_TABLES`); both paths live behind [`PermissionService`] so
//! flipping the flag touches nothing else.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::Arc;

use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use tracing::{info, warn};

use mirror_sync::cache::{SharedCache, TTL_PERMISSIONS};
use mirror_sync::db::pool::get_conn;
use mirror_sync::db::DbPool;
use mirror_sync::error::MirrorError;

use crate::sheets::SheetTransport;

pub const PERMISSIONS_TAB: &str = "Права доступа";

// Capability tokens. Adding one here makes a new column appear on the next
// export; the sheet is then the only place grants are edited.
pub const PERM_ADMIN: &str = "admin";
pub const PERM_SYSADMIN: &str = "sysadmin";
pub const PERM_RECEIVER_KITCHEN: &str = "receiver_kitchen";
pub const PERM_RECEIVER_BAR: &str = "receiver_bar";
pub const PERM_RECEIVER_PASTRY: &str = "receiver_pastry";
pub const PERM_STOCK_ALERTS: &str = "stock_alerts";
pub const PERM_STOPLIST_ALERTS: &str = "stoplist_alerts";
pub const PERM_WRITEOFF_CREATE: &str = "writeoff_create";
pub const PERM_INVOICE_CREATE: &str = "invoice_create";
pub const PERM_REQUEST_CREATE: &str = "request_create";
pub const PERM_MINSTOCK_EDIT: &str = "minstock_edit";
pub const PERM_SYNC_RUN: &str = "sync_run";
pub const PERM_REPORTS_VIEW: &str = "reports_view";

pub const ALL_COLUMN_KEYS: [&str; 13] = [
    PERM_ADMIN,
    PERM_SYSADMIN,
    PERM_RECEIVER_KITCHEN,
    PERM_RECEIVER_BAR,
    PERM_RECEIVER_PASTRY,
    PERM_STOCK_ALERTS,
    PERM_STOPLIST_ALERTS,
    PERM_WRITEOFF_CREATE,
    PERM_INVOICE_CREATE,
    PERM_REQUEST_CREATE,
    PERM_MINSTOCK_EDIT,
    PERM_SYNC_RUN,
    PERM_REPORTS_VIEW,
];

/// Reply-button text → required capability. Buttons absent here are open.
pub fn text_permission(text: &str) -> Option<&'static str> {
    Some(match text {
        "📝 Создать списание" => PERM_WRITEOFF_CREATE,
        "📦 Накладные" => PERM_INVOICE_CREATE,
        "🛒 Заявка на продукты" => PERM_REQUEST_CREATE,
        "📋 Мин. остатки" => PERM_MINSTOCK_EDIT,
        "🔄 Синхронизация" => PERM_SYNC_RUN,
        "📊 Отчёты" => PERM_REPORTS_VIEW,
        _ => return None,
    })
}

/// What a callback prefix demands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackRule {
    Perm(&'static str),
    AdminOnly,
    ReceiverOrAdmin,
}

/// Callback-data prefix → rule. Prefixes absent here are open (their entry
/// points were themselves gated).
pub fn callback_rule(data: &str) -> Option<CallbackRule> {
    const RULES: [(&str, CallbackRule); 9] = [
        ("woa_approve:", CallbackRule::AdminOnly),
        ("woa_edit:", CallbackRule::AdminOnly),
        ("woa_reject:", CallbackRule::AdminOnly),
        ("req_approve:", CallbackRule::ReceiverOrAdmin),
        ("req_edit:", CallbackRule::ReceiverOrAdmin),
        ("req_cancel:", CallbackRule::ReceiverOrAdmin),
        ("sync:", CallbackRule::Perm(PERM_SYNC_RUN)),
        ("minstock_set:", CallbackRule::Perm(PERM_MINSTOCK_EDIT)),
        ("perm_export:", CallbackRule::AdminOnly),
    ];
    RULES
        .iter()
        .find(|(prefix, _)| data.starts_with(prefix))
        .map(|(_, rule)| *rule)
}

/// chat-id (as string) → capability → granted.
pub type Matrix = HashMap<String, HashMap<String, bool>>;

const CACHE_KEY: &str = "permissions_matrix";
const GRANT_MARK: &str = "✅";

fn parse_matrix(records: &[crate::sheets::Record]) -> Matrix {
    let mut matrix = Matrix::new();
    for record in records {
        let Some(chat_id) = record
            .get("chat_id")
            .map(String::as_str)
            .filter(|v| !v.is_empty())
        else {
            continue;
        };
        let perms = ALL_COLUMN_KEYS
            .iter()
            .map(|key| {
                let granted = record
                    .get(*key)
                    .is_some_and(|v| v.trim() == GRANT_MARK || v.trim() == "true");
                (key.to_string(), granted)
            })
            .collect();
        matrix.insert(chat_id.to_string(), perms);
    }
    matrix
}

pub struct PermissionService {
    sheets: Arc<dyn SheetTransport>,
    cache: SharedCache,
    /// Last good matrix, served when the sheet is unreachable.
    stale: Mutex<Option<Matrix>>,
    legacy_tables: bool,
}

impl PermissionService {
    pub fn new(sheets: Arc<dyn SheetTransport>, cache: SharedCache, legacy_tables: bool) -> Self {
        Self {
            sheets,
            cache,
            stale: Mutex::new(None),
            legacy_tables,
        }
    }

    pub async fn invalidate(&self) {
        self.cache.invalidate(CACHE_KEY).await;
    }

    async fn matrix(&self) -> Matrix {
        if let Some(matrix) = self.cache.get_json::<Matrix>(CACHE_KEY).await {
            return matrix;
        }
        match self.sheets.read_records(PERMISSIONS_TAB).await {
            Ok(records) => {
                let matrix = parse_matrix(&records);
                self.cache.set_json(CACHE_KEY, &matrix, TTL_PERMISSIONS).await;
                *self.stale.lock().expect("stale matrix poisoned") = Some(matrix.clone());
                info!(users = matrix.len(), "permission matrix refreshed");
                matrix
            }
            Err(err) => {
                warn!("permission sheet unreachable, serving stale matrix: {err}");
                self.stale
                    .lock()
                    .expect("stale matrix poisoned")
                    .clone()
                    .unwrap_or_default()
            }
        }
    }

    pub async fn has_permission(&self, chat_id: i64, perm: &str) -> bool {
        self.matrix()
            .await
            .get(&chat_id.to_string())
            .is_some_and(|perms| perms.get(perm).copied().unwrap_or(false))
    }

    pub async fn ids_with(&self, perm: &str) -> Vec<i64> {
        self.matrix()
            .await
            .iter()
            .filter(|(_, perms)| perms.get(perm).copied().unwrap_or(false))
            .filter_map(|(id, _)| id.parse().ok())
            .collect()
    }

    /// Admins: spreadsheet column, or the legacy table when the deployment
    /// still runs on it.
    pub async fn admin_ids(&self, pool: &DbPool) -> Result<Vec<i64>, MirrorError> {
        if self.legacy_tables {
            use mirror_sync::schema::bot_admin::dsl as a;
            let mut conn = get_conn(pool).await?;
            Ok(a::bot_admin.select(a::chat_id).load(&mut conn).await?)
        } else {
            Ok(self.ids_with(PERM_ADMIN).await)
        }
    }

    pub async fn is_admin(&self, pool: &DbPool, chat_id: i64) -> bool {
        match self.admin_ids(pool).await {
            Ok(ids) => ids.contains(&chat_id),
            Err(e) => {
                warn!("admin lookup failed, denying: {e}");
                false
            }
        }
    }

    /// Receivers of product requests, optionally narrowed to one section
    /// (`kitchen` / `bar` / `pastry`).
    pub async fn receiver_ids(
        &self,
        pool: &DbPool,
        section: Option<&str>,
    ) -> Result<Vec<i64>, MirrorError> {
        if self.legacy_tables {
            use mirror_sync::schema::request_receiver::dsl as r;
            let mut conn = get_conn(pool).await?;
            return match section {
                Some(section) => Ok(r::request_receiver
                    .filter(r::section.eq(section))
                    .select(r::chat_id)
                    .load(&mut conn)
                    .await?),
                None => Ok(r::request_receiver.select(r::chat_id).load(&mut conn).await?),
            };
        }

        let perm_keys: &[&str] = match section {
            Some("kitchen") => &[PERM_RECEIVER_KITCHEN],
            Some("bar") => &[PERM_RECEIVER_BAR],
            Some("pastry") => &[PERM_RECEIVER_PASTRY],
            _ => &[PERM_RECEIVER_KITCHEN, PERM_RECEIVER_BAR, PERM_RECEIVER_PASTRY],
        };
        let matrix = self.matrix().await;
        Ok(matrix
            .iter()
            .filter(|(_, perms)| {
                perm_keys
                    .iter()
                    .any(|k| perms.get(*k).copied().unwrap_or(false))
            })
            .filter_map(|(id, _)| id.parse().ok())
            .collect())
    }

    pub async fn is_receiver(&self, pool: &DbPool, chat_id: i64) -> bool {
        self.receiver_ids(pool, None)
            .await
            .map(|ids| ids.contains(&chat_id))
            .unwrap_or(false)
    }

    pub async fn stock_subscriber_ids(&self) -> Vec<i64> {
        self.ids_with(PERM_STOCK_ALERTS).await
    }

    pub async fn stoplist_subscriber_ids(&self) -> Vec<i64> {
        self.ids_with(PERM_STOPLIST_ALERTS).await
    }

    pub async fn sysadmin_ids(&self) -> Vec<i64> {
        self.ids_with(PERM_SYSADMIN).await
    }

    /// Exports authorised employees and the full column set back to the
    /// sheet. Merge-safe by construction: existing grants are carried over,
    /// missing employees are appended with empty grants, rows are never
    /// removed — an employee who quit keeps their row (and their ❌s).
    pub async fn export_to_sheet(&self, pool: &DbPool) -> Result<usize, MirrorError> {
        use mirror_sync::schema::pos_employee::dsl as e;

        let mut conn = get_conn(pool).await?;
        let employees: Vec<(Option<String>, Option<i64>)> = e::pos_employee
            .filter(e::chat_id.is_not_null())
            .select((e::name, e::chat_id))
            .order(e::name.asc())
            .load(&mut conn)
            .await?;

        let existing = self
            .sheets
            .read_records(PERMISSIONS_TAB)
            .await
            .unwrap_or_default();
        let by_chat_id: HashMap<&str, &crate::sheets::Record> = existing
            .iter()
            .filter_map(|r| r.get("chat_id").map(|id| (id.as_str(), r)))
            .collect();

        let mut headers: Vec<String> = vec!["employee_name".into(), "chat_id".into()];
        headers.extend(ALL_COLUMN_KEYS.iter().map(|k| k.to_string()));

        let mut rows: Vec<Vec<String>> = Vec::new();
        let mut seen: Vec<String> = Vec::new();
        for (name, chat_id) in &employees {
            let Some(chat_id) = chat_id else { continue };
            let chat_id = chat_id.to_string();
            let old = by_chat_id.get(chat_id.as_str());
            let mut row = vec![name.clone().unwrap_or_default(), chat_id.clone()];
            for key in ALL_COLUMN_KEYS {
                row.push(
                    old.and_then(|r| r.get(key))
                        .cloned()
                        .unwrap_or_default(),
                );
            }
            seen.push(chat_id);
            rows.push(row);
        }
        // Rows that exist in the sheet but not in the DB stay untouched.
        for record in &existing {
            if let Some(chat_id) = record.get("chat_id") {
                if !seen.contains(chat_id) {
                    let mut row = vec![
                        record.get("employee_name").cloned().unwrap_or_default(),
                        chat_id.clone(),
                    ];
                    for key in ALL_COLUMN_KEYS {
                        row.push(record.get(key).cloned().unwrap_or_default());
                    }
                    rows.push(row);
                }
            }
        }

        let count = rows.len();
        self.sheets
            .write_records(PERMISSIONS_TAB, &headers, &rows)
            .await
            .map_err(|e| MirrorError::Config(format!("permission export failed: {e}")))?;
        self.invalidate().await;
        info!(count, "permissions exported to sheet");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheets::mock::MockSheet;
    use crate::sheets::Record;

    fn record(chat_id: &str, grants: &[&str]) -> Record {
        let mut r = Record::new();
        r.insert("chat_id".into(), chat_id.into());
        r.insert("employee_name".into(), "Тест".into());
        for g in grants {
            r.insert(g.to_string(), GRANT_MARK.into());
        }
        r
    }

    fn service(sheet: Arc<MockSheet>) -> PermissionService {
        PermissionService::new(sheet, SharedCache::in_memory(), false)
    }

    #[tokio::test]
    async fn grants_parse_and_missing_user_has_nothing() {
        let sheet = Arc::new(MockSheet::new());
        sheet.seed(
            PERMISSIONS_TAB,
            vec![record("100", &[PERM_WRITEOFF_CREATE, PERM_ADMIN])],
        );
        let svc = service(sheet);

        assert!(svc.has_permission(100, PERM_WRITEOFF_CREATE).await);
        assert!(!svc.has_permission(100, PERM_SYNC_RUN).await);
        assert!(!svc.has_permission(999, PERM_WRITEOFF_CREATE).await);
        assert_eq!(svc.ids_with(PERM_ADMIN).await, vec![100]);
    }

    #[tokio::test]
    async fn sheet_outage_serves_stale_matrix() {
        let sheet = Arc::new(MockSheet::new());
        sheet.seed(PERMISSIONS_TAB, vec![record("100", &[PERM_SYNC_RUN])]);
        let svc = service(sheet.clone());

        // Warm the stale copy, then break the sheet and expire the cache.
        assert!(svc.has_permission(100, PERM_SYNC_RUN).await);
        sheet.set_fail_reads(true);
        svc.invalidate().await;

        assert!(
            svc.has_permission(100, PERM_SYNC_RUN).await,
            "stale matrix must keep serving grants through an outage"
        );
    }

    #[tokio::test]
    async fn receiver_sections_resolve_independently() {
        let sheet = Arc::new(MockSheet::new());
        sheet.seed(
            PERMISSIONS_TAB,
            vec![
                record("1", &[PERM_RECEIVER_KITCHEN]),
                record("2", &[PERM_RECEIVER_BAR]),
                record("3", &[]),
            ],
        );
        let svc = service(sheet);
        let matrix = svc.matrix().await;
        assert_eq!(matrix.len(), 3);

        let kitchen: Vec<i64> = matrix
            .iter()
            .filter(|(_, p)| p.get(PERM_RECEIVER_KITCHEN).copied().unwrap_or(false))
            .filter_map(|(id, _)| id.parse().ok())
            .collect();
        assert_eq!(kitchen, vec![1]);
    }

    #[test]
    fn callback_rules_match_prefixes() {
        assert_eq!(callback_rule("woa_approve:ab12"), Some(CallbackRule::AdminOnly));
        assert_eq!(
            callback_rule("req_approve:7"),
            Some(CallbackRule::ReceiverOrAdmin)
        );
        assert_eq!(
            callback_rule("sync:products"),
            Some(CallbackRule::Perm(PERM_SYNC_RUN))
        );
        assert_eq!(callback_rule("wo_store:x"), None);
    }
}
