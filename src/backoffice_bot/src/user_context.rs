//! Per-user context: who this chat id is, which restaurant they chose, what
//! their job title is.
//!
//! Lifetime-of-session cache tier: filled lazily on first contact, explicitly
//! invalidated on rebind or restaurant change. With a shared backend
//! configured the context follows the deployment across replicas; a restart
//! with the in-memory backend simply refills from the database.

use std::time::Duration;

use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use mirror_sync::cache::SharedCache;
use mirror_sync::db::pool::get_conn;
use mirror_sync::db::DbPool;
use mirror_sync::error::MirrorError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserContext {
    pub employee_id: Uuid,
    pub employee_name: String,
    pub first_name: String,
    pub department_id: Option<Uuid>,
    pub department_name: Option<String>,
    pub role_name: Option<String>,
}

// Context entries do not expire on their own; invalidation is event-driven.
// The long TTL only bounds garbage in the shared backend.
const CONTEXT_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

pub struct UserContextCache {
    cache: SharedCache,
}

impl UserContextCache {
    pub fn new(cache: SharedCache) -> Self {
        Self { cache }
    }

    fn key(chat_id: i64) -> String {
        format!("user_ctx:{chat_id}")
    }

    pub async fn get_cached(&self, chat_id: i64) -> Option<UserContext> {
        self.cache.get_json(&Self::key(chat_id)).await
    }

    pub async fn put(&self, chat_id: i64, ctx: &UserContext) {
        self.cache.set_json(&Self::key(chat_id), ctx, CONTEXT_TTL).await;
    }

    pub async fn invalidate(&self, chat_id: i64) {
        self.cache.invalidate(&Self::key(chat_id)).await;
    }

    /// Cache-or-database lookup. `None` means this chat id is not bound to
    /// any employee — the caller starts the authorisation flow.
    pub async fn get_or_load(
        &self,
        pool: &DbPool,
        chat_id: i64,
    ) -> Result<Option<UserContext>, MirrorError> {
        if let Some(ctx) = self.get_cached(chat_id).await {
            return Ok(Some(ctx));
        }

        let mut conn = get_conn(pool).await?;

        use mirror_sync::schema::pos_department::dsl as d;
        use mirror_sync::schema::pos_employee::dsl as e;
        use mirror_sync::schema::pos_employee_role::dsl as r;

        let employee: Option<(Uuid, Option<String>, Option<String>, Option<Uuid>, Option<Uuid>)> =
            e::pos_employee
                .filter(e::chat_id.eq(chat_id))
                .select((e::id, e::name, e::first_name, e::department_id, e::role_id))
                .first(&mut conn)
                .await
                .optional()?;

        let Some((employee_id, name, first_name, department_id, role_id)) = employee else {
            return Ok(None);
        };

        let department_name: Option<String> = match department_id {
            Some(dept) => d::pos_department
                .filter(d::id.eq(dept))
                .select(d::name)
                .first::<Option<String>>(&mut conn)
                .await
                .optional()?
                .flatten(),
            None => None,
        };
        let role_name: Option<String> = match role_id {
            Some(role) => r::pos_employee_role
                .filter(r::id.eq(role))
                .select(r::name)
                .first::<Option<String>>(&mut conn)
                .await
                .optional()?
                .flatten(),
            None => None,
        };

        let ctx = UserContext {
            employee_id,
            employee_name: name.clone().unwrap_or_default(),
            first_name: first_name.or(name).unwrap_or_else(|| "сотрудник".into()),
            department_id,
            department_name,
            role_name,
        };
        self.put(chat_id, &ctx).await;
        info!(chat_id, employee = %ctx.employee_name, "user context loaded from db");
        Ok(Some(ctx))
    }

    /// Restaurant change: mutate the cached record in place.
    pub async fn update_department(
        &self,
        chat_id: i64,
        department_id: Uuid,
        department_name: &str,
    ) {
        if let Some(mut ctx) = self.get_cached(chat_id).await {
            ctx.department_id = Some(department_id);
            ctx.department_name = Some(department_name.to_string());
            self.put(chat_id, &ctx).await;
        }
    }
}
