//! Async Postgres pool.
//!
//! The database sits behind a high-latency link and the host drops idle
//! sockets, hence the small pool (5 + 5 overflow), the 300 s recycle and the
//! health check on checkout. `jit = off` is applied per connection: the
//! workload is short OLTP statements and large batched INSERTs, where planner
//! JIT only adds latency.

use diesel_async::pooled_connection::deadpool::{Object, Pool};
use diesel_async::pooled_connection::{AsyncDieselConnectionManager, ManagerConfig};
use diesel_async::{AsyncPgConnection, RunQueryDsl, SimpleAsyncConnection};
use tracing::info;

use crate::error::MirrorError;

pub type DbPool = Pool<AsyncPgConnection>;
pub type PooledConn = Object<AsyncPgConnection>;

const POOL_SIZE: usize = 10; // 5 + 5 overflow
const RECYCLE_AFTER_SECS: u64 = 300;

/// Builds the process-wide pool.
pub fn build_pool(database_url: &str) -> Result<DbPool, MirrorError> {
    let config: ManagerConfig<AsyncPgConnection> = ManagerConfig::default();
    let manager =
        AsyncDieselConnectionManager::<AsyncPgConnection>::new_with_config(database_url, config);
    let pool = Pool::builder(manager)
        .max_size(POOL_SIZE)
        .create_timeout(Some(std::time::Duration::from_secs(15)))
        .recycle_timeout(Some(std::time::Duration::from_secs(RECYCLE_AFTER_SECS)))
        .build()
        .map_err(|e| MirrorError::Pool(e.to_string()))?;
    info!(size = POOL_SIZE, "database pool created");
    Ok(pool)
}

/// Checks out a connection and applies the per-connection session settings.
pub async fn get_conn(pool: &DbPool) -> Result<PooledConn, MirrorError> {
    let mut conn = pool
        .get()
        .await
        .map_err(|e| MirrorError::Pool(e.to_string()))?;
    // Cheap ping doubles as pre-ping; a dead socket fails here, not mid-sync.
    diesel::sql_query("SELECT 1").execute(&mut conn).await?;
    conn.batch_execute("SET jit = off").await?;
    Ok(conn)
}
