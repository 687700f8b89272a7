//! Mirror-delete: make the local set equal to the upstream set by removing
//! rows upstream no longer returns.
//!
//! Two sanity gates, both non-fatal:
//! - an empty `keys` set means "API outage", not "upstream is empty" — skip;
//! - a candidate count above 50 % of the rows in scope means something is
//!   badly wrong upstream — skip, converge on the next normal run.
//!
//! Table and column names are crate-internal constants, never user input;
//! key sets and scope values go through binds.

use diesel::sql_types::{Array, BigInt, Text, Uuid as SqlUuid};
use diesel::QueryableByName;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use tracing::{debug, info, warn};
use uuid::Uuid;

type Result<T> = std::result::Result<T, diesel::result::Error>;

/// Valid upstream keys — the rows that must survive.
pub enum MirrorKeys<'a> {
    Uuid(&'a [Uuid]),
    BigInt(&'a [i64]),
}

impl MirrorKeys<'_> {
    fn is_empty(&self) -> bool {
        match self {
            MirrorKeys::Uuid(k) => k.is_empty(),
            MirrorKeys::BigInt(k) => k.is_empty(),
        }
    }
}

/// Narrows the delete to one slice of a shared table,
/// e.g. `root_type = 'Account'` on `pos_entity`.
#[derive(Clone, Copy)]
pub struct MirrorScope<'a> {
    pub column: &'a str,
    pub value: &'a str,
}

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    n: i64,
}

async fn count_in_scope(
    conn: &mut AsyncPgConnection,
    table: &str,
    scope: Option<MirrorScope<'_>>,
) -> Result<i64> {
    let row: CountRow = match scope {
        None => {
            diesel::sql_query(format!("SELECT COUNT(*) AS n FROM {table}"))
                .get_result(conn)
                .await?
        }
        Some(s) => {
            diesel::sql_query(format!(
                "SELECT COUNT(*) AS n FROM {table} WHERE {} = $1",
                s.column
            ))
            .bind::<Text, _>(s.value.to_string())
            .get_result(conn)
            .await?
        }
    };
    Ok(row.n)
}

macro_rules! keyed_query {
    ($keys:expr, $sql:expr, $scope:expr, $conn:expr, $out:ty) => {{
        let q = diesel::sql_query($sql);
        let result: $out = match ($keys, $scope) {
            (MirrorKeys::Uuid(ids), None) => {
                q.bind::<Array<SqlUuid>, _>(ids.to_vec()).get_result($conn).await?
            }
            (MirrorKeys::Uuid(ids), Some(s)) => q
                .bind::<Array<SqlUuid>, _>(ids.to_vec())
                .bind::<Text, _>(s.value.to_string())
                .get_result($conn)
                .await?,
            (MirrorKeys::BigInt(ids), None) => {
                q.bind::<Array<BigInt>, _>(ids.to_vec()).get_result($conn).await?
            }
            (MirrorKeys::BigInt(ids), Some(s)) => q
                .bind::<Array<BigInt>, _>(ids.to_vec())
                .bind::<Text, _>(s.value.to_string())
                .get_result($conn)
                .await?,
        };
        result
    }};
}

/// Deletes rows whose key is not in `keys`, subject to the sanity gates.
/// Returns the number of deleted rows (0 when a gate fired).
pub async fn mirror_delete(
    conn: &mut AsyncPgConnection,
    label: &str,
    table: &str,
    key_column: &str,
    keys: MirrorKeys<'_>,
    scope: Option<MirrorScope<'_>>,
) -> Result<usize> {
    if keys.is_empty() {
        warn!(label, "mirror-delete skipped: upstream returned no ids (treating as outage)");
        return Ok(0);
    }

    let current = count_in_scope(conn, table, scope).await?;
    if current == 0 {
        return Ok(0);
    }

    let scope_sql = scope
        .map(|s| format!(" AND {} = $2", s.column))
        .unwrap_or_default();

    let candidates_sql = format!(
        "SELECT COUNT(*) AS n FROM {table} WHERE {key_column} <> ALL($1){scope_sql}"
    );
    let candidates: CountRow = keyed_query!(&keys, candidates_sql, scope, conn, CountRow);

    if candidates.n * 2 > current {
        warn!(
            label,
            candidates = candidates.n,
            current,
            "mirror-delete skipped: would remove more than 50% of rows in scope"
        );
        return Ok(0);
    }
    if candidates.n == 0 {
        debug!(label, "mirror-delete: nothing to remove");
        return Ok(0);
    }

    #[derive(QueryableByName)]
    struct Deleted {
        #[diesel(sql_type = BigInt)]
        n: i64,
    }
    // DELETE ... RETURNING a count via CTE so one round-trip reports the work.
    let delete_sql = format!(
        "WITH gone AS (DELETE FROM {table} WHERE {key_column} <> ALL($1){scope_sql} RETURNING 1)
         SELECT COUNT(*) AS n FROM gone"
    );
    let deleted: Deleted = keyed_query!(&keys, delete_sql, scope, conn, Deleted);

    info!(label, deleted = deleted.n, "mirror-delete removed rows absent upstream");
    Ok(deleted.n as usize)
}
