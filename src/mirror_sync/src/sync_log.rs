//! Audit rows: every sync attempt writes exactly one `sync_log` row whose
//! status travels `running → success | error`. A `running` row with no
//! `finished_at` after the fact means the process died mid-run — acceptable,
//! and exactly what the audit is for.

use chrono::NaiveDateTime;
use diesel::{ExpressionMethods, QueryDsl};
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::schema::sync_log::dsl as t;

type Result<T> = std::result::Result<T, diesel::result::Error>;

/// Inserts the `running` row and returns its id.
pub async fn start_run(
    conn: &mut AsyncPgConnection,
    entity_type: &str,
    started_at: NaiveDateTime,
    triggered_by: Option<&str>,
) -> Result<i64> {
    diesel::insert_into(t::sync_log)
        .values((
            t::entity_type.eq(entity_type),
            t::started_at.eq(started_at),
            t::status.eq("running"),
            t::triggered_by.eq(triggered_by),
        ))
        .returning(t::id)
        .get_result(conn)
        .await
}

pub async fn finish_success(
    conn: &mut AsyncPgConnection,
    run_id: i64,
    finished_at: NaiveDateTime,
    records_synced: i32,
) -> Result<()> {
    diesel::update(t::sync_log.filter(t::id.eq(run_id)))
        .set((
            t::finished_at.eq(finished_at),
            t::status.eq("success"),
            t::records_synced.eq(records_synced),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn finish_error(
    conn: &mut AsyncPgConnection,
    run_id: i64,
    finished_at: NaiveDateTime,
    message: &str,
) -> Result<()> {
    let mut message = message.to_string();
    message.truncate(2000);
    diesel::update(t::sync_log.filter(t::id.eq(run_id)))
        .set((
            t::finished_at.eq(finished_at),
            t::status.eq("error"),
            t::error_message.eq(message),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

/// One-shot terminal row for jobs that do not pre-insert a `running` row
/// (the nightly transfer logs its aggregate this way).
pub async fn record_terminal(
    conn: &mut AsyncPgConnection,
    entity_type: &str,
    started_at: NaiveDateTime,
    finished_at: NaiveDateTime,
    status: &str,
    records: i32,
    error: Option<&str>,
    triggered_by: Option<&str>,
) -> Result<()> {
    diesel::insert_into(t::sync_log)
        .values((
            t::entity_type.eq(entity_type),
            t::started_at.eq(started_at),
            t::finished_at.eq(finished_at),
            t::status.eq(status),
            t::records_synced.eq(records),
            t::error_message.eq(error),
            t::triggered_by.eq(triggered_by),
        ))
        .execute(conn)
        .await?;
    Ok(())
}
