//! Cron-like scheduler: fixed local-time jobs in the project timezone.
//!
//! Three daily jobs: 07:00 full sync chain, 22:00 evening stop-list report,
//! 23:00 negative-consumable transfer. Each job loop computes the next fire
//! instant in the project timezone, sleeps until it and runs — through the
//! same per-entity locks ad-hoc syncs use, so a job never overlaps itself or
//! an operator-triggered run. A wake-up that arrives within the one-hour
//! grace window still runs the missed fire once; later than that it is
//! skipped and the loop realigns.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{error, info, warn};

use mirror_sync::engine;
use mirror_sync::stock_balances::sync_stock_balances;

use crate::app::App;
use crate::notify::{alert_sysadmins, fan_out};
use crate::workflows::{min_stock, negative_transfer, stoplist, sync_ops, writeoff_review};

const TRIGGERED_BY: &str = "scheduler";

fn misfire_grace() -> ChronoDuration {
    ChronoDuration::hours(1)
}

/// Next instant after `after` at which the local wall clock reads
/// `hour:minute`. On a DST gap the fire slides to the next valid mapping;
/// on a fold the earlier instant wins.
pub fn next_fire_after(tz: Tz, hour: u32, minute: u32, after: DateTime<Utc>) -> DateTime<Utc> {
    use chrono::offset::LocalResult;
    let local_after = after.with_timezone(&tz);
    let mut date = local_after.date_naive();
    for _ in 0..4 {
        if let Some(naive) = date.and_hms_opt(hour, minute, 0) {
            let resolved = match tz.from_local_datetime(&naive) {
                LocalResult::Single(dt) => Some(dt),
                LocalResult::Ambiguous(earliest, _) => Some(earliest),
                LocalResult::None => None,
            };
            if let Some(dt) = resolved {
                let utc = dt.with_timezone(&Utc);
                if utc > after {
                    return utc;
                }
            }
        }
        date = date.succ_opt().expect("date overflow");
    }
    unreachable!("a valid fire time exists within four days");
}

async fn job_loop<F, Fut>(app: Arc<App>, name: &'static str, hour: u32, minute: u32, job: F)
where
    F: Fn(Arc<App>) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let tz = app.ctx.clock.timezone();
    loop {
        let fire = next_fire_after(tz, hour, minute, Utc::now());
        let wait = (fire - Utc::now()).to_std().unwrap_or_default();
        info!(name, fire = %fire, "next run scheduled");
        tokio::time::sleep(wait).await;

        let late = Utc::now() - fire;
        if late > misfire_grace() {
            warn!(name, late_minutes = late.num_minutes(), "fire missed beyond grace, skipping");
            continue;
        }
        info!(name, "job starting");
        job(Arc::clone(&app)).await;
    }
}

/// Spawns the three job loops. Returns immediately.
pub fn start(app: &Arc<App>) {
    let a = Arc::clone(app);
    tokio::spawn(job_loop(a, "daily_full_sync", 7, 0, |app| async move {
        run_full_sync_chain(&app).await;
    }));

    let a = Arc::clone(app);
    tokio::spawn(job_loop(a, "evening_stoplist_report", 22, 0, |app| async move {
        match stoplist::send_evening_report(&app).await {
            Ok(sent) => info!(sent, "evening stop-list report delivered"),
            Err(err) => error!("evening stop-list report failed: {err:#}"),
        }
    }));

    let a = Arc::clone(app);
    tokio::spawn(job_loop(a, "negative_transfer", 23, 0, |app| async move {
        if let Err(err) = negative_transfer::run_negative_transfer(&app, TRIGGERED_BY).await {
            error!("negative transfer failed: {err:#}");
        }
    }));
}

/// The 07:00 chain: POS references → finance references → stock balances →
/// min/max import → permissions export, each step reported to the admins.
pub async fn run_full_sync_chain(app: &Arc<App>) {
    let started = app.ctx.clock.now();
    let mut report: Vec<String> = vec![format!(
        "🔄 Авто-синхронизация ({})",
        started.format("%d.%m.%Y %H:%M")
    )];

    match engine::sync_all_entities(&app.ctx, &app.pos, Some(TRIGGERED_BY)).await {
        Ok(outcomes) => {
            let ok = outcomes.iter().filter(|o| o.result.is_ok()).count();
            report.push(format!("📚 Справочники: ✅ {ok}/{}", outcomes.len()));
        }
        Err(err) => {
            error!("entity sync failed: {err}");
            report.push("📚 Справочники: ❌".to_string());
        }
    }

    let pos_results = engine::sync_all_pos(&app.ctx, &app.pos, Some(TRIGGERED_BY)).await;
    let ok = pos_results.iter().filter(|r| r.result.is_ok()).count();
    report.push(format!("🏬 POS: ✅ {ok}/{}", pos_results.len()));

    let fin_results = engine::sync_all_finance(&app.ctx, &app.finance, Some(TRIGGERED_BY)).await;
    let ok = fin_results.iter().filter(|r| r.result.is_ok()).count();
    report.push(format!("📈 Финансы: ✅ {ok}/{}", fin_results.len()));

    match sync_stock_balances(&app.ctx, &app.pos, Some(TRIGGERED_BY), None).await {
        Ok(count) => report.push(format!("📦 Остатки: ✅ {count} позиций")),
        Err(err) => {
            error!("stock balance sync failed: {err}");
            report.push("📦 Остатки: ❌".to_string());
        }
    }

    match min_stock::sync_min_stock_from_sheet(app).await {
        Ok(count) => report.push(format!("📋 Min/max: ✅ {count} записей")),
        Err(err) => {
            error!("min-stock import failed: {err:#}");
            report.push("📋 Min/max: ❌".to_string());
        }
    }

    match sync_ops::export_catalogue(app).await {
        Ok(count) => report.push(format!("📒 Номенклатура → таблица: ✅ {count}")),
        Err(err) => {
            error!("catalogue export failed: {err:#}");
            report.push("📒 Номенклатура: ❌".to_string());
        }
    }

    match app.permissions.export_to_sheet(&app.ctx.pool).await {
        Ok(count) => {
            app.refresh_admin_set().await;
            report.push(format!("🔑 Права: ✅ {count} сотрудников"));
        }
        Err(err) => {
            error!("permission export failed: {err}");
            report.push("🔑 Права: ❌".to_string());
        }
    }

    match writeoff_review::sweep_expired(app).await {
        Ok(0) => {}
        Ok(swept) => report.push(format!("🧹 Просроченные акты: {swept}")),
        Err(err) => error!("pending write-off sweep failed: {err:#}"),
    }

    let elapsed = app.ctx.clock.now() - started;
    report.push(format!("⏱ {} сек", elapsed.num_seconds()));

    // Failed steps also go to the technical channel.
    let failed: Vec<&String> = report.iter().filter(|line| line.contains('❌')).collect();
    if !failed.is_empty() {
        let text = failed
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        alert_sysadmins(app, &format!("Сбои авто-синхронизации:\n{text}")).await;
    }

    match app.permissions.admin_ids(&app.ctx.pool).await {
        Ok(admins) if !admins.is_empty() => {
            fan_out(&app.transport, &admins, &report.join("\n")).await;
        }
        _ => warn!("no admins to notify about the sync chain"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn kgd() -> Tz {
        "Europe/Kaliningrad".parse().unwrap()
    }

    #[test]
    fn fire_later_today_when_before_the_hour() {
        // 03:00 UTC = 05:00 local; 07:00 local = 05:00 UTC.
        let after = Utc.with_ymd_and_hms(2026, 6, 1, 3, 0, 0).unwrap();
        let fire = next_fire_after(kgd(), 7, 0, after);
        assert_eq!(fire, Utc.with_ymd_and_hms(2026, 6, 1, 5, 0, 0).unwrap());
    }

    #[test]
    fn fire_tomorrow_when_past_the_hour() {
        // 06:00 UTC = 08:00 local, already past 07:00.
        let after = Utc.with_ymd_and_hms(2026, 6, 1, 6, 0, 0).unwrap();
        let fire = next_fire_after(kgd(), 7, 0, after);
        assert_eq!(fire, Utc.with_ymd_and_hms(2026, 6, 2, 5, 0, 0).unwrap());
    }

    #[test]
    fn fire_is_strictly_in_the_future() {
        let exactly = Utc.with_ymd_and_hms(2026, 6, 1, 5, 0, 0).unwrap();
        let fire = next_fire_after(kgd(), 7, 0, exactly);
        assert!(fire > exactly);
        assert_eq!(fire, Utc.with_ymd_and_hms(2026, 6, 2, 5, 0, 0).unwrap());
    }
}
