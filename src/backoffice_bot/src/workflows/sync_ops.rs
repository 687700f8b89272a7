//! Operator-triggered synchronisation and the permissions export.
//!
//! The buttons compete fairly with the scheduler: everything funnels through
//! the same per-entity locks, and a second press while a run is in flight is
//! answered with "already running" instead of queueing.

use std::sync::Arc;

use mirror_sync::engine;
use mirror_sync::error::MirrorError;
use mirror_sync::stock_balances::sync_stock_balances;

use crate::app::App;
use crate::chat::{InlineButton, Markup, Outgoing, Update};
use crate::notify::with_progress;
use crate::workflows::delete_user_message;

pub async fn on_sync_menu(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    let chat_id = update.chat_id();
    if let Update::Text { message_id, .. } = &update {
        delete_user_message(&app, chat_id, *message_id).await;
    }
    app.transport
        .send_message(
            chat_id,
            Outgoing::with_inline(
                "🔄 Синхронизация:",
                vec![
                    vec![InlineButton::new("📚 Справочники POS", "sync:entities")],
                    vec![InlineButton::new("🏬 Структура и товары", "sync:pos")],
                    vec![InlineButton::new("📈 Финансы", "sync:finance")],
                    vec![InlineButton::new("📦 Остатки", "sync:stock")],
                    vec![InlineButton::new("🔑 Права → таблица", "perm_export:go")],
                ],
            ),
        )
        .await?;
    Ok(())
}

pub async fn on_sync_run(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    let Update::Callback {
        chat_id, user_id, data, ..
    } = &update
    else {
        return Ok(());
    };
    let what = data.strip_prefix("sync:").unwrap_or("").to_string();
    let triggered_by = user_id.to_string();
    let app2 = Arc::clone(&app);

    let label = match what.as_str() {
        "entities" => "Справочники",
        "pos" => "Структура и товары",
        "finance" => "Финансы",
        "stock" => "Остатки",
        _ => return Ok(()),
    };

    with_progress(&app.transport, *chat_id, label, || async move {
        match what.as_str() {
            "entities" => {
                let outcomes =
                    engine::sync_all_entities(&app2.ctx, &app2.pos, Some(&triggered_by)).await;
                match outcomes {
                    Ok(outcomes) => {
                        let ok = outcomes.iter().filter(|o| o.result.is_ok()).count();
                        Ok(format!("{ok}/{} типов", outcomes.len()))
                    }
                    Err(MirrorError::AlreadyRunning(_)) => Ok("уже выполняется".to_string()),
                    Err(err) => Err(err.into()),
                }
            }
            "pos" => {
                let results =
                    engine::sync_all_pos(&app2.ctx, &app2.pos, Some(&triggered_by)).await;
                let ok = results.iter().filter(|r| r.result.is_ok()).count();
                Ok(format!("{ok}/{} справочников", results.len()))
            }
            "finance" => {
                let results =
                    engine::sync_all_finance(&app2.ctx, &app2.finance, Some(&triggered_by)).await;
                let ok = results.iter().filter(|r| r.result.is_ok()).count();
                Ok(format!("{ok}/{} справочников", results.len()))
            }
            "stock" => {
                match sync_stock_balances(&app2.ctx, &app2.pos, Some(&triggered_by), None).await {
                    Ok(count) => Ok(format!("{count} позиций")),
                    Err(MirrorError::AlreadyRunning(_)) => Ok("уже выполняется".to_string()),
                    Err(err) => Err(err.into()),
                }
            }
            _ => Ok(String::new()),
        }
    })
    .await;
    Ok(())
}

pub const CATALOGUE_TAB: &str = "Номенклатура";

/// Exports the product catalogue (id + name) to the spreadsheet — the
/// mapping reference the OCR base and the request pickers build on.
pub async fn export_catalogue(app: &Arc<App>) -> anyhow::Result<usize> {
    let products = crate::workflows::min_stock::product_list(app).await?;
    let headers = vec!["product_id".to_string(), "product_name".to_string()];
    let rows: Vec<Vec<String>> = products
        .iter()
        .map(|(id, name)| vec![id.to_string(), name.clone()])
        .collect();
    let count = rows.len();
    app.sheets
        .write_records(CATALOGUE_TAB, &headers, &rows)
        .await
        .map_err(|e| anyhow::anyhow!("catalogue export failed: {e}"))?;
    Ok(count)
}

pub async fn on_perm_export(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    let chat_id = update.chat_id();
    let app2 = Arc::clone(&app);
    with_progress(&app.transport, chat_id, "Права → таблица", || async move {
        let count = app2.permissions.export_to_sheet(&app2.ctx.pool).await?;
        app2.refresh_admin_set().await;
        Ok(format!("{count} сотрудников"))
    })
    .await;
    Ok(())
}
