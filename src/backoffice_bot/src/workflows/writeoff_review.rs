//! Admin review of pending write-offs.
//!
//! Concurrency: the conditional update on `is_locked` is the only critical
//! section — deliberately a database operation, not an in-process mutex, so
//! multiple bot replicas behave identically. First admin to flip the flag
//! owns the document; everyone else is told so. Approve and reject both end
//! with the row deleted and every admin-side keyboard removed.

use std::sync::Arc;

use bigdecimal::ToPrimitive;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use tracing::{info, warn};

use mirror_sync::db::pool::get_conn;
use mirror_sync::ops_models::{PendingWriteoff, WriteoffHistoryRow};
use mirror_sync::tz::LocalClock;
use upstream_clients::pos::documents::{WriteoffDocument, WriteoffItem};

use crate::app::App;
use crate::chat::fsm::FsmStorage;
use crate::chat::{Markup, Outgoing, Update};
use crate::workflows::writeoff::{admin_keyboard, parse_quantity, summary_text, WoItem};
use crate::workflows::{callback_payload, delete_user_message, set_prompt};

/// Per-author history cap; the oldest rows beyond it are pruned.
pub const HISTORY_CAP: i64 = 200;
const PENDING_TTL_HOURS: i64 = 24;

pub async fn try_lock(conn: &mut AsyncPgConnection, doc_id: &str) -> QueryResult<bool> {
    use mirror_sync::schema::pending_writeoff::dsl as pw;
    let n = diesel::update(
        pw::pending_writeoff
            .filter(pw::doc_id.eq(doc_id))
            .filter(pw::is_locked.eq(false)),
    )
    .set(pw::is_locked.eq(true))
    .execute(conn)
    .await?;
    Ok(n == 1)
}

pub async fn unlock(conn: &mut AsyncPgConnection, doc_id: &str) -> QueryResult<()> {
    use mirror_sync::schema::pending_writeoff::dsl as pw;
    diesel::update(pw::pending_writeoff.filter(pw::doc_id.eq(doc_id)))
        .set(pw::is_locked.eq(false))
        .execute(conn)
        .await?;
    Ok(())
}

async fn load(conn: &mut AsyncPgConnection, doc_id: &str) -> QueryResult<Option<PendingWriteoff>> {
    use mirror_sync::schema::pending_writeoff::dsl as pw;
    pw::pending_writeoff
        .filter(pw::doc_id.eq(doc_id))
        .select(PendingWriteoff::as_select())
        .first(conn)
        .await
        .optional()
}

async fn remove(conn: &mut AsyncPgConnection, doc_id: &str) -> QueryResult<()> {
    use mirror_sync::schema::pending_writeoff::dsl as pw;
    diesel::delete(pw::pending_writeoff.filter(pw::doc_id.eq(doc_id)))
        .execute(conn)
        .await?;
    Ok(())
}

fn doc_items(row: &PendingWriteoff) -> Vec<WoItem> {
    serde_json::from_value(row.items.clone()).unwrap_or_default()
}

/// Rewrites every admin's review card with a final note and no keyboard.
async fn resolve_admin_cards(app: &Arc<App>, row: &PendingWriteoff, note: &str) {
    let items = doc_items(row);
    let text = format!(
        "{}\n🆔 {}\n\n{note}",
        summary_text(
            &row.author_name,
            &row.store_name,
            &row.account_name,
            &row.reason,
            &items
        ),
        row.doc_id
    );
    if let Some(map) = row.admin_msg_ids.as_object() {
        for (admin, msg_id) in map {
            let (Ok(admin), Some(msg_id)) = (admin.parse::<i64>(), msg_id.as_i64()) else {
                continue;
            };
            let _ = app
                .transport
                .edit_message(admin, msg_id, Outgoing::text(text.clone()))
                .await;
        }
    }
}

fn build_document(row: &PendingWriteoff, clock: &LocalClock) -> WriteoffDocument {
    let items = doc_items(row)
        .into_iter()
        .filter_map(|item| {
            let amount = parse_quantity(&item.quantity).ok()?.to_f64()?;
            Some(WriteoffItem {
                product_id: item.id,
                amount,
                measure_unit_id: item.main_unit,
            })
        })
        .collect();
    WriteoffDocument {
        id: row.document_uuid,
        date_incoming: clock.now_pos_timestamp(),
        status: "NEW".into(),
        // The author travels in the comment for traceability on the POS side.
        comment: format!("{} (Автор: {})", row.reason, row.author_name),
        store_id: row.store_id,
        account_id: row.account_id,
        items,
    }
}

async fn prune_history(
    conn: &mut AsyncPgConnection,
    author_chat_id: i64,
) -> QueryResult<usize> {
    diesel::sql_query(
        "DELETE FROM writeoff_history
         WHERE author_chat_id = $1
           AND id NOT IN (
             SELECT id FROM writeoff_history
             WHERE author_chat_id = $1
             ORDER BY id DESC LIMIT $2
           )",
    )
    .bind::<diesel::sql_types::BigInt, _>(author_chat_id)
    .bind::<diesel::sql_types::BigInt, _>(HISTORY_CAP)
    .execute(conn)
    .await
}

pub async fn on_approve(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    let Update::Callback {
        chat_id: admin_chat,
        data,
        ..
    } = &update
    else {
        return Ok(());
    };
    let doc_id = callback_payload(data, "woa_approve:").to_string();

    let mut conn = get_conn(&app.ctx.pool).await?;
    if !try_lock(&mut conn, &doc_id).await? {
        app.transport
            .send_message(
                *admin_chat,
                Outgoing::text("⚠️ Этот документ уже обрабатывает другой админ"),
            )
            .await?;
        return Ok(());
    }
    let Some(row) = load(&mut conn, &doc_id).await? else {
        app.transport
            .send_message(*admin_chat, Outgoing::text("⚠️ Документ уже обработан"))
            .await?;
        return Ok(());
    };

    let document = build_document(&row, &app.ctx.clock);
    match app.pos.send_writeoff(&document).await {
        Ok(()) => {}
        Err(err) => {
            warn!(%doc_id, "write-off submission failed: {err}");
            unlock(&mut conn, &doc_id).await?;
            app.transport
                .send_message(
                    *admin_chat,
                    Outgoing::text("❌ Не удалось отправить акт в iiko. Попробуйте позже."),
                )
                .await?;
            return Ok(());
        }
    }

    let history = WriteoffHistoryRow {
        author_chat_id: row.author_chat_id,
        author_name: Some(row.author_name.clone()),
        document_uuid: row.document_uuid,
        store_name: Some(row.store_name.clone()),
        account_name: Some(row.account_name.clone()),
        reason: Some(row.reason.clone()),
        items: row.items.clone(),
        created_at: app.ctx.clock.now(),
    };
    {
        use mirror_sync::schema::writeoff_history::dsl as h;
        diesel::insert_into(h::writeoff_history)
            .values(&history)
            .execute(&mut conn)
            .await?;
        prune_history(&mut conn, row.author_chat_id).await?;
    }
    remove(&mut conn, &doc_id).await?;
    info!(%doc_id, document_uuid = %row.document_uuid, "write-off approved and sent");

    resolve_admin_cards(&app, &row, "✅ Отправлено в iiko").await;
    app.transport
        .send_message(
            row.author_chat_id,
            Outgoing::text(format!("✅ Ваш акт {doc_id} одобрен и отправлен в iiko")),
        )
        .await?;
    Ok(())
}

pub async fn on_reject(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    let Update::Callback {
        chat_id: admin_chat,
        data,
        ..
    } = &update
    else {
        return Ok(());
    };
    let doc_id = callback_payload(data, "woa_reject:").to_string();

    let mut conn = get_conn(&app.ctx.pool).await?;
    if !try_lock(&mut conn, &doc_id).await? {
        app.transport
            .send_message(
                *admin_chat,
                Outgoing::text("⚠️ Этот документ уже обрабатывает другой админ"),
            )
            .await?;
        return Ok(());
    }
    let Some(row) = load(&mut conn, &doc_id).await? else {
        return Ok(());
    };
    remove(&mut conn, &doc_id).await?;
    info!(%doc_id, "write-off rejected");

    resolve_admin_cards(&app, &row, "❌ Отклонено").await;
    app.transport
        .send_message(
            row.author_chat_id,
            Outgoing::text(format!("❌ Ваш акт {doc_id} отклонён админом")),
        )
        .await?;
    Ok(())
}

fn edit_markup(doc_id: &str, items: &[WoItem]) -> Markup {
    let mut rows: Vec<Vec<crate::chat::InlineButton>> = items
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            vec![crate::chat::InlineButton::new(
                format!("{} — {} {}", item.name, item.quantity, item.unit_label),
                format!("woa_item:{doc_id}:{idx}"),
            )]
        })
        .collect();
    rows.push(vec![crate::chat::InlineButton::new(
        "✔️ Готово",
        format!("woa_done:{doc_id}"),
    )]);
    Markup::Inline(rows)
}

pub async fn on_edit(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    let Update::Callback {
        chat_id: admin_chat,
        user_id,
        message_id,
        data,
        ..
    } = &update
    else {
        return Ok(());
    };
    let doc_id = callback_payload(data, "woa_edit:").to_string();

    let mut conn = get_conn(&app.ctx.pool).await?;
    if !try_lock(&mut conn, &doc_id).await? {
        app.transport
            .send_message(
                *admin_chat,
                Outgoing::text("⚠️ Этот документ уже обрабатывает другой админ"),
            )
            .await?;
        return Ok(());
    }
    let Some(row) = load(&mut conn, &doc_id).await? else {
        return Ok(());
    };

    // The review card itself becomes the editor (edit-in-place).
    let items = doc_items(&row);
    app.transport
        .edit_message(
            *admin_chat,
            *message_id,
            Outgoing {
                text: format!("✏️ Редактирование акта {doc_id}. Выберите позицию:"),
                markup: edit_markup(&doc_id, &items),
            },
        )
        .await?;

    let mut session = FsmStorage::load(app.storage.as_ref(), *user_id).await;
    session.set("edit_doc_id", &doc_id);
    session.set("edit_card_msg_id", message_id);
    app.storage.save(*user_id, &session).await;
    Ok(())
}

pub async fn on_edit_pick_item(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    let Update::Callback {
        chat_id, user_id, data, ..
    } = &update
    else {
        return Ok(());
    };
    let payload = callback_payload(data, "woa_item:");
    let Some((doc_id, idx)) = payload.rsplit_once(':') else {
        return Ok(());
    };
    let Ok(idx) = idx.parse::<usize>() else {
        return Ok(());
    };

    let mut session = FsmStorage::load(app.storage.as_ref(), *user_id).await;
    session.set("edit_doc_id", &doc_id);
    session.set("edit_idx", &idx);
    session.state = Some("woa:qty".into());
    set_prompt(
        &app,
        *chat_id,
        &mut session,
        "🔢 Введите новое количество:",
        Markup::None,
    )
    .await?;
    app.storage.save(*user_id, &session).await;
    Ok(())
}

pub async fn on_edit_quantity(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    let Update::Text {
        chat_id,
        user_id,
        message_id,
        text,
    } = &update
    else {
        return Ok(());
    };
    delete_user_message(&app, *chat_id, *message_id).await;

    let mut session = FsmStorage::load(app.storage.as_ref(), *user_id).await;
    let qty = match parse_quantity(text) {
        Ok(qty) => qty,
        Err(why) => {
            set_prompt(
                &app,
                *chat_id,
                &mut session,
                format!("⚠️ Количество: {why}. Введите ещё раз:"),
                Markup::None,
            )
            .await?;
            app.storage.save(*user_id, &session).await;
            return Ok(());
        }
    };

    let doc_id: String = session.get("edit_doc_id").unwrap_or_default();
    let idx: usize = session.get("edit_idx").unwrap_or(usize::MAX);

    let mut conn = get_conn(&app.ctx.pool).await?;
    let Some(row) = load(&mut conn, &doc_id).await? else {
        return Ok(());
    };
    let mut items = doc_items(&row);
    if let Some(item) = items.get_mut(idx) {
        item.quantity = qty.to_string();
    }
    {
        use mirror_sync::schema::pending_writeoff::dsl as pw;
        diesel::update(pw::pending_writeoff.filter(pw::doc_id.eq(&doc_id)))
            .set(pw::items.eq(serde_json::to_value(&items)?))
            .execute(&mut conn)
            .await?;
    }

    // Back to the item list on the same card.
    if let Some(card) = session.get::<i64>("edit_card_msg_id") {
        let _ = app
            .transport
            .edit_message(
                *chat_id,
                card,
                Outgoing {
                    text: format!("✏️ Редактирование акта {doc_id}. Выберите позицию:"),
                    markup: edit_markup(&doc_id, &items),
                },
            )
            .await;
    }
    if let Some(prompt) = session.tracked.prompt_msg_id.take() {
        let _ = app.transport.delete_message(*chat_id, prompt).await;
    }
    session.state = None;
    app.storage.save(*user_id, &session).await;
    Ok(())
}

pub async fn on_edit_done(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    let Update::Callback {
        chat_id, user_id, message_id, data, ..
    } = &update
    else {
        return Ok(());
    };
    let doc_id = callback_payload(data, "woa_done:").to_string();

    let mut conn = get_conn(&app.ctx.pool).await?;
    let Some(row) = load(&mut conn, &doc_id).await? else {
        return Ok(());
    };
    // Editing over: release the lock so any admin may resolve the document.
    unlock(&mut conn, &doc_id).await?;

    let items = doc_items(&row);
    app.transport
        .edit_message(
            *chat_id,
            *message_id,
            Outgoing {
                text: format!(
                    "{}\n🆔 {doc_id}",
                    summary_text(
                        &row.author_name,
                        &row.store_name,
                        &row.account_name,
                        &row.reason,
                        &items
                    )
                ),
                markup: admin_keyboard(&doc_id),
            },
        )
        .await?;

    let mut session = FsmStorage::load(app.storage.as_ref(), *user_id).await;
    session.state = None;
    session.data.remove("edit_doc_id");
    session.data.remove("edit_idx");
    session.data.remove("edit_card_msg_id");
    app.storage.save(*user_id, &session).await;
    Ok(())
}

/// Deletes pending rows older than the 24 h TTL. Returns how many were swept.
pub async fn sweep_expired(app: &Arc<App>) -> anyhow::Result<usize> {
    use mirror_sync::schema::pending_writeoff::dsl as pw;
    let cutoff = app.ctx.clock.now() - chrono::Duration::hours(PENDING_TTL_HOURS);
    let mut conn = get_conn(&app.ctx.pool).await?;
    let swept = diesel::delete(pw::pending_writeoff.filter(pw::created_at.lt(cutoff)))
        .execute(&mut conn)
        .await?;
    if swept > 0 {
        info!(swept, "expired pending write-offs removed");
    }
    Ok(swept)
}
