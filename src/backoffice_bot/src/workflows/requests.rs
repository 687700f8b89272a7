//! Product requests: floor staff ask, receivers approve.
//!
//! A request fans out to the receivers of its section (kitchen / bar /
//! pastry). A receiver may approve — which emits an outgoing invoice to the
//! POS with status `PROCESSED` — edit quantities first, or cancel. The same
//! conditional-update lock as write-offs serialises receiver action.

use std::sync::Arc;

use bigdecimal::ToPrimitive;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use mirror_sync::db::pool::get_conn;
use mirror_sync::ops_models::{ProductRequest, ProductRequestRow};
use upstream_clients::pos::documents::{InvoiceDocument, InvoiceItem};

use crate::app::App;
use crate::chat::fsm::FsmStorage;
use crate::chat::{InlineButton, Markup, Outgoing, Update};
use crate::workflows::writeoff::{classify_role, parse_quantity, StoreSegment, WoItem};
use crate::workflows::{callback_payload, delete_user_message, set_prompt};

/// Request section from the author's job title. Pastry outranks the generic
/// kitchen family because "кондитер" matches both.
pub fn classify_section(role_name: Option<&str>) -> &'static str {
    if role_name
        .map(str::to_lowercase)
        .is_some_and(|r| r.contains("кондитер"))
    {
        return "pastry";
    }
    match classify_role(role_name) {
        StoreSegment::Bar => "bar",
        _ => "kitchen",
    }
}

fn receiver_keyboard(request_id: i64) -> Markup {
    Markup::Inline(vec![
        vec![InlineButton::new("✅ Согласовать", format!("req_approve:{request_id}"))],
        vec![InlineButton::new("✏️ Изменить количество", format!("req_edit:{request_id}"))],
        vec![InlineButton::new("❌ Отменить", format!("req_cancel:{request_id}"))],
    ])
}

fn request_text(request: &ProductRequest, items: &[WoItem]) -> String {
    let mut text = format!(
        "🛒 Заявка №{} ({})\n👤 {}",
        request.id, request.section, request.author_name
    );
    for (i, item) in items.iter().enumerate() {
        text.push_str(&format!(
            "\n  {}. {} — {} {}",
            i + 1,
            item.name,
            item.quantity,
            item.unit_label
        ));
    }
    text
}

fn request_items(request: &ProductRequest) -> Vec<WoItem> {
    serde_json::from_value(request.items.clone()).unwrap_or_default()
}

async fn try_lock(conn: &mut AsyncPgConnection, request_id: i64) -> QueryResult<bool> {
    use mirror_sync::schema::product_request::dsl as r;
    let n = diesel::update(
        r::product_request
            .filter(r::id.eq(request_id))
            .filter(r::status.eq("open"))
            .filter(r::is_locked.eq(false)),
    )
    .set(r::is_locked.eq(true))
    .execute(conn)
    .await?;
    Ok(n == 1)
}

async fn load(
    conn: &mut AsyncPgConnection,
    request_id: i64,
) -> QueryResult<Option<ProductRequest>> {
    use mirror_sync::schema::product_request::dsl as r;
    r::product_request
        .filter(r::id.eq(request_id))
        .select(ProductRequest::as_select())
        .first(conn)
        .await
        .optional()
}

async fn finish(
    conn: &mut AsyncPgConnection,
    request_id: i64,
    status: &str,
) -> QueryResult<()> {
    use mirror_sync::schema::product_request::dsl as r;
    diesel::update(r::product_request.filter(r::id.eq(request_id)))
        .set((r::status.eq(status), r::is_locked.eq(false)))
        .execute(conn)
        .await?;
    Ok(())
}

async fn resolve_receiver_cards(app: &Arc<App>, request: &ProductRequest, note: &str) {
    let items = request_items(request);
    let text = format!("{}\n\n{note}", request_text(request, &items));
    if let Some(map) = request.receiver_msg_ids.as_object() {
        for (receiver, msg_id) in map {
            let (Ok(receiver), Some(msg_id)) = (receiver.parse::<i64>(), msg_id.as_i64()) else {
                continue;
            };
            let _ = app
                .transport
                .edit_message(receiver, msg_id, Outgoing::text(text.clone()))
                .await;
        }
    }
}

// ── authoring ──

pub async fn on_start_request(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    let chat_id = update.chat_id();
    let user_id = update.user_id();
    if let Update::Text { message_id, .. } = &update {
        delete_user_message(&app, chat_id, *message_id).await;
    }

    let Some(ctx) = app.user_ctx.get_or_load(&app.ctx.pool, user_id).await? else {
        app.transport
            .send_message(chat_id, Outgoing::text("⚠️ Сначала авторизуйтесь: /start"))
            .await?;
        return Ok(());
    };

    let section = classify_section(ctx.role_name.as_deref());
    let store = match (ctx.department_id, classify_role(ctx.role_name.as_deref())) {
        (Some(dept), segment) => {
            let stores = crate::workflows::writeoff::stores_for_department(&app, dept).await?;
            crate::workflows::writeoff::auto_store(&stores, segment)
        }
        _ => None,
    };

    let mut session = FsmStorage::load(app.storage.as_ref(), user_id).await;
    session.data.clear();
    session.set("req_section", &section);
    session.set("req_department_id", &ctx.department_id);
    session.set("req_store_id", &store.as_ref().map(|(id, _)| *id));
    session.set("author_name", &ctx.employee_name);
    session.set("req_items", &Vec::<WoItem>::new());
    session.state = Some("req:item".into());
    set_prompt(
        &app,
        chat_id,
        &mut session,
        "🛒 Заявка на продукты.\n🔎 Введите название товара для поиска:",
        Markup::None,
    )
    .await?;
    app.storage.save(user_id, &session).await;
    Ok(())
}

pub async fn on_item_search(app: Arc<App>, update: Update) -> anyhow::Result<()> {
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

    use mirror_sync::schema::pos_product::dsl as p;
    let mut conn = get_conn(&app.ctx.pool).await?;
    let found: Vec<(Uuid, Option<String>)> = p::pos_product
        .filter(p::deleted.eq(false))
        .filter(p::name.ilike(format!("%{}%", text.trim())))
        .select((p::id, p::name))
        .limit(8)
        .load(&mut conn)
        .await?;

    let mut session = FsmStorage::load(app.storage.as_ref(), *user_id).await;
    if found.is_empty() {
        let markup = send_markup(&session);
        set_prompt(
            &app,
            *chat_id,
            &mut session,
            format!("🔎 «{}» не найдено. Попробуйте ещё раз:", text.trim()),
            markup,
        )
        .await?;
    } else {
        let rows = found
            .into_iter()
            .map(|(id, name)| {
                vec![InlineButton::new(name.unwrap_or_default(), format!("req_item:{id}"))]
            })
            .collect();
        set_prompt(
            &app,
            *chat_id,
            &mut session,
            "Выберите товар:",
            Markup::Inline(rows),
        )
        .await?;
    }
    app.storage.save(*user_id, &session).await;
    Ok(())
}

fn send_markup(session: &crate::chat::fsm::SessionState) -> Markup {
    let items: Vec<WoItem> = session.get("req_items").unwrap_or_default();
    if items.is_empty() {
        Markup::None
    } else {
        Markup::Inline(vec![vec![InlineButton::new("📨 Отправить заявку", "req_send:go")]])
    }
}

pub async fn on_pick_item(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    let Update::Callback {
        chat_id, user_id, data, ..
    } = &update
    else {
        return Ok(());
    };
    let Ok(product_id) = callback_payload(data, "req_item:").parse::<Uuid>() else {
        return Ok(());
    };

    use mirror_sync::schema::pos_product::dsl as p;
    let mut conn = get_conn(&app.ctx.pool).await?;
    let row: Option<(Option<String>, Option<Uuid>)> = p::pos_product
        .filter(p::id.eq(product_id))
        .select((p::name, p::main_unit))
        .first(&mut conn)
        .await
        .optional()?;
    let (name, main_unit) = row.unwrap_or((None, None));

    let mut session = FsmStorage::load(app.storage.as_ref(), *user_id).await;
    session.set(
        "req_pending",
        &WoItem {
            id: product_id,
            name: name.clone().unwrap_or_default(),
            quantity: String::new(),
            unit_label: "шт".into(),
            main_unit,
        },
    );
    session.state = Some("req:qty".into());
    set_prompt(
        &app,
        *chat_id,
        &mut session,
        format!("🔢 «{}» — введите количество:", name.unwrap_or_default()),
        Markup::None,
    )
    .await?;
    app.storage.save(*user_id, &session).await;
    Ok(())
}

pub async fn on_quantity(app: Arc<App>, update: Update) -> anyhow::Result<()> {
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

    let Some(mut pending) = session.get::<WoItem>("req_pending") else {
        return Ok(());
    };
    pending.quantity = qty.to_string();
    let mut items: Vec<WoItem> = session.get("req_items").unwrap_or_default();
    items.push(pending);
    session.set("req_items", &items);
    session.data.remove("req_pending");
    session.state = Some("req:item".into());

    let listing = items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {} — {}", i + 1, item.name, item.quantity))
        .collect::<Vec<_>>()
        .join("\n");
    let markup = send_markup(&session);
    set_prompt(
        &app,
        *chat_id,
        &mut session,
        format!("Заявка:\n{listing}\n\n➕ Добавьте ещё или отправьте:"),
        markup,
    )
    .await?;
    app.storage.save(*user_id, &session).await;
    Ok(())
}

pub async fn on_send(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    let Update::Callback {
        chat_id, user_id, ..
    } = &update
    else {
        return Ok(());
    };

    let mut session = FsmStorage::load(app.storage.as_ref(), *user_id).await;
    let items: Vec<WoItem> = session.get("req_items").unwrap_or_default();
    if items.is_empty() {
        set_prompt(&app, *chat_id, &mut session, "⚠️ В заявке нет позиций.", Markup::None)
            .await?;
        app.storage.save(*user_id, &session).await;
        return Ok(());
    }

    let section: String = session.get("req_section").unwrap_or_else(|| "kitchen".into());
    let row = ProductRequestRow {
        created_at: app.ctx.clock.now(),
        author_chat_id: *chat_id,
        author_name: session.get("author_name").unwrap_or_default(),
        department_id: session.get("req_department_id").unwrap_or(None),
        store_id: session.get("req_store_id").unwrap_or(None),
        section: section.clone(),
        items: serde_json::to_value(&items)?,
        status: "open".into(),
        receiver_msg_ids: json!({}),
        is_locked: false,
    };

    let request_id: i64 = {
        use mirror_sync::schema::product_request::dsl as r;
        let mut conn = get_conn(&app.ctx.pool).await?;
        diesel::insert_into(r::product_request)
            .values(&row)
            .returning(r::id)
            .get_result(&mut conn)
            .await?
    };
    info!(request_id, %section, "product request created");

    // Receivers of the section, every receiver as a fallback.
    let mut receivers = app
        .permissions
        .receiver_ids(&app.ctx.pool, Some(&section))
        .await?;
    if receivers.is_empty() {
        receivers = app.permissions.receiver_ids(&app.ctx.pool, None).await?;
    }

    let mut conn = get_conn(&app.ctx.pool).await?;
    let Some(request) = load(&mut conn, request_id).await? else {
        return Ok(());
    };
    let text = request_text(&request, &items);
    let mut receiver_msg_ids = serde_json::Map::new();
    for receiver in receivers {
        if let Ok(msg_id) = app
            .transport
            .send_message(
                receiver,
                Outgoing {
                    text: text.clone(),
                    markup: receiver_keyboard(request_id),
                },
            )
            .await
        {
            receiver_msg_ids.insert(receiver.to_string(), json!(msg_id));
        }
    }
    {
        use mirror_sync::schema::product_request::dsl as r;
        diesel::update(r::product_request.filter(r::id.eq(request_id)))
            .set(r::receiver_msg_ids.eq(serde_json::Value::Object(receiver_msg_ids)))
            .execute(&mut conn)
            .await?;
    }

    set_prompt(
        &app,
        *chat_id,
        &mut session,
        format!("📨 Заявка №{request_id} отправлена получателям."),
        Markup::None,
    )
    .await?;
    session.state = None;
    session.data.clear();
    app.storage.save(*user_id, &session).await;
    Ok(())
}

// ── receiver side ──

pub async fn on_approve(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    let Update::Callback {
        chat_id: receiver_chat,
        data,
        ..
    } = &update
    else {
        return Ok(());
    };
    let Ok(request_id) = callback_payload(data, "req_approve:").parse::<i64>() else {
        return Ok(());
    };

    let mut conn = get_conn(&app.ctx.pool).await?;
    if !try_lock(&mut conn, request_id).await? {
        app.transport
            .send_message(
                *receiver_chat,
                Outgoing::text("⚠️ Эту заявку уже обрабатывает другой получатель"),
            )
            .await?;
        return Ok(());
    }
    let Some(request) = load(&mut conn, request_id).await? else {
        return Ok(());
    };

    let Some(store_id) = request.store_id else {
        finish(&mut conn, request_id, "open").await?;
        app.transport
            .send_message(
                *receiver_chat,
                Outgoing::text("⚠️ У заявки не определён склад — согласуйте вручную в iiko"),
            )
            .await?;
        return Ok(());
    };

    // The approved request becomes an outgoing invoice, already processed.
    let items = request_items(&request);
    let document = InvoiceDocument {
        document_number: None,
        date_incoming: app.ctx.clock.now_pos_timestamp(),
        status: "PROCESSED".into(),
        comment: format!("Заявка №{request_id} ({})", request.author_name),
        store_id,
        counteragent_id: request.department_id.unwrap_or_else(Uuid::nil),
        items: items
            .iter()
            .filter_map(|item| {
                Some(InvoiceItem {
                    product_id: item.id,
                    amount: parse_quantity(&item.quantity).ok()?.to_f64()?,
                    measure_unit_id: item.main_unit,
                    container_id: None,
                    price: 0.0,
                    sum: 0.0,
                })
            })
            .collect(),
    };

    match app.pos.send_outgoing_invoice(&document).await {
        Ok(()) => {
            finish(&mut conn, request_id, "approved").await?;
            info!(request_id, "request approved, invoice sent");
            resolve_receiver_cards(&app, &request, "✅ Согласовано").await;
            app.transport
                .send_message(
                    request.author_chat_id,
                    Outgoing::text(format!("✅ Ваша заявка №{request_id} согласована")),
                )
                .await?;
        }
        Err(err) => {
            warn!(request_id, "request invoice failed: {err}");
            finish(&mut conn, request_id, "open").await?;
            app.transport
                .send_message(
                    *receiver_chat,
                    Outgoing::text("❌ Не удалось отправить накладную в iiko. Попробуйте позже."),
                )
                .await?;
        }
    }
    Ok(())
}

pub async fn on_edit(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    let Update::Callback {
        chat_id, user_id, message_id, data, ..
    } = &update
    else {
        return Ok(());
    };
    let payload = callback_payload(data, "req_edit:");

    // Two shapes: `req_edit:<id>` opens the item list, `req_edit:<id>:<idx>`
    // picks the item whose quantity changes.
    if let Some((request_id, idx)) = payload.split_once(':') {
        let (Ok(request_id), Ok(idx)) = (request_id.parse::<i64>(), idx.parse::<usize>()) else {
            return Ok(());
        };
        let mut session = FsmStorage::load(app.storage.as_ref(), *user_id).await;
        session.set("req_edit_id", &request_id);
        session.set("req_edit_idx", &idx);
        session.set("req_edit_card", message_id);
        session.state = Some("req_edit:qty".into());
        set_prompt(
            &app,
            *chat_id,
            &mut session,
            "🔢 Введите новое количество:",
            Markup::None,
        )
        .await?;
        app.storage.save(*user_id, &session).await;
        return Ok(());
    }

    let Ok(request_id) = payload.parse::<i64>() else {
        return Ok(());
    };
    let mut conn = get_conn(&app.ctx.pool).await?;
    let Some(request) = load(&mut conn, request_id).await? else {
        return Ok(());
    };
    let items = request_items(&request);
    let mut rows: Vec<Vec<InlineButton>> = items
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            vec![InlineButton::new(
                format!("{} — {}", item.name, item.quantity),
                format!("req_edit:{request_id}:{idx}"),
            )]
        })
        .collect();
    rows.push(vec![InlineButton::new(
        "✅ Согласовать",
        format!("req_approve:{request_id}"),
    )]);
    app.transport
        .edit_message(
            *chat_id,
            *message_id,
            Outgoing {
                text: format!("✏️ Заявка №{request_id}. Выберите позицию:"),
                markup: Markup::Inline(rows),
            },
        )
        .await?;
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

    let request_id: i64 = session.get("req_edit_id").unwrap_or_default();
    let idx: usize = session.get("req_edit_idx").unwrap_or(usize::MAX);

    let mut conn = get_conn(&app.ctx.pool).await?;
    let Some(request) = load(&mut conn, request_id).await? else {
        return Ok(());
    };
    let mut items = request_items(&request);
    if let Some(item) = items.get_mut(idx) {
        item.quantity = qty.to_string();
    }
    {
        use mirror_sync::schema::product_request::dsl as r;
        diesel::update(r::product_request.filter(r::id.eq(request_id)))
            .set(r::items.eq(serde_json::to_value(&items)?))
            .execute(&mut conn)
            .await?;
    }

    if let Some(card) = session.get::<i64>("req_edit_card") {
        let mut rows: Vec<Vec<InlineButton>> = items
            .iter()
            .enumerate()
            .map(|(idx, item)| {
                vec![InlineButton::new(
                    format!("{} — {}", item.name, item.quantity),
                    format!("req_edit:{request_id}:{idx}"),
                )]
            })
            .collect();
        rows.push(vec![InlineButton::new(
            "✅ Согласовать",
            format!("req_approve:{request_id}"),
        )]);
        let _ = app
            .transport
            .edit_message(
                *chat_id,
                card,
                Outgoing {
                    text: format!("✏️ Заявка №{request_id}. Выберите позицию:"),
                    markup: Markup::Inline(rows),
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

pub async fn on_cancel(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    let Update::Callback {
        chat_id: receiver_chat,
        data,
        ..
    } = &update
    else {
        return Ok(());
    };
    let Ok(request_id) = callback_payload(data, "req_cancel:").parse::<i64>() else {
        return Ok(());
    };

    let mut conn = get_conn(&app.ctx.pool).await?;
    if !try_lock(&mut conn, request_id).await? {
        app.transport
            .send_message(
                *receiver_chat,
                Outgoing::text("⚠️ Эту заявку уже обрабатывает другой получатель"),
            )
            .await?;
        return Ok(());
    }
    let Some(request) = load(&mut conn, request_id).await? else {
        return Ok(());
    };
    finish(&mut conn, request_id, "cancelled").await?;
    info!(request_id, "request cancelled");

    resolve_receiver_cards(&app, &request, "❌ Отменено").await;
    app.transport
        .send_message(
            request.author_chat_id,
            Outgoing::text(format!("❌ Ваша заявка №{request_id} отменена")),
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::classify_section;

    #[test]
    fn pastry_wins_over_kitchen_family() {
        assert_eq!(classify_section(Some("Кондитер")), "pastry");
        assert_eq!(classify_section(Some("Повар")), "kitchen");
        assert_eq!(classify_section(Some("Бармен")), "bar");
        assert_eq!(classify_section(None), "kitchen");
    }
}
