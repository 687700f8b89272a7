//! Authorisation: binding a chat user to an employee and a restaurant.
//!
//! `/start` → context cache → (miss) joined load → (no employee) last-name
//! FSM: one match binds immediately, several open a chooser, none re-prompts.
//! Binding writes the chat id onto the employee row, unbinding whoever held
//! it before, and restaurant selection writes the chosen department id.

use std::sync::Arc;

use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use tracing::info;
use uuid::Uuid;

use mirror_sync::db::pool::get_conn;

use crate::app::{main_menu_rows, App};
use crate::chat::fsm::FsmStorage;
use crate::chat::{InlineButton, Markup, Update};
use crate::workflows::{callback_payload, delete_user_message, set_prompt, show_menu};

pub async fn on_start(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    let chat_id = update.chat_id();
    let user_id = update.user_id();

    match app.user_ctx.get_or_load(&app.ctx.pool, user_id).await? {
        Some(ctx) => {
            let mut session = FsmStorage::load(app.storage.as_ref(), user_id).await;
            session.state = None;
            let greeting = format!(
                "👋 Здравствуйте, {}!\nРесторан: {}",
                ctx.first_name,
                ctx.department_name.as_deref().unwrap_or("не выбран")
            );
            show_menu(&app, chat_id, &mut session, greeting, main_menu_rows()).await?;
            app.storage.save(user_id, &session).await;
        }
        None => {
            let mut session = FsmStorage::load(app.storage.as_ref(), user_id).await;
            session.state = Some("auth:last_name".into());
            set_prompt(
                &app,
                chat_id,
                &mut session,
                "🔐 Авторизация.\nВведите вашу фамилию:",
                Markup::None,
            )
            .await?;
            app.storage.save(user_id, &session).await;
        }
    }
    Ok(())
}

/// `/cancel`: clear the FSM, clean tracked messages, restore the main menu.
pub async fn on_cancel(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    let chat_id = update.chat_id();
    let user_id = update.user_id();

    let session = FsmStorage::load(app.storage.as_ref(), user_id).await;
    for msg_id in session.tracked.all() {
        let _ = app.transport.delete_message(chat_id, msg_id).await;
    }
    app.storage.clear(user_id).await;

    let mut fresh = FsmStorage::load(app.storage.as_ref(), user_id).await;
    show_menu(&app, chat_id, &mut fresh, "🏠 Главное меню", main_menu_rows()).await?;
    app.storage.save(user_id, &fresh).await;
    Ok(())
}

pub async fn on_main_menu(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    // Navigation middleware already cleared any active session.
    let chat_id = update.chat_id();
    let user_id = update.user_id();
    if let Update::Text { message_id, .. } = update {
        delete_user_message(&app, chat_id, message_id).await;
    }
    let mut session = FsmStorage::load(app.storage.as_ref(), user_id).await;
    show_menu(&app, chat_id, &mut session, "🏠 Главное меню", main_menu_rows()).await?;
    app.storage.save(user_id, &session).await;
    Ok(())
}

/// Free-text input in `auth:last_name`.
pub async fn on_last_name(app: Arc<App>, update: Update) -> anyhow::Result<()> {
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

    let needle = text.trim().to_lowercase();
    let mut session = FsmStorage::load(app.storage.as_ref(), *user_id).await;
    if needle.is_empty() {
        set_prompt(
            &app,
            *chat_id,
            &mut session,
            "⚠️ Пустой ввод. Введите вашу фамилию:",
            Markup::None,
        )
        .await?;
        app.storage.save(*user_id, &session).await;
        return Ok(());
    }

    let matches = find_by_last_name(&app, &needle).await?;
    match matches.len() {
        0 => {
            set_prompt(
                &app,
                *chat_id,
                &mut session,
                format!("🔎 «{}» не найдено. Проверьте фамилию и введите ещё раз:", text.trim()),
                Markup::None,
            )
            .await?;
            app.storage.save(*user_id, &session).await;
        }
        1 => {
            bind_and_ask_department(&app, *chat_id, *user_id, matches[0].0, &mut session).await?;
            app.storage.save(*user_id, &session).await;
        }
        _ => {
            let rows = matches
                .iter()
                .map(|(id, name)| vec![InlineButton::new(name.clone(), format!("auth_pick:{id}"))])
                .collect();
            set_prompt(
                &app,
                *chat_id,
                &mut session,
                "Найдено несколько сотрудников, выберите себя:",
                Markup::Inline(rows),
            )
            .await?;
            app.storage.save(*user_id, &session).await;
        }
    }
    Ok(())
}

pub async fn on_pick_employee(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    let Update::Callback {
        chat_id,
        user_id,
        data,
        ..
    } = &update
    else {
        return Ok(());
    };
    let Ok(employee_id) = callback_payload(data, "auth_pick:").parse::<Uuid>() else {
        return Ok(());
    };

    let mut session = FsmStorage::load(app.storage.as_ref(), *user_id).await;
    bind_and_ask_department(&app, *chat_id, *user_id, employee_id, &mut session).await?;
    app.storage.save(*user_id, &session).await;
    Ok(())
}

pub async fn on_pick_department(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    let Update::Callback {
        chat_id,
        user_id,
        data,
        ..
    } = &update
    else {
        return Ok(());
    };
    let Ok(department_id) = callback_payload(data, "auth_dept:").parse::<Uuid>() else {
        return Ok(());
    };

    let mut conn = get_conn(&app.ctx.pool).await?;
    use mirror_sync::schema::pos_department::dsl as d;
    use mirror_sync::schema::pos_employee::dsl as e;

    let dept_name: Option<String> = d::pos_department
        .filter(d::id.eq(department_id))
        .select(d::name)
        .first::<Option<String>>(&mut conn)
        .await
        .optional()?
        .flatten();
    let dept_name = dept_name.unwrap_or_else(|| "ресторан".into());

    diesel::update(e::pos_employee.filter(e::chat_id.eq(user_id)))
        .set(e::department_id.eq(department_id))
        .execute(&mut conn)
        .await?;
    app.user_ctx.update_department(*user_id, department_id, &dept_name).await;
    info!(user_id, %department_id, "restaurant selected");

    let mut session = FsmStorage::load(app.storage.as_ref(), *user_id).await;
    session.state = None;
    if let Some(prompt) = session.tracked.prompt_msg_id.take() {
        let _ = app.transport.delete_message(*chat_id, prompt).await;
    }
    show_menu(
        &app,
        *chat_id,
        &mut session,
        format!("✅ Готово! Ресторан: {dept_name}"),
        main_menu_rows(),
    )
    .await?;
    app.storage.save(*user_id, &session).await;
    Ok(())
}

async fn find_by_last_name(app: &Arc<App>, needle: &str) -> anyhow::Result<Vec<(Uuid, String)>> {
    use mirror_sync::schema::pos_employee::dsl as e;
    let mut conn = get_conn(&app.ctx.pool).await?;
    // Case-insensitive match on the stored last name, soft-deleted excluded.
    let rows: Vec<(Uuid, Option<String>, Option<String>)> = e::pos_employee
        .filter(e::deleted.eq(false))
        .filter(e::last_name.is_not_null())
        .select((e::id, e::name, e::last_name))
        .load(&mut conn)
        .await?;
    Ok(rows
        .into_iter()
        .filter(|(_, _, last)| {
            last.as_deref()
                .is_some_and(|l| l.to_lowercase() == needle)
        })
        .map(|(id, name, last)| (id, name.or(last).unwrap_or_default()))
        .collect())
}

/// Binds the chat id to the employee (unbinding any previous holder of this
/// chat id) and moves the session to restaurant selection.
async fn bind_and_ask_department(
    app: &Arc<App>,
    chat_id: i64,
    user_id: i64,
    employee_id: Uuid,
    session: &mut crate::chat::fsm::SessionState,
) -> anyhow::Result<()> {
    use mirror_sync::schema::pos_department::dsl as d;
    use mirror_sync::schema::pos_employee::dsl as e;

    let mut conn = get_conn(&app.ctx.pool).await?;
    diesel::update(e::pos_employee.filter(e::chat_id.eq(user_id)))
        .set(e::chat_id.eq(None::<i64>))
        .execute(&mut conn)
        .await?;
    diesel::update(e::pos_employee.filter(e::id.eq(employee_id)))
        .set(e::chat_id.eq(user_id))
        .execute(&mut conn)
        .await?;
    app.user_ctx.invalidate(user_id).await;
    info!(user_id, %employee_id, "chat id bound to employee");

    let departments: Vec<(Uuid, Option<String>)> = d::pos_department
        .filter(d::deleted.eq(false))
        .filter(d::department_type.eq("DEPARTMENT"))
        .select((d::id, d::name))
        .order(d::name.asc())
        .load(&mut conn)
        .await?;

    let rows = departments
        .into_iter()
        .map(|(id, name)| {
            vec![InlineButton::new(
                name.unwrap_or_else(|| id.to_string()),
                format!("auth_dept:{id}"),
            )]
        })
        .collect();

    session.state = Some("auth:department".into());
    set_prompt(
        app,
        chat_id,
        session,
        "🏢 Выберите ваш ресторан:",
        Markup::Inline(rows),
    )
    .await?;
    Ok(())
}
