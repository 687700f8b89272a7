//! Outgoing invoices: live documents and named templates.
//!
//! Item search is tree-scoped: the spreadsheet configures which roots of the
//! product-group hierarchy are exportable, and only descendants of those
//! roots are offered. PDF rendering of the finished document is an external
//! concern; the POS submission itself happens here.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bigdecimal::ToPrimitive;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use mirror_sync::db::pool::get_conn;
use mirror_sync::ops_models::{InvoiceTemplate, InvoiceTemplateRow};
use upstream_clients::pos::documents::{InvoiceDocument, InvoiceItem};

use crate::app::App;
use crate::chat::fsm::FsmStorage;
use crate::chat::{InlineButton, Markup, Outgoing, Update};
use crate::workflows::writeoff::parse_quantity;
use crate::workflows::{callback_payload, delete_user_message, set_prompt};

pub const EXPORT_GROUPS_TAB: &str = "Группы экспорта";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvItem {
    pub id: Uuid,
    pub name: String,
    pub quantity: String,
    pub main_unit: Option<Uuid>,
}

/// Expands the configured export-group roots into the full id set of their
/// subtree. `groups` is `(id, parent_id, name)` for every product group.
pub fn scope_group_ids(
    groups: &[(Uuid, Option<Uuid>, String)],
    root_names: &HashSet<String>,
) -> HashSet<Uuid> {
    let mut scope: HashSet<Uuid> = groups
        .iter()
        .filter(|(_, _, name)| root_names.contains(name))
        .map(|(id, _, _)| *id)
        .collect();

    // Children-of-scope until the frontier stops growing.
    let mut children: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for (id, parent, _) in groups {
        if let Some(parent) = parent {
            children.entry(*parent).or_default().push(*id);
        }
    }
    let mut frontier: Vec<Uuid> = scope.iter().copied().collect();
    while let Some(next) = frontier.pop() {
        for child in children.get(&next).into_iter().flatten() {
            if scope.insert(*child) {
                frontier.push(*child);
            }
        }
    }
    scope
}

async fn export_scope(app: &Arc<App>) -> anyhow::Result<HashSet<Uuid>> {
    let records = app.sheets.read_records(EXPORT_GROUPS_TAB).await.unwrap_or_default();
    let root_names: HashSet<String> = records
        .iter()
        .filter_map(|r| r.get("group_name"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if root_names.is_empty() {
        // Nothing configured — everything is in scope.
        return Ok(HashSet::new());
    }

    use mirror_sync::schema::pos_product_group::dsl as g;
    let mut conn = get_conn(&app.ctx.pool).await?;
    let rows: Vec<(Uuid, Option<Uuid>, Option<String>)> = g::pos_product_group
        .filter(g::deleted.eq(false))
        .select((g::id, g::parent_id, g::name))
        .load(&mut conn)
        .await?;
    let groups: Vec<(Uuid, Option<Uuid>, String)> = rows
        .into_iter()
        .map(|(id, parent, name)| (id, parent, name.unwrap_or_default()))
        .collect();
    Ok(scope_group_ids(&groups, &root_names))
}

async fn search_scoped_products(
    app: &Arc<App>,
    needle: &str,
) -> anyhow::Result<Vec<(Uuid, String, Option<Uuid>)>> {
    let scope = export_scope(app).await?;

    use mirror_sync::schema::pos_product::dsl as p;
    let mut conn = get_conn(&app.ctx.pool).await?;
    let rows: Vec<(Uuid, Option<String>, Option<Uuid>, Option<Uuid>)> = p::pos_product
        .filter(p::deleted.eq(false))
        .filter(p::name.ilike(format!("%{needle}%")))
        .select((p::id, p::name, p::main_unit, p::parent_id))
        .limit(30)
        .load(&mut conn)
        .await?;
    Ok(rows
        .into_iter()
        .filter(|(_, _, _, parent)| {
            scope.is_empty() || parent.is_some_and(|parent| scope.contains(&parent))
        })
        .take(8)
        .map(|(id, name, unit, _)| (id, name.unwrap_or_default(), unit))
        .collect())
}

// ── handlers ──

pub async fn on_start_invoice(app: Arc<App>, update: Update) -> anyhow::Result<()> {
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
    let Some(department_id) = ctx.department_id else {
        app.transport
            .send_message(chat_id, Outgoing::text("⚠️ Сначала выберите ресторан: /start"))
            .await?;
        return Ok(());
    };
    app.prewarm(Some(department_id));

    let stores =
        crate::workflows::writeoff::stores_for_department(&app, department_id).await?;
    let templates = my_templates(&app, user_id).await?;

    let mut rows: Vec<Vec<InlineButton>> = stores
        .iter()
        .map(|(id, name)| vec![InlineButton::new(name.clone(), format!("inv_store:{id}"))])
        .collect();
    for template in &templates {
        rows.push(vec![InlineButton::new(
            format!("📄 Шаблон: {}", template.name),
            format!("inv_tpl:{}", template.id),
        )]);
    }

    let mut session = FsmStorage::load(app.storage.as_ref(), user_id).await;
    session.data.clear();
    session.set("department_id", &department_id);
    session.state = Some("inv:store".into());
    set_prompt(
        &app,
        chat_id,
        &mut session,
        "📦 Расходная накладная. Выберите склад или шаблон:",
        Markup::Inline(rows),
    )
    .await?;
    app.storage.save(user_id, &session).await;
    Ok(())
}

async fn my_templates(app: &Arc<App>, owner: i64) -> anyhow::Result<Vec<InvoiceTemplate>> {
    use mirror_sync::schema::invoice_template::dsl as t;
    let mut conn = get_conn(&app.ctx.pool).await?;
    Ok(t::invoice_template
        .filter(t::owner_chat_id.eq(owner))
        .select(InvoiceTemplate::as_select())
        .order(t::name.asc())
        .load(&mut conn)
        .await?)
}

pub async fn on_pick_store(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    let Update::Callback {
        chat_id, user_id, data, ..
    } = &update
    else {
        return Ok(());
    };
    let Ok(store_id) = callback_payload(data, "inv_store:").parse::<Uuid>() else {
        return Ok(());
    };

    let mut session = FsmStorage::load(app.storage.as_ref(), *user_id).await;
    session.set("inv_store_id", &store_id);
    session.state = Some("inv:supplier".into());
    set_prompt(
        &app,
        *chat_id,
        &mut session,
        "🔎 Введите название контрагента для поиска:",
        Markup::None,
    )
    .await?;
    app.storage.save(*user_id, &session).await;
    Ok(())
}

pub async fn on_supplier_search(app: Arc<App>, update: Update) -> anyhow::Result<()> {
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

    use mirror_sync::schema::pos_supplier::dsl as s;
    let mut conn = get_conn(&app.ctx.pool).await?;
    let found: Vec<(Uuid, Option<String>)> = s::pos_supplier
        .filter(s::deleted.eq(false))
        .filter(s::name.ilike(format!("%{}%", text.trim())))
        .select((s::id, s::name))
        .limit(8)
        .load(&mut conn)
        .await?;

    let mut session = FsmStorage::load(app.storage.as_ref(), *user_id).await;
    if found.is_empty() {
        set_prompt(
            &app,
            *chat_id,
            &mut session,
            format!("🔎 «{}» не найдено. Попробуйте ещё раз:", text.trim()),
            Markup::None,
        )
        .await?;
    } else {
        let rows = found
            .into_iter()
            .map(|(id, name)| {
                vec![InlineButton::new(
                    name.unwrap_or_default(),
                    format!("inv_supplier:{id}"),
                )]
            })
            .collect();
        set_prompt(
            &app,
            *chat_id,
            &mut session,
            "Выберите контрагента:",
            Markup::Inline(rows),
        )
        .await?;
    }
    app.storage.save(*user_id, &session).await;
    Ok(())
}

pub async fn on_pick_supplier(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    let Update::Callback {
        chat_id, user_id, data, ..
    } = &update
    else {
        return Ok(());
    };
    let Ok(supplier_id) = callback_payload(data, "inv_supplier:").parse::<Uuid>() else {
        return Ok(());
    };

    let mut session = FsmStorage::load(app.storage.as_ref(), *user_id).await;
    session.set("inv_supplier_id", &supplier_id);
    session.set("inv_items", &Vec::<InvItem>::new());
    session.state = Some("inv:item".into());
    set_prompt(
        &app,
        *chat_id,
        &mut session,
        "🔎 Введите название товара для поиска:",
        Markup::None,
    )
    .await?;
    app.storage.save(*user_id, &session).await;
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

    let found = search_scoped_products(&app, text.trim()).await?;
    let mut session = FsmStorage::load(app.storage.as_ref(), *user_id).await;
    if found.is_empty() {
        let markup = invoice_actions_markup(&session);
        set_prompt(
            &app,
            *chat_id,
            &mut session,
            format!("🔎 «{}» не найдено среди экспортируемых групп:", text.trim()),
            markup,
        )
        .await?;
    } else {
        let rows = found
            .into_iter()
            .map(|(id, name, _)| vec![InlineButton::new(name, format!("inv_item:{id}"))])
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

fn invoice_actions_markup(session: &crate::chat::fsm::SessionState) -> Markup {
    let items: Vec<InvItem> = session.get("inv_items").unwrap_or_default();
    if items.is_empty() {
        return Markup::None;
    }
    Markup::Inline(vec![
        vec![InlineButton::new("📨 Отправить в iiko", "inv_send:go")],
        vec![InlineButton::new("💾 Сохранить как шаблон", "inv_tpl_save:go")],
    ])
}

pub async fn on_pick_item(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    let Update::Callback {
        chat_id, user_id, data, ..
    } = &update
    else {
        return Ok(());
    };
    let Ok(product_id) = callback_payload(data, "inv_item:").parse::<Uuid>() else {
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
        "inv_pending",
        &InvItem {
            id: product_id,
            name: name.clone().unwrap_or_default(),
            quantity: String::new(),
            main_unit,
        },
    );
    session.state = Some("inv:qty".into());
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

    let Some(mut pending) = session.get::<InvItem>("inv_pending") else {
        return Ok(());
    };
    pending.quantity = qty.to_string();
    let mut items: Vec<InvItem> = session.get("inv_items").unwrap_or_default();
    items.push(pending);
    session.set("inv_items", &items);
    session.data.remove("inv_pending");
    session.state = Some("inv:item".into());

    let listing = items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {} — {}", i + 1, item.name, item.quantity))
        .collect::<Vec<_>>()
        .join("\n");
    let markup = invoice_actions_markup(&session);
    set_prompt(
        &app,
        *chat_id,
        &mut session,
        format!("Позиции:\n{listing}\n\n➕ Добавьте ещё или завершите:"),
        markup,
    )
    .await?;
    app.storage.save(*user_id, &session).await;
    Ok(())
}

fn build_invoice(
    session: &crate::chat::fsm::SessionState,
    clock: &mirror_sync::tz::LocalClock,
    status: &str,
) -> Option<InvoiceDocument> {
    let store_id: Uuid = session.get("inv_store_id")?;
    let supplier_id: Uuid = session.get("inv_supplier_id")?;
    let items: Vec<InvItem> = session.get("inv_items").unwrap_or_default();
    if items.is_empty() {
        return None;
    }
    Some(InvoiceDocument {
        document_number: None,
        date_incoming: clock.now_pos_timestamp(),
        status: status.to_string(),
        comment: String::new(),
        store_id,
        counteragent_id: supplier_id,
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
    })
}

pub async fn on_send(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    let Update::Callback {
        chat_id, user_id, ..
    } = &update
    else {
        return Ok(());
    };

    let mut session = FsmStorage::load(app.storage.as_ref(), *user_id).await;
    let Some(document) = build_invoice(&session, &app.ctx.clock, "NEW") else {
        set_prompt(
            &app,
            *chat_id,
            &mut session,
            "⚠️ В накладной нет позиций.",
            Markup::None,
        )
        .await?;
        app.storage.save(*user_id, &session).await;
        return Ok(());
    };

    let outcome = match app.pos.send_outgoing_invoice(&document).await {
        Ok(()) => {
            info!(user_id, "outgoing invoice sent");
            "✅ Накладная отправлена в iiko".to_string()
        }
        Err(err) => format!("❌ Накладная не принята: {err}"),
    };
    set_prompt(&app, *chat_id, &mut session, outcome, Markup::None).await?;
    session.state = None;
    session.data.clear();
    app.storage.save(*user_id, &session).await;
    Ok(())
}

pub async fn on_template_save(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    let Update::Callback {
        chat_id, user_id, ..
    } = &update
    else {
        return Ok(());
    };
    let mut session = FsmStorage::load(app.storage.as_ref(), *user_id).await;
    session.state = Some("inv:tpl_name".into());
    set_prompt(
        &app,
        *chat_id,
        &mut session,
        "💾 Введите название шаблона:",
        Markup::None,
    )
    .await?;
    app.storage.save(*user_id, &session).await;
    Ok(())
}

pub async fn on_template_name(app: Arc<App>, update: Update) -> anyhow::Result<()> {
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

    let name = text.trim();
    let mut session = FsmStorage::load(app.storage.as_ref(), *user_id).await;
    if name.is_empty() {
        set_prompt(
            &app,
            *chat_id,
            &mut session,
            "⚠️ Название не может быть пустым. Введите название шаблона:",
            Markup::None,
        )
        .await?;
        app.storage.save(*user_id, &session).await;
        return Ok(());
    }

    let (Some(store_id), Some(supplier_id)) = (
        session.get::<Uuid>("inv_store_id"),
        session.get::<Uuid>("inv_supplier_id"),
    ) else {
        return Ok(());
    };
    let items: Vec<InvItem> = session.get("inv_items").unwrap_or_default();

    use mirror_sync::schema::invoice_template::dsl as t;
    let mut conn = get_conn(&app.ctx.pool).await?;
    diesel::insert_into(t::invoice_template)
        .values(&InvoiceTemplateRow {
            owner_chat_id: *user_id,
            name: name.to_string(),
            store_id,
            supplier_id,
            items: serde_json::to_value(&items)?,
            created_at: app.ctx.clock.now(),
        })
        .execute(&mut conn)
        .await?;
    info!(user_id, name, "invoice template saved");

    set_prompt(
        &app,
        *chat_id,
        &mut session,
        format!("💾 Шаблон «{name}» сохранён."),
        Markup::None,
    )
    .await?;
    session.state = None;
    session.data.clear();
    app.storage.save(*user_id, &session).await;
    Ok(())
}

pub async fn on_template_use(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    let Update::Callback {
        chat_id, user_id, data, ..
    } = &update
    else {
        return Ok(());
    };
    let Ok(template_id) = callback_payload(data, "inv_tpl:").parse::<i64>() else {
        return Ok(());
    };

    use mirror_sync::schema::invoice_template::dsl as t;
    let mut conn = get_conn(&app.ctx.pool).await?;
    let template: Option<InvoiceTemplate> = t::invoice_template
        .filter(t::id.eq(template_id))
        .filter(t::owner_chat_id.eq(user_id))
        .select(InvoiceTemplate::as_select())
        .first(&mut conn)
        .await
        .optional()?;
    let Some(template) = template else {
        return Ok(());
    };

    let items: Vec<InvItem> = serde_json::from_value(template.items.clone()).unwrap_or_default();
    let listing = items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {} — {}", i + 1, item.name, item.quantity))
        .collect::<Vec<_>>()
        .join("\n");

    let mut session = FsmStorage::load(app.storage.as_ref(), *user_id).await;
    session.set("inv_store_id", &template.store_id);
    session.set("inv_supplier_id", &template.supplier_id);
    session.set("inv_items", &items);
    session.state = Some("inv:item".into());
    let markup = invoice_actions_markup(&session);
    set_prompt(
        &app,
        *chat_id,
        &mut session,
        format!(
            "📄 Шаблон «{}»:\n{listing}\n\nМожно добавить позиции или отправить:",
            template.name
        ),
        markup,
    )
    .await?;
    app.storage.save(*user_id, &session).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_includes_descendants_only_of_configured_roots() {
        let root = Uuid::new_v4();
        let child = Uuid::new_v4();
        let grandchild = Uuid::new_v4();
        let other = Uuid::new_v4();
        let groups = vec![
            (root, None, "Бар".to_string()),
            (child, Some(root), "Крепкий алкоголь".to_string()),
            (grandchild, Some(child), "Виски".to_string()),
            (other, None, "Кухня".to_string()),
        ];
        let mut roots = HashSet::new();
        roots.insert("Бар".to_string());

        let scope = scope_group_ids(&groups, &roots);
        assert!(scope.contains(&root));
        assert!(scope.contains(&child));
        assert!(scope.contains(&grandchild));
        assert!(!scope.contains(&other));
    }

    #[test]
    fn empty_roots_yield_empty_scope() {
        let groups = vec![(Uuid::new_v4(), None, "Бар".to_string())];
        let scope = scope_group_ids(&groups, &HashSet::new());
        assert!(scope.is_empty());
    }
}
