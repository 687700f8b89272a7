//! Write-off authoring: store → account → reason → items → quantities, then
//! submission for admin review.
//!
//! Store selection is policy, not a menu, for line staff: bartender-family
//! roles get the department's bar store, kitchen-family roles the kitchen
//! store; admins and unrecognised roles pick manually. The account list is
//! the ~142 POS accounts narrowed to the write-off ones by substring and
//! store segment — typically 3–5 remain.

use std::sync::Arc;

use bigdecimal::BigDecimal;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

use mirror_sync::db::pool::get_conn;
use mirror_sync::ops_models::PendingWriteoffRow;

use crate::app::{App, ListCaches};
use crate::chat::fsm::{FsmStorage, SessionState};
use crate::chat::{InlineButton, Markup, Outgoing, Update};
use crate::workflows::{callback_payload, delete_user_message, set_header, set_prompt};

pub const MAX_ITEMS: usize = 50;
pub const MAX_QUANTITY: f64 = 10_000.0;
const ACCOUNTS_PER_PAGE: usize = 10;

/// One authored line. Quantity is kept as the literal user string so nothing
/// is lost between chat and database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WoItem {
    pub id: Uuid,
    pub name: String,
    pub quantity: String,
    pub unit_label: String,
    pub main_unit: Option<Uuid>,
}

/// Store segment derived from the author's job title.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreSegment {
    Bar,
    Kitchen,
    Unknown,
}

impl StoreSegment {
    pub fn key(self) -> &'static str {
        match self {
            StoreSegment::Bar => "bar",
            StoreSegment::Kitchen => "kitchen",
            StoreSegment::Unknown => "all",
        }
    }
}

/// Role → segment. Substring families, not exact titles: "Старший бармен"
/// is still a bartender.
pub fn classify_role(role_name: Option<&str>) -> StoreSegment {
    let Some(role) = role_name else {
        return StoreSegment::Unknown;
    };
    let role = role.to_lowercase();
    const BAR: [&str; 3] = ["бармен", "кассир", "марафонец"];
    const KITCHEN: [&str; 5] = ["повар", "кондитер", "посудомой", "су-шеф", "шеф"];
    if BAR.iter().any(|m| role.contains(m)) {
        StoreSegment::Bar
    } else if KITCHEN.iter().any(|m| role.contains(m)) {
        StoreSegment::Kitchen
    } else {
        StoreSegment::Unknown
    }
}

/// Write-off account filter: name contains "списание", narrowed by segment.
pub fn filter_writeoff_accounts(
    accounts: &[(Uuid, String)],
    segment: StoreSegment,
) -> Vec<(Uuid, String)> {
    accounts
        .iter()
        .filter(|(_, name)| {
            let lower = name.to_lowercase();
            if !lower.contains("списание") {
                return false;
            }
            match segment {
                StoreSegment::Bar => lower.contains("бар"),
                StoreSegment::Kitchen => lower.contains("кухн"),
                StoreSegment::Unknown => true,
            }
        })
        .cloned()
        .collect()
}

/// Picks the auto store for a segment from the department's stores.
pub fn auto_store(
    stores: &[(Uuid, String)],
    segment: StoreSegment,
) -> Option<(Uuid, String)> {
    let prefix = match segment {
        StoreSegment::Bar => "Бар",
        StoreSegment::Kitchen => "Кухня",
        StoreSegment::Unknown => return None,
    };
    stores
        .iter()
        .find(|(_, name)| name.trim_start().starts_with(prefix))
        .cloned()
}

pub fn summary_text(
    author: &str,
    store: &str,
    account: &str,
    reason: &str,
    items: &[WoItem],
) -> String {
    let mut text = format!(
        "📄 Акт списания\n👤 Автор: {author}\n🏬 Склад: {store}\n📂 Счёт: {account}\n📝 Причина: {}",
        if reason.is_empty() { "—" } else { reason }
    );
    if !items.is_empty() {
        text.push_str("\n\nПозиции:");
        for (i, item) in items.iter().enumerate() {
            text.push_str(&format!(
                "\n  {}. {} — {} {}",
                i + 1,
                item.name,
                item.quantity,
                item.unit_label
            ));
        }
    }
    text
}

pub fn admin_keyboard(doc_id: &str) -> Markup {
    Markup::Inline(vec![
        vec![InlineButton::new("✅ Отправить в iiko", format!("woa_approve:{doc_id}"))],
        vec![InlineButton::new("✏️ Редактировать", format!("woa_edit:{doc_id}"))],
        vec![InlineButton::new("❌ Отклонить", format!("woa_reject:{doc_id}"))],
    ])
}

// ── cached lookups ──

pub async fn stores_for_department(
    app: &Arc<App>,
    department_id: Uuid,
) -> anyhow::Result<Vec<(Uuid, String)>> {
    if let Some(stores) = app.caches.stores_by_department.get(&department_id) {
        return Ok(stores);
    }
    use mirror_sync::schema::pos_store::dsl as s;
    let mut conn = get_conn(&app.ctx.pool).await?;
    let rows: Vec<(Uuid, Option<String>)> = s::pos_store
        .filter(s::deleted.eq(false))
        .filter(s::parent_id.eq(department_id))
        .select((s::id, s::name))
        .order(s::name.asc())
        .load(&mut conn)
        .await?;
    let stores: Vec<(Uuid, String)> = rows
        .into_iter()
        .map(|(id, name)| (id, name.unwrap_or_default()))
        .collect();
    app.caches
        .stores_by_department
        .insert(department_id, stores.clone(), ListCaches::lists_ttl());
    Ok(stores)
}

pub async fn writeoff_accounts(
    app: &Arc<App>,
    segment_key: &str,
) -> anyhow::Result<Vec<(Uuid, String)>> {
    if let Some(accounts) = app.caches.writeoff_accounts.get(&segment_key.to_string()) {
        return Ok(accounts);
    }
    use mirror_sync::schema::pos_entity::dsl as ent;
    let mut conn = get_conn(&app.ctx.pool).await?;
    let rows: Vec<(Uuid, Option<String>)> = ent::pos_entity
        .filter(ent::root_type.eq("Account"))
        .filter(ent::deleted.eq(false))
        .select((ent::id, ent::name))
        .load(&mut conn)
        .await?;
    let all: Vec<(Uuid, String)> = rows
        .into_iter()
        .map(|(id, name)| (id, name.unwrap_or_default()))
        .collect();
    let segment = match segment_key {
        "bar" => StoreSegment::Bar,
        "kitchen" => StoreSegment::Kitchen,
        _ => StoreSegment::Unknown,
    };
    let filtered = filter_writeoff_accounts(&all, segment);
    app.caches.writeoff_accounts.insert(
        segment_key.to_string(),
        filtered.clone(),
        ListCaches::lists_ttl(),
    );
    Ok(filtered)
}

async fn search_products(app: &Arc<App>, needle: &str) -> anyhow::Result<Vec<(Uuid, String, Option<Uuid>)>> {
    use mirror_sync::schema::pos_product::dsl as p;
    let mut conn = get_conn(&app.ctx.pool).await?;
    let rows: Vec<(Uuid, Option<String>, Option<Uuid>)> = p::pos_product
        .filter(p::deleted.eq(false))
        .filter(p::name.ilike(format!("%{needle}%")))
        .select((p::id, p::name, p::main_unit))
        .limit(8)
        .load(&mut conn)
        .await?;
    Ok(rows
        .into_iter()
        .map(|(id, name, unit)| (id, name.unwrap_or_default(), unit))
        .collect())
}

async fn unit_label(app: &Arc<App>, unit: Option<Uuid>) -> String {
    let Some(unit) = unit else {
        return "шт".into();
    };
    let units = match app.caches.measure_units.get(&()) {
        Some(units) => units,
        None => {
            use mirror_sync::schema::pos_entity::dsl as ent;
            let Ok(mut conn) = get_conn(&app.ctx.pool).await else {
                return "шт".into();
            };
            let rows: Vec<(Uuid, Option<String>)> = ent::pos_entity
                .filter(ent::root_type.eq("MeasureUnit"))
                .select((ent::id, ent::name))
                .load(&mut conn)
                .await
                .unwrap_or_default();
            let map: std::collections::HashMap<Uuid, String> = rows
                .into_iter()
                .filter_map(|(id, name)| name.map(|n| (id, n)))
                .collect();
            app.caches
                .measure_units
                .insert((), map.clone(), ListCaches::units_ttl());
            map
        }
    };
    units.get(&unit).cloned().unwrap_or_else(|| "шт".into())
}

// ── handlers ──

pub async fn on_start_writeoff(app: Arc<App>, update: Update) -> anyhow::Result<()> {
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

    let mut session = FsmStorage::load(app.storage.as_ref(), user_id).await;
    session.data.clear();
    session.set("department_id", &department_id);
    session.set("author_name", &ctx.employee_name);

    let stores = stores_for_department(&app, department_id).await?;
    let segment = if app.is_admin(user_id).await {
        StoreSegment::Unknown
    } else {
        classify_role(ctx.role_name.as_deref())
    };

    if let Some((store_id, store_name)) = auto_store(&stores, segment) {
        session.set("store_id", &store_id);
        session.set("store_name", &store_name);
        session.set("segment", &segment.key());
        ask_account(&app, chat_id, &mut session, segment).await?;
    } else {
        session.state = Some("wo:store".into());
        session.set("segment", &segment.key());
        let rows = stores
            .iter()
            .map(|(id, name)| vec![InlineButton::new(name.clone(), format!("wo_store:{id}"))])
            .collect();
        set_prompt(
            &app,
            chat_id,
            &mut session,
            "🏬 Выберите склад:",
            Markup::Inline(rows),
        )
        .await?;
    }
    app.storage.save(user_id, &session).await;
    Ok(())
}

pub async fn on_pick_store(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    let Update::Callback {
        chat_id,
        user_id,
        data,
        ..
    } = &update
    else {
        return Ok(());
    };
    let Ok(store_id) = callback_payload(data, "wo_store:").parse::<Uuid>() else {
        return Ok(());
    };

    let mut session = FsmStorage::load(app.storage.as_ref(), *user_id).await;
    let department_id: Option<Uuid> = session.get("department_id");
    let stores = match department_id {
        Some(dept) => stores_for_department(&app, dept).await?,
        None => Vec::new(),
    };
    let store_name = stores
        .iter()
        .find(|(id, _)| *id == store_id)
        .map(|(_, name)| name.clone())
        .unwrap_or_default();

    // Segment follows the chosen store name for the account filter.
    let segment = if store_name.starts_with("Бар") {
        StoreSegment::Bar
    } else if store_name.starts_with("Кухня") {
        StoreSegment::Kitchen
    } else {
        StoreSegment::Unknown
    };
    session.set("store_id", &store_id);
    session.set("store_name", &store_name);
    session.set("segment", &segment.key());
    ask_account(&app, *chat_id, &mut session, segment).await?;
    app.storage.save(*user_id, &session).await;
    Ok(())
}

fn account_page_markup(
    accounts: &[(Uuid, String)],
    segment_key: &str,
    page: usize,
) -> Markup {
    let mut rows: Vec<Vec<InlineButton>> = accounts
        .iter()
        .skip(page * ACCOUNTS_PER_PAGE)
        .take(ACCOUNTS_PER_PAGE)
        .map(|(id, name)| vec![InlineButton::new(name.clone(), format!("wo_account:{id}"))])
        .collect();
    if accounts.len() > ACCOUNTS_PER_PAGE {
        let pages = accounts.len().div_ceil(ACCOUNTS_PER_PAGE);
        let next = (page + 1) % pages;
        rows.push(vec![InlineButton::new(
            format!("▶️ Стр. {}/{}", page + 1, pages),
            format!("wo_accpage:{segment_key}:{next}"),
        )]);
    }
    Markup::Inline(rows)
}

async fn ask_account(
    app: &Arc<App>,
    chat_id: i64,
    session: &mut SessionState,
    segment: StoreSegment,
) -> anyhow::Result<()> {
    let accounts = writeoff_accounts(app, segment.key()).await?;
    session.state = Some("wo:account".into());
    set_prompt(
        app,
        chat_id,
        session,
        "📂 Выберите счёт списания:",
        account_page_markup(&accounts, segment.key(), 0),
    )
    .await?;
    Ok(())
}

pub async fn on_account_page(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    let Update::Callback {
        chat_id,
        user_id,
        data,
        ..
    } = &update
    else {
        return Ok(());
    };
    let payload = callback_payload(data, "wo_accpage:");
    let Some((segment_key, page)) = payload.split_once(':') else {
        return Ok(());
    };
    let page: usize = page.parse().unwrap_or(0);
    let accounts = writeoff_accounts(&app, segment_key).await?;

    let mut session = FsmStorage::load(app.storage.as_ref(), *user_id).await;
    set_prompt(
        &app,
        *chat_id,
        &mut session,
        "📂 Выберите счёт списания:",
        account_page_markup(&accounts, segment_key, page),
    )
    .await?;
    app.storage.save(*user_id, &session).await;
    Ok(())
}

pub async fn on_pick_account(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    let Update::Callback {
        chat_id,
        user_id,
        data,
        ..
    } = &update
    else {
        return Ok(());
    };
    let Ok(account_id) = callback_payload(data, "wo_account:").parse::<Uuid>() else {
        return Ok(());
    };

    let mut session = FsmStorage::load(app.storage.as_ref(), *user_id).await;
    let segment_key: String = session.get("segment").unwrap_or_else(|| "all".into());
    let account_name = writeoff_accounts(&app, &segment_key)
        .await?
        .into_iter()
        .find(|(id, _)| *id == account_id)
        .map(|(_, name)| name)
        .unwrap_or_default();

    session.set("account_id", &account_id);
    session.set("account_name", &account_name);
    session.state = Some("wo:reason".into());
    set_prompt(
        &app,
        *chat_id,
        &mut session,
        "📝 Укажите причину списания:",
        Markup::None,
    )
    .await?;
    app.storage.save(*user_id, &session).await;
    Ok(())
}

pub async fn on_reason(app: Arc<App>, update: Update) -> anyhow::Result<()> {
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

    let reason = text.trim();
    let mut session = FsmStorage::load(app.storage.as_ref(), *user_id).await;
    if reason.is_empty() {
        set_prompt(
            &app,
            *chat_id,
            &mut session,
            "⚠️ Причина не может быть пустой. Укажите причину списания:",
            Markup::None,
        )
        .await?;
        app.storage.save(*user_id, &session).await;
        return Ok(());
    }

    session.set("reason", &reason);
    session.set("items", &Vec::<WoItem>::new());
    session.state = Some("wo:item".into());
    refresh_header(&app, *chat_id, &mut session).await?;
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

async fn refresh_header(
    app: &Arc<App>,
    chat_id: i64,
    session: &mut SessionState,
) -> anyhow::Result<()> {
    let items: Vec<WoItem> = session.get("items").unwrap_or_default();
    let text = summary_text(
        &session.get::<String>("author_name").unwrap_or_default(),
        &session.get::<String>("store_name").unwrap_or_default(),
        &session.get::<String>("account_name").unwrap_or_default(),
        &session.get::<String>("reason").unwrap_or_default(),
        &items,
    );
    set_header(app, chat_id, session, text).await
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

    let needle = text.trim();
    let mut session = FsmStorage::load(app.storage.as_ref(), *user_id).await;

    let items: Vec<WoItem> = session.get("items").unwrap_or_default();
    if items.len() >= MAX_ITEMS {
        set_prompt(
            &app,
            *chat_id,
            &mut session,
            format!("⚠️ Не больше {MAX_ITEMS} позиций в одном акте. Нажмите «Отправить»."),
            send_markup(),
        )
        .await?;
        app.storage.save(*user_id, &session).await;
        return Ok(());
    }

    let found = search_products(&app, needle).await?;
    if found.is_empty() {
        set_prompt(
            &app,
            *chat_id,
            &mut session,
            format!("🔎 По запросу «{needle}» ничего не найдено. Попробуйте ещё раз:"),
            send_markup_if(!items.is_empty()),
        )
        .await?;
    } else {
        let rows = found
            .iter()
            .map(|(id, name, _)| vec![InlineButton::new(name.clone(), format!("wo_item:{id}"))])
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

fn send_markup() -> Markup {
    Markup::Inline(vec![vec![InlineButton::new(
        "📨 Отправить на проверку",
        "wo_send:go",
    )]])
}

fn send_markup_if(has_items: bool) -> Markup {
    if has_items {
        send_markup()
    } else {
        Markup::None
    }
}

pub async fn on_pick_item(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    let Update::Callback {
        chat_id,
        user_id,
        data,
        ..
    } = &update
    else {
        return Ok(());
    };
    let Ok(product_id) = callback_payload(data, "wo_item:").parse::<Uuid>() else {
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
    let label = unit_label(&app, main_unit).await;

    let mut session = FsmStorage::load(app.storage.as_ref(), *user_id).await;
    session.set("pending_item", &json!({
        "id": product_id,
        "name": name.clone().unwrap_or_default(),
        "unit_label": label.clone(),
        "main_unit": main_unit,
    }));
    session.state = Some("wo:qty".into());
    set_prompt(
        &app,
        *chat_id,
        &mut session,
        format!(
            "🔢 «{}» — введите количество ({label}):",
            name.unwrap_or_default()
        ),
        Markup::None,
    )
    .await?;
    app.storage.save(*user_id, &session).await;
    Ok(())
}

/// Positive, bounded, decimal-parsable.
pub fn parse_quantity(raw: &str) -> Result<BigDecimal, &'static str> {
    let normalised = raw.trim().replace(',', ".");
    let qty = BigDecimal::from_str(&normalised).map_err(|_| "не число")?;
    if qty <= BigDecimal::from(0) {
        return Err("должно быть больше нуля");
    }
    if qty > BigDecimal::from(MAX_QUANTITY as i64) {
        return Err("слишком большое количество");
    }
    Ok(qty)
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

    let pending: serde_json::Value = session.get("pending_item").unwrap_or_default();
    let mut items: Vec<WoItem> = session.get("items").unwrap_or_default();
    items.push(WoItem {
        id: pending
            .get("id")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(Uuid::nil),
        name: pending
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        quantity: qty.to_string(),
        unit_label: pending
            .get("unit_label")
            .and_then(|v| v.as_str())
            .unwrap_or("шт")
            .to_string(),
        main_unit: pending
            .get("main_unit")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok()),
    });
    session.set("items", &items);
    session.data.remove("pending_item");
    session.state = Some("wo:item".into());

    refresh_header(&app, *chat_id, &mut session).await?;
    set_prompt(
        &app,
        *chat_id,
        &mut session,
        "➕ Добавьте ещё товар (поиск по названию) или отправьте акт:",
        send_markup(),
    )
    .await?;
    app.storage.save(*user_id, &session).await;
    Ok(())
}

pub async fn on_send_for_review(app: Arc<App>, update: Update) -> anyhow::Result<()> {
    let Update::Callback {
        chat_id, user_id, ..
    } = &update
    else {
        return Ok(());
    };

    let mut session = FsmStorage::load(app.storage.as_ref(), *user_id).await;
    let items: Vec<WoItem> = session.get("items").unwrap_or_default();
    if items.is_empty() {
        set_prompt(
            &app,
            *chat_id,
            &mut session,
            "⚠️ В акте нет позиций. Добавьте хотя бы одну:",
            Markup::None,
        )
        .await?;
        app.storage.save(*user_id, &session).await;
        return Ok(());
    }

    let author_name: String = session.get("author_name").unwrap_or_default();
    let store_id: Uuid = session.get("store_id").unwrap_or_else(Uuid::nil);
    let store_name: String = session.get("store_name").unwrap_or_default();
    let account_id: Uuid = session.get("account_id").unwrap_or_else(Uuid::nil);
    let account_name: String = session.get("account_name").unwrap_or_default();
    let reason: String = session.get("reason").unwrap_or_default();
    let department_id: Option<Uuid> = session.get("department_id");

    // Short id for humans, UUID for the POS — the UUID is the idempotency key.
    let document_uuid = Uuid::new_v4();
    let doc_id = document_uuid.simple().to_string()[..8].to_string();

    let row = PendingWriteoffRow {
        doc_id: doc_id.clone(),
        document_uuid,
        created_at: app.ctx.clock.now(),
        author_chat_id: *chat_id,
        author_name: author_name.clone(),
        store_id,
        store_name: store_name.clone(),
        account_id,
        account_name: account_name.clone(),
        reason: reason.clone(),
        department_id,
        items: serde_json::to_value(&items)?,
        admin_msg_ids: json!({}),
        is_locked: false,
    };

    {
        use mirror_sync::schema::pending_writeoff::dsl as pw;
        let mut conn = get_conn(&app.ctx.pool).await?;
        diesel::insert_into(pw::pending_writeoff)
            .values(&row)
            .execute(&mut conn)
            .await?;
    }
    info!(%doc_id, author = %author_name, items = items.len(), "pending write-off created");

    // Fan the review card out to every admin, remembering message ids for
    // later keyboard cleanup.
    let admins = app.permissions.admin_ids(&app.ctx.pool).await?;
    let summary = format!(
        "{}\n🆔 {doc_id}",
        summary_text(&author_name, &store_name, &account_name, &reason, &items)
    );
    let mut admin_msg_ids = serde_json::Map::new();
    for admin in admins {
        if let Ok(msg_id) = app
            .transport
            .send_message(
                admin,
                Outgoing {
                    text: summary.clone(),
                    markup: admin_keyboard(&doc_id),
                },
            )
            .await
        {
            admin_msg_ids.insert(admin.to_string(), json!(msg_id));
        }
    }
    {
        use mirror_sync::schema::pending_writeoff::dsl as pw;
        let mut conn = get_conn(&app.ctx.pool).await?;
        diesel::update(pw::pending_writeoff.filter(pw::doc_id.eq(&doc_id)))
            .set(pw::admin_msg_ids.eq(serde_json::Value::Object(admin_msg_ids)))
            .execute(&mut conn)
            .await?;
    }

    // Wrap up the authoring session.
    if let Some(prompt) = session.tracked.prompt_msg_id.take() {
        let _ = app.transport.delete_message(*chat_id, prompt).await;
    }
    if let Some(header) = session.tracked.header_msg_id {
        let _ = app
            .transport
            .edit_message(
                *chat_id,
                header,
                Outgoing::text(format!("📨 Акт {doc_id} отправлен на проверку админам.")),
            )
            .await;
        session.tracked.header_msg_id = None;
    }
    session.state = None;
    session.data.clear();
    app.storage.save(*user_id, &session).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acc(name: &str) -> (Uuid, String) {
        (Uuid::new_v4(), name.to_string())
    }

    #[test]
    fn role_classification_families() {
        assert_eq!(classify_role(Some("Бармен")), StoreSegment::Bar);
        assert_eq!(classify_role(Some("Старший бармен")), StoreSegment::Bar);
        assert_eq!(classify_role(Some("Кассир")), StoreSegment::Bar);
        assert_eq!(classify_role(Some("Повар")), StoreSegment::Kitchen);
        assert_eq!(classify_role(Some("Кондитер")), StoreSegment::Kitchen);
        assert_eq!(classify_role(Some("Посудомойщица")), StoreSegment::Kitchen);
        assert_eq!(classify_role(Some("Менеджер")), StoreSegment::Unknown);
        assert_eq!(classify_role(None), StoreSegment::Unknown);
    }

    #[test]
    fn account_filter_by_substring_and_segment() {
        let accounts = vec![
            acc("Списание бар"),
            acc("Списание кухня"),
            acc("Выручка"),
            acc("Списание порча (бар)"),
        ];
        let bar = filter_writeoff_accounts(&accounts, StoreSegment::Bar);
        assert_eq!(bar.len(), 2);
        assert!(bar.iter().all(|(_, n)| n.to_lowercase().contains("бар")));

        let all = filter_writeoff_accounts(&accounts, StoreSegment::Unknown);
        assert_eq!(all.len(), 3, "revenue account must never pass the filter");
    }

    #[test]
    fn auto_store_picks_by_prefix() {
        let stores = vec![
            (Uuid::new_v4(), "Бар (Центр)".to_string()),
            (Uuid::new_v4(), "Кухня (Центр)".to_string()),
            (Uuid::new_v4(), "Хоз. товары (Центр)".to_string()),
        ];
        assert_eq!(
            auto_store(&stores, StoreSegment::Bar).unwrap().1,
            "Бар (Центр)"
        );
        assert_eq!(
            auto_store(&stores, StoreSegment::Kitchen).unwrap().1,
            "Кухня (Центр)"
        );
        assert!(auto_store(&stores, StoreSegment::Unknown).is_none());
    }

    #[test]
    fn quantity_validation() {
        assert!(parse_quantity("2.5").is_ok());
        assert!(parse_quantity("3,5").is_ok(), "comma decimal separator accepted");
        assert!(parse_quantity("0").is_err());
        assert!(parse_quantity("-1").is_err());
        assert!(parse_quantity("abc").is_err());
        assert!(parse_quantity("100000").is_err());
    }

    #[test]
    fn summary_lists_items_in_order() {
        let items = vec![
            WoItem {
                id: Uuid::new_v4(),
                name: "Молоко".into(),
                quantity: "2".into(),
                unit_label: "л".into(),
                main_unit: None,
            },
            WoItem {
                id: Uuid::new_v4(),
                name: "Лимон".into(),
                quantity: "0.3".into(),
                unit_label: "кг".into(),
                main_unit: None,
            },
        ];
        let text = summary_text("Иванов Иван", "Бар (Центр)", "Списание бар", "порча", &items);
        let milk = text.find("1. Молоко").unwrap();
        let lemon = text.find("2. Лимон").unwrap();
        assert!(milk < lemon);
        assert!(text.contains("Иванов Иван"));
    }
}
