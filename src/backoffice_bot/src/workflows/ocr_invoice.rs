//! Incoming-invoice OCR pipeline: photos → staged document → POS import.
//!
//! Extraction itself is opaque (see [`crate::ocr`]); this module stages the
//! result, maps lines against the product mirror, computes warnings and
//! submits the approved document. Sum checks use a 0.5 absolute tolerance —
//! OCR noise — and a line flagged `rate_unknown` never produces a
//! sum-mismatch warning: the flag is authoritative.

use std::str::FromStr;
use std::sync::Arc;

use bigdecimal::{BigDecimal, ToPrimitive};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use mirror_sync::db::pool::get_conn;
use mirror_sync::ops_models::{OcrDocumentRow, OcrItemRow};
use upstream_clients::pos::documents::{InvoiceDocument, InvoiceItem};

use crate::app::App;
use crate::ocr::ExtractedItem;

/// Absolute tolerance for `price × amount ≈ total` comparisons.
pub fn sum_tolerance() -> BigDecimal {
    BigDecimal::from_str("0.5").expect("static decimal")
}

/// Warning for one extracted line, or `None` when the line is consistent.
///
/// `rate_unknown` suppresses the check entirely: when the VAT rate did not
/// resolve against the mapping base (a "22%" has been seen), the arithmetic
/// cannot be trusted to mean what it looks like.
pub fn line_warning(item: &ExtractedItem) -> Option<String> {
    if item.rate_unknown {
        return None;
    }
    let (Some(price), Some(total)) = (&item.price, &item.total) else {
        return None;
    };
    let expected = price * &item.amount;
    let delta = (&expected - total).abs();
    (delta > sum_tolerance()).then(|| {
        format!(
            "«{}»: цена × количество = {expected}, в документе {total}",
            item.name
        )
    })
}

/// Stages one extracted document: header row plus item rows, with product
/// matching by exact (trimmed, case-insensitive) name and computed warnings.
pub async fn stage_document(
    app: &Arc<App>,
    chat_id: i64,
    supplier_name: Option<&str>,
    items: &[ExtractedItem],
    extra_warnings: &[String],
) -> anyhow::Result<i64> {
    use mirror_sync::schema::ocr_document::dsl as d;
    use mirror_sync::schema::ocr_item::dsl as i_;
    use mirror_sync::schema::pos_product::dsl as p;
    use mirror_sync::schema::pos_supplier::dsl as s;

    let mut conn = get_conn(&app.ctx.pool).await?;

    // Supplier by name, best effort.
    let supplier: Option<(Uuid, Option<String>)> = match supplier_name {
        Some(name) => s::pos_supplier
            .filter(s::deleted.eq(false))
            .filter(s::name.ilike(name.trim()))
            .select((s::id, s::name))
            .first(&mut conn)
            .await
            .optional()?,
        None => None,
    };

    // Product match by lowercased name.
    let products: Vec<(Uuid, Option<String>)> = p::pos_product
        .filter(p::deleted.eq(false))
        .select((p::id, p::name))
        .load(&mut conn)
        .await?;
    let by_name: std::collections::HashMap<String, Uuid> = products
        .into_iter()
        .filter_map(|(id, name)| name.map(|n| (n.trim().to_lowercase(), id)))
        .collect();

    let mut warnings: Vec<String> = extra_warnings.to_vec();
    warnings.extend(items.iter().filter_map(line_warning));

    let document_id: i64 = diesel::insert_into(d::ocr_document)
        .values(&OcrDocumentRow {
            chat_id,
            supplier_id: supplier.as_ref().map(|(id, _)| *id),
            supplier_name: supplier
                .and_then(|(_, name)| name)
                .or_else(|| supplier_name.map(str::to_string)),
            store_id: None,
            status: "staged".into(),
            warnings: json!(warnings),
            created_at: app.ctx.clock.now(),
        })
        .returning(d::id)
        .get_result(&mut conn)
        .await?;

    let rows: Vec<OcrItemRow> = items
        .iter()
        .enumerate()
        .map(|(line_no, item)| OcrItemRow {
            document_id,
            line_no: line_no as i32 + 1,
            name: item.name.clone(),
            product_id: by_name.get(&item.name.trim().to_lowercase()).copied(),
            amount: item.amount.clone(),
            price: item.price.clone(),
            total: item.total.clone(),
            vat_percent: item.vat_percent.clone(),
            rate_unknown: item.rate_unknown,
        })
        .collect();
    diesel::insert_into(i_::ocr_item)
        .values(&rows)
        .execute(&mut conn)
        .await?;

    info!(document_id, lines = rows.len(), warnings = warnings.len(), "OCR document staged");
    Ok(document_id)
}

/// Submits a staged document to the POS as an incoming invoice. Lines without
/// a matched product are dropped; the caller shows them to the operator.
pub async fn submit_staged(
    app: &Arc<App>,
    document_id: i64,
    store_id: Uuid,
) -> anyhow::Result<usize> {
    use mirror_sync::schema::ocr_document::dsl as d;
    use mirror_sync::schema::ocr_item::dsl as i_;

    let mut conn = get_conn(&app.ctx.pool).await?;
    let supplier_id: Option<Uuid> = d::ocr_document
        .filter(d::id.eq(document_id))
        .select(d::supplier_id)
        .first::<Option<Uuid>>(&mut conn)
        .await?;
    let Some(supplier_id) = supplier_id else {
        anyhow::bail!("staged document {document_id} has no matched supplier");
    };

    let lines: Vec<(Option<Uuid>, BigDecimal, Option<BigDecimal>, Option<BigDecimal>)> =
        i_::ocr_item
            .filter(i_::document_id.eq(document_id))
            .order(i_::line_no.asc())
            .select((i_::product_id, i_::amount, i_::price, i_::total))
            .load(&mut conn)
            .await?;

    let items: Vec<InvoiceItem> = lines
        .iter()
        .filter_map(|(product_id, amount, price, total)| {
            Some(InvoiceItem {
                product_id: (*product_id)?,
                amount: amount.to_f64()?,
                measure_unit_id: None,
                container_id: None,
                price: price.as_ref().and_then(|p| p.to_f64()).unwrap_or(0.0),
                sum: total.as_ref().and_then(|t| t.to_f64()).unwrap_or(0.0),
            })
        })
        .collect();
    if items.is_empty() {
        anyhow::bail!("staged document {document_id} has no matched lines");
    }
    let sent = items.len();

    let document = InvoiceDocument {
        document_number: None,
        date_incoming: app.ctx.clock.now_pos_timestamp(),
        status: "PROCESSED".into(),
        comment: format!("OCR документ #{document_id}"),
        store_id,
        counteragent_id: supplier_id,
        items,
    };
    app.pos.send_incoming_invoice(&document).await?;

    diesel::update(d::ocr_document.filter(d::id.eq(document_id)))
        .set(d::status.eq("sent"))
        .execute(&mut conn)
        .await?;
    info!(document_id, lines = sent, "OCR invoice submitted");
    Ok(sent)
}

// ── handlers ──

/// Photo intake: run the extractor, stage every found document, offer the
/// operator a store to post each one to.
pub async fn on_photo(app: Arc<App>, update: crate::chat::Update) -> anyhow::Result<()> {
    let crate::chat::Update::Photo {
        chat_id,
        user_id,
        photos,
        ..
    } = &update
    else {
        return Ok(());
    };

    let Some(ctx) = app.user_ctx.get_or_load(&app.ctx.pool, *user_id).await? else {
        app.transport
            .send_message(
                *chat_id,
                crate::chat::Outgoing::text("⚠️ Сначала авторизуйтесь: /start"),
            )
            .await?;
        return Ok(());
    };

    let placeholder = app
        .transport
        .send_message(*chat_id, crate::chat::Outgoing::text("⏳ Распознаю накладную..."))
        .await?;

    let result = app.extractor.extract(photos).await?;
    if result.documents.is_empty() {
        app.transport
            .edit_message(
                *chat_id,
                placeholder,
                crate::chat::Outgoing::text("❌ Накладная не распознана. Снимите чётче."),
            )
            .await?;
        return Ok(());
    }

    let stores = match ctx.department_id {
        Some(dept) => crate::workflows::writeoff::stores_for_department(&app, dept).await?,
        None => Vec::new(),
    };

    for (doc_no, document) in result.documents.iter().enumerate() {
        let document_id = stage_document(
            &app,
            *chat_id,
            document.supplier_name.as_deref(),
            &document.items,
            &result.warnings,
        )
        .await?;

        let mut text = format!(
            "📄 Распознано: {} — {} позиций",
            document.supplier_name.as_deref().unwrap_or("поставщик не определён"),
            document.items.len()
        );
        for warning in result.warnings.iter().chain(
            document.items.iter().filter_map(|i| line_warning(i)).collect::<Vec<_>>().iter(),
        ) {
            text.push_str(&format!("\n⚠️ {warning}"));
        }
        let rows = stores
            .iter()
            .map(|(store_id, name)| {
                vec![crate::chat::InlineButton::new(
                    format!("📥 Провести на «{name}»"),
                    format!("ocr_store:{document_id}:{store_id}"),
                )]
            })
            .collect();
        let card = crate::chat::Outgoing {
            text,
            markup: crate::chat::Markup::Inline(rows),
        };
        // First document replaces the placeholder; the rest get own cards.
        if doc_no == 0 {
            app.transport.edit_message(*chat_id, placeholder, card).await?;
        } else {
            app.transport.send_message(*chat_id, card).await?;
        }
    }
    Ok(())
}

pub async fn on_pick_store(app: Arc<App>, update: crate::chat::Update) -> anyhow::Result<()> {
    let crate::chat::Update::Callback {
        chat_id,
        message_id,
        data,
        ..
    } = &update
    else {
        return Ok(());
    };
    let payload = crate::workflows::callback_payload(data, "ocr_store:");
    let Some((document_id, store_id)) = payload.split_once(':') else {
        return Ok(());
    };
    let (Ok(document_id), Ok(store_id)) =
        (document_id.parse::<i64>(), store_id.parse::<Uuid>())
    else {
        return Ok(());
    };

    let text = match submit_staged(&app, document_id, store_id).await {
        Ok(lines) => format!("✅ Накладная проведена ({lines} позиций)"),
        Err(err) => {
            tracing::warn!(document_id, "OCR submit failed: {err:#}");
            "❌ Не удалось провести накладную, проверьте сопоставление товаров".to_string()
        }
    };
    app.transport
        .edit_message(*chat_id, *message_id, crate::chat::Outgoing::text(text))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn line(amount: &str, price: Option<&str>, total: Option<&str>, rate_unknown: bool) -> ExtractedItem {
        ExtractedItem {
            name: "Мука".into(),
            amount: dec(amount),
            price: price.map(dec),
            total: total.map(dec),
            vat_percent: None,
            rate_unknown,
        }
    }

    #[test]
    fn consistent_line_has_no_warning() {
        assert!(line_warning(&line("2", Some("10"), Some("20"), false)).is_none());
        // Inside the 0.5 tolerance.
        assert!(line_warning(&line("2", Some("10"), Some("20.4"), false)).is_none());
    }

    #[test]
    fn mismatch_beyond_tolerance_warns() {
        let warning = line_warning(&line("2", Some("10"), Some("25"), false));
        assert!(warning.is_some());
        assert!(warning.unwrap().contains("Мука"));
    }

    #[test]
    fn rate_unknown_suppresses_mismatch_warning() {
        // Same arithmetic mismatch, but the unknown-rate flag wins.
        assert!(line_warning(&line("2", Some("10"), Some("25"), true)).is_none());
    }

    #[test]
    fn missing_price_or_total_is_not_checked() {
        assert!(line_warning(&line("2", None, Some("25"), false)).is_none());
        assert!(line_warning(&line("2", Some("10"), None, false)).is_none());
    }
}
