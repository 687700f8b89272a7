//! Operator-facing workflows.
//!
//! Every handler here honours the single-window contract: callbacks edit
//! their own message, reply-menu messages are tracked and deleted before a
//! replacement is sent, user text input is deleted after consumption, and
//! validation errors edit the existing prompt instead of posting a new one.

pub mod auth;
pub mod invoice;
pub mod min_stock;
pub mod negative_transfer;
pub mod ocr_invoice;
pub mod requests;
pub mod stoplist;
pub mod sync_ops;
pub mod writeoff;
pub mod writeoff_review;

use std::sync::Arc;

use crate::app::App;
use crate::chat::fsm::SessionState;
use crate::chat::{Markup, Outgoing};

/// Payload after a callback prefix: `"wo_store:<uuid>"` → `"<uuid>"`.
pub fn callback_payload<'a>(data: &'a str, prefix: &str) -> &'a str {
    data.strip_prefix(prefix).unwrap_or("")
}

/// Edits the tracked prompt in place, or sends and tracks it if absent.
/// This is UX invariant "one prompt per step" in executable form.
pub async fn set_prompt(
    app: &Arc<App>,
    chat_id: i64,
    session: &mut SessionState,
    text: impl Into<String>,
    markup: Markup,
) -> anyhow::Result<()> {
    let msg = Outgoing {
        text: text.into(),
        markup,
    };
    match session.tracked.prompt_msg_id {
        Some(msg_id) => {
            if app.transport.edit_message(chat_id, msg_id, msg.clone()).await.is_err() {
                // Prompt vanished (user cleared history) — recreate it.
                let new_id = app.transport.send_message(chat_id, msg).await?;
                session.tracked.prompt_msg_id = Some(new_id);
            }
        }
        None => {
            let new_id = app.transport.send_message(chat_id, msg).await?;
            session.tracked.prompt_msg_id = Some(new_id);
        }
    }
    Ok(())
}

/// Same discipline for the running summary header.
pub async fn set_header(
    app: &Arc<App>,
    chat_id: i64,
    session: &mut SessionState,
    text: impl Into<String>,
) -> anyhow::Result<()> {
    let msg = Outgoing::text(text);
    match session.tracked.header_msg_id {
        Some(msg_id) => {
            if app.transport.edit_message(chat_id, msg_id, msg.clone()).await.is_err() {
                let new_id = app.transport.send_message(chat_id, msg).await?;
                session.tracked.header_msg_id = Some(new_id);
            }
        }
        None => {
            let new_id = app.transport.send_message(chat_id, msg).await?;
            session.tracked.header_msg_id = Some(new_id);
        }
    }
    Ok(())
}

/// Reply-keyboard menus: delete the previous menu message, send the new one,
/// track its id.
pub async fn show_menu(
    app: &Arc<App>,
    chat_id: i64,
    session: &mut SessionState,
    text: impl Into<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    if let Some(old) = session.tracked.menu_msg_id.take() {
        let _ = app.transport.delete_message(chat_id, old).await;
    }
    let msg_id = app
        .transport
        .send_message(chat_id, Outgoing::with_reply(text, rows))
        .await?;
    session.tracked.menu_msg_id = Some(msg_id);
    Ok(())
}

/// User text input is consumed, not kept in chat.
pub async fn delete_user_message(app: &Arc<App>, chat_id: i64, message_id: i64) {
    let _ = app.transport.delete_message(chat_id, message_id).await;
}

#[cfg(test)]
mod tests {
    use super::callback_payload;

    #[test]
    fn payload_extraction() {
        assert_eq!(callback_payload("wo_store:abc", "wo_store:"), "abc");
        assert_eq!(callback_payload("abc", "wo_store:"), "");
    }
}
