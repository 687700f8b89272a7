//! Outbound notification helpers: admin fan-out and user-facing errors.
//!
//! Chat-facing errors are one short sentence with an emoji prefix; details
//! stay in the logs (with secrets masked by the client layer).

use std::sync::Arc;

use tracing::warn;

use crate::chat::{ChatTransport, Outgoing};

/// Sends `text` to every chat id; per-recipient failures are logged and do
/// not stop the fan-out. Returns how many sends succeeded.
pub async fn fan_out(transport: &Arc<dyn ChatTransport>, chat_ids: &[i64], text: &str) -> usize {
    let mut sent = 0;
    for &chat_id in chat_ids {
        match transport.send_message(chat_id, Outgoing::text(text)).await {
            Ok(_) => sent += 1,
            Err(e) => warn!(chat_id, "notification failed: {e}"),
        }
    }
    sent
}

/// Technical alert to the system administrators (distinct from business
/// admins): persistent upstream failures, failed scheduler steps.
pub async fn alert_sysadmins(app: &Arc<crate::app::App>, text: &str) {
    let sysadmins = app.permissions.sysadmin_ids().await;
    if sysadmins.is_empty() {
        warn!("no sysadmins configured, alert stays in the log: {text}");
        return;
    }
    fan_out(&app.transport, &sysadmins, &format!("🛠 {text}")).await;
}

/// The "long step" pattern: post a ⏳ placeholder, run the work, edit the
/// placeholder with the outcome. Keeps exactly one message in chat either way.
pub async fn with_progress<F, Fut>(
    transport: &Arc<dyn ChatTransport>,
    chat_id: i64,
    label: &str,
    work: F,
) where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<String>>,
{
    let placeholder = transport
        .send_message(chat_id, Outgoing::text(format!("⏳ {label}...")))
        .await;
    let result = work().await;
    let text = match result {
        Ok(done) => format!("✅ {label}: {done}"),
        Err(err) => {
            warn!(label, "progress task failed: {err:#}");
            format!("❌ {label}: не получилось, попробуйте позже")
        }
    };
    match placeholder {
        Ok(msg_id) => {
            let _ = transport.edit_message(chat_id, msg_id, Outgoing::text(text)).await;
        }
        Err(_) => {
            let _ = transport.send_message(chat_id, Outgoing::text(text)).await;
        }
    }
}
