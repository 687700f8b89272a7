//! Bot-API HTTP adapter: the one concrete [`ChatTransport`].
//!
//! Talks to a Bot-API-compatible server over plain HTTPS (send / edit /
//! delete / answerCallback / pin plus a long-poll update loop). Nothing else
//! in the workspace knows this dialect; swapping the transport means swapping
//! this file.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{ChatError, ChatTransport, Markup, Outgoing, Update};

const POLL_TIMEOUT_SECS: u64 = 25;

pub struct HttpTransport {
    http: reqwest::Client,
    base: String,
    token: SecretString,
}

impl HttpTransport {
    pub fn new(api_base: &str, token: SecretString) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .build()
            .map_err(|e| ChatError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base: api_base.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.base, self.token.expose_secret())
    }

    async fn call(&self, method: &str, body: Value) -> Result<Value, ChatError> {
        let resp = self
            .http
            .post(self.method_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Transport(format!("{method}: {e}")))?;
        let value: Value = resp
            .json()
            .await
            .map_err(|e| ChatError::Transport(format!("{method}: {e}")))?;
        if value.get("ok").and_then(Value::as_bool) != Some(true) {
            let description = value
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            if description.contains("not found") || description.contains("to delete") {
                return Err(ChatError::NotFound);
            }
            return Err(ChatError::Transport(format!("{method}: {description}")));
        }
        Ok(value.get("result").cloned().unwrap_or(Value::Null))
    }

    fn markup_json(markup: &Markup) -> Option<Value> {
        match markup {
            Markup::None => None,
            Markup::Inline(rows) => Some(json!({
                "inline_keyboard": rows
                    .iter()
                    .map(|row| {
                        row.iter()
                            .map(|b| json!({"text": b.text, "callback_data": b.callback_data}))
                            .collect::<Vec<_>>()
                    })
                    .collect::<Vec<_>>()
            })),
            Markup::Reply(rows) => Some(json!({
                "keyboard": rows,
                "resize_keyboard": true
            })),
            Markup::RemoveReply => Some(json!({"remove_keyboard": true})),
        }
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, ChatError> {
        let file = self.call("getFile", json!({"file_id": file_id})).await?;
        let path = file
            .get("file_path")
            .and_then(Value::as_str)
            .ok_or_else(|| ChatError::Transport("getFile returned no path".into()))?;
        let url = format!(
            "{}/file/bot{}/{path}",
            self.base,
            self.token.expose_secret()
        );
        let bytes = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn map_update(&self, raw: &Value) -> Option<(i64, MappedUpdate)> {
        let update_id = raw.get("update_id").and_then(Value::as_i64)?;
        if let Some(message) = raw.get("message") {
            let chat_id = message.get("chat")?.get("id").and_then(Value::as_i64)?;
            let user_id = message.get("from")?.get("id").and_then(Value::as_i64)?;
            let message_id = message.get("message_id").and_then(Value::as_i64)?;
            if let Some(text) = message.get("text").and_then(Value::as_str) {
                return Some((
                    update_id,
                    MappedUpdate::Ready(Update::Text {
                        chat_id,
                        user_id,
                        message_id,
                        text: text.to_string(),
                    }),
                ));
            }
            if let Some(photos) = message.get("photo").and_then(Value::as_array) {
                // The largest rendition is the last entry.
                let file_id = photos
                    .last()
                    .and_then(|p| p.get("file_id"))
                    .and_then(Value::as_str)?;
                return Some((
                    update_id,
                    MappedUpdate::Photo {
                        chat_id,
                        user_id,
                        message_id,
                        file_id: file_id.to_string(),
                    },
                ));
            }
            return None;
        }
        if let Some(callback) = raw.get("callback_query") {
            let callback_id = callback.get("id").and_then(Value::as_str)?.to_string();
            let user_id = callback.get("from")?.get("id").and_then(Value::as_i64)?;
            let message = callback.get("message")?;
            let chat_id = message.get("chat")?.get("id").and_then(Value::as_i64)?;
            let message_id = message.get("message_id").and_then(Value::as_i64)?;
            let data = callback.get("data").and_then(Value::as_str)?.to_string();
            return Some((
                update_id,
                MappedUpdate::Ready(Update::Callback {
                    callback_id,
                    chat_id,
                    user_id,
                    message_id,
                    data,
                }),
            ));
        }
        None
    }

    /// Long-poll loop feeding `on_update` forever.
    pub async fn poll<F>(self: Arc<Self>, on_update: F)
    where
        F: Fn(Update) + Send + Sync + 'static,
    {
        let mut offset: i64 = 0;
        loop {
            let result = self
                .call(
                    "getUpdates",
                    json!({"offset": offset, "timeout": POLL_TIMEOUT_SECS}),
                )
                .await;
            let updates = match result {
                Ok(Value::Array(updates)) => updates,
                Ok(_) => Vec::new(),
                Err(err) => {
                    warn!("getUpdates failed: {err}");
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    continue;
                }
            };
            for raw in &updates {
                let Some((update_id, mapped)) = self.map_update(raw) else {
                    if let Some(id) = raw.get("update_id").and_then(Value::as_i64) {
                        offset = offset.max(id + 1);
                    }
                    continue;
                };
                offset = offset.max(update_id + 1);
                match mapped {
                    MappedUpdate::Ready(update) => on_update(update),
                    MappedUpdate::Photo {
                        chat_id,
                        user_id,
                        message_id,
                        file_id,
                    } => match self.download_file(&file_id).await {
                        Ok(bytes) => on_update(Update::Photo {
                            chat_id,
                            user_id,
                            message_id,
                            photos: vec![bytes],
                        }),
                        Err(err) => warn!("photo download failed: {err}"),
                    },
                }
            }
            debug!(offset, "poll round complete");
        }
    }
}

enum MappedUpdate {
    Ready(Update),
    Photo {
        chat_id: i64,
        user_id: i64,
        message_id: i64,
        file_id: String,
    },
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn send_message(&self, chat_id: i64, msg: Outgoing) -> Result<i64, ChatError> {
        let mut body = json!({"chat_id": chat_id, "text": msg.text});
        if let Some(markup) = Self::markup_json(&msg.markup) {
            body["reply_markup"] = markup;
        }
        let result = self.call("sendMessage", body).await?;
        result
            .get("message_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| ChatError::Transport("sendMessage returned no id".into()))
    }

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        msg: Outgoing,
    ) -> Result<(), ChatError> {
        let mut body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": msg.text,
        });
        if let Some(markup) = Self::markup_json(&msg.markup) {
            body["reply_markup"] = markup;
        }
        self.call("editMessageText", body).await?;
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), ChatError> {
        self.call(
            "deleteMessage",
            json!({"chat_id": chat_id, "message_id": message_id}),
        )
        .await?;
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
    ) -> Result<(), ChatError> {
        let mut body = json!({"callback_query_id": callback_id});
        if let Some(text) = text {
            body["text"] = json!(text);
        }
        self.call("answerCallbackQuery", body).await?;
        Ok(())
    }

    async fn pin_message(&self, chat_id: i64, message_id: i64) -> Result<(), ChatError> {
        self.call(
            "pinChatMessage",
            json!({"chat_id": chat_id, "message_id": message_id, "disable_notification": true}),
        )
        .await?;
        Ok(())
    }
}
