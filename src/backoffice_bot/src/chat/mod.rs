//! The chat seam.
//!
//! An external library delivers messages; the surface this crate consumes is
//! exactly [`ChatTransport`]: send, edit, delete, answer a callback, pin.
//! Any library exposing those five verbs can be wired in. Tests use
//! [`MockTransport`], which records every call.

pub mod fsm;
pub mod http_transport;
pub mod middleware;
pub mod router;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// The message is gone or was never ours — cleanup paths ignore this.
    #[error("message not found")]
    NotFound,

    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

impl InlineButton {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Markup {
    #[default]
    None,
    Inline(Vec<Vec<InlineButton>>),
    Reply(Vec<Vec<String>>),
    RemoveReply,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outgoing {
    pub text: String,
    pub markup: Markup,
}

impl Outgoing {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            markup: Markup::None,
        }
    }

    pub fn with_inline(text: impl Into<String>, rows: Vec<Vec<InlineButton>>) -> Self {
        Self {
            text: text.into(),
            markup: Markup::Inline(rows),
        }
    }

    pub fn with_reply(text: impl Into<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            text: text.into(),
            markup: Markup::Reply(rows),
        }
    }
}

/// An incoming event from the transport. Conversations are keyed by
/// `user_id`; per-key dispatch (no two handlers for one user at once) is the
/// transport library's guarantee.
#[derive(Debug, Clone)]
pub enum Update {
    Text {
        chat_id: i64,
        user_id: i64,
        message_id: i64,
        text: String,
    },
    Callback {
        callback_id: String,
        chat_id: i64,
        user_id: i64,
        message_id: i64,
        data: String,
    },
    /// Photo message, pages already downloaded by the transport adapter.
    Photo {
        chat_id: i64,
        user_id: i64,
        message_id: i64,
        photos: Vec<Vec<u8>>,
    },
}

impl Update {
    pub fn user_id(&self) -> i64 {
        match self {
            Update::Text { user_id, .. }
            | Update::Callback { user_id, .. }
            | Update::Photo { user_id, .. } => *user_id,
        }
    }

    pub fn chat_id(&self) -> i64 {
        match self {
            Update::Text { chat_id, .. }
            | Update::Callback { chat_id, .. }
            | Update::Photo { chat_id, .. } => *chat_id,
        }
    }
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Sends a message, returning its id for later edit/delete tracking.
    async fn send_message(&self, chat_id: i64, msg: Outgoing) -> Result<i64, ChatError>;
    async fn edit_message(&self, chat_id: i64, message_id: i64, msg: Outgoing)
        -> Result<(), ChatError>;
    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), ChatError>;
    /// Acknowledges a callback press (clears the client-side spinner); the
    /// optional text shows as a toast.
    async fn answer_callback(&self, callback_id: &str, text: Option<&str>)
        -> Result<(), ChatError>;
    async fn pin_message(&self, chat_id: i64, message_id: i64) -> Result<(), ChatError>;
}

/// Per-user serialized dispatch: updates from one user are handled strictly
/// in order, one at a time; different users interleave freely. This is the
/// "per-key dispatch" guarantee FSM linearity rests on.
pub mod per_user {
    use super::Update;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    pub struct PerUserQueue {
        senders: Mutex<HashMap<i64, mpsc::UnboundedSender<Update>>>,
    }

    impl Default for PerUserQueue {
        fn default() -> Self {
            Self::new()
        }
    }

    impl PerUserQueue {
        pub fn new() -> Self {
            Self {
                senders: Mutex::new(HashMap::new()),
            }
        }

        /// Enqueues the update on its user's worker, creating the worker on
        /// first contact.
        pub fn dispatch<F, Fut>(&self, update: Update, handle: F)
        where
            F: Fn(Update) -> Fut + Send + Sync + 'static,
            Fut: std::future::Future<Output = ()> + Send,
        {
            let user_id = update.user_id();
            let mut senders = self.senders.lock().expect("per-user queue poisoned");
            if let Some(tx) = senders.get(&user_id) {
                if tx.send(update.clone()).is_ok() {
                    return;
                }
                // Worker died; fall through and restart it.
            }
            let (tx, mut rx) = mpsc::unbounded_channel();
            tx.send(update).expect("fresh channel");
            senders.insert(user_id, tx);
            tokio::spawn(async move {
                while let Some(update) = rx.recv().await {
                    handle(update).await;
                }
            });
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        fn text(user_id: i64, n: usize) -> Update {
            Update::Text {
                chat_id: user_id,
                user_id,
                message_id: n as i64,
                text: format!("msg {n}"),
            }
        }

        #[tokio::test]
        async fn one_user_is_serialized() {
            let queue = PerUserQueue::new();
            let active = Arc::new(AtomicUsize::new(0));
            let overlaps = Arc::new(AtomicUsize::new(0));
            let done = Arc::new(AtomicUsize::new(0));

            for n in 0..10 {
                let active = Arc::clone(&active);
                let overlaps = Arc::clone(&overlaps);
                let done = Arc::clone(&done);
                queue.dispatch(text(7, n), move |_u| {
                    let active = Arc::clone(&active);
                    let overlaps = Arc::clone(&overlaps);
                    let done = Arc::clone(&done);
                    async move {
                        if active.fetch_add(1, Ordering::SeqCst) > 0 {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        done.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }

            for _ in 0..200 {
                if done.load(Ordering::SeqCst) == 10 {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
            assert_eq!(done.load(Ordering::SeqCst), 10);
            assert_eq!(overlaps.load(Ordering::SeqCst), 0, "same-user handlers overlapped");
        }
    }
}

/// Recording transport for tests.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        Send { chat_id: i64, msg_id: i64, text: String },
        Edit { chat_id: i64, msg_id: i64, text: String },
        Delete { chat_id: i64, msg_id: i64 },
        Answer { callback_id: String, text: Option<String> },
        Pin { chat_id: i64, msg_id: i64 },
    }

    #[derive(Default)]
    pub struct MockTransport {
        next_id: AtomicI64,
        pub calls: Mutex<Vec<Call>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self {
                next_id: AtomicI64::new(100),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatTransport for MockTransport {
        async fn send_message(&self, chat_id: i64, msg: Outgoing) -> Result<i64, ChatError> {
            let msg_id = self.next_id.fetch_add(1, Ordering::SeqCst);
            self.calls.lock().unwrap().push(Call::Send {
                chat_id,
                msg_id,
                text: msg.text,
            });
            Ok(msg_id)
        }

        async fn edit_message(
            &self,
            chat_id: i64,
            message_id: i64,
            msg: Outgoing,
        ) -> Result<(), ChatError> {
            self.calls.lock().unwrap().push(Call::Edit {
                chat_id,
                msg_id: message_id,
                text: msg.text,
            });
            Ok(())
        }

        async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), ChatError> {
            self.calls.lock().unwrap().push(Call::Delete {
                chat_id,
                msg_id: message_id,
            });
            Ok(())
        }

        async fn answer_callback(
            &self,
            callback_id: &str,
            text: Option<&str>,
        ) -> Result<(), ChatError> {
            self.calls.lock().unwrap().push(Call::Answer {
                callback_id: callback_id.to_string(),
                text: text.map(str::to_string),
            });
            Ok(())
        }

        async fn pin_message(&self, chat_id: i64, message_id: i64) -> Result<(), ChatError> {
            self.calls.lock().unwrap().push(Call::Pin {
                chat_id,
                msg_id: message_id,
            });
            Ok(())
        }
    }
}
