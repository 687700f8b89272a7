//! Update dispatch.
//!
//! Routing order for text: command → navigation reset → reply button →
//! FSM free-text input. For callbacks: permission → prefix match → cooldown →
//! acknowledge → handler. The acknowledgement is the first *visible* transport
//! action on every callback path — denial and cooldown notices ride on the
//! acknowledgement itself, so the client spinner never hangs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{error, warn};

use super::fsm::FsmStorage;
use super::middleware::{default_cooldown, CooldownLedger, Decision, Gatekeeper};
use super::{ChatTransport, Outgoing, Update};

pub type Handler<S> =
    Arc<dyn Fn(Arc<S>, Update) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

struct Route<S> {
    handler: Handler<S>,
    /// Cooldown class, e.g. `sync_products`, `writeoff_send`, `nav`.
    action: String,
}

pub struct Router<S> {
    transport: Arc<dyn ChatTransport>,
    storage: Arc<dyn FsmStorage>,
    gatekeeper: Arc<dyn Gatekeeper>,
    cooldowns: CooldownLedger,
    commands: HashMap<String, Handler<S>>,
    buttons: HashMap<String, Route<S>>,
    callbacks: Vec<(String, Route<S>)>,
    states: HashMap<String, Handler<S>>,
    navigation: HashSet<String>,
    photo_handler: Option<Handler<S>>,
}

impl<S: Send + Sync + 'static> Router<S> {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        storage: Arc<dyn FsmStorage>,
        gatekeeper: Arc<dyn Gatekeeper>,
    ) -> Self {
        Self {
            transport,
            storage,
            gatekeeper,
            cooldowns: CooldownLedger::new(),
            commands: HashMap::new(),
            buttons: HashMap::new(),
            callbacks: Vec::new(),
            states: HashMap::new(),
            navigation: HashSet::new(),
            photo_handler: None,
        }
    }

    /// Single handler for photo messages (the OCR intake).
    pub fn photos(&mut self, handler: Handler<S>) -> &mut Self {
        self.photo_handler = Some(handler);
        self
    }

    /// `/command` handler. Commands bypass the permission gate — `/start`
    /// must work for the not-yet-authorised.
    pub fn command(&mut self, name: &str, handler: Handler<S>) -> &mut Self {
        self.commands.insert(name.to_string(), handler);
        self
    }

    /// Reply-button handler, matched on exact text.
    pub fn button(&mut self, text: &str, action: &str, handler: Handler<S>) -> &mut Self {
        self.buttons.insert(
            text.to_string(),
            Route {
                handler,
                action: action.to_string(),
            },
        );
        self
    }

    /// Callback handler, matched on data prefix (`woa_approve:` etc.).
    pub fn callback(&mut self, prefix: &str, action: &str, handler: Handler<S>) -> &mut Self {
        self.callbacks.push((
            prefix.to_string(),
            Route {
                handler,
                action: action.to_string(),
            },
        ));
        self
    }

    /// Free-text input handler for one FSM state.
    pub fn state(&mut self, state: &str, handler: Handler<S>) -> &mut Self {
        self.states.insert(state.to_string(), handler);
        self
    }

    /// Marks reply-button texts as top-level navigation: pressing one while a
    /// session is active clears the session (and its tracked messages) before
    /// normal dispatch. This is how escape-from-any-depth works.
    pub fn navigation(&mut self, texts: &[&str]) -> &mut Self {
        self.navigation.extend(texts.iter().map(|t| t.to_string()));
        self
    }

    /// Clears the user's FSM session and deletes every tracked message.
    pub async fn clear_session(&self, user_id: i64, chat_id: i64) {
        let state = self.storage.load(user_id).await;
        for msg_id in state.tracked.all() {
            // Already-deleted messages are fine.
            let _ = self.transport.delete_message(chat_id, msg_id).await;
        }
        self.storage.clear(user_id).await;
    }

    pub async fn dispatch(&self, app: Arc<S>, update: Update) {
        match &update {
            Update::Callback { .. } => self.dispatch_callback(app, update.clone()).await,
            Update::Text { .. } => self.dispatch_text(app, update.clone()).await,
            Update::Photo { chat_id, user_id, .. } => {
                if let Some(handler) = &self.photo_handler {
                    if let Err(err) = handler(app, update.clone()).await {
                        error!(user_id, "photo handler failed: {err:#}");
                        let _ = self
                            .transport
                            .send_message(
                                *chat_id,
                                Outgoing::text("⚠️ Не удалось обработать фото. Попробуйте ещё раз."),
                            )
                            .await;
                    }
                }
            }
        }
    }

    async fn dispatch_callback(&self, app: Arc<S>, update: Update) {
        let Update::Callback {
            callback_id,
            chat_id,
            user_id,
            data,
            ..
        } = &update
        else {
            return;
        };

        match self.gatekeeper.allow_callback(*user_id, data).await {
            Decision::Allow => {}
            Decision::Deny(notice) => {
                let _ = self
                    .transport
                    .answer_callback(callback_id, Some(&notice))
                    .await;
                return;
            }
        }

        let Some((_, route)) = self
            .callbacks
            .iter()
            .find(|(prefix, _)| data.starts_with(prefix.as_str()))
        else {
            let _ = self.transport.answer_callback(callback_id, None).await;
            warn!(%data, "callback with no route");
            return;
        };

        if !self
            .cooldowns
            .check(*user_id, &route.action, default_cooldown(&route.action))
        {
            let _ = self
                .transport
                .answer_callback(callback_id, Some("⏳ Подождите..."))
                .await;
            return;
        }

        // Ack first: the spinner dies before any slow work starts.
        let _ = self.transport.answer_callback(callback_id, None).await;

        if let Err(err) = (route.handler)(app, update.clone()).await {
            error!(user_id, data, "callback handler failed: {err:#}");
            let _ = self
                .transport
                .send_message(*chat_id, Outgoing::text("⚠️ Что-то пошло не так. Попробуйте ещё раз."))
                .await;
        }
    }

    async fn dispatch_text(&self, app: Arc<S>, update: Update) {
        let Update::Text {
            chat_id,
            user_id,
            text,
            ..
        } = &update
        else {
            return;
        };

        if let Some(command) = text.strip_prefix('/') {
            let name = command.split_whitespace().next().unwrap_or("");
            if let Some(handler) = self.commands.get(name) {
                if let Err(err) = handler(app, update.clone()).await {
                    error!(user_id, name, "command handler failed: {err:#}");
                }
            }
            return;
        }

        if self.navigation.contains(text.as_str()) {
            let session = self.storage.load(*user_id).await;
            if session.is_active() {
                self.clear_session(*user_id, *chat_id).await;
            }
        }

        if let Some(route) = self.buttons.get(text.as_str()) {
            match self.gatekeeper.allow_text(*user_id, text).await {
                Decision::Allow => {}
                Decision::Deny(notice) => {
                    let _ = self
                        .transport
                        .send_message(*chat_id, Outgoing::text(notice))
                        .await;
                    return;
                }
            }
            if !self
                .cooldowns
                .check(*user_id, &route.action, default_cooldown(&route.action))
            {
                let _ = self
                    .transport
                    .send_message(*chat_id, Outgoing::text("⏳ Подождите..."))
                    .await;
                return;
            }
            if let Err(err) = (route.handler)(app, update.clone()).await {
                error!(user_id, text, "button handler failed: {err:#}");
                let _ = self
                    .transport
                    .send_message(*chat_id, Outgoing::text("⚠️ Что-то пошло не так. Попробуйте ещё раз."))
                    .await;
            }
            return;
        }

        // Free text feeds the active FSM state, if any.
        let session = self.storage.load(*user_id).await;
        if let Some(state) = session.state.as_deref() {
            if let Some(handler) = self.states.get(state) {
                if let Err(err) = handler(app, update.clone()).await {
                    error!(user_id, state, "state handler failed: {err:#}");
                    let _ = self
                        .transport
                        .send_message(*chat_id, Outgoing::text("⚠️ Что-то пошло не так. Попробуйте ещё раз."))
                        .await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::fsm::{MemoryStorage, SessionState};
    use crate::chat::mock::{Call, MockTransport};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct OpenGate;

    #[async_trait]
    impl Gatekeeper for OpenGate {
        async fn allow_text(&self, _user: i64, _text: &str) -> Decision {
            Decision::Allow
        }
        async fn allow_callback(&self, _user: i64, _data: &str) -> Decision {
            Decision::Allow
        }
    }

    struct DenyGate;

    #[async_trait]
    impl Gatekeeper for DenyGate {
        async fn allow_text(&self, _user: i64, _text: &str) -> Decision {
            Decision::Deny("⛔ Нет доступа".into())
        }
        async fn allow_callback(&self, _user: i64, _data: &str) -> Decision {
            Decision::Deny("⛔ Нет доступа".into())
        }
    }

    #[derive(Default)]
    struct Counter {
        hits: AtomicUsize,
    }

    fn counting_handler(app: &Arc<Counter>) -> Handler<Counter> {
        let _ = app;
        Arc::new(|app: Arc<Counter>, _u: Update| {
            Box::pin(async move {
                app.hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    fn text_update(text: &str) -> Update {
        Update::Text {
            chat_id: 5,
            user_id: 7,
            message_id: 1,
            text: text.to_string(),
        }
    }

    fn callback_update(data: &str) -> Update {
        Update::Callback {
            callback_id: "cb1".into(),
            chat_id: 5,
            user_id: 7,
            message_id: 1,
            data: data.to_string(),
        }
    }

    #[tokio::test]
    async fn callback_is_acknowledged_then_handled() {
        let transport = Arc::new(MockTransport::new());
        let storage = Arc::new(MemoryStorage::new());
        let app = Arc::new(Counter::default());
        let mut router = Router::new(transport.clone(), storage, Arc::new(OpenGate));
        router.callback("woa_approve:", "admin_approve", counting_handler(&app));

        router.dispatch(app.clone(), callback_update("woa_approve:ab12")).await;

        assert_eq!(app.hits.load(Ordering::SeqCst), 1);
        assert_eq!(
            transport.calls()[0],
            Call::Answer {
                callback_id: "cb1".into(),
                text: None
            }
        );
    }

    #[tokio::test]
    async fn denied_callback_answers_with_notice_and_skips_handler() {
        let transport = Arc::new(MockTransport::new());
        let storage = Arc::new(MemoryStorage::new());
        let app = Arc::new(Counter::default());
        let mut router = Router::new(transport.clone(), storage, Arc::new(DenyGate));
        router.callback("woa_approve:", "admin_approve", counting_handler(&app));

        router.dispatch(app.clone(), callback_update("woa_approve:ab12")).await;

        assert_eq!(app.hits.load(Ordering::SeqCst), 0);
        assert_eq!(
            transport.calls(),
            vec![Call::Answer {
                callback_id: "cb1".into(),
                text: Some("⛔ Нет доступа".into())
            }]
        );
    }

    #[tokio::test]
    async fn cooldown_answers_wait_notice_on_second_press() {
        let transport = Arc::new(MockTransport::new());
        let storage = Arc::new(MemoryStorage::new());
        let app = Arc::new(Counter::default());
        let mut router = Router::new(transport.clone(), storage, Arc::new(OpenGate));
        router.callback("sync:", "sync_products", counting_handler(&app));

        router.dispatch(app.clone(), callback_update("sync:products")).await;
        router.dispatch(app.clone(), callback_update("sync:products")).await;

        assert_eq!(app.hits.load(Ordering::SeqCst), 1, "second press must be throttled");
        let calls = transport.calls();
        assert_eq!(
            calls.last().unwrap(),
            &Call::Answer {
                callback_id: "cb1".into(),
                text: Some("⏳ Подождите...".into())
            }
        );
    }

    #[tokio::test]
    async fn navigation_clears_active_session_and_tracked_messages() {
        let transport = Arc::new(MockTransport::new());
        let storage = Arc::new(MemoryStorage::new());
        let app = Arc::new(Counter::default());

        let mut session = SessionState::default();
        session.state = Some("writeoff:reason".into());
        session.tracked.menu_msg_id = Some(11);
        session.tracked.prompt_msg_id = Some(12);
        storage.save(7, &session).await;

        let mut router = Router::new(transport.clone(), storage.clone(), Arc::new(OpenGate));
        router.navigation(&["🏠 Главное меню"]);
        router.button("🏠 Главное меню", "nav", counting_handler(&app));

        router.dispatch(app.clone(), text_update("🏠 Главное меню")).await;

        assert_eq!(app.hits.load(Ordering::SeqCst), 1);
        assert!(!storage.load(7).await.is_active());
        let calls = transport.calls();
        assert!(calls.contains(&Call::Delete { chat_id: 5, msg_id: 11 }));
        assert!(calls.contains(&Call::Delete { chat_id: 5, msg_id: 12 }));
    }

    #[tokio::test]
    async fn free_text_routes_to_active_state_handler() {
        let transport = Arc::new(MockTransport::new());
        let storage = Arc::new(MemoryStorage::new());
        let app = Arc::new(Counter::default());

        let mut session = SessionState::default();
        session.state = Some("auth:last_name".into());
        storage.save(7, &session).await;

        let mut router = Router::new(transport, storage, Arc::new(OpenGate));
        router.state("auth:last_name", counting_handler(&app));

        router.dispatch(app.clone(), text_update("Иванов")).await;
        assert_eq!(app.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn idle_free_text_is_ignored() {
        let transport = Arc::new(MockTransport::new());
        let storage = Arc::new(MemoryStorage::new());
        let app = Arc::new(Counter::default());
        let mut router = Router::new(transport.clone(), storage, Arc::new(OpenGate));
        router.state("auth:last_name", counting_handler(&app));

        router.dispatch(app.clone(), text_update("случайный текст")).await;
        assert_eq!(app.hits.load(Ordering::SeqCst), 0);
        assert!(transport.calls().is_empty());
    }
}
