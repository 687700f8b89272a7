//! Webhook endpoint for cloud events.
//!
//! Three event classes matter: `StopListUpdate` (debounced 60 s, then one
//! flush through the stop-list diff), `DeliveryOrderUpdate` and
//! `TableOrderUpdate` with a closed order (counted; every N closed orders a
//! throttled stock resync runs and the pinned below-minimum messages refresh
//! behind a hash + total-delta gate). Everything else is acknowledged and
//! dropped.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Json;
use secrecy::ExposeSecret;
use serde_json::Value;
use tracing::{info, warn};

use upstream_clients::cloud::webhook_token_matches;

use crate::app::App;
use crate::config::Config;
use crate::workflows::{min_stock, stoplist};

const DEBOUNCE_WINDOW: Duration = Duration::from_secs(60);

/// What one webhook body contained.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ParsedEvents {
    pub stoplist_updates: usize,
    pub closed_orders: usize,
}

/// Classifies the raw event array. An order counts as closed only when
/// `eventInfo.order.status == "Closed"` — `eventInfo.order` is null for
/// failed creations.
pub fn parse_events(events: &[Value]) -> ParsedEvents {
    let mut parsed = ParsedEvents::default();
    for event in events {
        match event.get("eventType").and_then(Value::as_str) {
            Some("StopListUpdate") => parsed.stoplist_updates += 1,
            Some("DeliveryOrderUpdate") | Some("TableOrderUpdate") => {
                let status = event
                    .get("eventInfo")
                    .and_then(|info| info.get("order"))
                    .and_then(|order| order.get("status"))
                    .and_then(Value::as_str);
                if status == Some("Closed") {
                    parsed.closed_orders += 1;
                }
            }
            _ => {}
        }
    }
    parsed
}

#[derive(Default)]
struct DebounceInner {
    deadline: Option<Instant>,
    running: bool,
}

/// Coalesces stop-list updates: the first event arms a 60 s window, further
/// events extend it, one flush runs when it finally expires.
pub struct StoplistDebouncer {
    inner: Mutex<DebounceInner>,
}

impl StoplistDebouncer {
    fn new() -> Self {
        Self {
            inner: Mutex::new(DebounceInner::default()),
        }
    }

    /// Arms or extends the window. Returns `true` when this call spawned the
    /// flush task (the window was idle).
    pub fn trigger(&self, app: Arc<App>) -> bool {
        let mut state = self.inner.lock().expect("debouncer poisoned");
        state.deadline = Some(Instant::now() + DEBOUNCE_WINDOW);
        if state.running {
            return false;
        }
        state.running = true;
        drop(state);

        tokio::spawn(async move {
            loop {
                let deadline = app
                    .webhook_state
                    .stoplist_debounce
                    .inner
                    .lock()
                    .expect("debouncer poisoned")
                    .deadline;
                match deadline {
                    Some(deadline) if deadline > Instant::now() => {
                        tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
                    }
                    _ => break,
                }
            }
            {
                let mut state = app
                    .webhook_state
                    .stoplist_debounce
                    .inner
                    .lock()
                    .expect("debouncer poisoned");
                state.running = false;
                state.deadline = None;
            }
            info!("stop-list debounce window expired, flushing");
            if let Err(err) = stoplist::run_stoplist_cycle(&app).await {
                warn!("stop-list flush failed: {err:#}");
            }
        });
        true
    }
}

/// Gate for pinned stock alerts: update on first snapshot, then only when the
/// hash changed AND the total moved by at least `threshold_pct` percent.
pub fn should_update_alerts(
    previous: Option<&(String, f64)>,
    new_hash: &str,
    new_total: f64,
    threshold_pct: f64,
) -> bool {
    match previous {
        None => true,
        Some((old_hash, _)) if old_hash == new_hash => false,
        Some((_, old_total)) => {
            if *old_total == 0.0 {
                return true;
            }
            let change_pct = ((new_total - old_total).abs() / old_total.abs()) * 100.0;
            change_pct >= threshold_pct
        }
    }
}

pub struct WebhookState {
    stoplist_debounce: StoplistDebouncer,
    order_counter: AtomicU32,
    last_alert_snapshot: Mutex<Option<(String, f64)>>,
    order_interval: u32,
    threshold_pct: f64,
}

impl WebhookState {
    pub fn new(config: &Config) -> Self {
        Self {
            stoplist_debounce: StoplistDebouncer::new(),
            order_counter: AtomicU32::new(0),
            last_alert_snapshot: Mutex::new(None),
            order_interval: config.stock_check_order_interval.max(1),
            threshold_pct: config.stock_change_threshold_pct,
        }
    }
}

pub fn router(app: Arc<App>) -> axum::Router {
    axum::Router::new()
        .route("/webhook", post(handle_webhook))
        .with_state(app)
}

async fn handle_webhook(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    let presented = headers.get("authToken").and_then(|v| v.to_str().ok());
    if !webhook_token_matches(app.config.webhook_auth_token.expose_secret(), presented) {
        warn!("webhook rejected: bad or missing auth token");
        return StatusCode::UNAUTHORIZED;
    }

    let events = match body.as_array() {
        Some(events) => events.clone(),
        None => return StatusCode::BAD_REQUEST,
    };
    let parsed = parse_events(&events);

    if parsed.stoplist_updates > 0 {
        app.webhook_state.stoplist_debounce.trigger(Arc::clone(&app));
    }

    if parsed.closed_orders > 0 {
        let counter = app
            .webhook_state
            .order_counter
            .fetch_add(parsed.closed_orders as u32, Ordering::SeqCst)
            + parsed.closed_orders as u32;
        info!(
            closed = parsed.closed_orders,
            counter,
            interval = app.webhook_state.order_interval,
            "closed orders counted"
        );
        if counter >= app.webhook_state.order_interval {
            app.webhook_state.order_counter.store(0, Ordering::SeqCst);
            let app = Arc::clone(&app);
            tokio::spawn(async move {
                if let Err(err) = run_stock_check(&app).await {
                    warn!("webhook stock check failed: {err:#}");
                }
            });
        }
    }

    StatusCode::OK
}

/// Stock resync + below-minimum check + gated pinned refresh.
async fn run_stock_check(app: &Arc<App>) -> anyhow::Result<()> {
    use mirror_sync::error::MirrorError;
    match mirror_sync::stock_balances::sync_stock_balances(
        &app.ctx,
        &app.pos,
        Some("webhook"),
        None,
    )
    .await
    {
        Ok(_) | Err(MirrorError::AlreadyRunning(_)) => {}
        Err(err) => return Err(err.into()),
    }

    let items = min_stock::check_min_stock(app).await?;
    let (hash, total) = min_stock::stock_snapshot_hash(&items);

    let update = {
        let snapshot = app
            .webhook_state
            .last_alert_snapshot
            .lock()
            .expect("alert snapshot poisoned");
        should_update_alerts(snapshot.as_ref(), &hash, total, app.webhook_state.threshold_pct)
    };
    if !update {
        info!("stock snapshot unchanged (or below delta threshold), skipping pinned refresh");
        return Ok(());
    }

    let updated = min_stock::update_stock_alert_messages(app, &items, &hash).await?;
    *app.webhook_state
        .last_alert_snapshot
        .lock()
        .expect("alert snapshot poisoned") = Some((hash, total));
    info!(updated, below_min = items.len(), "pinned stock alerts refreshed");
    Ok(())
}

/// Serves the webhook endpoint until the process exits.
pub async fn serve(app: Arc<App>) -> anyhow::Result<()> {
    let bind = app.config.webhook_bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(%bind, "webhook endpoint listening");
    axum::serve(listener, router(app)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_stoplist_and_closed_orders() {
        let events = vec![
            json!({"eventType": "StopListUpdate"}),
            json!({"eventType": "DeliveryOrderUpdate",
                   "eventInfo": {"order": {"status": "Closed"}}}),
            json!({"eventType": "TableOrderUpdate",
                   "eventInfo": {"order": {"status": "New"}}}),
            // order is null when creationStatus != Success
            json!({"eventType": "DeliveryOrderUpdate", "eventInfo": {"order": null}}),
            json!({"eventType": "ReserveUpdate"}),
        ];
        let parsed = parse_events(&events);
        assert_eq!(
            parsed,
            ParsedEvents {
                stoplist_updates: 1,
                closed_orders: 1
            }
        );
    }

    #[test]
    fn alert_gate_first_snapshot_always_updates() {
        assert!(should_update_alerts(None, "h1", 10.0, 5.0));
    }

    #[test]
    fn alert_gate_same_hash_never_updates() {
        let prev = ("h1".to_string(), 10.0);
        assert!(!should_update_alerts(Some(&prev), "h1", 99.0, 5.0));
    }

    #[test]
    fn alert_gate_respects_delta_threshold() {
        let prev = ("h1".to_string(), 100.0);
        // 3% change, threshold 5% → skip even though the hash differs.
        assert!(!should_update_alerts(Some(&prev), "h2", 103.0, 5.0));
        // 10% change → update.
        assert!(should_update_alerts(Some(&prev), "h2", 110.0, 5.0));
        // From zero anything counts.
        let prev = ("h1".to_string(), 0.0);
        assert!(should_update_alerts(Some(&prev), "h2", 1.0, 5.0));
    }
}
