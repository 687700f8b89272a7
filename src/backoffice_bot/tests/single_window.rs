//! End-to-end dispatch through the real App graph with recording adapters:
//! mock chat transport, in-memory sheet, disabled extractor. The database
//! pool is built lazily and never touched by the paths under test.

use std::collections::HashMap;
use std::sync::Arc;

use secrecy::SecretString;

use backoffice_bot::app::{build_router, App};
use backoffice_bot::chat::mock::{Call, MockTransport};
use backoffice_bot::config::Config;
use backoffice_bot::ocr::DisabledExtractor;
use backoffice_bot::permissions::{PERMISSIONS_TAB, PERM_SYNC_RUN};
use backoffice_bot::sheets::mock::MockSheet;
use backoffice_bot::chat::Update;

fn test_config() -> Config {
    Config {
        database_url: SecretString::new("postgres://localhost/unused".into()),
        pos_base_url: "https://pos.invalid".into(),
        pos_login: "bot".into(),
        pos_password_sha1: SecretString::new("sha1".into()),
        finance_base_url: "https://fin.invalid".into(),
        finance_token: SecretString::new("token".into()),
        cloud_base_url: "https://cloud.invalid".into(),
        cloud_org_id: None,
        bot_token: SecretString::new("bot-token".into()),
        bot_api_base: "https://api.invalid".into(),
        sheets_dir: "./unused".into(),
        webhook_auth_token: SecretString::new("hook".into()),
        webhook_bind: "127.0.0.1:0".into(),
        project_tz: "Europe/Kaliningrad".into(),
        redis_url: None,
        log_level: "warn".into(),
        legacy_admin_tables: false,
        negative_transfer_source_prefix: "Хоз. товары".into(),
        negative_transfer_target_prefixes: vec!["Бар".into(), "Кухня".into()],
        negative_transfer_product_group: "Расходные материалы".into(),
        stock_check_order_interval: 20,
        stock_change_threshold_pct: 5.0,
    }
}

fn build_app(sheet: Arc<MockSheet>) -> (Arc<App>, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::new());
    let app = App::build(test_config(), transport.clone(), sheet, Arc::new(DisabledExtractor))
        .expect("app builds");
    (app, transport)
}

fn text(user_id: i64, text: &str) -> Update {
    Update::Text {
        chat_id: user_id,
        user_id,
        message_id: 1,
        text: text.to_string(),
    }
}

#[tokio::test]
async fn cancel_keeps_exactly_one_menu_message() {
    let (app, transport) = build_app(Arc::new(MockSheet::new()));
    let router = build_router(&app);

    router.dispatch(Arc::clone(&app), text(10, "/cancel")).await;
    let first_menu = transport
        .calls()
        .iter()
        .find_map(|c| match c {
            Call::Send { msg_id, .. } => Some(*msg_id),
            _ => None,
        })
        .expect("menu sent");

    // Second /cancel must delete the previous menu before sending a new one.
    router.dispatch(Arc::clone(&app), text(10, "/cancel")).await;
    let calls = transport.calls();
    assert!(
        calls.contains(&Call::Delete { chat_id: 10, msg_id: first_menu }),
        "old menu must be deleted, calls: {calls:?}"
    );
    let sends = calls
        .iter()
        .filter(|c| matches!(c, Call::Send { .. }))
        .count();
    assert_eq!(sends, 2, "one menu per /cancel");
}

#[tokio::test]
async fn permissioned_button_is_denied_without_grant() {
    let (app, transport) = build_app(Arc::new(MockSheet::new()));
    let router = build_router(&app);

    router.dispatch(Arc::clone(&app), text(11, "🔄 Синхронизация")).await;

    let calls = transport.calls();
    let denial = calls.iter().any(|c| match c {
        Call::Send { text, .. } => text.contains("Нет доступа"),
        _ => false,
    });
    assert!(denial, "ungranted user must get a denial notice: {calls:?}");
}

#[tokio::test]
async fn granted_user_passes_the_permission_gate() {
    let sheet = Arc::new(MockSheet::new());
    let mut record = HashMap::new();
    record.insert("chat_id".to_string(), "12".to_string());
    record.insert(PERM_SYNC_RUN.to_string(), "✅".to_string());
    sheet.seed(PERMISSIONS_TAB, vec![record]);

    let (app, transport) = build_app(sheet);
    let router = build_router(&app);

    router.dispatch(Arc::clone(&app), text(12, "🔄 Синхронизация")).await;

    let calls = transport.calls();
    // The sync menu (inline buttons) is sent, not a denial.
    let denied = calls.iter().any(|c| match c {
        Call::Send { text, .. } => text.contains("Нет доступа"),
        _ => false,
    });
    assert!(!denied, "granted user must not be denied: {calls:?}");
    let menu = calls.iter().any(|c| match c {
        Call::Send { text, .. } => text.contains("Синхронизация"),
        _ => false,
    });
    assert!(menu, "sync menu must be offered: {calls:?}");
}
