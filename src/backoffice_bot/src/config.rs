//! Environment configuration. Fail-fast: every required variable is
//! validated at startup, URL-typed variables must parse, and secrets live in
//! `SecretString` so they cannot leak through Debug or log output.

use secrecy::SecretString;

use mirror_sync::tz::DEFAULT_TZ;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env variable: {0}")]
    Missing(&'static str),

    #[error("{name} is not a valid URL: {reason}")]
    BadUrl { name: &'static str, reason: String },

    #[error("{name} is not a valid {kind}: {value}")]
    BadValue {
        name: &'static str,
        kind: &'static str,
        value: String,
    },
}

pub struct Config {
    pub database_url: SecretString,
    pub pos_base_url: String,
    pub pos_login: String,
    pub pos_password_sha1: SecretString,
    pub finance_base_url: String,
    pub finance_token: SecretString,
    pub cloud_base_url: String,
    pub cloud_org_id: Option<String>,
    pub bot_token: SecretString,
    pub bot_api_base: String,
    /// Directory the CSV sheet adapter serves tabs from.
    pub sheets_dir: String,
    pub webhook_auth_token: SecretString,
    pub webhook_bind: String,
    pub project_tz: String,
    pub redis_url: Option<String>,
    pub log_level: String,
    /// Open question in the data model: role tables vs spreadsheet matrix.
    /// `true` resolves admins/receivers from the legacy DB tables.
    pub legacy_admin_tables: bool,
    pub negative_transfer_source_prefix: String,
    pub negative_transfer_target_prefixes: Vec<String>,
    pub negative_transfer_product_group: String,
    pub stock_check_order_interval: u32,
    pub stock_change_threshold_pct: f64,
}

fn require(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn optional(name: &str, default: &str) -> String {
    std::env::var(name).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
}

fn require_url(name: &'static str) -> Result<String, ConfigError> {
    let raw = require(name)?;
    reqwest::Url::parse(&raw).map_err(|e| ConfigError::BadUrl {
        name,
        reason: e.to_string(),
    })?;
    Ok(raw.trim_end_matches('/').to_string())
}

fn parse_num<T: std::str::FromStr>(
    name: &'static str,
    kind: &'static str,
    raw: String,
) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| ConfigError::BadValue {
        name,
        kind,
        value: raw,
    })
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: SecretString::new(require("DATABASE_URL")?.into()),
            pos_base_url: require_url("POS_BASE_URL")?,
            pos_login: require("POS_LOGIN")?,
            pos_password_sha1: SecretString::new(require("POS_SHA1_PASSWORD")?.into()),
            finance_base_url: {
                let raw = optional("FINANCE_BASE_URL", "https://api.finance.example");
                reqwest::Url::parse(&raw).map_err(|e| ConfigError::BadUrl {
                    name: "FINANCE_BASE_URL",
                    reason: e.to_string(),
                })?;
                raw.trim_end_matches('/').to_string()
            },
            finance_token: SecretString::new(require("FINANCE_TOKEN")?.into()),
            cloud_base_url: optional("CLOUD_BASE_URL", "https://api-ru.iiko.services"),
            cloud_org_id: std::env::var("CLOUD_ORG_ID").ok().filter(|v| !v.is_empty()),
            bot_token: SecretString::new(require("BOT_TOKEN")?.into()),
            bot_api_base: optional("BOT_API_BASE", "https://api.telegram.org"),
            sheets_dir: optional("SHEETS_DIR", "./sheets"),
            webhook_auth_token: SecretString::new(require("WEBHOOK_AUTH_TOKEN")?.into()),
            webhook_bind: optional("WEBHOOK_BIND", "0.0.0.0:8080"),
            project_tz: optional("PROJECT_TZ", DEFAULT_TZ),
            redis_url: std::env::var("REDIS_URL").ok().filter(|v| !v.is_empty()),
            log_level: optional("LOG_LEVEL", "info"),
            legacy_admin_tables: optional("LEGACY_ADMIN_TABLES", "false") == "true",
            negative_transfer_source_prefix: optional(
                "NEGATIVE_TRANSFER_SOURCE_PREFIX",
                "Хоз. товары",
            ),
            negative_transfer_target_prefixes: optional(
                "NEGATIVE_TRANSFER_TARGET_PREFIXES",
                "Бар,Кухня",
            )
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
            negative_transfer_product_group: optional(
                "NEGATIVE_TRANSFER_PRODUCT_GROUP",
                "Расходные материалы",
            ),
            stock_check_order_interval: parse_num(
                "STOCK_CHECK_ORDER_INTERVAL",
                "integer",
                optional("STOCK_CHECK_ORDER_INTERVAL", "20"),
            )?,
            stock_change_threshold_pct: parse_num(
                "STOCK_CHANGE_THRESHOLD_PCT",
                "number",
                optional("STOCK_CHANGE_THRESHOLD_PCT", "5.0"),
            )?,
        })
    }
}
