use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use tracing::info;
use tracing_subscriber::EnvFilter;

use backoffice_bot::app::{build_router, App};
use backoffice_bot::chat::http_transport::HttpTransport;
use backoffice_bot::config::Config;
use backoffice_bot::ocr::DisabledExtractor;
use backoffice_bot::sheets::csv_dir::CsvDirSheets;
use backoffice_bot::{scheduler, webhook};

#[derive(Parser)]
#[command(version, about = "Back-office automation service")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Create or update the database schema (idempotent).
    InitSchema,
    /// Serve: chat update loop, webhook endpoint, scheduler.
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Cmd::InitSchema => {
            let pool = mirror_sync::db::pool::build_pool(config.database_url.expose_secret())?;
            let mut conn = mirror_sync::db::pool::get_conn(&pool).await?;
            mirror_sync::db::migrate::init_schema(&mut conn).await?;
            info!("schema ready");
        }
        Cmd::Run => {
            let transport = Arc::new(HttpTransport::new(
                &config.bot_api_base,
                config.bot_token.clone(),
            )?);
            let sheets = Arc::new(CsvDirSheets::new(config.sheets_dir.clone()));
            let extractor = Arc::new(DisabledExtractor);

            let app = App::build(config, transport.clone(), sheets, extractor)?;
            app.refresh_admin_set().await;

            scheduler::start(&app);

            let webhook_app = Arc::clone(&app);
            tokio::spawn(async move {
                if let Err(err) = webhook::serve(webhook_app).await {
                    tracing::error!("webhook server exited: {err:#}");
                }
            });

            let router = Arc::new(build_router(&app));
            let queue = Arc::new(backoffice_bot::chat::per_user::PerUserQueue::new());
            info!("serving chat updates");
            transport
                .poll(move |update| {
                    let app = Arc::clone(&app);
                    let router = Arc::clone(&router);
                    // FSM linearity: one user's updates are handled in order.
                    queue.dispatch(update, move |update| {
                        let app = Arc::clone(&app);
                        let router = Arc::clone(&router);
                        async move {
                            router.dispatch(app, update).await;
                        }
                    });
                })
                .await;
        }
    }
    Ok(())
}
