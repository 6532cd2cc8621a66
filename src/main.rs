use std::sync::Arc;

use clap::Parser;
use dotenv::dotenv;
use sea_orm::{ConnectOptions, Database};
use tracing::info;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use subnexus::config::{AppConfig, ConfigHandle};
use subnexus::panel::XuiClient;
use subnexus::security::CredentialCipher;
use subnexus::state::AppState;
use subnexus::tasks::manager::TaskManager;
use subnexus::web;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Listen address override; falls back to LISTEN_ADDR.
    #[arg(short, long)]
    listen: Option<String>,
}

fn init_logging() {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily("logs", "subnexus.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    // Log to stdout: human-readable format
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sea_orm=warn,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    init_logging();
    dotenv().ok();

    let config = AppConfig::from_env()?;
    let cipher = Arc::new(CredentialCipher::from_hex(&config.credential_key)?);
    let listen = args
        .listen
        .unwrap_or_else(|| config.listen_addr.clone());

    let mut connect_options = ConnectOptions::new(config.database_url.clone());
    connect_options.max_connections(10).sqlx_logging(false);
    let db = Database::connect(connect_options).await?;
    info!("database connection established");

    let state = AppState {
        db: Arc::new(db),
        panel: Arc::new(XuiClient::new()),
        cipher,
        config: ConfigHandle::new(config),
    };

    let task_handles = Arc::new(TaskManager::new(state.clone())).spawn();
    info!(tasks = task_handles.len(), "periodic tasks started");

    let app = web::build_router(state);
    let listener = tokio::net::TcpListener::bind(&listen).await?;
    info!(addr = %listen, "serving subscription links");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for handle in task_handles {
        handle.abort();
    }
    Ok(())
}
