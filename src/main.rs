use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ensaluti::api::{self, AppState};
use ensaluti::config::Config;
use ensaluti::store::memory::InMemoryStore;

const ENV_PORT: &str = "ENSALUTI_PORT";
const DEFAULT_PORT: u16 = 4433;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = Arc::new(Config::from_env()?);
    let store = Arc::new(InMemoryStore::new());
    let state = Arc::new(AppState::new(config.clone(), store));

    let app = api::router(state);

    let port = std::env::var(ENV_PORT)
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        public_url = %config.public_url,
        "Listening on [::]:{}",
        port
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to install shutdown signal handler: {err}");
            }
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}
