//! Supportdesk API server

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use supportdesk_api::{
    config::Config,
    conversations::{MemoryConversationStore, PgConversationStore},
    notifications::{MemoryUserDirectory, PgUserDirectory},
    routes::create_router,
    routing::{MemoryTicketBackend, TicketBackend, ZammadClient},
    state::{AppState, Backends},
    stream::BroadcastHub,
};
use supportdesk_shared::db;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("supportdesk_api=info,tower_http=info,warn"));

    // LOG_FORMAT=json for log shippers
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json") {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
    }
}

async fn build_backends(config: &Config) -> anyhow::Result<Backends> {
    let tickets: Arc<dyn TicketBackend> = match (&config.ticketing_url, &config.ticketing_token) {
        (Some(url), Some(token)) => {
            tracing::info!(url = %url, "Using ticketing backend");
            Arc::new(
                ZammadClient::new(url.clone(), token.clone(), Duration::from_millis(config.ticketing_timeout_ms))
                    .context("Failed to build ticketing client")?,
            )
        }
        _ => {
            tracing::warn!("TICKETING_URL not set, using in-memory ticketing backend");
            Arc::new(MemoryTicketBackend::new())
        }
    };

    match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url, config.database_max_connections)
                .await
                .context("Failed to connect to database")?;
            db::run_migrations(&pool).await.context("Failed to run migrations")?;
            tracing::info!("Database ready");

            Ok(Backends {
                store: Arc::new(PgConversationStore::new(pool.clone())),
                directory: Arc::new(PgUserDirectory::new(pool.clone())),
                tickets,
                pool: Some(pool),
            })
        }
        None => {
            tracing::warn!("DATABASE_URL not set, conversations and notifications are kept in memory");
            Ok(Backends {
                store: Arc::new(MemoryConversationStore::new()),
                directory: Arc::new(MemoryUserDirectory::new()),
                tickets,
                pool: None,
            })
        }
    }
}

async fn shutdown_signal(hub: BroadcastHub) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
    // Live streams never finish on their own
    hub.close_all().await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env().context("Invalid configuration")?;
    let backends = build_backends(&config).await?;
    let state = AppState::new(&config, backends).context("Invalid region table")?;

    tracing::info!(
        regions = state.regions.len(),
        heartbeat_secs = config.heartbeat_interval.as_secs(),
        idle_timeout_secs = config.idle_timeout.as_secs(),
        "Routing engine configured"
    );

    let hub = state.hub.clone();
    let app = create_router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;
    tracing::info!(address = %config.bind_address, "Supportdesk API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(hub))
        .await
        .context("Server error")?;

    Ok(())
}
