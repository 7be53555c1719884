use std::sync::Arc;

use cataleya::config::AppConfig;
use cataleya::llm::{LlmChat, LlmClient};
use cataleya::state::AppState;
use cataleya::store::{LedgerStore, MemoryLedger, PgLedger};
use cataleya::{db, routes};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env().expect("invalid configuration");

    let store: Arc<dyn LedgerStore> = match &config.database_url {
        Some(url) => {
            let pool = db::init_pool(url).await.expect("database init failed");
            Arc::new(PgLedger::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory ledger (balances are lost on restart)");
            Arc::new(MemoryLedger::new())
        }
    };

    // Non-fatal: /api/chat answers 503 until a provider key is configured.
    let llm: Option<Arc<dyn LlmChat>> = match LlmClient::from_env() {
        Ok(client) => {
            tracing::info!(model = client.model(), "LLM client initialized");
            Some(Arc::new(client))
        }
        Err(e) => {
            tracing::warn!(error = %e, "LLM client not configured, chat disabled");
            None
        }
    };

    let port = config.port;
    tracing::info!(token_cost = config.relay.token_cost, "relay policy loaded");
    let state = AppState::new(store, llm, config.relay);

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "cataleya listening");
    axum::serve(listener, app).await.expect("server failed");
}
