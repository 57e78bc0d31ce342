use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use confab_api::{build_router, config::Config, state::AppState};
use confab_llm::{LocalModelBackend, LocalModelConfig};
use confab_persist::ThreadStoreBuilder;
use confab_session::SessionRunner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::load()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    init_logging(&config);

    tracing::info!("Starting Confab API server");
    tracing::info!("Config loaded: {}:{}", config.server.host, config.server.port);

    tracing::info!(
        workspace = %config.storage.workspace_root.display(),
        "Loading thread store"
    );
    let store = ThreadStoreBuilder::new()
        .workspace_root(config.storage.workspace_root.clone())
        .preload(true)
        .build()
        .await?;

    tracing::info!(base_url = %config.llm.base_url, "Initializing local model backend");
    let backend = LocalModelBackend::new(LocalModelConfig::from(config.llm.clone()))?;

    let sessions = SessionRunner::builder()
        .store(store.clone())
        .backend(Arc::new(backend))
        .config(config.session.clone().into())
        .build()?;

    let state = Arc::new(AppState::new(config.clone(), sessions));
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Flushing pending writes");
    store.flush().await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

fn init_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.logging.format.as_str() {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }
}
