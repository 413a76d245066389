use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sportiko_console::config::Config;
use sportiko_console::services::config_cache::{self, CachedConnection};
use sportiko_console::{db, routes, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);

    let backend = db::create_client(&config)?;
    info!("Backend client configured for {}", config.backend_url);

    if let Err(e) = config_cache::save(&config.config_cache_path, &CachedConnection::from_config(&config)) {
        warn!("Could not write connection cache {}: {e}", config.config_cache_path);
    }

    let state = AppState::new(backend, config.clone());

    let initial = state.session.initialize().await;
    info!("Session restored as {:?}", initial.phase);
    state.session.listen();
    state.session.start_refresh_loop();
    state.connectivity.start(config.connectivity_probe_secs);

    let app = routes::build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("sportiko console listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
