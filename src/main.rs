use clap::Parser;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use genoexport::{
    Config,
    handlers::{AppState, create_router},
    storage::LocalStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store = Arc::new(LocalStore::open(&config.data_dir).await?);
    tokio::fs::create_dir_all(&config.export_dir).await?;

    let state = AppState::from_config(store, &config);
    let _cursor_sweeper = state.cursors.spawn_sweeper(config.cursor_sweep_period());

    let app = create_router(state);
    let app = if config.cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    };

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Starting genoexport server on {}", addr);
    tracing::info!("Data directory: {:?}", config.data_dir);
    tracing::info!("Export directory: {:?}", config.export_dir);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
