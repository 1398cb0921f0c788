use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use lyrics_gateway::app_state::AppState;
use lyrics_gateway::config::GatewayConfig;
use lyrics_gateway::handlers::{fetch_lyrics, healthz, metrics, search_lyrics};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let config = GatewayConfig::from_env()?;
    info!(accounts = config.core.accounts.len(), "loaded account configuration");

    let state = Arc::new(AppState::build(&config).await?);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/v1/lyrics/search", get(search_lyrics))
        .route("/v1/lyrics/:song_id", get(fetch_lyrics))
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!(%addr, "lyrics-gateway listening");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
