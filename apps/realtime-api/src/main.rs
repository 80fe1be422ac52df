use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use realtime_api::bridge::subscriber;
use realtime_api::config::Config;
use realtime_api::directory::http::HttpDirectory;
use realtime_api::directory::Directory;
use realtime_api::AppState;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing, env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;
    let sweep_every = config.call_sweep_interval;

    let directory: Arc<dyn Directory> = Arc::new(
        HttpDirectory::new(
            &config.server_api_url,
            &config.internal_secret,
            config.backend_timeout,
        )
        .expect("invalid SERVER_API_URL"),
    );

    // The broker is the only hard dependency at startup.
    let pubsub = subscriber::connect(&config.redis_url)
        .await
        .expect("failed to connect to redis");

    tracing::info!(
        server_api_url = %config.server_api_url,
        sweep_secs = sweep_every.as_secs(),
        "realtime-api configured"
    );

    let state = AppState::new(config, directory);

    tokio::spawn(subscriber::run(
        state.config.redis_url.clone(),
        pubsub,
        state.bridge.clone(),
    ));
    state.signaling.clone().spawn_sweeper(sweep_every);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(realtime_api::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "realtime-api listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(?e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
