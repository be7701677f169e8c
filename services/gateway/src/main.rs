use std::sync::Arc;

use gateway::{build_router, AppState};
use gw_core::Settings;
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let settings = Settings::from_file(&config_path).expect("failed to load configuration");
    let bind_addr = settings.bind_addr.clone();

    // No plugins ship with the gateway itself; operators compose their own
    // set via `PluginFactory` and link it into this binary (or a fork of
    // it) at build time.
    let plugin_factory: gateway::PluginFactory = Arc::new(Vec::new);

    let state = AppState::new(settings, plugin_factory)
        .await
        .expect("failed to initialize application state");

    let app = build_router(state);

    info!(bind_addr, "starting gateway");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind listener");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("shutdown signal received");
}
