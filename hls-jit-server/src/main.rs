//! HTTP front end for the just-in-time HLS transcoding engine.
//!
//! Owns process startup, logging initialization, configuration loading, and
//! the two periodic sweepers; everything else is delegated to
//! `hls_jit_core::Supervisor`.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hls_jit_core::probe::FfprobeMediaProbe;
use hls_jit_core::{sweepers, Config, Supervisor};

use hls_jit_server::http;
use hls_jit_server::state::{AppState, SweeperHandles};

const APP_NAME: &str = "hls-jit-server";
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_logging();

    tracing::info!("{} v{} starting", APP_NAME, VERSION);

    let config = Arc::new(Config::from_env());
    tracing::info!(?config, "configuration loaded");

    if !config.jit_transcoding_enabled {
        tracing::warn!("JIT_TRANSCODING_ENABLED is false: every transcoding route will return 500");
    }

    let probe = Arc::new(FfprobeMediaProbe::new(config.ffprobe_path.clone()));
    let supervisor = Arc::new(Supervisor::new(config.clone(), probe));

    let _sweepers = SweeperHandles {
        pause: sweepers::spawn_pause_sweep(
            supervisor.clone(),
            config.viewer_check_interval,
            config.pause_threshold,
        ),
        cleanup: sweepers::spawn_cleanup_sweep(supervisor.clone(), config.viewer_inactivity_threshold),
    };

    let state = Arc::new(AppState::new(supervisor, config.clone()));
    let app = http::create_router(state);

    let addr: SocketAddr = std::env::var("HLS_JIT_BIND_ADDR")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8080)));

    tracing::info!(%addr, "starting HTTP server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind HTTP listener");
    axum::serve(listener, app)
        .await
        .expect("HTTP server terminated unexpectedly");
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hls_jit_server=info,hls_jit_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
