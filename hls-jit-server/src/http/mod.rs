//! Route table for the HTTP surface described in spec.md §6. Routing itself
//! is this crate's whole job — the core crate never sees an axum type.

pub mod handlers;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(handlers::health_check))
        .route("/api/stream/{id}/master.m3u8", get(handlers::master_playlist))
        .route(
            "/api/stream/{id}/audio/{track}/playlist.m3u8",
            get(handlers::audio_playlist),
        )
        .route(
            "/api/stream/{id}/audio/{track}/{segment}",
            get(handlers::audio_segment),
        )
        .route(
            "/api/stream/{id}/{variant}/init.mp4",
            get(handlers::video_init),
        )
        .route(
            "/api/stream/{id}/{variant}/playlist.m3u8",
            get(handlers::variant_playlist),
        )
        .route(
            "/api/stream/{id}/{variant}/{segment}",
            get(handlers::video_segment),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
