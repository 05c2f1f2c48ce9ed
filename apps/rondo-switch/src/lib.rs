pub mod cli;
pub mod config;
pub mod engine;
pub mod handlers;
pub mod presence;
pub mod protocol;
pub mod recorder;
pub mod relay;
pub mod roster;
pub mod websocket;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::engine::MatchEngine;
use crate::handlers::{health_check, list_matches};
use crate::presence::PresenceRegistry;
use crate::recorder::Recorder;
use crate::relay::SignalingRelay;
use crate::websocket::{websocket_handler, AppState};

/// Wire up the shared state for one server instance.
pub fn build_state(config: Config, recorder: Recorder) -> AppState {
    let presence = Arc::new(PresenceRegistry::new());
    let relay = Arc::new(SignalingRelay::new(presence.clone()));
    let engine = MatchEngine::new(presence.clone(), relay.clone(), recorder.clone(), config);
    AppState {
        engine,
        presence,
        relay,
        recorder,
    }
}

/// The full HTTP + WebSocket surface.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/matches", get(list_matches))
        .route("/ws", get(websocket_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
