//! Control API server

use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;

use crate::config::UiConfig;
use crate::session::SessionHandle;
use crate::ui::handlers;
use crate::ui::websocket;

/// Shared state of every handler
pub struct AppState {
    pub session: SessionHandle,
    pub started: Instant,
}

pub struct WebServer {
    config: UiConfig,
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(config: UiConfig, session: SessionHandle) -> Self {
        Self {
            config,
            state: Arc::new(AppState {
                session,
                started: Instant::now(),
            }),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/status", get(handlers::get_status))
            .route("/api/peers", get(handlers::get_peers))
            .route("/api/devices", get(handlers::get_devices))
            .route("/api/mute", post(handlers::set_mute))
            .route("/api/deafen", post(handlers::set_deafen))
            .route("/api/ptt", post(handlers::set_push_to_talk))
            .route("/api/lobby-settings", put(handlers::update_lobby_settings))
            .route("/api/state", post(handlers::push_game_state))
            .route("/ws", get(websocket::status_stream))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Serve until the listener fails
    pub async fn run(self) -> std::io::Result<()> {
        let addr = self.config.socket_addr();
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!("Control API listening on http://{}", addr);
        axum::serve(listener, self.router()).await
    }

    pub fn start_background(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                tracing::error!("Control API error: {}", e);
            }
        })
    }
}
