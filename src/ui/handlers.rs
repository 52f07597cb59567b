//! HTTP API handlers

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::audio::device::{list_devices, AudioDeviceInfo};
use crate::game::{parse_snapshot, LobbySettingsPatch};
use crate::session::{PeerView, SessionCommand, SessionStatus};
use crate::ui::server::AppState;

/// API response wrapper
#[derive(serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

type ApiResult<T> = (StatusCode, Json<ApiResponse<T>>);

fn dispatch(state: &AppState, command: SessionCommand) -> ApiResult<()> {
    if state.session.send(command) {
        (StatusCode::OK, Json(ApiResponse::ok(())))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::error("Voice session has ended")),
        )
    }
}

/// Session status plus uptime
#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    #[serde(flatten)]
    pub session: SessionStatus,
    pub uptime_seconds: u64,
}

pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<StatusResponse>> {
    let status = StatusResponse {
        session: (*state.session.status()).clone(),
        uptime_seconds: state.started.elapsed().as_secs(),
    };
    Json(ApiResponse::ok(status))
}

pub async fn get_peers(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<PeerView>>> {
    Json(ApiResponse::ok(state.session.status().peers.clone()))
}

pub async fn get_devices() -> Json<ApiResponse<Vec<AudioDeviceInfo>>> {
    Json(ApiResponse::ok(list_devices()))
}

/// Omit `muted` to toggle
#[derive(Debug, Default, serde::Deserialize)]
pub struct MuteRequest {
    pub muted: Option<bool>,
}

pub async fn set_mute(State(state): State<Arc<AppState>>, req: Option<Json<MuteRequest>>) -> ApiResult<()> {
    let command = match req.and_then(|Json(r)| r.muted) {
        Some(muted) => SessionCommand::SetMuted(muted),
        None => SessionCommand::ToggleMute,
    };
    dispatch(&state, command)
}

/// Omit `deafened` to toggle
#[derive(Debug, Default, serde::Deserialize)]
pub struct DeafenRequest {
    pub deafened: Option<bool>,
}

pub async fn set_deafen(State(state): State<Arc<AppState>>, req: Option<Json<DeafenRequest>>) -> ApiResult<()> {
    let command = match req.and_then(|Json(r)| r.deafened) {
        Some(deafened) => SessionCommand::SetDeafened(deafened),
        None => SessionCommand::ToggleDeafen,
    };
    dispatch(&state, command)
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct PushToTalkRequest {
    /// Turn push-to-talk mode on or off
    pub enabled: Option<bool>,
    /// Talk key state
    pub held: Option<bool>,
}

pub async fn set_push_to_talk(State(state): State<Arc<AppState>>, Json(req): Json<PushToTalkRequest>) -> ApiResult<()> {
    if req.enabled.is_none() && req.held.is_none() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Expected `enabled` or `held`")),
        );
    }
    if let Some(enabled) = req.enabled {
        let result = dispatch(&state, SessionCommand::SetPushToTalk(enabled));
        if result.0 != StatusCode::OK {
            return result;
        }
    }
    match req.held {
        Some(held) => dispatch(&state, SessionCommand::TalkKey(held)),
        None => (StatusCode::OK, Json(ApiResponse::ok(()))),
    }
}

pub async fn update_lobby_settings(
    State(state): State<Arc<AppState>>,
    Json(patch): Json<LobbySettingsPatch>,
) -> ApiResult<()> {
    if patch.is_empty() {
        return (StatusCode::BAD_REQUEST, Json(ApiResponse::error("No settings given")));
    }
    dispatch(&state, SessionCommand::UpdateLobbySettings(patch))
}

/// Game-state input from an external game reader
pub async fn push_game_state(State(state): State<Arc<AppState>>, body: String) -> ApiResult<()> {
    match parse_snapshot(&body) {
        Ok(snapshot) => dispatch(&state, SessionCommand::PushGameState(Box::new(snapshot))),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(format!("Invalid game state: {}", e))),
        ),
    }
}
