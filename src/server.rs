use axum::{
    extract::State as AxumState,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use crate::commands::Commands;
use crate::error::{CommandError, VaultError};
use crate::notices::NoticeLog;
use crate::normalize_note_path;

const SERVER_NAME: &str = "wikidef";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone)]
pub struct ServerState {
    pub commands: Arc<Commands>,
    pub notices: Arc<NoticeLog>,
}

#[derive(Debug, Deserialize)]
struct OpenRequest {
    path: String,
}

#[derive(Debug, Deserialize)]
struct RenameRequest {
    from: String,
    to: String,
}

#[derive(Debug, Deserialize)]
struct RegenerateFromRequest {
    query: String,
}

struct ApiError(StatusCode, String);

impl From<CommandError> for ApiError {
    fn from(err: CommandError) -> Self {
        let status = match &err {
            CommandError::NoActiveNote | CommandError::NoOrigin(_) => StatusCode::PRECONDITION_FAILED,
            CommandError::NoMatch(_) | CommandError::Vault(VaultError::NotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            CommandError::Busy(_) => StatusCode::CONFLICT,
            CommandError::Vault(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

/// Routes the editor calls to report navigation and run commands.
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/notices", get(handle_notices))
        .route("/events/open", post(handle_open))
        .route("/events/rename", post(handle_rename))
        .route("/commands/regenerate", post(handle_regenerate))
        .route("/commands/regenerate-from", post(handle_regenerate_from))
        .route("/commands/test", post(handle_test))
        .route("/commands/define", post(handle_define))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves on localhost until the process is stopped.
pub async fn serve(state: ServerState, port: u16) -> anyhow::Result<()> {
    let addr = format!("127.0.0.1:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind to {}: {}", addr, e))?;
    info!("Listening on http://{}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn handle_health(AxumState(state): AxumState<ServerState>) -> Json<Value> {
    let session = state.commands.generator().session();
    Json(json!({
        "status": "ok",
        "server": SERVER_NAME,
        "version": SERVER_VERSION,
        "currentNote": session.current().map(|n| n.path),
        "previousNote": session.previous().map(|n| n.path),
    }))
}

async fn handle_notices(AxumState(state): AxumState<ServerState>) -> Json<Value> {
    Json(json!({ "notices": state.notices.recent() }))
}

// Navigation is recorded before responding; generation runs in the background
async fn handle_open(
    AxumState(state): AxumState<ServerState>,
    Json(request): Json<OpenRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let generator = Arc::clone(state.commands.generator());
    let path = normalize_note_path(&request.path);
    let note = generator
        .store()
        .stat(&path)
        .await
        .map_err(|e| ApiError::from(CommandError::from(e)))?;

    let origin = generator.session().record_navigation(&note);
    let origin_path = origin.as_ref().map(|o| o.path.clone());
    tokio::spawn(async move {
        let outcome = generator.handle_open(note, origin).await;
        debug!("Open handler finished: {:?}", outcome);
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "note": path, "origin": origin_path })),
    ))
}

async fn handle_rename(
    AxumState(state): AxumState<ServerState>,
    Json(request): Json<RenameRequest>,
) -> Json<Value> {
    let generator = state.commands.generator();
    let from = normalize_note_path(&request.from);
    let to = normalize_note_path(&request.to);
    let renamed = match generator.store().stat(&to).await {
        Ok(note) => note,
        Err(_) => crate::NoteHandle::new(to.clone(), 0),
    };
    generator.session().rename(&from, &renamed);
    Json(json!({ "from": from, "to": to }))
}

async fn handle_regenerate(
    AxumState(state): AxumState<ServerState>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state.commands.regenerate_current().await?;
    Ok(Json(json!({ "outcome": outcome })))
}

async fn handle_regenerate_from(
    AxumState(state): AxumState<ServerState>,
    Json(request): Json<RegenerateFromRequest>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state.commands.regenerate_from(&request.query).await?;
    Ok(Json(json!({ "outcome": outcome })))
}

async fn handle_test(AxumState(state): AxumState<ServerState>) -> Json<Value> {
    let text = state.commands.test_round_trip().await;
    Json(json!({ "ok": text.is_some(), "text": text }))
}

async fn handle_define(
    AxumState(state): AxumState<ServerState>,
) -> Result<Json<Value>, ApiError> {
    let report = state.commands.define_current().await?;
    Ok(Json(json!(report)))
}
