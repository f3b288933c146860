//! HTTP surface consumed by the kiosk page and phones on the hotspot.
//!
//! Handlers only read status snapshots or call the session controller's
//! non-blocking entry points; none of them ever waits on the camera or the
//! printer. Everything except the auth endpoints sits behind a single
//! shared-password session-cookie gate (disabled when no password is
//! configured).

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AuthConfig;
use crate::error::Error;
use crate::session::SessionController;
use crate::status::StatusSnapshot;
use crate::store::PhotoStore;

const SESSION_COOKIE: &str = "booth_session";

pub struct AuthState {
    password: Option<String>,
    /// Per-process session token; restarting the booth logs everyone out.
    token: String,
}

#[derive(Clone)]
pub struct AppState {
    controller: SessionController,
    store: PhotoStore,
    auth: Arc<AuthState>,
}

impl AppState {
    pub fn new(controller: SessionController, store: PhotoStore, auth: &AuthConfig) -> Self {
        Self {
            controller,
            store,
            auth: Arc::new(AuthState {
                password: auth.password.clone(),
                token: generate_token(),
            }),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/photo", post(start_photo))
        .route("/api/strip", post(start_strip))
        .route("/api/status", get(session_status))
        .route("/api/photos", get(list_photos))
        .route("/api/like/{filename}", post(toggle_like))
        .route("/api/reprint/{filename}", post(reprint_photo))
        .route("/api/delete/{filename}", post(delete_photo))
        .route("/api/auth/status", get(auth_status))
        .route("/api/auth/login", post(auth_login))
        .route("/photos/{filename}", get(serve_photo))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_gate))
        .with_state(state)
}

pub async fn serve(state: AppState, addr: SocketAddr, cancel: CancellationToken) -> Result<()> {
    let app = router(state);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web server on {addr}"))?;
    info!(%addr, "web server listening");
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await
        .context("web server exited")?;
    Ok(())
}

async fn auth_gate(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if state.auth.password.is_none() {
        return next.run(req).await;
    }
    let path = req.uri().path();
    if path == "/api/auth/login" || path == "/api/auth/status" {
        return next.run(req).await;
    }
    if has_session_cookie(req.headers(), &state.auth.token) {
        next.run(req).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "unauthorized" })),
        )
            .into_response()
    }
}

async fn start_photo(State(state): State<AppState>) -> Response {
    start_session(state.controller.start_single())
}

async fn start_strip(State(state): State<AppState>) -> Response {
    start_session(state.controller.start_strip())
}

fn start_session(result: Result<u64, Error>) -> Response {
    match result {
        Ok(_generation) => Json(json!({})).into_response(),
        Err(Error::Busy) => {
            (StatusCode::CONFLICT, Json(json!({ "message": "busy" }))).into_response()
        }
        Err(err) => {
            warn!(error = %err, "failed to start session");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "message": err.user_message() })),
            )
                .into_response()
        }
    }
}

async fn session_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(status_payload(&state.controller.current_status()))
}

fn status_payload(snap: &StatusSnapshot) -> serde_json::Value {
    let mut body = json!({
        "status": snap.mode.as_str(),
        "message": snap.message,
        "in_progress": snap.mode.is_live(),
        "generation": snap.generation,
        "shots_planned": snap.shots_planned,
        "shots_taken": snap.shots_taken,
    });
    if let Some(target) = snap.target_timestamp {
        body["target_timestamp"] = target.into();
    }
    if let Some(filename) = &snap.photo_filename {
        body["photo_url"] = format!("/photos/{filename}").into();
    }
    body
}

async fn list_photos(State(state): State<AppState>) -> Response {
    match state.store.list() {
        Ok(photos) => Json(json!({ "photos": photos })).into_response(),
        Err(err) => {
            warn!(error = %err, "failed to list photos");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "message": err.user_message() })),
            )
                .into_response()
        }
    }
}

async fn toggle_like(State(state): State<AppState>, Path(filename): Path<String>) -> Response {
    match state.store.toggle_like(&filename) {
        Ok(_) => Json(json!({})).into_response(),
        Err(Error::NotFound(_)) => not_found(),
        Err(err) => {
            warn!(filename, error = %err, "failed to toggle like");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "message": err.user_message() })),
            )
                .into_response()
        }
    }
}

async fn reprint_photo(State(state): State<AppState>, Path(filename): Path<String>) -> Response {
    match state.controller.reprint(&filename).await {
        Ok(()) => Json(json!({ "status": "success" })).into_response(),
        Err(Error::NotFound(_)) => not_found(),
        Err(err) => {
            warn!(filename, error = %err, "reprint failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "message": err.user_message() })),
            )
                .into_response()
        }
    }
}

async fn delete_photo(State(state): State<AppState>, Path(filename): Path<String>) -> Response {
    match state.store.delete(&filename) {
        Ok(()) => Json(json!({ "status": "success" })).into_response(),
        Err(Error::NotFound(_)) => not_found(),
        Err(err) => {
            warn!(filename, error = %err, "delete failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "message": err.user_message() })),
            )
                .into_response()
        }
    }
}

async fn serve_photo(State(state): State<AppState>, Path(filename): Path<String>) -> Response {
    match state.store.load_bytes(&filename) {
        Ok(bytes) => {
            let content_type = if filename.to_ascii_lowercase().ends_with(".png") {
                "image/png"
            } else {
                "image/jpeg"
            };
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, content_type)],
                bytes,
            )
                .into_response()
        }
        Err(Error::NotFound(_)) => not_found(),
        Err(err) => {
            warn!(filename, error = %err, "failed to read photo");
            (StatusCode::INTERNAL_SERVER_ERROR, "unreadable photo").into_response()
        }
    }
}

async fn auth_status(State(state): State<AppState>, headers: HeaderMap) -> Json<serde_json::Value> {
    let authenticated = state.auth.password.is_none()
        || has_session_cookie(&headers, &state.auth.token);
    Json(json!({ "authenticated": authenticated }))
}

#[derive(Deserialize)]
struct LoginForm {
    password: String,
}

async fn auth_login(State(state): State<AppState>, Json(form): Json<LoginForm>) -> Response {
    let Some(expected) = &state.auth.password else {
        return Json(json!({})).into_response();
    };
    if form.password == *expected {
        let cookie = format!(
            "{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax",
            state.auth.token
        );
        (
            StatusCode::OK,
            [(header::SET_COOKIE, cookie)],
            Json(json!({})),
        )
            .into_response()
    } else {
        warn!("rejected login attempt");
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "wrong password" })),
        )
            .into_response()
    }
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "message": "not found" }))).into_response()
}

fn has_session_cookie(headers: &HeaderMap, token: &str) -> bool {
    let Some(cookies) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    cookies.split(';').any(|pair| {
        let mut parts = pair.trim().splitn(2, '=');
        parts.next() == Some(SESSION_COOKIE) && parts.next() == Some(token)
    })
}

fn generate_token() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_cookie_matching_is_exact() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            "other=1; booth_session=secret-token".parse().expect("header"),
        );
        assert!(has_session_cookie(&headers, "secret-token"));
        assert!(!has_session_cookie(&headers, "secret"));
        assert!(!has_session_cookie(&HeaderMap::new(), "secret-token"));
    }

    #[test]
    fn tokens_are_long_and_distinct() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn status_payload_shape_matches_mode() {
        let mut snap = StatusSnapshot::idle();
        let body = status_payload(&snap);
        assert_eq!(body["status"], "ready");
        assert_eq!(body["in_progress"], false);
        assert!(body.get("target_timestamp").is_none());

        snap.mode = crate::status::SessionMode::Countdown;
        snap.target_timestamp = Some(1_700_000_000_000);
        snap.generation = 3;
        let body = status_payload(&snap);
        assert_eq!(body["status"], "countdown");
        assert_eq!(body["in_progress"], true);
        assert_eq!(body["target_timestamp"], 1_700_000_000_000i64);
        assert_eq!(body["generation"], 3);
    }
}
