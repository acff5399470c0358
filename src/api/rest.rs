use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::api::tasks::BackgroundTasks;
use crate::controller::Controller;
use crate::receiver::{ProviderKind, Receiver};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Shared application state for all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<Controller>,
    pub provider: ProviderKind,
    pub receiver: Arc<dyn Receiver>,
    /// `None` leaves every route open.
    pub basic_auth: Option<Credentials>,
    pub tasks: BackgroundTasks,
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
}

/// Routes mounted under `prefix` (empty or `/`-prefixed).
pub fn router(state: AppState, prefix: &str) -> Router {
    let routes = Router::new()
        .route("/webhook", post(webhook))
        .route("/health", get(health));

    let routes = if prefix.is_empty() {
        routes
    } else {
        Router::new().nest(prefix, routes)
    };

    routes
        .layer(middleware::from_fn_with_state(state.clone(), basic_auth))
        .with_state(state)
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Accepts every delivery with an empty 200 and handles it in the
/// background; outcomes are reported on the merge request.
async fn webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    if let Some(kind) = ProviderKind::from_headers(&headers) {
        if kind != state.provider {
            warn!(provider = %kind, configured = %state.provider, "ignoring delivery from another provider");
            return StatusCode::OK;
        }
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "webhook body is not JSON");
            return StatusCode::OK;
        }
    };

    let tasks = state.tasks.clone();
    tasks.spawn(async move {
        match state.receiver.canonicalize(&payload) {
            Ok(Some(event)) => state.controller.handle(event).await,
            Ok(None) => debug!("delivery requires no action"),
            Err(e) => {
                let target = state.receiver.failure_target(&payload);
                state.controller.reject(e, target).await;
            }
        }
    });

    StatusCode::OK
}

async fn basic_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(expected) = &state.basic_auth else {
        return next.run(request).await;
    };

    let supplied = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(decode_basic);

    match supplied {
        Some(credentials) if credentials == *expected => next.run(request).await,
        _ => {
            debug!(path = %request.uri().path(), "rejected request without valid credentials");
            (StatusCode::UNAUTHORIZED, "Authorization failed").into_response()
        }
    }
}

fn decode_basic(value: &str) -> Option<Credentials> {
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some(Credentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}
