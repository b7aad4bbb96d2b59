use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::bot::AppState;
use crate::trigger::{self, Trigger};

/// Header Telegram sends with every webhook call when a secret is set
const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Clone)]
struct ServerState {
    app: Arc<AppState>,
    secret_token: Option<Arc<str>>,
}

#[derive(Serialize, Debug, PartialEq)]
struct InvokeResponse {
    ok: bool,
    body: String,
}

impl InvokeResponse {
    fn ok(body: impl Into<String>) -> Json<Self> {
        Json(Self {
            ok: true,
            body: body.into(),
        })
    }

    fn rejected(status: StatusCode, body: impl Into<String>) -> (StatusCode, Json<Self>) {
        (
            status,
            Json(Self {
                ok: false,
                body: body.into(),
            }),
        )
    }
}

fn router(state: ServerState, invoke_path: &str) -> Router {
    Router::new()
        .route(invoke_path, post(invoke))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve the invocation endpoint until the shutdown future resolves
pub async fn serve(
    app: Arc<AppState>,
    bind_address: &str,
    invoke_path: &str,
    secret_token: Option<String>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let state = ServerState {
        app,
        secret_token: secret_token.map(Arc::from),
    };
    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_address))?;

    info!("Listening for invocations on {}{}", bind_address, invoke_path);
    axum::serve(listener, router(state, invoke_path))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;

    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn invoke(
    State(state): State<ServerState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<InvokeResponse>, (StatusCode, Json<InvokeResponse>)> {
    let authenticated = match state.secret_token.as_deref() {
        Some(expected) => {
            let provided = headers.get(SECRET_HEADER).map(|v| v.as_bytes());
            if !provided.is_some_and(|p| constant_time_eq(p, expected.as_bytes())) {
                warn!("Rejected invocation with a missing or wrong secret token");
                return Err(InvokeResponse::rejected(
                    StatusCode::UNAUTHORIZED,
                    "bad secret token",
                ));
            }
            true
        }
        None => false,
    };

    let trigger = trigger::classify(&body).map_err(|e| {
        warn!("Malformed invocation: {:#}", e);
        InvokeResponse::rejected(StatusCode::BAD_REQUEST, "malformed update")
    })?;

    match trigger {
        // Without a shared secret anyone could start a cycle over HTTP
        Trigger::ScheduledTick if !authenticated => {
            warn!("Refused scheduled tick: no secret token is configured");
            Err(InvokeResponse::rejected(
                StatusCode::FORBIDDEN,
                "ticks over HTTP need a secret token",
            ))
        }
        Trigger::ScheduledTick => match state.app.run_tick().await {
            Ok(_) => Ok(InvokeResponse::ok("Poll check completed")),
            Err(e) => {
                error!("Quiz tick failed: {:#}", e);
                Err(InvokeResponse::rejected(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "quiz tick failed",
                ))
            }
        },
        // Updates always get a 200 so Telegram does not redeliver them
        Trigger::Update(update) => {
            state.app.process_update(&update).await;
            Ok(InvokeResponse::ok("OK"))
        }
        Trigger::Unrecognized => Err(InvokeResponse::rejected(
            StatusCode::BAD_REQUEST,
            "unrecognized invocation",
        )),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
