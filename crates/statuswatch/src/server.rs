//! Admin HTTP API.
//!
//! Provides REST API endpoints for:
//! - Health checks
//! - Inspecting the persisted relay state
//! - Subscribing and unsubscribing guilds
//! - Reporting deleted destinations
//!
//! Callers assert their own permissions through [`CALLER_PERMISSIONS_HEADER`],
//! so the API must only be reachable from a trusted front-end. When an admin
//! token is configured every `/api` route also requires
//! `Authorization: Bearer <token>`.

use anyhow::Result;
use axum::{
    extract::{Path, Request, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use notify::Permissions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::engine::SharedState;
use crate::error::SubscriptionError;
use crate::store::{Records, Subscription, Watermark};
use crate::subscriptions::{Caller, SubscriptionService};

/// Header carrying the caller's permission bits, as a decimal string.
pub const CALLER_PERMISSIONS_HEADER: &str = "x-caller-permissions";

/// Server state shared across handlers.
pub struct ServerState {
    /// Subscription operations
    pub subscriptions: SubscriptionService,
    /// Persisted records
    pub records: Records,
    /// Reconciliation caches shared with the scheduler
    pub state: SharedState,
    /// Bearer token required on `/api` routes, if any
    pub admin_token: Option<String>,
}

impl ServerState {
    #[must_use]
    pub fn new(subscriptions: SubscriptionService, records: Records, state: SharedState) -> Self {
        Self {
            subscriptions,
            records,
            state,
            admin_token: None,
        }
    }

    /// Require `Authorization: Bearer <token>` on `/api` routes.
    #[must_use]
    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token;
        self
    }
}

/// Build the admin router.
pub fn build_router(state: Arc<ServerState>) -> Router {
    let api = Router::new()
        .route("/api/state", get(state_handler))
        .route(
            "/api/guilds/{guild_id}/destination",
            put(subscribe_handler).delete(unsubscribe_handler),
        )
        .route(
            "/api/destinations/{destination_id}/deleted",
            post(destination_deleted_handler),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_admin_token,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the admin server until the listener fails.
pub async fn run_server(state: Arc<ServerState>, addr: &str) -> Result<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Admin API listening");

    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct StateResponse {
    watermark: Option<Watermark>,
    pending: BTreeSet<u64>,
    last_sent: BTreeSet<u64>,
    subscriptions: Vec<Subscription>,
}

#[derive(Debug, Deserialize)]
struct SubscribeRequest {
    destination_id: u64,
}

#[derive(Debug, Serialize)]
struct UnsubscribeResponse {
    guild_id: u64,
    destination_id: u64,
}

#[derive(Debug, Serialize)]
struct DestinationDeletedResponse {
    destination_id: u64,
    removed: bool,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(err: &SubscriptionError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match err {
        SubscriptionError::MissingPermission => StatusCode::FORBIDDEN,
        SubscriptionError::DestinationUnusable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SubscriptionError::NotSubscribed(_) => StatusCode::NOT_FOUND,
        SubscriptionError::Channel(_) => StatusCode::BAD_GATEWAY,
        SubscriptionError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(error = %err, "Subscription request failed");
    } else {
        warn!(error = %err, "Subscription request rejected");
    }
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

/// Caller permissions from the request headers. Missing or malformed
/// values grant nothing.
fn caller_from_headers(headers: &HeaderMap) -> Caller {
    let permissions = headers
        .get(CALLER_PERMISSIONS_HEADER)
        .and_then(|value| value.to_str().ok())
        .map_or(Permissions::NONE, Permissions::parse);
    Caller::new(permissions)
}

// ============================================================================
// Handlers
// ============================================================================

async fn require_admin_token(
    State(state): State<Arc<ServerState>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(expected) = state.admin_token.as_deref() {
        let presented = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));
        if presented != Some(expected) {
            warn!(path = %request.uri().path(), "Rejected admin request without a valid token");
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "missing or invalid admin token".to_string(),
                }),
            )
                .into_response();
        }
    }
    next.run(request).await
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Persisted records, read under the state lock so a cycle is never
/// observed half-written.
async fn state_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let _guard = state.state.lock().await;
    let snapshot = async {
        Ok::<_, crate::store::StoreError>(StateResponse {
            watermark: state.records.load_watermark().await?,
            pending: state.records.load_pending().await?,
            last_sent: state.records.load_last_sent().await?.destinations,
            subscriptions: state.records.subscriptions().await?,
        })
    }
    .await;

    match snapshot {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(e) => error_response(&SubscriptionError::Persistence(e)).into_response(),
    }
}

async fn subscribe_handler(
    State(state): State<Arc<ServerState>>,
    Path(guild_id): Path<u64>,
    headers: HeaderMap,
    Json(request): Json<SubscribeRequest>,
) -> impl IntoResponse {
    let caller = caller_from_headers(&headers);
    match state
        .subscriptions
        .subscribe(&caller, guild_id, request.destination_id)
        .await
    {
        Ok(subscribed) => (StatusCode::OK, Json(subscribed)).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

async fn unsubscribe_handler(
    State(state): State<Arc<ServerState>>,
    Path(guild_id): Path<u64>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let caller = caller_from_headers(&headers);
    match state.subscriptions.unsubscribe(&caller, guild_id).await {
        Ok(Some(destination_id)) => (
            StatusCode::OK,
            Json(UnsubscribeResponse {
                guild_id,
                destination_id,
            }),
        )
            .into_response(),
        Ok(None) => error_response(&SubscriptionError::NotSubscribed(guild_id)).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

async fn destination_deleted_handler(
    State(state): State<Arc<ServerState>>,
    Path(destination_id): Path<u64>,
) -> impl IntoResponse {
    match state.subscriptions.destination_deleted(destination_id).await {
        Ok(removed) => (
            StatusCode::OK,
            Json(DestinationDeletedResponse {
                destination_id,
                removed,
            }),
        )
            .into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}
