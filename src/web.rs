//! Axum HTTP API consumed by the dashboard
//!
//! Read endpoints go straight to the store. Anything that talks to a vendor
//! on behalf of the poller (manual polls) goes through the poller's command
//! channel so sources keep a single owner.

use crate::config::Config;
use crate::error::{HelionError, Result};
use crate::poller::PollerCommand;
use crate::store::Store;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

mod logs;
mod systems;

pub use logs::{logs_stream, logs_tail};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub config: Arc<Config>,
    pub commands: mpsc::UnboundedSender<PollerCommand>,
    pub status_tx: broadcast::Sender<String>,
}

/// Error body `{"error": ...}` with a status derived from the error kind
#[derive(Debug)]
pub struct ApiError(pub HelionError);

impl From<HelionError> for ApiError {
    fn from(err: HelionError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            HelionError::NotFound { .. } => StatusCode::NOT_FOUND,
            HelionError::Validation { .. } => StatusCode::BAD_REQUEST,
            HelionError::Auth { .. } => StatusCode::UNAUTHORIZED,
            HelionError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            HelionError::Api { .. } | HelionError::Network { .. } | HelionError::Timeout { .. } => {
                StatusCode::BAD_GATEWAY
            }
            HelionError::Web { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg_attr(feature = "openapi", utoipa::path(get, path = "/api/health", responses(
    (status = 200, description = "Service is healthy")
)))]
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("APP_VERSION"),
    }))
}

#[cfg_attr(feature = "openapi", utoipa::path(get, path = "/api/config", responses((status = 200))))]
async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.config.redacted())
}

#[cfg(feature = "openapi")]
#[utoipa::path(get, path = "/api/config/schema", responses((status = 200)))]
async fn get_config_schema() -> impl IntoResponse {
    let schema = schemars::schema_for!(crate::config::Config);
    Json(serde_json::to_value(&schema).unwrap_or(serde_json::json!({"error":"schema"})))
}

#[cfg_attr(feature = "openapi", utoipa::path(get, path = "/api/events", responses((status = 200))))]
async fn events(State(state): State<AppState>) -> impl IntoResponse {
    let rx = state.status_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|msg| match msg {
        Ok(payload) => Some(Ok::<Event, std::convert::Infallible>(
            Event::default().event("status").data(payload),
        )),
        Err(_) => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn fallback() -> impl IntoResponse {
    ApiError(HelionError::not_found("route"))
}

#[cfg(feature = "openapi")]
#[derive(utoipa::OpenApi)]
#[openapi(
    paths(
        health, get_config, get_config_schema, events,
        systems::list_systems, systems::get_system, systems::get_readings,
        systems::get_polls, systems::get_schedule, systems::trigger_poll,
        systems::authorize,
        logs::logs_tail, logs::logs_stream,
    ),
    components(schemas(systems::ReadingsQuery, systems::PollsQuery, systems::AuthorizeBody, logs::TailParams)),
    tags((name = "helion", description = "Helion telemetry API"))
)]
pub struct ApiDoc;

pub fn build_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/api/health", get(health))
        .route("/api/config", get(get_config))
        .route("/api/events", get(events))
        .route("/api/systems", get(systems::list_systems))
        .route("/api/systems/{id}", get(systems::get_system))
        .route("/api/systems/{id}/readings", get(systems::get_readings))
        .route("/api/systems/{id}/polls", get(systems::get_polls))
        .route("/api/systems/{id}/schedule", get(systems::get_schedule))
        .route("/api/systems/{id}/poll", post(systems::trigger_poll))
        .route("/api/systems/{id}/authorize", post(systems::authorize))
        .merge(logs::routes());

    #[cfg(feature = "openapi")]
    let router = {
        use utoipa::OpenApi;
        router
            .route("/api/config/schema", get(get_config_schema))
            .merge(utoipa_swagger_ui::SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
    };

    router
        .fallback(fallback)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve until `shutdown` resolves
pub async fn serve<F>(state: AppState, host: &str, port: u16, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = build_router(state);
    let logger = crate::logging::get_logger("web");

    let addr = match host.parse::<IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, port),
        Err(_) => {
            logger.warn(&format!("Invalid host '{}'; falling back to 127.0.0.1", host));
            SocketAddr::from(([127, 0, 0, 1], port))
        }
    };

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| HelionError::web(format!("Failed to bind {}: {}", addr, e)))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| HelionError::web(e.to_string()))?;
    logger.info(&format!(
        "Web server listening at http://{}:{} (API /api)",
        local_addr.ip(),
        local_addr.port()
    ));

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| HelionError::web(e.to_string()))?;
    Ok(())
}
