use super::{ApiError, ApiResult, AppState};
use crate::config::Vendor;
use crate::credentials::OAuthToken;
use crate::enphase::EnphaseClient;
use crate::error::HelionError;
use crate::poller::PollerCommand;
use crate::schedule::SchedulePolicy;
use crate::store::SystemRecord;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::oneshot;

const DEFAULT_READINGS_LIMIT: usize = 1_000;
const MAX_READINGS_LIMIT: usize = 10_000;
const DEFAULT_POLLS_LIMIT: usize = 50;
const MAX_POLLS_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema, utoipa::IntoParams))]
pub struct ReadingsQuery {
    pub point: String,
    /// RFC 3339; defaults to 24 h before `to`
    pub from: Option<DateTime<Utc>>,
    /// RFC 3339, exclusive; defaults to now
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema, utoipa::IntoParams))]
pub struct PollsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AuthorizeBody {
    pub code: String,
    pub redirect_uri: String,
}

fn require_system(state: &AppState, id: &str) -> ApiResult<SystemRecord> {
    state
        .store
        .get_system(id)?
        .ok_or_else(|| ApiError(HelionError::not_found(format!("system '{}'", id))))
}

fn policy_for(state: &AppState, id: &str) -> ApiResult<Option<SchedulePolicy>> {
    match state.config.system(id) {
        Some(system) => Ok(Some(SchedulePolicy::for_system(&state.config, system)?)),
        None => Ok(None),
    }
}

fn system_overview(state: &AppState, record: SystemRecord) -> ApiResult<Value> {
    let last_poll = state.store.last_successful_poll(&record.id)?;
    let latest = state.store.latest_readings(&record.id)?;
    let enabled = state.config.system(&record.id).is_some_and(|s| s.enabled);
    Ok(json!({
        "system": record,
        "enabled": enabled,
        "last_poll": last_poll,
        "latest": latest,
    }))
}

#[cfg_attr(feature = "openapi", utoipa::path(get, path = "/api/systems", responses((status = 200))))]
pub async fn list_systems(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let systems = state
        .store
        .list_systems()?
        .into_iter()
        .map(|record| system_overview(&state, record))
        .collect::<ApiResult<Vec<_>>>()?;
    Ok(Json(json!({ "systems": systems })))
}

#[cfg_attr(feature = "openapi", utoipa::path(get, path = "/api/systems/{id}", responses((status = 200), (status = 404))))]
pub async fn get_system(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let record = require_system(&state, &id)?;
    let points = state.store.list_points(&id)?;
    let mut body = system_overview(&state, record)?;

    let last_poll = state.store.last_successful_poll(&id)?;
    if let Some(policy) = policy_for(&state, &id)? {
        let snapshot = policy.snapshot(Utc::now(), last_poll);
        body["window"] = json!(snapshot.window);
        body["next_poll_at"] = json!(snapshot.next_poll_at);
    }
    body["points"] = json!(points);
    body["backfill"] = json!(state.store.backfill_cursor(&id)?);
    Ok(Json(body))
}

#[cfg_attr(feature = "openapi", utoipa::path(get, path = "/api/systems/{id}/readings", params(ReadingsQuery), responses((status = 200), (status = 400), (status = 404))))]
pub async fn get_readings(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<ReadingsQuery>,
) -> ApiResult<impl IntoResponse> {
    require_system(&state, &id)?;
    if q.point.trim().is_empty() {
        return Err(HelionError::validation("point", "Cannot be empty").into());
    }
    let to = q.to.unwrap_or_else(Utc::now);
    let from = q.from.unwrap_or(to - Duration::hours(24));
    if from >= to {
        return Err(HelionError::validation("from", "Must be before 'to'").into());
    }
    let limit = q
        .limit
        .unwrap_or(DEFAULT_READINGS_LIMIT)
        .clamp(1, MAX_READINGS_LIMIT);

    let readings = state
        .store
        .readings_between(&id, q.point.trim(), from, to, limit)?;
    Ok(Json(json!({
        "system_id": id,
        "point": q.point.trim(),
        "from": from,
        "to": to,
        "readings": readings,
    })))
}

#[cfg_attr(feature = "openapi", utoipa::path(get, path = "/api/systems/{id}/polls", params(PollsQuery), responses((status = 200), (status = 404))))]
pub async fn get_polls(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<PollsQuery>,
) -> ApiResult<impl IntoResponse> {
    require_system(&state, &id)?;
    let limit = q.limit.unwrap_or(DEFAULT_POLLS_LIMIT).clamp(1, MAX_POLLS_LIMIT);
    let runs = state.store.recent_poll_runs(&id, limit)?;
    Ok(Json(json!({ "system_id": id, "polls": runs })))
}

#[cfg_attr(feature = "openapi", utoipa::path(get, path = "/api/systems/{id}/schedule", responses((status = 200), (status = 404))))]
pub async fn get_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let policy = policy_for(&state, &id)?.ok_or_else(|| {
        ApiError(HelionError::not_found(format!("system '{}'", id)))
    })?;
    let last_poll = state.store.last_successful_poll(&id)?;
    Ok(Json(policy.snapshot(Utc::now(), last_poll)))
}

#[cfg_attr(feature = "openapi", utoipa::path(post, path = "/api/systems/{id}/poll", responses((status = 200), (status = 404), (status = 429))))]
pub async fn trigger_poll(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    require_system(&state, &id)?;
    let (reply, rx) = oneshot::channel();
    state
        .commands
        .send(PollerCommand::PollNow {
            system_id: id.clone(),
            reply,
        })
        .map_err(|_| HelionError::web("Poller is not running"))?;
    let run = rx
        .await
        .map_err(|_| HelionError::web("Poller dropped the request"))??;
    Ok(Json(run))
}

#[cfg_attr(feature = "openapi", utoipa::path(post, path = "/api/systems/{id}/authorize", request_body = AuthorizeBody, responses((status = 200), (status = 400), (status = 404))))]
pub async fn authorize(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<AuthorizeBody>,
) -> ApiResult<impl IntoResponse> {
    let system = state
        .config
        .system(&id)
        .ok_or_else(|| ApiError(HelionError::not_found(format!("system '{}'", id))))?;
    if system.vendor != Vendor::Enphase {
        return Err(HelionError::validation("id", "Only Enphase systems use OAuth").into());
    }
    if body.code.trim().is_empty() {
        return Err(HelionError::validation("code", "Cannot be empty").into());
    }
    require_system(&state, &id)?;

    let timeout = std::time::Duration::from_secs(state.config.poller.request_timeout_seconds);
    let client = EnphaseClient::new(&state.config.enphase, timeout)?;
    let grant = client
        .exchange_code(body.code.trim(), body.redirect_uri.trim())
        .await?;
    let token = OAuthToken::from_grant(grant, Utc::now(), None);
    state.store.save_credentials(&id, &token)?;

    crate::logging::get_logger("web")
        .for_system(&id)
        .info("Stored Enphase credentials from authorization code");
    Ok(Json(json!({ "ok": true, "expires_at": token.expires_at })))
}
