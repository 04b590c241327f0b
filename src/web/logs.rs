use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{Json, Router, extract::Query, http::header, response::IntoResponse};
use axum::{http::StatusCode, response::Response};
use axum::{routing::get, routing::post};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use super::AppState;

const DEFAULT_TAIL_LINES: usize = 200;
const MAX_TAIL_LINES: usize = 10_000;

#[derive(Debug, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema, utoipa::IntoParams))]
pub struct TailParams {
    pub lines: Option<usize>,
}

#[cfg_attr(feature = "openapi", utoipa::path(get, path = "/api/logs/tail", params(TailParams), responses((status = 200), (status = 404))))]
pub async fn logs_tail(
    State(state): State<AppState>,
    Query(params): Query<TailParams>,
) -> impl IntoResponse {
    let max_lines = params
        .lines
        .unwrap_or(DEFAULT_TAIL_LINES)
        .min(MAX_TAIL_LINES);
    let Some(path) = resolve_log_file_path(&state.config.logging.file).await else {
        return log_unavailable();
    };
    match fs::read_to_string(&path).await {
        Ok(contents) => {
            let lines: Vec<&str> = contents.lines().collect();
            let start = lines.len().saturating_sub(max_lines);
            let mut resp = Response::new(lines[start..].join("\n").into());
            resp.headers_mut().insert(
                header::CONTENT_TYPE,
                header::HeaderValue::from_static("text/plain; charset=utf-8"),
            );
            resp
        }
        Err(_) => log_unavailable(),
    }
}

fn log_unavailable() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": "Log file not available"})),
    )
        .into_response()
}

#[cfg_attr(feature = "openapi", utoipa::path(get, path = "/api/logs/stream", responses((status = 200))))]
pub async fn logs_stream() -> impl IntoResponse {
    let rx = crate::logging::subscribe_log_lines();
    let stream = BroadcastStream::new(rx).filter_map(|res| match res {
        Ok(line) if crate::logging::should_emit_to_web(&line) => {
            Some(Ok::<Event, std::convert::Infallible>(
                Event::default().event("log").data(line),
            ))
        }
        _ => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Rolling appenders write `<prefix>.<date>.log`; also accept the plain name
fn name_matches(file_name: &str, prefix: &str, suffix: &str) -> bool {
    file_name == format!("{}.{}", prefix, suffix)
        || (file_name.starts_with(&format!("{}.", prefix))
            && file_name.ends_with(&format!(".{}", suffix)))
}

fn derive_search_spec(configured: &Path) -> (PathBuf, String, String) {
    if configured.extension().is_some() {
        let dir = configured
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let stem = configured
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("helion")
            .to_string();
        let ext = configured
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("log")
            .to_string();
        (dir.to_path_buf(), stem, ext)
    } else {
        (configured.to_path_buf(), "helion".to_string(), "log".to_string())
    }
}

async fn find_latest_matching(search_dir: &Path, prefix: &str, suffix: &str) -> Option<PathBuf> {
    let mut best: Option<(SystemTime, PathBuf)> = None;
    let mut rd = fs::read_dir(search_dir).await.ok()?;
    while let Ok(Some(entry)) = rd.next_entry().await {
        if let Some(name) = entry.file_name().to_str()
            && name_matches(name, prefix, suffix)
            && let Ok(md) = entry.metadata().await
            && md.is_file()
            && let Ok(modified) = md.modified()
            && best.as_ref().is_none_or(|(t, _)| modified > *t)
        {
            best = Some((modified, entry.path()));
        }
    }
    best.map(|(_, p)| p)
}

/// Newest log file for the configured path, following daily rotation
async fn resolve_log_file_path(configured_path: &str) -> Option<PathBuf> {
    let configured = Path::new(configured_path);
    if let Ok(md) = fs::metadata(configured).await
        && md.is_file()
    {
        return Some(configured.to_path_buf());
    }
    let (search_dir, prefix, suffix) = derive_search_spec(configured);
    find_latest_matching(&search_dir, &prefix, &suffix).await
}

#[derive(Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema, utoipa::IntoParams))]
struct WebLevelQuery {
    level: String,
}

async fn set_web_log_level(Query(q): Query<WebLevelQuery>) -> impl IntoResponse {
    match crate::logging::set_web_log_level_str(&q.level) {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({"ok": true, "level": q.level})),
        ),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": e.to_string()})),
        ),
    }
}

async fn get_web_log_level() -> impl IntoResponse {
    let lvl = crate::logging::get_web_log_level();
    Json(serde_json::json!({"level": lvl.to_string()}))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/logs/tail", get(logs_tail))
        .route("/api/logs/stream", get(logs_stream))
        .route(
            "/api/logs/web_level",
            post(set_web_log_level).get(get_web_log_level),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotated_names_match() {
        assert!(name_matches("helion.log", "helion", "log"));
        assert!(name_matches("helion.2024-06-01.log", "helion", "log"));
        assert!(!name_matches("other.2024-06-01.log", "helion", "log"));
        assert!(!name_matches("helion.2024-06-01.txt", "helion", "log"));
    }

    #[test]
    fn search_spec_from_file_path() {
        let (dir, stem, ext) = derive_search_spec(Path::new("/var/log/helion/poller.log"));
        assert_eq!(dir, PathBuf::from("/var/log/helion"));
        assert_eq!(stem, "poller");
        assert_eq!(ext, "log");
    }
}
