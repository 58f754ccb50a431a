//! Session history, file listings, and the combined history/workspace search.

use aidesk_core::CoreErr;
use aidesk_core::snapshot;
use aidesk_core::snapshot::SearchHit;
use axum::Json;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::HeaderMap;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value as JsonValue;
use serde_json::json;

use crate::auth::authenticate;
use crate::error::ApiError;
use crate::routes::files::descriptor;
use crate::state::AppState;

pub async fn list_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<JsonValue>, ApiError> {
    let principal = authenticate(state.resolver.as_ref(), &headers).await?;
    let sessions = state.chat.store.list_sessions(principal.team_id).await?;
    Ok(Json(json!({ "sessions": sessions })))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<JsonValue>, ApiError> {
    let principal = authenticate(state.resolver.as_ref(), &headers).await?;
    let session = state
        .chat
        .store
        .get_session(principal.team_id, &session_id)
        .await?
        .ok_or_else(|| CoreErr::NotFound(session_id.clone()))?;
    let messages = state
        .chat
        .store
        .recent_messages(
            principal.team_id,
            &session_id,
            state.chat.config.max_session_messages,
        )
        .await?;
    Ok(Json(json!({ "session": session, "messages": messages })))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<JsonValue>, ApiError> {
    let principal = authenticate(state.resolver.as_ref(), &headers).await?;
    let deleted = state.chat.delete_session(&principal, &session_id).await?;
    if !deleted {
        return Err(CoreErr::NotFound(session_id).into());
    }
    Ok(Json(json!({ "deleted": true })))
}

pub async fn list_files(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<JsonValue>, ApiError> {
    let principal = authenticate(state.resolver.as_ref(), &headers).await?;
    let files: Vec<_> = state
        .chat
        .store
        .list_files(principal.team_id)
        .await?
        .into_iter()
        .map(|record| {
            let url = state.chat.artifacts.download_url(&record);
            descriptor(record, Some(url))
        })
        .collect();
    Ok(Json(json!({ "files": files })))
}

#[derive(Deserialize)]
pub struct SearchQuery {
    q: String,
    #[serde(default = "default_true")]
    include_history: bool,
    #[serde(default)]
    include_workspace: bool,
    #[serde(default)]
    sub_path: Option<String>,
    #[serde(default)]
    project_id: Option<i64>,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_true() -> bool {
    true
}

fn default_limit() -> usize {
    20
}

#[derive(Serialize)]
pub struct SearchResponse {
    hits: Vec<SearchHit>,
}

pub async fn search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchResponse>, ApiError> {
    let principal = authenticate(state.resolver.as_ref(), &headers).await?;
    if query.q.trim().is_empty() {
        return Err(CoreErr::Validation("q must not be empty".to_string()).into());
    }
    let limit = query.limit.min(100);

    let mut hits = Vec::new();
    if query.include_history {
        hits.extend(
            state
                .chat
                .snapshots
                .search(principal.team_id, &query.q, limit)
                .await,
        );
    }
    if query.include_workspace && hits.len() < limit {
        let root = match query.project_id {
            Some(project_id) => {
                let project = state
                    .chat
                    .store
                    .get_project(principal.team_id, project_id)
                    .await?
                    .ok_or_else(|| CoreErr::NotFound(format!("project {project_id}")))?;
                std::path::PathBuf::from(project.path)
            }
            None => state.chat.workspace_root(&principal).await?,
        };
        let remaining = limit - hits.len();
        let q = query.q.clone();
        let sub_path = query.sub_path.clone();
        let workspace_hits = tokio::task::spawn_blocking(move || {
            snapshot::search_workspace(&root, sub_path.as_deref(), &q, remaining)
        })
        .await
        .map_err(CoreErr::from)??;
        hits.extend(workspace_hits);
    }

    Ok(Json(SearchResponse { hits }))
}
