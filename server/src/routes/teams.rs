//! Auxiliary team routes: memberships, requirements, and cross-team
//! requirement delivery. Plain table operations over the shared store.

use aidesk_core::CoreErr;
use aidesk_core::store::DeliveryState;
use aidesk_core::store::RequirementStatus;
use axum::Json;
use axum::extract::Path;
use axum::extract::State;
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use serde_json::json;

use crate::auth::authenticate;
use crate::error::ApiError;
use crate::state::AppState;

pub async fn my_teams(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<JsonValue>, ApiError> {
    let principal = authenticate(state.resolver.as_ref(), &headers).await?;
    let teams: Vec<JsonValue> = state
        .chat
        .store
        .teams_for_user(principal.user_id)
        .await?
        .into_iter()
        .map(|(team, role)| {
            json!({
                "id": team.id,
                "name": team.name,
                "role": role,
                "active": team.id == principal.team_id,
            })
        })
        .collect();
    Ok(Json(json!({ "teams": teams })))
}

pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<JsonValue>, ApiError> {
    let principal = authenticate(state.resolver.as_ref(), &headers).await?;
    let requirements = state.chat.store.list_requirements(principal.team_id).await?;
    Ok(Json(json!({ "requirements": requirements })))
}

#[derive(Deserialize)]
pub struct CreateBody {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    project_id: Option<i64>,
    #[serde(default)]
    priority: i64,
}

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateBody>,
) -> Result<Json<JsonValue>, ApiError> {
    let principal = authenticate(state.resolver.as_ref(), &headers).await?;
    if body.title.trim().is_empty() {
        return Err(CoreErr::Validation("title must not be empty".to_string()).into());
    }
    let requirement = state
        .chat
        .store
        .create_requirement(
            principal.team_id,
            body.project_id,
            &body.title,
            &body.description,
            body.priority,
        )
        .await?;
    Ok(Json(json!({ "requirement": requirement })))
}

#[derive(Deserialize)]
pub struct DeliverBody {
    target_team_id: i64,
}

pub async fn deliver(
    State(state): State<AppState>,
    Path(requirement_id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<DeliverBody>,
) -> Result<Json<JsonValue>, ApiError> {
    let principal = authenticate(state.resolver.as_ref(), &headers).await?;
    if !principal.role.can_enable_dangerous() {
        return Err(CoreErr::PermissionDenied(
            "delivering requirements requires owner or admin role".to_string(),
        )
        .into());
    }
    let team = state
        .chat
        .store
        .get_team(principal.team_id)
        .await?
        .ok_or(CoreErr::Auth)?;
    if state.chat.store.get_team(body.target_team_id).await?.is_none() {
        return Err(CoreErr::NotFound(format!("team {}", body.target_team_id)).into());
    }
    let delivered = state
        .chat
        .store
        .deliver_requirement(&team, requirement_id, body.target_team_id)
        .await?;
    Ok(Json(json!({ "requirement": delivered })))
}

pub async fn accept(
    state: State<AppState>,
    path: Path<i64>,
    headers: HeaderMap,
) -> Result<Json<JsonValue>, ApiError> {
    settle(state, path, headers, DeliveryState::Accepted).await
}

pub async fn reject(
    state: State<AppState>,
    path: Path<i64>,
    headers: HeaderMap,
) -> Result<Json<JsonValue>, ApiError> {
    settle(state, path, headers, DeliveryState::Rejected).await
}

async fn settle(
    State(state): State<AppState>,
    Path(requirement_id): Path<i64>,
    headers: HeaderMap,
    decision: DeliveryState,
) -> Result<Json<JsonValue>, ApiError> {
    let principal = authenticate(state.resolver.as_ref(), &headers).await?;
    let updated = state
        .chat
        .store
        .set_delivery_state(principal.team_id, requirement_id, decision)
        .await?;
    if !updated {
        return Err(CoreErr::NotFound(format!(
            "pending delivery for requirement {requirement_id}"
        ))
        .into());
    }
    let status = match decision {
        DeliveryState::Accepted => RequirementStatus::Todo,
        _ => RequirementStatus::Incoming,
    };
    Ok(Json(json!({ "ok": true, "status": status })))
}
