//! Session-scoped browser control, sharing the tool handlers with the agent
//! loop. Requires the browser capability: server ceiling and role gate both
//! apply, exactly as they would for a model-initiated call.

use aidesk_core::CoreErr;
use aidesk_core::tools;
use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use serde_json::json;

use crate::auth::authenticate;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct BrowserBody {
    session_id: String,
    #[serde(default)]
    url: Option<String>,
}

pub async fn start(
    state: State<AppState>,
    headers: HeaderMap,
    body: Json<BrowserBody>,
) -> Result<Json<JsonValue>, ApiError> {
    run(state, headers, body, Action::Start).await
}

pub async fn navigate(
    state: State<AppState>,
    headers: HeaderMap,
    body: Json<BrowserBody>,
) -> Result<Json<JsonValue>, ApiError> {
    run(state, headers, body, Action::Navigate).await
}

pub async fn screenshot(
    state: State<AppState>,
    headers: HeaderMap,
    body: Json<BrowserBody>,
) -> Result<Json<JsonValue>, ApiError> {
    run(state, headers, body, Action::Screenshot).await
}

enum Action {
    Start,
    Navigate,
    Screenshot,
}

async fn run(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<BrowserBody>,
    action: Action,
) -> Result<Json<JsonValue>, ApiError> {
    let principal = authenticate(state.resolver.as_ref(), &headers).await?;
    let ctx = state
        .chat
        .direct_tool_ctx(&principal, Some(&body.session_id))
        .await?;
    if !ctx.capabilities.browser {
        return Err(CoreErr::PermissionDenied(
            "browser capability is not enabled for this caller".to_string(),
        )
        .into());
    }

    let outcome = match action {
        Action::Start => tools::browser::start(&json!({}), &ctx).await?,
        Action::Navigate => {
            let url = body
                .url
                .ok_or_else(|| CoreErr::Validation("url is required".to_string()))?;
            tools::browser::navigate(&json!({ "url": url }), &ctx).await?
        }
        Action::Screenshot => tools::browser::screenshot(&json!({}), &ctx).await?,
    };
    Ok(Json(outcome.result))
}
