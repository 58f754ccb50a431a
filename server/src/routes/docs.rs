//! Direct generator endpoints: the same document and prototype pipelines the
//! model tools use, minus the model. Artifacts flow through the artifact
//! store exactly as tool-produced ones do.

use aidesk_core::tools;
use aidesk_core::tools::ToolKind;
use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use serde_json::Value as JsonValue;

use crate::auth::authenticate;
use crate::error::ApiError;
use crate::state::AppState;

pub async fn ppt(
    state: State<AppState>,
    headers: HeaderMap,
    body: Json<JsonValue>,
) -> Result<Json<JsonValue>, ApiError> {
    generate(state, headers, body, ToolKind::DocPptxCreate).await
}

pub async fn quote(
    state: State<AppState>,
    headers: HeaderMap,
    body: Json<JsonValue>,
) -> Result<Json<JsonValue>, ApiError> {
    generate(state, headers, body, ToolKind::DocQuoteDocxCreate).await
}

pub async fn quote_xlsx(
    state: State<AppState>,
    headers: HeaderMap,
    body: Json<JsonValue>,
) -> Result<Json<JsonValue>, ApiError> {
    generate(state, headers, body, ToolKind::DocQuoteXlsxCreate).await
}

pub async fn inspection(
    state: State<AppState>,
    headers: HeaderMap,
    body: Json<JsonValue>,
) -> Result<Json<JsonValue>, ApiError> {
    generate(state, headers, body, ToolKind::DocInspectionCreate).await
}

pub async fn inspection_xlsx(
    state: State<AppState>,
    headers: HeaderMap,
    body: Json<JsonValue>,
) -> Result<Json<JsonValue>, ApiError> {
    generate(state, headers, body, ToolKind::DocInspectionXlsxCreate).await
}

pub async fn prototype(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<JsonValue>,
) -> Result<Json<JsonValue>, ApiError> {
    let principal = authenticate(state.resolver.as_ref(), &headers).await?;
    let ctx = state.chat.direct_tool_ctx(&principal, None).await?;
    let outcome = tools::proto::generate(&body, &ctx).await?;
    Ok(Json(outcome.result))
}

async fn generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<JsonValue>,
    kind: ToolKind,
) -> Result<Json<JsonValue>, ApiError> {
    let principal = authenticate(state.resolver.as_ref(), &headers).await?;
    let ctx = state.chat.direct_tool_ctx(&principal, None).await?;
    let outcome = tools::docs::create(kind, &body, &ctx).await?;
    Ok(Json(outcome.result))
}
