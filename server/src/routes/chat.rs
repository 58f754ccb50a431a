//! The chat entry point. One handler, two encodings of the same event
//! stream: a buffered JSON body, or SSE frames followed by a terminal `done`
//! event. The agent loop never knows which one is active.

use std::convert::Infallible;
use std::sync::Arc;

use aidesk_protocol::ChatRequest;
use aidesk_protocol::TurnEvent;
use axum::Json;
use axum::extract::Query;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::response::sse::Event;
use axum::response::sse::KeepAlive;
use axum::response::sse::Sse;
use futures::StreamExt;
use futures::stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::auth::authenticate;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize, Default)]
pub struct ChatQuery {
    #[serde(default)]
    stream: bool,
}

pub async fn chat(
    State(state): State<AppState>,
    Query(query): Query<ChatQuery>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let principal = authenticate(state.resolver.as_ref(), &headers).await?;
    if request.message.trim().is_empty() {
        return Err(aidesk_core::CoreErr::Validation("message must not be empty".to_string()).into());
    }

    let wants_sse = query.stream
        || headers
            .get(axum::http::header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|accept| accept.contains("text/event-stream"));

    if !wants_sse {
        let response = state.chat.chat(&principal, request).await?;
        return Ok(Json(response).into_response());
    }

    // Streaming: events flow through the channel while the turn runs in the
    // background; dropping the response stream cancels the turn between
    // steps via the token guard.
    let (tx, rx) = mpsc::channel::<TurnEvent>(64);
    let (done_tx, done_rx) = oneshot::channel::<bool>();
    let cancel = CancellationToken::new();

    {
        let chat = Arc::clone(&state.chat);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let result = chat.chat_streaming(&principal, request, tx, cancel).await;
            if let Err(e) = &result {
                debug!("streaming turn ended with error: {e}");
            }
            done_tx.send(result.is_ok()).ok();
        });
    }

    let guard = cancel.drop_guard();
    let events = ReceiverStream::new(rx).map(move |event| {
        // The guard rides along with the stream; dropping the response
        // cancels the in-flight turn.
        let _ = &guard;
        let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok::<Event, Infallible>(Event::default().event(event.kind()).data(data))
    });
    let done = stream::once(async move {
        let ok = done_rx.await.unwrap_or(false);
        Ok(Event::default()
            .event("done")
            .data(json!({ "success": ok }).to_string()))
    });

    Ok(Sse::new(events.chain(done))
        .keep_alive(KeepAlive::default())
        .into_response())
}
