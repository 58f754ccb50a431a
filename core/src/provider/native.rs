//! Native provider: the classic chat-completions streaming API. Tool calls
//! arrive as argument fragments spread over `delta` events; we accumulate
//! them per index and hand back complete calls in provider order.

use std::collections::BTreeMap;
use std::time::Duration;

use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use serde_json::json;
use tokio::time::timeout;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::CompletionRequest;
use super::ModelTurn;
use super::TokenUsage;
use super::backoff;
use aidesk_protocol::ChatMessage;
use aidesk_protocol::MessageRole;
use aidesk_protocol::ToolCallRequest;

use crate::error::CoreErr;
use crate::error::Result;

const REQUEST_MAX_RETRIES: u64 = 4;
const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

pub(super) async fn complete(
    client: &reqwest::Client,
    base_url: &str,
    api_key: Option<String>,
    request: &CompletionRequest,
) -> Result<ModelTurn> {
    let payload = json!({
        "model": request.model,
        "messages": wire_messages(&request.messages),
        "stream": true,
        "stream_options": { "include_usage": true },
        "tools": request.tools,
    });

    let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
    debug!("POST {url} ({} messages)", request.messages.len());

    let mut attempt = 0;
    loop {
        attempt += 1;

        let mut req_builder = client.post(&url);
        if let Some(api_key) = &api_key {
            req_builder = req_builder.bearer_auth(api_key.clone());
        }
        let res = req_builder
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&payload)
            .send()
            .await;

        match res {
            Ok(resp) if resp.status().is_success() => {
                return consume_sse(resp).await;
            }
            Ok(res) => {
                let status = res.status();
                if !(status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()) {
                    let body = (res.text().await).unwrap_or_default();
                    return Err(CoreErr::UnexpectedStatus(status, body));
                }
                if attempt > REQUEST_MAX_RETRIES {
                    return Err(CoreErr::RetryLimit(status));
                }
                let retry_after_secs = res
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok());
                let delay = retry_after_secs
                    .map(|s| Duration::from_millis(s * 1_000))
                    .unwrap_or_else(|| backoff(attempt));
                warn!("{url} returned {status}, retrying in {delay:?} ({attempt}/{REQUEST_MAX_RETRIES})");
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if attempt > REQUEST_MAX_RETRIES {
                    return Err(e.into());
                }
                let delay = backoff(attempt);
                warn!("request to {url} failed ({e}), retrying in {delay:?}");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// State to accumulate a function call across streaming chunks: the
/// `arguments` string may be split over many `delta` events until the chunk
/// whose `finish_reason` is `tool_calls`.
#[derive(Default)]
struct FunctionCallState {
    call_id: Option<String>,
    name: Option<String>,
    arguments: String,
}

async fn consume_sse(resp: reqwest::Response) -> Result<ModelTurn> {
    let mut stream = resp.bytes_stream().eventsource();

    let mut text = String::new();
    let mut calls: BTreeMap<u64, FunctionCallState> = BTreeMap::new();
    let mut usage: Option<TokenUsage> = None;
    let mut finished = false;

    loop {
        let sse = match timeout(STREAM_IDLE_TIMEOUT, stream.next()).await {
            Ok(Some(Ok(ev))) => ev,
            Ok(Some(Err(e))) => return Err(CoreErr::Stream(e.to_string())),
            Ok(None) => break,
            Err(_) => {
                if finished {
                    break;
                }
                return Err(CoreErr::Stream("idle timeout waiting for SSE".into()));
            }
        };

        if sse.data.trim() == "[DONE]" {
            break;
        }
        let chunk: JsonValue = match serde_json::from_str(&sse.data) {
            Ok(v) => v,
            Err(_) => continue,
        };
        trace!("chat completions SSE chunk: {chunk:?}");

        if let Some(u) = chunk.get("usage").filter(|u| !u.is_null()) {
            usage = Some(TokenUsage {
                prompt_tokens: u.get("prompt_tokens").and_then(JsonValue::as_u64).unwrap_or(0),
                completion_tokens: u
                    .get("completion_tokens")
                    .and_then(JsonValue::as_u64)
                    .unwrap_or(0),
            });
        }

        let Some(choice) = chunk.get("choices").and_then(|c| c.get(0)) else {
            continue;
        };

        if let Some(content) = choice
            .get("delta")
            .and_then(|d| d.get("content"))
            .and_then(|c| c.as_str())
        {
            text.push_str(content);
        }

        if let Some(tool_calls) = choice
            .get("delta")
            .and_then(|d| d.get("tool_calls"))
            .and_then(|tc| tc.as_array())
        {
            for tool_call in tool_calls {
                let index = tool_call.get("index").and_then(JsonValue::as_u64).unwrap_or(0);
                let state = calls.entry(index).or_default();
                if let Some(id) = tool_call.get("id").and_then(|v| v.as_str()) {
                    state.call_id.get_or_insert_with(|| id.to_string());
                }
                if let Some(function) = tool_call.get("function") {
                    if let Some(name) = function.get("name").and_then(|n| n.as_str()) {
                        state.name.get_or_insert_with(|| name.to_string());
                    }
                    if let Some(fragment) = function.get("arguments").and_then(|a| a.as_str()) {
                        state.arguments.push_str(fragment);
                    }
                }
            }
        }

        if choice
            .get("finish_reason")
            .and_then(|v| v.as_str())
            .is_some()
        {
            // Keep draining: the usage chunk arrives after the final choice.
            finished = true;
        }
    }

    let tool_calls = calls
        .into_values()
        .enumerate()
        .map(|(idx, state)| ToolCallRequest {
            id: state.call_id.unwrap_or_else(|| format!("call_{idx}")),
            name: state.name.unwrap_or_default(),
            args: state.arguments,
        })
        .collect();

    Ok(ModelTurn {
        assistant_text: if text.is_empty() { None } else { Some(text) },
        tool_calls,
        usage,
    })
}

/// Chat-completions message array for the request body.
fn wire_messages(messages: &[ChatMessage]) -> Vec<JsonValue> {
    messages
        .iter()
        .map(|message| match message.role {
            MessageRole::Assistant if message.tool_calls.is_some() => {
                let calls: Vec<JsonValue> = message
                    .tool_calls
                    .iter()
                    .flatten()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": { "name": call.name, "arguments": call.args },
                        })
                    })
                    .collect();
                json!({
                    "role": "assistant",
                    "content": if message.content.is_empty() {
                        JsonValue::Null
                    } else {
                        JsonValue::String(message.content.clone())
                    },
                    "tool_calls": calls,
                })
            }
            MessageRole::Tool => json!({
                "role": "tool",
                "tool_call_id": message.tool_call_id,
                "content": message.content,
            }),
            role => json!({ "role": role.as_str(), "content": message.content }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use pretty_assertions::assert_eq;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;
    use wiremock::matchers::method;
    use wiremock::matchers::path;

    use super::*;

    fn sse_body(events: &[&str]) -> String {
        let mut body = String::new();
        for event in events {
            body.push_str("data: ");
            body.push_str(event);
            body.push_str("\n\n");
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    async fn serve(body: String) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_raw(body, "text/event-stream"),
            )
            .mount(&server)
            .await;
        server
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "test-model".to_string(),
            messages: vec![ChatMessage::user("hello")],
            tools: Vec::new(),
        }
    }

    #[tokio::test]
    async fn aggregates_text_deltas() {
        let server = serve(sse_body(&[
            r#"{"choices":[{"delta":{"content":"Hel"}}]}"#,
            r#"{"choices":[{"delta":{"content":"lo!"}}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
        ]))
        .await;

        let client = reqwest::Client::new();
        let turn = complete(&client, &server.uri(), None, &request()).await.unwrap();
        assert_eq!(turn.assistant_text.as_deref(), Some("Hello!"));
        assert!(turn.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn reassembles_split_tool_call_arguments() {
        let server = serve(sse_body(&[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"fs_read","arguments":"{\"pa"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"th\":\"a.txt\"}"}}]}}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
        ]))
        .await;

        let client = reqwest::Client::new();
        let turn = complete(&client, &server.uri(), None, &request()).await.unwrap();
        assert_eq!(turn.tool_calls.len(), 1);
        let call = &turn.tool_calls[0];
        assert_eq!(call.id, "call_1");
        assert_eq!(call.name, "fs_read");
        assert_eq!(call.args, r#"{"path":"a.txt"}"#);
    }

    #[tokio::test]
    async fn parallel_tool_calls_keep_provider_order() {
        let server = serve(sse_body(&[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"b","function":{"name":"fs_list","arguments":"{}"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"a","function":{"name":"fs_read","arguments":"{}"}}]}}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
        ]))
        .await;

        let client = reqwest::Client::new();
        let turn = complete(&client, &server.uri(), None, &request()).await.unwrap();
        let ids: Vec<&str> = turn.tool_calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn usage_chunk_after_finish_is_captured() {
        let server = serve(sse_body(&[
            r#"{"choices":[{"delta":{"content":"ok"},"finish_reason":"stop"}]}"#,
            r#"{"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":3}}"#,
        ]))
        .await;

        let client = reqwest::Client::new();
        let turn = complete(&client, &server.uri(), None, &request()).await.unwrap();
        let usage = turn.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 12);
        assert_eq!(usage.completion_tokens, 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = complete(&client, &server.uri(), None, &request()).await.unwrap_err();
        match err {
            CoreErr::UnexpectedStatus(status, body) => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert_eq!(body, "bad request");
            }
            other => panic!("expected UnexpectedStatus, got {other}"),
        }
    }

    #[test]
    fn tool_results_serialize_with_tool_call_id() {
        let messages = vec![
            ChatMessage::assistant_tool_calls(
                String::new(),
                vec![ToolCallRequest {
                    id: "call_9".into(),
                    name: "fs_read".into(),
                    args: "{}".into(),
                }],
            ),
            ChatMessage::tool("call_9", "contents"),
        ];
        let wire = wire_messages(&messages);
        assert_eq!(wire[0]["tool_calls"][0]["id"], "call_9");
        assert!(wire[0]["content"].is_null());
        assert_eq!(wire[1]["role"], "tool");
        assert_eq!(wire[1]["tool_call_id"], "call_9");
    }
}
