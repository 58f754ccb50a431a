//! HTTP sidecar provider (`opencode`): one POST per round against a local
//! service, retrying transient failures with the usual backoff schedule.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use super::CompletionRequest;
use super::ModelTurn;
use super::TokenUsage;
use super::backoff;
use aidesk_protocol::ToolCallRequest;

use crate::error::CoreErr;
use crate::error::Result;

const REQUEST_MAX_RETRIES: u64 = 3;

#[derive(Deserialize)]
struct SidecarResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    tool_calls: Vec<SidecarToolCall>,
    #[serde(default)]
    usage: Option<SidecarUsage>,
}

#[derive(Deserialize)]
struct SidecarToolCall {
    #[serde(default)]
    id: Option<String>,
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct SidecarUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

pub(super) async fn complete(
    client: &reqwest::Client,
    base_url: &str,
    request: &CompletionRequest,
) -> Result<ModelTurn> {
    let url = format!("{}/v1/turn", base_url.trim_end_matches('/'));
    let payload = json!({
        "model": request.model,
        "messages": request.messages,
        "tools": request.tools,
    });

    let mut attempt = 0;
    let response: SidecarResponse = loop {
        attempt += 1;
        match client.post(&url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => break resp.json().await?,
            Ok(resp) => {
                let status = resp.status();
                if !(status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()) {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(CoreErr::UnexpectedStatus(status, body));
                }
                if attempt > REQUEST_MAX_RETRIES {
                    return Err(CoreErr::RetryLimit(status));
                }
                let delay = backoff(attempt);
                warn!("{url} returned {status}, retrying in {delay:?}");
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if attempt > REQUEST_MAX_RETRIES {
                    return Err(CoreErr::ProviderFailure(format!(
                        "sidecar unreachable at {url}: {e}"
                    )));
                }
                let delay: Duration = backoff(attempt);
                warn!("request to {url} failed ({e}), retrying in {delay:?}");
                tokio::time::sleep(delay).await;
            }
        }
    };

    Ok(ModelTurn {
        assistant_text: response.text.filter(|t| !t.is_empty()),
        tool_calls: response
            .tool_calls
            .into_iter()
            .enumerate()
            .map(|(idx, call)| ToolCallRequest {
                id: call.id.unwrap_or_else(|| format!("call_{}", idx + 1)),
                name: call.name,
                args: call.arguments,
            })
            .collect(),
        usage: response.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        }),
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use aidesk_protocol::ChatMessage;
    use pretty_assertions::assert_eq;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;
    use wiremock::matchers::method;
    use wiremock::matchers::path;

    use super::*;

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "sidecar".to_string(),
            messages: vec![ChatMessage::user("hi")],
            tools: Vec::new(),
        }
    }

    #[tokio::test]
    async fn parses_a_plain_turn() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/turn"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "text": "from the sidecar",
                "tool_calls": [{ "name": "fs_list", "arguments": "{}" }],
            })))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let turn = complete(&client, &server.uri(), &request()).await.unwrap();
        assert_eq!(turn.assistant_text.as_deref(), Some("from the sidecar"));
        assert_eq!(turn.tool_calls[0].id, "call_1");
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/turn"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/turn"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "text": "recovered" })),
            )
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let turn = complete(&client, &server.uri(), &request()).await.unwrap();
        assert_eq!(turn.assistant_text.as_deref(), Some("recovered"));
    }
}
