//! The agent loop: drives assistant/tool rounds against the chosen provider
//! up to `max_steps`, emitting the turn's event trace in strict order.
//!
//! Tool-level failures (unknown tool, bad arguments, disabled capability,
//! handler error, timeout) are reported inside the event stream as
//! `tool_result` errors and the loop continues; the model sees them as tool
//! messages and can recover. Provider failures and cancellation abort the
//! loop at the next safe point.

use std::time::Instant;

use aidesk_protocol::AssistantMessageEvent;
use aidesk_protocol::ChatMessage;
use aidesk_protocol::ContextTrimEvent;
use aidesk_protocol::ErrorEvent;
use aidesk_protocol::PermissionEvent;
use aidesk_protocol::ProviderDoneEvent;
use aidesk_protocol::ProviderFallbackEvent;
use aidesk_protocol::ProviderStartEvent;
use aidesk_protocol::SecurityProfile;
use aidesk_protocol::TaskArtifactEvent;
use aidesk_protocol::ToolCallEvent;
use aidesk_protocol::ToolCallRequest;
use aidesk_protocol::ToolResultEvent;
use aidesk_protocol::TurnEvent;
use serde_json::Value as JsonValue;
use serde_json::json;
use tracing::debug;
use tracing::info;

use crate::context::TRUNCATION_MARKER;
use crate::error::CoreErr;
use crate::provider::CompletionRequest;
use crate::provider::ProviderClient;
use crate::store::FileRecord;
use crate::tools;
use crate::tools::ToolCtx;
use crate::tools::ToolKind;
use crate::trace::TurnTrace;

pub struct AgentParams<'a> {
    pub provider: &'a ProviderClient,
    pub model: String,
    pub profile: SecurityProfile,
    pub fallback: Option<ProviderFallbackEvent>,
    /// Requested-but-cleared capabilities, reported as `permission` events.
    pub cleared: Vec<(&'static str, &'static str)>,
    /// Diagnostic from the context budgeter, if anything was dropped.
    pub trim: Option<ContextTrimEvent>,
    pub max_steps: usize,
    pub ctx: ToolCtx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopFailure {
    /// Client went away; the caller persists the user message only.
    Cancelled,
    /// Provider error or timeout; rounds completed so far stay persisted.
    Provider,
}

pub struct LoopOutcome {
    pub assistant_text: String,
    /// Messages produced this turn, in order: assistant tool-call rounds,
    /// their tool results, and the terminal assistant message.
    pub appended: Vec<ChatMessage>,
    pub artifacts: Vec<FileRecord>,
    pub failure: Option<LoopFailure>,
    pub failure_detail: Option<CoreErr>,
}

pub async fn run_loop(
    params: AgentParams<'_>,
    messages: Vec<ChatMessage>,
    trace: &mut TurnTrace,
) -> LoopOutcome {
    let AgentParams {
        provider,
        model,
        profile,
        fallback,
        cleared,
        trim,
        max_steps,
        ctx,
    } = params;

    trace
        .emit(TurnEvent::SecurityProfile(profile.into()))
        .await;
    if let Some(trim) = trim {
        trace.emit(TurnEvent::ContextTrim(trim)).await;
    }
    for (capability, reason) in cleared {
        trace
            .emit(TurnEvent::Permission(PermissionEvent {
                capability: capability.to_string(),
                reason: reason.to_string(),
            }))
            .await;
    }
    if let Some(fallback) = fallback {
        trace.emit(TurnEvent::ProviderFallback(fallback)).await;
    }
    trace
        .emit(TurnEvent::ProviderStart(ProviderStartEvent {
            provider: provider.kind().id().to_string(),
            model: model.clone(),
        }))
        .await;

    let started = Instant::now();
    let tools_json = tools::function_descriptors();

    let mut appended: Vec<ChatMessage> = Vec::new();
    let mut artifacts: Vec<FileRecord> = Vec::new();
    let mut last_text: Option<String> = None;

    for step in 0..max_steps {
        if ctx.cancel.is_cancelled() {
            return cancelled(appended, artifacts);
        }

        let mut request_messages = messages.clone();
        request_messages.extend(appended.iter().cloned());
        let result = provider
            .complete(CompletionRequest {
                model: model.clone(),
                messages: request_messages,
                tools: tools_json.clone(),
            })
            .await;

        let turn = match result {
            Ok(turn) => turn,
            Err(e) => {
                info!("provider error on step {step}: {e}");
                trace
                    .emit(TurnEvent::Error(ErrorEvent {
                        message: e.to_string(),
                    }))
                    .await;
                return LoopOutcome {
                    assistant_text: String::new(),
                    appended,
                    artifacts,
                    failure: Some(LoopFailure::Provider),
                    failure_detail: Some(e),
                };
            }
        };

        if turn.tool_calls.is_empty() {
            let text = turn.assistant_text.unwrap_or_default();
            trace
                .emit(TurnEvent::AssistantMessage(AssistantMessageEvent {
                    message: text.clone(),
                }))
                .await;
            trace
                .emit(TurnEvent::ProviderDone(ProviderDoneEvent {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }))
                .await;
            appended.push(ChatMessage::assistant(text.clone()));
            return LoopOutcome {
                assistant_text: text,
                appended,
                artifacts,
                failure: None,
                failure_detail: None,
            };
        }

        if let Some(text) = &turn.assistant_text {
            last_text = Some(text.clone());
        }
        appended.push(ChatMessage::assistant_tool_calls(
            turn.assistant_text.clone().unwrap_or_default(),
            turn.tool_calls.clone(),
        ));

        for call in &turn.tool_calls {
            if ctx.cancel.is_cancelled() {
                return cancelled(appended, artifacts);
            }
            let (content, new_artifacts, was_cancelled) =
                run_tool_call(call, &ctx, trace).await;
            if was_cancelled {
                return cancelled(appended, artifacts);
            }
            artifacts.extend(new_artifacts);
            appended.push(ChatMessage::tool(call.id.clone(), content));
        }
    }

    info!("turn stopped after {max_steps} steps");
    trace
        .emit(TurnEvent::Error(ErrorEvent {
            message: format!("stopped after {max_steps} steps"),
        }))
        .await;
    trace
        .emit(TurnEvent::ProviderDone(ProviderDoneEvent {
            elapsed_ms: started.elapsed().as_millis() as u64,
        }))
        .await;
    let text = last_text.unwrap_or_else(|| format!("(stopped after {max_steps} steps)"));
    appended.push(ChatMessage::assistant(text.clone()));
    LoopOutcome {
        assistant_text: text,
        appended,
        artifacts,
        failure: None,
        failure_detail: None,
    }
}

fn cancelled(appended: Vec<ChatMessage>, artifacts: Vec<FileRecord>) -> LoopOutcome {
    debug!("turn cancelled at a step boundary");
    LoopOutcome {
        assistant_text: String::new(),
        appended,
        artifacts,
        failure: Some(LoopFailure::Cancelled),
        failure_detail: Some(CoreErr::Cancelled),
    }
}

/// One tool invocation: emit `tool_call`, resolve + validate + gate, run the
/// handler under its timeout, emit `tool_result`, and hand back the tool
/// message content. Never fails the loop except through cancellation.
async fn run_tool_call(
    call: &ToolCallRequest,
    ctx: &ToolCtx,
    trace: &mut TurnTrace,
) -> (String, Vec<FileRecord>, bool) {
    let parsed_args: Option<JsonValue> = if call.args.trim().is_empty() {
        Some(json!({}))
    } else {
        serde_json::from_str(&call.args).ok()
    };

    trace
        .emit(TurnEvent::ToolCall(ToolCallEvent {
            tool: call.name.clone(),
            args: parsed_args.clone().unwrap_or_else(|| json!(call.args)),
        }))
        .await;

    let Some(kind) = ToolKind::from_name(&call.name) else {
        return (
            tool_error(&call.name, "unknown tool", trace).await,
            Vec::new(),
            false,
        );
    };

    let Some(args) = parsed_args else {
        return (
            tool_error(&call.name, "invalid JSON arguments", trace).await,
            Vec::new(),
            false,
        );
    };

    if let Err(reason) = kind.schema().validate(&args) {
        return (
            tool_error(&call.name, &format!("invalid arguments: {reason}"), trace).await,
            Vec::new(),
            false,
        );
    }

    // Capability gate, before any handler side effect.
    if !tools::permitted(kind, ctx.capabilities) {
        return (tool_error(&call.name, "disabled", trace).await, Vec::new(), false);
    }

    let outcome = tokio::time::timeout(kind.timeout(), tools::dispatch(kind, &args, ctx)).await;
    let outcome = match outcome {
        Ok(result) => result,
        Err(_) => Err(CoreErr::ToolTimeout(kind.timeout().as_millis() as u64)),
    };

    match outcome {
        Ok(outcome) => {
            let rendered = serde_json::to_string(&outcome.result).unwrap_or_default();
            let (content, event_result) = truncate_result(&outcome.result, rendered, ctx);
            trace
                .emit(TurnEvent::ToolResult(ToolResultEvent {
                    tool: call.name.clone(),
                    result: event_result,
                }))
                .await;
            for artifact in &outcome.artifacts {
                trace
                    .emit(TurnEvent::TaskArtifact(TaskArtifactEvent {
                        path: artifact.filename.clone(),
                        file_id: artifact.file_id.clone(),
                        task_id: None,
                    }))
                    .await;
            }
            (content, outcome.artifacts, false)
        }
        Err(CoreErr::Cancelled) => (String::new(), Vec::new(), true),
        Err(e) => (tool_error(&call.name, &e.to_string(), trace).await, Vec::new(), false),
    }
}

/// Stringified results longer than `max_tool_output_chars` are cut with a
/// trailing marker; a string of exactly the cap stays untouched.
fn truncate_result(
    result: &JsonValue,
    rendered: String,
    ctx: &ToolCtx,
) -> (String, JsonValue) {
    let limit = ctx.limits.max_tool_output_chars;
    if rendered.chars().count() <= limit {
        return (rendered, result.clone());
    }
    let mut cut: String = rendered.chars().take(limit).collect();
    cut.push_str(TRUNCATION_MARKER);
    let event_value = json!(cut);
    (cut, event_value)
}

async fn tool_error(tool: &str, message: &str, trace: &mut TurnTrace) -> String {
    trace
        .emit(TurnEvent::ToolResult(ToolResultEvent::error(tool, message)))
        .await;
    json!({ "error": message }).to_string()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use aidesk_protocol::CapabilitySet;
    use aidesk_protocol::SecurityPreset;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::provider::ModelTurn;
    use crate::test_support::tool_ctx_fixture;

    fn profile(effective: CapabilitySet) -> SecurityProfile {
        SecurityProfile {
            preset: SecurityPreset::Custom,
            requested: effective,
            effective,
        }
    }

    fn tool_call(name: &str, args: JsonValue) -> ToolCallRequest {
        ToolCallRequest {
            id: format!("call_{name}"),
            name: name.to_string(),
            args: args.to_string(),
        }
    }

    fn scripted(turns: Vec<ModelTurn>) -> ProviderClient {
        ProviderClient::mock_scripted(turns)
    }

    async fn run(
        provider: &ProviderClient,
        ctx: crate::tools::ToolCtx,
        max_steps: usize,
    ) -> (LoopOutcome, Vec<TurnEvent>) {
        let mut trace = TurnTrace::buffered();
        let effective = ctx.capabilities;
        let outcome = run_loop(
            AgentParams {
                provider,
                model: "test-model".to_string(),
                profile: profile(effective),
                fallback: None,
                cleared: Vec::new(),
                trim: None,
                max_steps,
                ctx,
            },
            vec![
                ChatMessage::system("system prompt"),
                ChatMessage::user("do the thing"),
            ],
            &mut trace,
        )
        .await;
        (outcome, trace.into_events())
    }

    #[tokio::test]
    async fn text_only_turn_emits_the_canonical_sequence() {
        let (_fixture, ctx) = tool_ctx_fixture().await;
        let provider = scripted(vec![ModelTurn {
            assistant_text: Some("all done".to_string()),
            tool_calls: Vec::new(),
            usage: None,
        }]);

        let (outcome, events) = run(&provider, ctx, 4).await;
        assert_eq!(outcome.assistant_text, "all done");
        assert!(outcome.failure.is_none());
        let kinds: Vec<&str> = events.iter().map(TurnEvent::kind).collect();
        assert_eq!(
            kinds,
            vec![
                "security_profile",
                "provider_start",
                "assistant_message",
                "provider_done"
            ]
        );
        // One terminal assistant message, nothing else.
        assert_eq!(outcome.appended.len(), 1);
    }

    #[tokio::test]
    async fn tool_round_then_answer() {
        let (fixture, ctx) = tool_ctx_fixture().await;
        crate::test_support::write_file(&fixture.workspace(), "a.txt", "file body");

        let provider = scripted(vec![
            ModelTurn {
                assistant_text: None,
                tool_calls: vec![tool_call("fs_read", json!({ "path": "a.txt" }))],
                usage: None,
            },
            ModelTurn {
                assistant_text: Some("the file says: file body".to_string()),
                tool_calls: Vec::new(),
                usage: None,
            },
        ]);

        let (outcome, events) = run(&provider, ctx, 4).await;
        assert!(outcome.failure.is_none());
        let kinds: Vec<&str> = events.iter().map(TurnEvent::kind).collect();
        assert_eq!(
            kinds,
            vec![
                "security_profile",
                "provider_start",
                "tool_call",
                "tool_result",
                "assistant_message",
                "provider_done"
            ]
        );
        // assistant(tool_calls) + tool + terminal assistant
        assert_eq!(outcome.appended.len(), 3);
        assert_eq!(outcome.appended[1].tool_call_id.as_deref(), Some("call_fs_read"));
    }

    #[tokio::test]
    async fn disabled_tool_is_an_event_not_a_failure() {
        let (_fixture, mut ctx) = tool_ctx_fixture().await;
        ctx.capabilities = CapabilitySet::none();

        let provider = scripted(vec![
            ModelTurn {
                assistant_text: None,
                tool_calls: vec![tool_call(
                    "fs_write",
                    json!({ "path": "x.txt", "content": "hi" }),
                )],
                usage: None,
            },
            ModelTurn {
                assistant_text: Some("could not write".to_string()),
                tool_calls: Vec::new(),
                usage: None,
            },
        ]);

        let (outcome, events) = run(&provider, ctx, 4).await;
        assert!(outcome.failure.is_none());
        let result_event = events
            .iter()
            .find_map(|e| match e {
                TurnEvent::ToolResult(ev) => Some(ev),
                _ => None,
            })
            .unwrap();
        assert_eq!(result_event.result["error"], "disabled");
        // The loop continued to the final assistant message.
        assert_eq!(outcome.assistant_text, "could not write");
    }

    #[tokio::test]
    async fn unknown_tool_and_bad_args_are_reported() {
        let (_fixture, ctx) = tool_ctx_fixture().await;
        let provider = scripted(vec![
            ModelTurn {
                assistant_text: None,
                tool_calls: vec![
                    tool_call("teleport", json!({})),
                    ToolCallRequest {
                        id: "call_bad".into(),
                        name: "fs_read".into(),
                        args: "{not json".into(),
                    },
                    tool_call("fs_read", json!({ "path": 42 })),
                ],
                usage: None,
            },
            ModelTurn {
                assistant_text: Some("done".to_string()),
                tool_calls: Vec::new(),
                usage: None,
            },
        ]);

        let (outcome, events) = run(&provider, ctx, 4).await;
        let errors: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                TurnEvent::ToolResult(ev) if ev.is_error() => {
                    Some(ev.result["error"].as_str().unwrap_or_default().to_string())
                }
                _ => None,
            })
            .collect();
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0], "unknown tool");
        assert_eq!(errors[1], "invalid JSON arguments");
        assert!(errors[2].starts_with("invalid arguments:"));
        assert!(outcome.failure.is_none());
    }

    #[tokio::test]
    async fn max_steps_stops_with_an_error_event() {
        let (_fixture, ctx) = tool_ctx_fixture().await;
        // The model keeps asking for a listing forever.
        let endless: Vec<ModelTurn> = (0..10)
            .map(|_| ModelTurn {
                assistant_text: None,
                tool_calls: vec![tool_call("fs_list", json!({}))],
                usage: None,
            })
            .collect();
        let provider = scripted(endless);

        let (outcome, events) = run(&provider, ctx, 2).await;
        assert!(outcome.failure.is_none());
        assert!(outcome.assistant_text.contains("stopped after 2 steps"));
        assert!(events.iter().any(|e| matches!(
            e,
            TurnEvent::Error(ErrorEvent { message }) if message == "stopped after 2 steps"
        )));
    }

    #[tokio::test]
    async fn oversized_results_are_truncated_with_marker() {
        let (fixture, mut ctx) = tool_ctx_fixture().await;
        ctx.limits.max_tool_output_chars = 80;
        crate::test_support::write_file(&fixture.workspace(), "big.txt", &"z".repeat(500));

        let provider = scripted(vec![
            ModelTurn {
                assistant_text: None,
                tool_calls: vec![tool_call("fs_read", json!({ "path": "big.txt" }))],
                usage: None,
            },
            ModelTurn {
                assistant_text: Some("ok".to_string()),
                tool_calls: Vec::new(),
                usage: None,
            },
        ]);

        let (outcome, _events) = run(&provider, ctx, 4).await;
        let tool_message = &outcome.appended[1];
        assert!(tool_message.content.ends_with(TRUNCATION_MARKER));
        assert_eq!(
            tool_message.content.chars().count(),
            80 + TRUNCATION_MARKER.chars().count()
        );
    }

    #[tokio::test]
    async fn generated_artifacts_surface_as_task_artifacts() {
        let (_fixture, ctx) = tool_ctx_fixture().await;
        let provider = scripted(vec![
            ModelTurn {
                assistant_text: None,
                tool_calls: vec![tool_call(
                    "doc_quote_xlsx_create",
                    json!({
                        "seller": "Acme",
                        "buyer": "Globex",
                        "currency": "CNY",
                        "items": [{ "name": "x", "quantity": 2, "unit_price": 10 }],
                    }),
                )],
                usage: None,
            },
            ModelTurn {
                assistant_text: Some("quote attached".to_string()),
                tool_calls: Vec::new(),
                usage: None,
            },
        ]);

        let (outcome, events) = run(&provider, ctx, 4).await;
        assert_eq!(outcome.artifacts.len(), 1);
        let artifact_event = events
            .iter()
            .find_map(|e| match e {
                TurnEvent::TaskArtifact(ev) => Some(ev),
                _ => None,
            })
            .unwrap();
        assert_eq!(artifact_event.file_id, outcome.artifacts[0].file_id);
    }
}
