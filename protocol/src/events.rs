//! The structured event trace for a single turn.
//!
//! Events are emitted by the agent loop in a strict total order, buffered into
//! `events_json` on the terminal assistant message, and either returned as a
//! JSON array or framed as server-sent events. The SSE frame type equals the
//! serde tag of the variant.

use serde::Deserialize;
use serde::Serialize;

use crate::capability::CapabilitySet;
use crate::capability::SecurityPreset;
use crate::capability::SecurityProfile;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// First event of every turn: the derived capability profile.
    SecurityProfile(SecurityProfileEvent),

    /// The provider that will serve this turn.
    ProviderStart(ProviderStartEvent),

    /// The model asked for a tool invocation.
    ToolCall(ToolCallEvent),

    /// Result (or structured error) of a tool invocation.
    ToolResult(ToolResultEvent),

    /// The requested provider cannot serve part of this turn; the native
    /// provider takes over.
    ProviderFallback(ProviderFallbackEvent),

    /// The context budgeter dropped part of the conversational suffix.
    ContextTrim(ContextTrimEvent),

    /// Final assistant text for the turn.
    AssistantMessage(AssistantMessageEvent),

    /// A durable artifact was produced during the turn.
    TaskArtifact(TaskArtifactEvent),

    /// A capability the request asked for was cleared by policy.
    Permission(PermissionEvent),

    /// Provider finished; closes the pair opened by `ProviderStart`.
    ProviderDone(ProviderDoneEvent),

    /// Turn-level failure. Tool-level failures stay inside `ToolResult`.
    Error(ErrorEvent),
}

impl TurnEvent {
    /// Tag used for the SSE `event:` line; identical to the serde tag.
    pub fn kind(&self) -> &'static str {
        match self {
            TurnEvent::SecurityProfile(_) => "security_profile",
            TurnEvent::ProviderStart(_) => "provider_start",
            TurnEvent::ToolCall(_) => "tool_call",
            TurnEvent::ToolResult(_) => "tool_result",
            TurnEvent::ProviderFallback(_) => "provider_fallback",
            TurnEvent::ContextTrim(_) => "context_trim",
            TurnEvent::AssistantMessage(_) => "assistant_message",
            TurnEvent::TaskArtifact(_) => "task_artifact",
            TurnEvent::Permission(_) => "permission",
            TurnEvent::ProviderDone(_) => "provider_done",
            TurnEvent::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SecurityProfileEvent {
    pub preset: SecurityPreset,
    pub requested: CapabilitySet,
    pub effective: CapabilitySet,
}

impl From<SecurityProfile> for SecurityProfileEvent {
    fn from(profile: SecurityProfile) -> Self {
        Self {
            preset: profile.preset,
            requested: profile.requested,
            effective: profile.effective,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderStartEvent {
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallEvent {
    pub tool: String,
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultEvent {
    pub tool: String,
    /// Either the (possibly truncated) tool result or `{"error": "..."}`.
    pub result: serde_json::Value,
}

impl ToolResultEvent {
    pub fn error(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            result: serde_json::json!({ "error": message.into() }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.result.get("error").is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderFallbackEvent {
    pub from: String,
    pub to: String,
    /// The capability needs that forced the fallback, e.g. `["docs"]`.
    pub requested: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextTrimEvent {
    pub dropped: usize,
    pub kept: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessageEvent {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskArtifactEvent {
    /// Workspace-relative or logical path of the artifact.
    pub path: String,
    pub file_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionEvent {
    pub capability: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDoneEvent {
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub message: String,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let event = TurnEvent::ToolCall(ToolCallEvent {
            tool: "fs_read".to_string(),
            args: serde_json::json!({ "path": "README.md" }),
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value.get("type").unwrap(), "tool_call");
        assert_eq!(value.get("tool").unwrap(), "fs_read");
        assert_eq!(event.kind(), "tool_call");
    }

    #[test]
    fn tool_result_error_shape() {
        let event = ToolResultEvent::error("fs_write", "disabled");
        assert!(event.is_error());
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["result"]["error"], "disabled");
    }

    #[test]
    fn kind_matches_serde_tag_for_every_variant() {
        let events = vec![
            TurnEvent::SecurityProfile(SecurityProfileEvent {
                preset: SecurityPreset::Safe,
                requested: CapabilitySet::none(),
                effective: CapabilitySet::none(),
            }),
            TurnEvent::ProviderStart(ProviderStartEvent {
                provider: "native".into(),
                model: "test".into(),
            }),
            TurnEvent::ToolCall(ToolCallEvent {
                tool: "fs_list".into(),
                args: serde_json::Value::Null,
            }),
            TurnEvent::ToolResult(ToolResultEvent::error("fs_list", "x")),
            TurnEvent::ProviderFallback(ProviderFallbackEvent {
                from: "opencode".into(),
                to: "native".into(),
                requested: vec!["docs".into()],
            }),
            TurnEvent::ContextTrim(ContextTrimEvent {
                dropped: 1,
                kept: 2,
            }),
            TurnEvent::AssistantMessage(AssistantMessageEvent {
                message: "hi".into(),
            }),
            TurnEvent::TaskArtifact(TaskArtifactEvent {
                path: "out.html".into(),
                file_id: "abc.html".into(),
                task_id: None,
            }),
            TurnEvent::Permission(PermissionEvent {
                capability: "shell".into(),
                reason: "role".into(),
            }),
            TurnEvent::ProviderDone(ProviderDoneEvent { elapsed_ms: 12 }),
            TurnEvent::Error(ErrorEvent {
                message: "boom".into(),
            }),
        ];
        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["type"], event.kind());
        }
    }
}
