//! Request/response bodies shared by the HTTP layer and the webhook
//! collaborators that call the same chat entry point.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::capability::SecurityPreset;
use crate::events::TurnEvent;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub project_id: Option<i64>,
    #[serde(default)]
    pub security_preset: SecurityPreset,
    #[serde(default)]
    pub enable_shell: Option<bool>,
    #[serde(default)]
    pub enable_write: Option<bool>,
    #[serde(default)]
    pub enable_browser: Option<bool>,
    #[serde(default)]
    pub enable_dangerous: Option<bool>,
    #[serde(default)]
    pub show_reasoning: bool,
    /// Previously uploaded attachments (`file_id`s) to make available to the
    /// turn as inputs.
    #[serde(default)]
    pub attachments: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub assistant: String,
    pub events: Vec<TurnEvent>,
}

/// Public description of a stored attachment. Never carries a filesystem
/// path; retrieval goes through the tokenized download URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub file_id: String,
    pub kind: String,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}
