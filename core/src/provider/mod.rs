//! Model provider adapter: one uniform `complete` surface over the remote
//! chat-completions API ("native"), local subprocess providers (`codex`,
//! `nanobot`, `pi`), the `opencode` HTTP sidecar, and a mock for tests.
//!
//! Each variant declares static capabilities; the fallback decision is
//! derived from those declarations once per turn, never hard-coded against a
//! provider name.

mod external;
mod mock;
mod native;
mod sidecar;

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use aidesk_protocol::ChatMessage;
use aidesk_protocol::ProviderFallbackEvent;
use aidesk_protocol::ToolCallRequest;
use regex_lite::Regex;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::config::Config;
use crate::error::CoreErr;
use crate::error::Result;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Uniform result of one provider round.
#[derive(Debug, Clone, Default)]
pub struct ModelTurn {
    pub assistant_text: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<JsonValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Native,
    Codex,
    Opencode,
    Nanobot,
    Pi,
    Mock,
}

/// Static capability declaration per provider variant.
#[derive(Debug, Clone, Copy)]
pub struct ProviderCaps {
    pub can_generate_docs: bool,
    pub can_read_attachments: bool,
    pub can_run_unsandboxed: bool,
}

impl ProviderKind {
    pub const ALL: &'static [ProviderKind] = &[
        ProviderKind::Native,
        ProviderKind::Codex,
        ProviderKind::Opencode,
        ProviderKind::Nanobot,
        ProviderKind::Pi,
        ProviderKind::Mock,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            ProviderKind::Native => "native",
            ProviderKind::Codex => "codex",
            ProviderKind::Opencode => "opencode",
            ProviderKind::Nanobot => "nanobot",
            ProviderKind::Pi => "pi",
            ProviderKind::Mock => "mock",
        }
    }

    pub fn from_id(id: &str) -> Option<ProviderKind> {
        ProviderKind::ALL.iter().copied().find(|k| k.id() == id)
    }

    pub fn caps(&self) -> ProviderCaps {
        match self {
            ProviderKind::Native => ProviderCaps {
                can_generate_docs: true,
                can_read_attachments: true,
                can_run_unsandboxed: false,
            },
            // The sandboxable local agent: may run without a sandbox when the
            // policy explicitly allows it, but has no document pipeline.
            ProviderKind::Codex => ProviderCaps {
                can_generate_docs: false,
                can_read_attachments: false,
                can_run_unsandboxed: true,
            },
            ProviderKind::Opencode | ProviderKind::Nanobot | ProviderKind::Pi => ProviderCaps {
                can_generate_docs: false,
                can_read_attachments: false,
                can_run_unsandboxed: false,
            },
            ProviderKind::Mock => ProviderCaps {
                can_generate_docs: true,
                can_read_attachments: true,
                can_run_unsandboxed: false,
            },
        }
    }
}

/// What this turn is going to need from the provider, decided once at the
/// start of the turn.
#[derive(Debug, Clone, Copy, Default)]
pub struct TurnNeeds {
    pub docs: bool,
    pub attachments: bool,
}

pub fn detect_needs(message: &str, has_attachments: bool) -> TurnNeeds {
    // Intent sniffing is deliberately coarse; a false positive merely routes
    // the turn to the native provider.
    let docs = doc_intent_regex().is_match(message);
    TurnNeeds {
        docs,
        attachments: has_attachments,
    }
}

fn doc_intent_regex() -> &'static Regex {
    use std::sync::OnceLock;
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(ppt|pptx|slides?|deck|docx|xlsx|spreadsheet|quotes?|quotation|inspection|prototype|wireframe)\b",
        )
        .unwrap_or_else(|_| unreachable!("static regex is valid"))
    })
}

/// Routes the turn to the native provider when the requested one cannot serve
/// a declared need. Returns the provider to use plus the event to emit.
pub fn plan_provider(
    requested: ProviderKind,
    needs: TurnNeeds,
) -> (ProviderKind, Option<ProviderFallbackEvent>) {
    let caps = requested.caps();
    let mut missing = Vec::new();
    if needs.docs && !caps.can_generate_docs {
        missing.push("docs".to_string());
    }
    if needs.attachments && !caps.can_read_attachments {
        missing.push("attachments".to_string());
    }
    if missing.is_empty() || requested == ProviderKind::Native {
        return (requested, None);
    }
    (
        ProviderKind::Native,
        Some(ProviderFallbackEvent {
            from: requested.id().to_string(),
            to: ProviderKind::Native.id().to_string(),
            requested: missing,
        }),
    )
}

#[derive(Clone)]
pub struct ProviderClient {
    kind: ProviderKind,
    http: reqwest::Client,
    budget: Duration,
    base_url: String,
    api_key_env: String,
    command: Vec<String>,
    scripted: bool,
    script: Arc<Mutex<VecDeque<ModelTurn>>>,
}

impl ProviderClient {
    pub fn new(kind: ProviderKind, config: &Config) -> Self {
        let (base_url, api_key_env, command) = match kind {
            ProviderKind::Native => (
                std::env::var("AIDESK_NATIVE_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
                "AIDESK_API_KEY".to_string(),
                Vec::new(),
            ),
            ProviderKind::Opencode => (
                std::env::var("AIDESK_OPENCODE_BASE_URL")
                    .unwrap_or_else(|_| "http://127.0.0.1:4096".to_string()),
                String::new(),
                Vec::new(),
            ),
            ProviderKind::Codex => (String::new(), String::new(), subprocess_command("codex")),
            ProviderKind::Nanobot => (String::new(), String::new(), subprocess_command("nanobot")),
            ProviderKind::Pi => (String::new(), String::new(), subprocess_command("pi")),
            ProviderKind::Mock => (String::new(), String::new(), Vec::new()),
        };
        Self {
            kind,
            http: reqwest::Client::new(),
            budget: config.provider_budget,
            base_url,
            api_key_env,
            command,
            scripted: false,
            script: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Mock provider that replays the given turns in order, then falls back
    /// to a fixed text-only reply.
    pub fn mock_scripted(turns: Vec<ModelTurn>) -> Self {
        Self::scripted_as(ProviderKind::Mock, turns)
    }

    /// Scripted stand-in that reports as `kind`; used by tests that exercise
    /// provider routing without talking to the real backend.
    pub fn scripted_as(kind: ProviderKind, turns: Vec<ModelTurn>) -> Self {
        Self {
            kind,
            http: reqwest::Client::new(),
            budget: Duration::from_secs(5),
            base_url: String::new(),
            api_key_env: String::new(),
            command: Vec::new(),
            scripted: true,
            script: Arc::new(Mutex::new(turns.into())),
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    /// One provider round under the overall budget. Exceeding the budget is a
    /// `ProviderTimeout`, which aborts the turn.
    pub async fn complete(&self, request: CompletionRequest) -> Result<ModelTurn> {
        let call = async {
            if self.scripted {
                return mock::complete(&self.script, &request);
            }
            match self.kind {
                ProviderKind::Native => {
                    native::complete(&self.http, &self.base_url, self.api_key(), &request).await
                }
                ProviderKind::Opencode => {
                    sidecar::complete(&self.http, &self.base_url, &request).await
                }
                ProviderKind::Codex | ProviderKind::Nanobot | ProviderKind::Pi => {
                    external::complete(&self.command, &request).await
                }
                ProviderKind::Mock => mock::complete(&self.script, &request),
            }
        };
        match tokio::time::timeout(self.budget, call).await {
            Ok(result) => result,
            Err(_) => Err(CoreErr::ProviderTimeout),
        }
    }

    fn api_key(&self) -> Option<String> {
        if self.api_key_env.is_empty() {
            return None;
        }
        std::env::var(&self.api_key_env).ok()
    }
}

fn subprocess_command(binary: &str) -> Vec<String> {
    let var = format!("AIDESK_{}_CMD", binary.to_ascii_uppercase());
    match std::env::var(&var) {
        Ok(custom) if !custom.is_empty() => {
            custom.split_whitespace().map(str::to_string).collect()
        }
        _ => vec![binary.to_string(), "turn".to_string(), "--json".to_string()],
    }
}

/// Default exponential back-off schedule: 200ms → 400ms → 800ms → 1600ms.
pub(crate) fn backoff(attempt: u64) -> Duration {
    use rand::Rng;
    let base_delay_ms = 200u64 * (1u64 << (attempt.saturating_sub(1)).min(6));
    let jitter = rand::rng().random_range(0.8..1.2);
    Duration::from_millis((base_delay_ms as f64 * jitter) as u64)
}
