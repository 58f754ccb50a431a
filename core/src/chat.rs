//! Chat entry: the full request lifecycle. Authorize against the active
//! team, resolve the workspace root, derive capabilities, fetch or rehydrate
//! the session, rebuild the system prompt, budget the context, run the agent
//! loop, commit atomically, and answer with the session id, assistant text
//! and the event trace.
//!
//! Buffered and streaming modes share everything: the transport either reads
//! the buffered events from the response or receives them live through the
//! channel attached to the trace.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use aidesk_protocol::ChatMessage;
use aidesk_protocol::ChatRequest;
use aidesk_protocol::ChatResponse;
use aidesk_protocol::TeamRole;
use aidesk_protocol::TurnEvent;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::agent;
use crate::agent::AgentParams;
use crate::agent::LoopFailure;
use crate::artifacts::ArtifactStore;
use crate::capability::CapabilityToggles;
use crate::capability::derive_capabilities;
use crate::config::Config;
use crate::config::load_or_create_secret;
use crate::context;
use crate::context::ContextLimits;
use crate::error::CoreErr;
use crate::error::Result;
use crate::prompt::PromptAssembler;
use crate::provider::ProviderClient;
use crate::provider::ProviderKind;
use crate::provider::detect_needs;
use crate::provider::plan_provider;
use crate::session::SessionDefaults;
use crate::session::SessionStore;
use crate::snapshot::SnapshotWriter;
use crate::store::CommitTurn;
use crate::store::NewMessage;
use crate::store::Store;
use crate::tools::BrowserManager;
use crate::tools::DocumentRenderer;
use crate::tools::HtmlBundleRenderer;
use crate::tools::ToolCtx;
use crate::tools::ToolLimits;
use crate::trace::TurnTrace;
use crate::workspace;

/// Resolved caller identity: user, active team, and role within that team.
#[derive(Debug, Clone, Copy)]
pub struct Principal {
    pub user_id: i64,
    pub team_id: i64,
    pub role: TeamRole,
}

pub struct ChatService {
    pub config: Arc<Config>,
    pub store: Store,
    pub sessions: SessionStore,
    pub artifacts: ArtifactStore,
    pub browser: Arc<BrowserManager>,
    pub renderer: Arc<dyn DocumentRenderer>,
    pub prompts: PromptAssembler,
    pub snapshots: SnapshotWriter,
    providers: HashMap<ProviderKind, ProviderClient>,
}

impl ChatService {
    pub fn new(config: Config, store: Store) -> Result<Self> {
        let secret = load_or_create_secret(&config.state_home)?;
        let config = Arc::new(config);
        let artifacts = ArtifactStore::new(&config, secret, store.clone());
        let sessions = SessionStore::new(&config);
        let prompts = PromptAssembler::new(&config.state_home);
        let snapshots = SnapshotWriter::new(&config.state_home);
        let providers = ProviderKind::ALL
            .iter()
            .map(|kind| (*kind, ProviderClient::new(*kind, &config)))
            .collect();
        Ok(Self {
            config,
            store,
            sessions,
            artifacts,
            browser: Arc::new(BrowserManager::new()),
            renderer: Arc::new(HtmlBundleRenderer),
            prompts,
            snapshots,
            providers,
        })
    }

    /// Replaces a provider client; tests use this to install scripted mocks.
    pub fn set_provider(&mut self, client: ProviderClient) {
        self.providers.insert(client.kind(), client);
    }

    /// Buffered chat: events are returned in the response body.
    pub async fn chat(&self, principal: &Principal, request: ChatRequest) -> Result<ChatResponse> {
        let mut trace = TurnTrace::buffered();
        self.run_turn(principal, request, &mut trace, CancellationToken::new())
            .await
    }

    /// Streaming chat: events are flushed through `tx` as they happen, and a
    /// dropped client cancels the turn between steps via `cancel`.
    pub async fn chat_streaming(
        &self,
        principal: &Principal,
        request: ChatRequest,
        tx: mpsc::Sender<TurnEvent>,
        cancel: CancellationToken,
    ) -> Result<ChatResponse> {
        let mut trace = TurnTrace::streaming(tx);
        self.run_turn(principal, request, &mut trace, cancel).await
    }

    async fn run_turn(
        &self,
        principal: &Principal,
        request: ChatRequest,
        trace: &mut TurnTrace,
        cancel: CancellationToken,
    ) -> Result<ChatResponse> {
        // 1. Team and optional project; the workspace root follows.
        let team = self
            .store
            .get_team(principal.team_id)
            .await?
            .ok_or(CoreErr::Auth)?;
        let project = match request.project_id {
            Some(project_id) => {
                let project = self
                    .store
                    .get_project(team.id, project_id)
                    .await?
                    .ok_or_else(|| CoreErr::NotFound(format!("project {project_id}")))?;
                if !project.enabled {
                    return Err(CoreErr::Validation(format!(
                        "project {} is disabled",
                        project.slug
                    )));
                }
                if !workspace::project_path_allowed(
                    &self.config.projects_root_allowlist,
                    Path::new(&project.path),
                ) {
                    return Err(CoreErr::Validation(format!(
                        "project path {} is outside the allowed roots",
                        project.path
                    )));
                }
                Some(project)
            }
            None => None,
        };
        let root = workspace::select_root(&self.config, &team, project.as_ref());
        tokio::fs::create_dir_all(&root).await?;

        // 2. Provider selection and capability derivation.
        let requested_kind = match &request.provider {
            Some(id) => ProviderKind::from_id(id)
                .ok_or_else(|| CoreErr::Validation(format!("unknown provider: {id}")))?,
            None => ProviderKind::from_id(&self.config.provider_default)
                .unwrap_or(ProviderKind::Native),
        };
        let derived = derive_capabilities(
            self.config.ceiling(),
            request.security_preset,
            CapabilityToggles {
                shell: request.enable_shell,
                write: request.enable_write,
                browser: request.enable_browser,
                dangerous: request.enable_dangerous,
            },
            principal.role,
            requested_kind.caps().can_run_unsandboxed,
        );
        if derived.explicit_dangerous_denied {
            return Err(CoreErr::PermissionDenied(
                "unsandboxed execution is disabled on this server".to_string(),
            ));
        }

        // 3. One-shot fallback decision from the static capability table.
        let needs = detect_needs(&request.message, !request.attachments.is_empty());
        let (plan, fallback_event) = plan_provider(requested_kind, needs);
        let provider = self
            .providers
            .get(&plan)
            .ok_or_else(|| CoreErr::Validation(format!("unknown provider: {}", plan.id())))?;
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.config.model_default.clone());
        let role = request
            .role
            .clone()
            .unwrap_or_else(|| "assistant".to_string());

        // 4. Input attachments must belong to the calling team.
        let mut attachment_notes = Vec::new();
        for file_id in &request.attachments {
            let record = self
                .store
                .get_team_file(team.id, file_id)
                .await?
                .ok_or_else(|| CoreErr::NotFound(format!("attachment {file_id}")))?;
            attachment_notes.push(format!("[attachment: {} {}]", record.file_id, record.filename));
        }

        // 5. Session acquisition serializes the turn.
        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut guard = self
            .sessions
            .begin_turn(
                &session_id,
                team.id,
                SessionDefaults {
                    project_id: project.as_ref().map(|p| p.id),
                    role: role.clone(),
                    provider: plan.id().to_string(),
                    model: model.clone(),
                },
                &self.store,
            )
            .await?;
        let pre_turn_history = guard.state.history.clone();

        let mut user_content = request.message.clone();
        if !attachment_notes.is_empty() {
            user_content.push_str("\n\n");
            user_content.push_str(&attachment_notes.join("\n"));
        }
        let user_message = ChatMessage::user(user_content);

        // 6. Fresh system prompt + deterministic context budget.
        let skills = self.store.enabled_skills(team.id).await?;
        let role_template = self.prompts.load_role(&role).await;
        let system = self.prompts.assemble(&role, role_template.as_deref(), &skills);

        let mut suffix = guard.state.history.clone();
        suffix.push(user_message.clone());
        let budget = context::budget(
            system,
            suffix,
            ContextLimits {
                max_messages: self.config.max_session_messages,
                max_chars: self.config.max_context_chars,
            },
        );

        // 7. The loop.
        let ctx = ToolCtx {
            team_id: team.id,
            project_id: project.as_ref().map(|p| p.id),
            session_id: session_id.clone(),
            workspace_root: root,
            capabilities: derived.profile.effective,
            limits: ToolLimits {
                max_tool_output_chars: self.config.max_tool_output_chars,
                max_file_read_chars: self.config.max_file_read_chars,
            },
            artifacts: self.artifacts.clone(),
            store: self.store.clone(),
            browser: Arc::clone(&self.browser),
            renderer: Arc::clone(&self.renderer),
            cancel,
        };
        let outcome = agent::run_loop(
            AgentParams {
                provider,
                model: model.clone(),
                profile: derived.profile,
                fallback: fallback_event,
                cleared: derived.cleared,
                trim: budget.trim,
                max_steps: self.config.max_steps,
                ctx,
            },
            budget.messages,
            trace,
        )
        .await;

        // 8. Persistence. A cancelled turn commits only the user message; a
        // provider failure keeps the rounds that completed before it.
        let appended = match outcome.failure {
            Some(LoopFailure::Cancelled) => Vec::new(),
            _ => outcome.appended.clone(),
        };
        let commit = CommitTurn {
            session: {
                let mut meta = guard.state.meta.clone();
                meta.provider = plan.id().to_string();
                meta.model = model;
                meta.updated_at = Utc::now();
                meta.last_summary = Some(summary_of(&request.message));
                meta
            },
            user: to_new_message(&user_message),
            appended: appended.iter().map(to_new_message).collect(),
            events_json: match outcome.failure {
                Some(LoopFailure::Cancelled) => None,
                _ => Some(trace.to_json()?),
            },
            input_file_ids: request.attachments.clone(),
            output_file_ids: outcome.artifacts.iter().map(|a| a.file_id.clone()).collect(),
        };

        if let Err(e) = self.store.commit_turn(commit).await {
            // Roll the in-memory session back to the pre-turn snapshot.
            guard.state.history = pre_turn_history;
            warn!("turn commit failed for {session_id}: {e}");
            return Err(e);
        }

        guard.state.history.push(user_message);
        guard.state.history.extend(appended);
        let max = self.config.max_session_messages;
        let len = guard.state.history.len();
        if len > max {
            guard.state.history.drain(..len - max);
        }
        guard.state.meta.updated_at = Utc::now();
        let session_meta = guard.state.meta.clone();
        let history_snapshot = guard.state.history.clone();
        drop(guard);
        self.sessions.touch(&session_id);
        self.snapshots
            .write_session(&session_meta, &history_snapshot)
            .await;

        match outcome.failure {
            None => {
                info!(
                    "turn committed: session={session_id} events={}",
                    trace.events().len()
                );
                Ok(ChatResponse {
                    session_id,
                    assistant: outcome.assistant_text,
                    events: trace.events().to_vec(),
                })
            }
            Some(LoopFailure::Cancelled) => Err(CoreErr::Cancelled),
            Some(LoopFailure::Provider) => Err(outcome
                .failure_detail
                .unwrap_or_else(|| CoreErr::ProviderFailure("provider failed".to_string()))),
        }
    }

    /// Deletes a session everywhere: memory, rows, snapshot mirror.
    pub async fn delete_session(&self, principal: &Principal, session_id: &str) -> Result<bool> {
        let deleted = self.store.delete_session(principal.team_id, session_id).await?;
        if deleted {
            self.sessions.remove(session_id);
            self.browser.close_session(session_id);
            self.snapshots
                .delete_session(principal.team_id, session_id)
                .await;
        }
        Ok(deleted)
    }

    /// Workspace root for direct (non-chat) endpoints of this principal.
    pub async fn workspace_root(&self, principal: &Principal) -> Result<std::path::PathBuf> {
        let team = self
            .store
            .get_team(principal.team_id)
            .await?
            .ok_or(CoreErr::Auth)?;
        let root = workspace::select_root(&self.config, &team, None);
        tokio::fs::create_dir_all(&root).await?;
        Ok(root)
    }

    /// Tool context for the direct generator/browser endpoints, which bypass
    /// the model but share sandbox, artifact store and capability wiring.
    pub async fn direct_tool_ctx(
        &self,
        principal: &Principal,
        session_id: Option<&str>,
    ) -> Result<ToolCtx> {
        let root = self.workspace_root(principal).await?;
        let derived = derive_capabilities(
            self.config.ceiling(),
            aidesk_protocol::SecurityPreset::Power,
            CapabilityToggles::default(),
            principal.role,
            false,
        );
        Ok(ToolCtx {
            team_id: principal.team_id,
            project_id: None,
            session_id: session_id.unwrap_or("direct").to_string(),
            workspace_root: root,
            capabilities: derived.profile.effective,
            limits: ToolLimits {
                max_tool_output_chars: self.config.max_tool_output_chars,
                max_file_read_chars: self.config.max_file_read_chars,
            },
            artifacts: self.artifacts.clone(),
            store: self.store.clone(),
            browser: Arc::clone(&self.browser),
            renderer: Arc::clone(&self.renderer),
            cancel: CancellationToken::new(),
        })
    }

    /// One pass of the background maintenance: artifact GC plus the session
    /// TTL sweep.
    pub async fn maintenance_tick(&self) {
        match self.artifacts.sweep(self.config.outputs_ttl).await {
            Ok(0) => {}
            Ok(n) => info!("artifact sweep removed {n} files"),
            Err(e) => warn!("artifact sweep failed: {e}"),
        }
        let evicted = self.sessions.sweep();
        if evicted > 0 {
            info!("session sweep evicted {evicted} idle sessions");
        }
    }
}

fn to_new_message(message: &ChatMessage) -> NewMessage {
    NewMessage {
        role: message.role.as_str().to_string(),
        content: message.content.clone(),
        tool_calls_json: message
            .tool_calls
            .as_ref()
            .and_then(|calls| serde_json::to_string(calls).ok()),
        tool_call_id: message.tool_call_id.clone(),
    }
}

/// First line of the user message, capped, for session listings.
fn summary_of(message: &str) -> String {
    let first_line = message.lines().next().unwrap_or_default();
    let mut summary: String = first_line.chars().take(80).collect();
    if first_line.chars().count() > 80 {
        summary.push('…');
    }
    summary
}
