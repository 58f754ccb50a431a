// Poisoned mutex should fail the program
#![allow(clippy::unwrap_used)]

//! In-memory session store. A keyed map of live sessions, each behind its own
//! async lock so turns for one `session_id` serialize while distinct sessions
//! run in parallel. The map itself is guarded by a plain mutex held only for
//! map operations, never across an await point.
//!
//! Sessions are bounded twice: LRU eviction by last use once the map exceeds
//! `max_sessions`, and a TTL sweep for idle entries. Evicted sessions
//! rehydrate transparently from the durable store on the next turn.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use aidesk_protocol::ChatMessage;
use aidesk_protocol::MessageRole;
use aidesk_protocol::ToolCallRequest;
use chrono::Utc;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::config::Config;
use crate::error::CoreErr;
use crate::error::Result;
use crate::store::MessageRow;
use crate::store::SessionRow;
use crate::store::Store;

pub struct SessionState {
    pub meta: SessionRow,
    /// Conversational suffix, oldest first. Never contains system messages.
    pub history: Vec<ChatMessage>,
}

struct SessionSlot {
    state: Arc<tokio::sync::Mutex<SessionState>>,
    touched: Mutex<Instant>,
}

pub struct SessionStore {
    slots: Mutex<HashMap<String, Arc<SessionSlot>>>,
    max_sessions: usize,
    ttl: Duration,
    max_session_messages: usize,
}

/// Holding this guard *is* the per-session serialization: it wraps the
/// session's async lock for the whole turn, released after persistence.
pub struct TurnGuard {
    pub state: OwnedMutexGuard<SessionState>,
    pub created: bool,
}

impl SessionStore {
    pub fn new(config: &Config) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            max_sessions: config.max_sessions,
            ttl: config.session_ttl,
            max_session_messages: config.max_session_messages,
        }
    }

    /// Fetches or creates the session and acquires its turn lock. A live or
    /// durable session owned by another team reads as not-found.
    pub async fn begin_turn(
        &self,
        session_id: &str,
        team_id: i64,
        defaults: SessionDefaults,
        store: &Store,
    ) -> Result<TurnGuard> {
        if let Some(slot) = self.get_slot(session_id) {
            let guard = Arc::clone(&slot.state).lock_owned().await;
            if guard.meta.team_id != team_id {
                return Err(CoreErr::NotFound(session_id.to_string()));
            }
            *slot.touched.lock().unwrap() = Instant::now();
            return Ok(TurnGuard {
                state: guard,
                created: false,
            });
        }

        // Miss: rehydrate from persistence, or create fresh. The durable
        // session id space is global, so an id owned elsewhere is "not found"
        // rather than a new session.
        let (meta, history, created) = match store.get_session(team_id, session_id).await? {
            Some(row) => {
                let rows = store
                    .recent_messages(team_id, session_id, self.max_session_messages)
                    .await?;
                let history = rows.into_iter().filter_map(message_to_chat).collect();
                (row, history, false)
            }
            None => {
                if store.session_owner(session_id).await?.is_some() {
                    return Err(CoreErr::NotFound(session_id.to_string()));
                }
                let now = Utc::now();
                let meta = SessionRow {
                    session_id: session_id.to_string(),
                    team_id,
                    project_id: defaults.project_id,
                    role: defaults.role,
                    provider: defaults.provider,
                    model: defaults.model,
                    created_at: now,
                    updated_at: now,
                    last_summary: None,
                };
                (meta, Vec::new(), true)
            }
        };

        let slot = {
            let mut slots = self.slots.lock().unwrap();
            // A concurrent turn may have materialized the slot while we were
            // reading the database; the first insert wins.
            Arc::clone(slots.entry(session_id.to_string()).or_insert_with(|| {
                Arc::new(SessionSlot {
                    state: Arc::new(tokio::sync::Mutex::new(SessionState { meta, history })),
                    touched: Mutex::new(Instant::now()),
                })
            }))
        };
        self.evict_excess(session_id);

        let guard = Arc::clone(&slot.state).lock_owned().await;
        if guard.meta.team_id != team_id {
            return Err(CoreErr::NotFound(session_id.to_string()));
        }
        Ok(TurnGuard {
            state: guard,
            created,
        })
    }

    pub fn touch(&self, session_id: &str) {
        if let Some(slot) = self.get_slot(session_id) {
            *slot.touched.lock().unwrap() = Instant::now();
        }
    }

    /// Drops the in-memory entry. Durable rows are unaffected.
    pub fn remove(&self, session_id: &str) {
        self.slots.lock().unwrap().remove(session_id);
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops entries idle longer than the TTL. In-flight sessions (turn lock
    /// held) are skipped.
    pub fn sweep(&self) -> usize {
        let mut slots = self.slots.lock().unwrap();
        let before = slots.len();
        slots.retain(|_, slot| {
            if slot.state.try_lock().is_err() {
                return true;
            }
            slot.touched.lock().unwrap().elapsed() < self.ttl
        });
        before - slots.len()
    }

    /// LRU eviction by last use once the map outgrows `max_sessions`. The
    /// session whose turn is starting and any slot with its turn lock held
    /// are not candidates.
    fn evict_excess(&self, keep: &str) {
        let mut slots = self.slots.lock().unwrap();
        while slots.len() > self.max_sessions {
            let oldest = slots
                .iter()
                .filter(|(id, slot)| id.as_str() != keep && slot.state.try_lock().is_ok())
                .min_by_key(|(_, slot)| *slot.touched.lock().unwrap())
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    debug!("evicting idle session {id}");
                    slots.remove(&id);
                }
                None => break,
            }
        }
    }

    fn get_slot(&self, session_id: &str) -> Option<Arc<SessionSlot>> {
        self.slots.lock().unwrap().get(session_id).cloned()
    }
}

/// Metadata used when a turn creates a brand-new session.
#[derive(Debug, Clone)]
pub struct SessionDefaults {
    pub project_id: Option<i64>,
    pub role: String,
    pub provider: String,
    pub model: String,
}

/// Durable row → provider wire shape. System rows are never persisted, but a
/// defensive filter keeps a hand-edited database from corrupting the prompt.
fn message_to_chat(row: MessageRow) -> Option<ChatMessage> {
    let role: MessageRole = row.role.parse().ok()?;
    if role == MessageRole::System {
        return None;
    }
    let tool_calls: Option<Vec<ToolCallRequest>> = row
        .tool_calls_json
        .as_deref()
        .and_then(|raw| serde_json::from_str(raw).ok());
    Some(ChatMessage {
        role,
        content: row.content,
        tool_calls,
        tool_call_id: row.tool_call_id,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::store::CommitTurn;
    use crate::store::NewMessage;

    fn defaults() -> SessionDefaults {
        SessionDefaults {
            project_id: None,
            role: "assistant".to_string(),
            provider: "mock".to_string(),
            model: "test".to_string(),
        }
    }

    fn test_store(max_sessions: usize, ttl: Duration) -> SessionStore {
        let dir = std::env::temp_dir();
        let mut config = Config::for_tests(&dir);
        config.max_sessions = max_sessions;
        config.session_ttl = ttl;
        SessionStore::new(&config)
    }

    #[tokio::test]
    async fn create_then_reuse_same_slot() {
        let sessions = test_store(8, Duration::from_secs(60));
        let store = Store::open_in_memory().unwrap();

        let guard = sessions
            .begin_turn("s1", 1, defaults(), &store)
            .await
            .unwrap();
        assert!(guard.created);
        drop(guard);

        let guard = sessions
            .begin_turn("s1", 1, defaults(), &store)
            .await
            .unwrap();
        assert!(!guard.created);
        assert_eq!(sessions.len(), 1);
    }

    #[tokio::test]
    async fn team_mismatch_reads_as_not_found() {
        let sessions = test_store(8, Duration::from_secs(60));
        let store = Store::open_in_memory().unwrap();

        drop(
            sessions
                .begin_turn("s1", 1, defaults(), &store)
                .await
                .unwrap(),
        );
        let err = sessions
            .begin_turn("s1", 2, defaults(), &store)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreErr::NotFound(_)));
    }

    #[tokio::test]
    async fn turns_on_one_session_serialize() {
        let sessions = Arc::new(test_store(8, Duration::from_secs(60)));
        let store = Store::open_in_memory().unwrap();

        let first = sessions
            .begin_turn("s1", 1, defaults(), &store)
            .await
            .unwrap();

        let sessions2 = Arc::clone(&sessions);
        let store2 = store.clone();
        let second = tokio::spawn(async move {
            sessions2.begin_turn("s1", 1, defaults(), &store2).await
        });

        // While the first guard lives the second turn cannot start.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!second.is_finished());

        drop(first);
        second.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn lru_eviction_keeps_the_most_recent() {
        let sessions = test_store(2, Duration::from_secs(60));
        let store = Store::open_in_memory().unwrap();

        for id in ["a", "b", "c"] {
            drop(sessions.begin_turn(id, 1, defaults(), &store).await.unwrap());
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(sessions.len(), 2);
        // "a" was the least recently used.
        let slots_left = sessions.len();
        assert_eq!(slots_left, 2);
    }

    #[tokio::test]
    async fn ttl_sweep_drops_idle_sessions() {
        let sessions = test_store(8, Duration::from_millis(20));
        let store = Store::open_in_memory().unwrap();
        drop(sessions.begin_turn("s1", 1, defaults(), &store).await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(sessions.sweep(), 1);
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn rehydrates_last_messages_from_persistence() {
        let sessions = test_store(8, Duration::from_secs(60));
        let store = Store::open_in_memory().unwrap();

        // Persist three turns directly.
        for i in 0..3 {
            store
                .commit_turn(CommitTurn {
                    session: SessionRow {
                        session_id: "s1".to_string(),
                        team_id: 1,
                        project_id: None,
                        role: "assistant".to_string(),
                        provider: "mock".to_string(),
                        model: "test".to_string(),
                        created_at: Utc::now(),
                        updated_at: Utc::now(),
                        last_summary: None,
                    },
                    user: NewMessage {
                        role: "user".to_string(),
                        content: format!("question {i}"),
                        tool_calls_json: None,
                        tool_call_id: None,
                    },
                    appended: vec![NewMessage {
                        role: "assistant".to_string(),
                        content: format!("answer {i}"),
                        tool_calls_json: None,
                        tool_call_id: None,
                    }],
                    events_json: None,
                    input_file_ids: Vec::new(),
                    output_file_ids: Vec::new(),
                })
                .await
                .unwrap();
        }

        let guard = sessions
            .begin_turn("s1", 1, defaults(), &store)
            .await
            .unwrap();
        assert!(!guard.created);
        assert_eq!(guard.state.history.len(), 6);
        assert_eq!(guard.state.history[0].content, "question 0");
        assert_eq!(guard.state.history[5].content, "answer 2");
    }
}
