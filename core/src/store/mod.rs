// Poisoned mutex should fail the program
#![allow(clippy::unwrap_used)]

//! SQLite persistence for sessions, messages, teams, files and requirements.
//!
//! A single `rusqlite` connection guarded by a mutex; every call hops onto the
//! blocking pool so the async runtime is never stalled by database I/O. The
//! per-turn commit is a single transaction: session upsert, user message,
//! assistant/tool messages with `events_json` on the terminal assistant
//! message, and attachment links all land together or not at all.

mod files;
mod rows;
mod teams;

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;

use chrono::DateTime;
use chrono::Utc;
use rusqlite::Connection;
use rusqlite::params;

pub use rows::DeliveryState;
pub use rows::FileRecord;
pub use rows::Membership;
pub use rows::MessageRow;
pub use rows::NewMessage;
pub use rows::Project;
pub use rows::Requirement;
pub use rows::RequirementStatus;
pub use rows::SessionRow;
pub use rows::Team;
pub use rows::TeamSkill;
pub use rows::User;

use crate::error::CoreErr;
use crate::error::Result;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    email         TEXT NOT NULL UNIQUE,
    display_name  TEXT NOT NULL,
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS teams (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    name           TEXT NOT NULL,
    workspace_path TEXT
);

CREATE TABLE IF NOT EXISTS memberships (
    user_id  INTEGER NOT NULL REFERENCES users(id),
    team_id  INTEGER NOT NULL REFERENCES teams(id),
    role     TEXT NOT NULL,
    PRIMARY KEY (user_id, team_id)
);

CREATE TABLE IF NOT EXISTS api_tokens (
    token    TEXT PRIMARY KEY,
    user_id  INTEGER NOT NULL REFERENCES users(id),
    team_id  INTEGER NOT NULL REFERENCES teams(id)
);

CREATE TABLE IF NOT EXISTS team_projects (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    team_id  INTEGER NOT NULL REFERENCES teams(id),
    name     TEXT NOT NULL,
    slug     TEXT NOT NULL,
    path     TEXT NOT NULL,
    enabled  INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS team_skills (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    team_id  INTEGER NOT NULL REFERENCES teams(id),
    name     TEXT NOT NULL,
    content  TEXT NOT NULL,
    enabled  INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS team_requirements (
    id                    INTEGER PRIMARY KEY AUTOINCREMENT,
    team_id               INTEGER NOT NULL REFERENCES teams(id),
    project_id            INTEGER,
    title                 TEXT NOT NULL,
    description           TEXT NOT NULL DEFAULT '',
    status                TEXT NOT NULL DEFAULT 'incoming',
    priority              INTEGER NOT NULL DEFAULT 0,
    source_team           TEXT,
    delivery_state        TEXT,
    delivery_from_team_id INTEGER,
    created_at            TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chat_sessions (
    session_id   TEXT PRIMARY KEY,
    team_id      INTEGER NOT NULL REFERENCES teams(id),
    project_id   INTEGER,
    role         TEXT NOT NULL,
    provider     TEXT NOT NULL,
    model        TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,
    last_summary TEXT
);

CREATE TABLE IF NOT EXISTS chat_messages (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id      TEXT NOT NULL REFERENCES chat_sessions(session_id),
    team_id         INTEGER NOT NULL,
    ordinal         INTEGER NOT NULL,
    role            TEXT NOT NULL,
    content         TEXT NOT NULL,
    tool_calls_json TEXT,
    tool_call_id    TEXT,
    events_json     TEXT,
    created_at      TEXT NOT NULL,
    UNIQUE (session_id, ordinal)
);

CREATE TABLE IF NOT EXISTS file_records (
    file_id      TEXT PRIMARY KEY,
    kind         TEXT NOT NULL,
    filename     TEXT NOT NULL,
    content_type TEXT NOT NULL,
    size_bytes   INTEGER NOT NULL,
    team_id      INTEGER NOT NULL,
    project_id   INTEGER,
    session_id   TEXT,
    created_at   TEXT NOT NULL,
    source_path  TEXT
);

CREATE TABLE IF NOT EXISTS message_attachments (
    message_id INTEGER NOT NULL REFERENCES chat_messages(id),
    file_id    TEXT NOT NULL REFERENCES file_records(file_id),
    direction  TEXT NOT NULL,
    PRIMARY KEY (message_id, file_id, direction)
);

CREATE INDEX IF NOT EXISTS idx_chat_messages_session
    ON chat_messages(session_id, ordinal);
CREATE INDEX IF NOT EXISTS idx_file_records_team
    ON file_records(team_id, created_at);
"#;

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path)?;
            conn.execute_batch(SCHEMA)?;
            Ok(Self {
                conn: Arc::new(Mutex::new(conn)),
            })
        })
        .await?
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` with the connection on the blocking pool.
    pub(crate) async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap();
            f(&mut conn)
        })
        .await?
    }

    // ------------------------------------------------------------------
    // Sessions & messages
    // ------------------------------------------------------------------

    pub async fn get_session(&self, team_id: i64, session_id: &str) -> Result<Option<SessionRow>> {
        let session_id = session_id.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, team_id, project_id, role, provider, model,
                        created_at, updated_at, last_summary
                 FROM chat_sessions WHERE session_id = ?1 AND team_id = ?2",
            )?;
            let mut rows = stmt.query(params![session_id, team_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(rows::session_from_row(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Which team owns a session id, regardless of the caller. Used to tell
    /// "free to create" apart from "owned elsewhere".
    pub async fn session_owner(&self, session_id: &str) -> Result<Option<i64>> {
        let session_id = session_id.to_string();
        self.call(move |conn| {
            conn.query_row(
                "SELECT team_id FROM chat_sessions WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(ignore_not_found)
        })
        .await
    }

    pub async fn list_sessions(&self, team_id: i64) -> Result<Vec<SessionRow>> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, team_id, project_id, role, provider, model,
                        created_at, updated_at, last_summary
                 FROM chat_sessions WHERE team_id = ?1 ORDER BY updated_at DESC",
            )?;
            let mut rows = stmt.query(params![team_id])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(rows::session_from_row(row)?);
            }
            Ok(out)
        })
        .await
    }

    pub async fn delete_session(&self, team_id: i64, session_id: &str) -> Result<bool> {
        let session_id = session_id.to_string();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let found: Option<i64> = tx
                .query_row(
                    "SELECT team_id FROM chat_sessions WHERE session_id = ?1",
                    params![session_id],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(ignore_not_found)?;
            match found {
                Some(owner) if owner == team_id => {}
                _ => return Ok(false),
            }
            tx.execute(
                "DELETE FROM message_attachments WHERE message_id IN
                     (SELECT id FROM chat_messages WHERE session_id = ?1)",
                params![session_id],
            )?;
            tx.execute(
                "DELETE FROM chat_messages WHERE session_id = ?1",
                params![session_id],
            )?;
            tx.execute(
                "DELETE FROM chat_sessions WHERE session_id = ?1",
                params![session_id],
            )?;
            tx.commit()?;
            Ok(true)
        })
        .await
    }

    /// Most recent `limit` messages for a session, oldest first. Used both by
    /// the rehydration path and the history endpoint.
    pub async fn recent_messages(
        &self,
        team_id: i64,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageRow>> {
        let session_id = session_id.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, ordinal, role, content, tool_calls_json,
                        tool_call_id, events_json, created_at
                 FROM chat_messages
                 WHERE session_id = ?1 AND team_id = ?2
                 ORDER BY ordinal DESC LIMIT ?3",
            )?;
            let mut rows = stmt.query(params![session_id, team_id, limit as i64])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(rows::message_from_row(row)?);
            }
            out.reverse();
            Ok(out)
        })
        .await
    }

    pub async fn message_count(&self, session_id: &str) -> Result<i64> {
        let session_id = session_id.to_string();
        self.call(move |conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM chat_messages WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
        .await
    }

    /// Atomic per-turn commit. Returns the ordinal assigned to the user
    /// message.
    pub async fn commit_turn(&self, commit: CommitTurn) -> Result<i64> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let now = Utc::now();
            let now_str = fmt_ts(now);

            // A session id is globally unique; a row owned by another team is
            // a conflict, not an upsert target.
            let owner: Option<i64> = tx
                .query_row(
                    "SELECT team_id FROM chat_sessions WHERE session_id = ?1",
                    params![commit.session.session_id],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(ignore_not_found)?;
            match owner {
                Some(team) if team != commit.session.team_id => {
                    return Err(CoreErr::NotFound(commit.session.session_id.clone()));
                }
                Some(_) => {
                    tx.execute(
                        "UPDATE chat_sessions
                         SET updated_at = ?2, last_summary = ?3, provider = ?4, model = ?5
                         WHERE session_id = ?1",
                        params![
                            commit.session.session_id,
                            now_str,
                            commit.session.last_summary,
                            commit.session.provider,
                            commit.session.model,
                        ],
                    )?;
                }
                None => {
                    tx.execute(
                        "INSERT INTO chat_sessions
                         (session_id, team_id, project_id, role, provider, model,
                          created_at, updated_at, last_summary)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?8)",
                        params![
                            commit.session.session_id,
                            commit.session.team_id,
                            commit.session.project_id,
                            commit.session.role,
                            commit.session.provider,
                            commit.session.model,
                            now_str,
                            commit.session.last_summary,
                        ],
                    )?;
                }
            }

            let mut ordinal: i64 = tx.query_row(
                "SELECT COALESCE(MAX(ordinal), 0) FROM chat_messages WHERE session_id = ?1",
                params![commit.session.session_id],
                |row| row.get(0),
            )?;

            ordinal += 1;
            let user_ordinal = ordinal;
            let user_id = insert_message(
                &tx,
                &commit.session.session_id,
                commit.session.team_id,
                ordinal,
                &commit.user,
                None,
                &now_str,
            )?;
            for file_id in &commit.input_file_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO message_attachments (message_id, file_id, direction)
                     VALUES (?1, ?2, 'input')",
                    params![user_id, file_id],
                )?;
            }

            let last_assistant = commit
                .appended
                .iter()
                .rposition(|m| m.role == "assistant");
            let mut terminal_message_id = None;
            for (idx, message) in commit.appended.iter().enumerate() {
                ordinal += 1;
                let events = if Some(idx) == last_assistant {
                    commit.events_json.as_deref()
                } else {
                    None
                };
                let id = insert_message(
                    &tx,
                    &commit.session.session_id,
                    commit.session.team_id,
                    ordinal,
                    message,
                    events,
                    &now_str,
                )?;
                if Some(idx) == last_assistant {
                    terminal_message_id = Some(id);
                }
            }

            if let Some(message_id) = terminal_message_id {
                for file_id in &commit.output_file_ids {
                    tx.execute(
                        "INSERT OR IGNORE INTO message_attachments (message_id, file_id, direction)
                         VALUES (?1, ?2, 'output')",
                        params![message_id, file_id],
                    )?;
                }
            }

            tx.commit()?;
            Ok(user_ordinal)
        })
        .await
    }

    /// Substring search over persisted message content, team-scoped.
    pub async fn search_messages(
        &self,
        team_id: i64,
        query: &str,
        limit: usize,
    ) -> Result<Vec<(String, i64, String)>> {
        let pattern = format!("%{}%", query.replace('%', "\\%"));
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, ordinal, content FROM chat_messages
                 WHERE team_id = ?1 AND content LIKE ?2 ESCAPE '\\'
                 ORDER BY created_at DESC LIMIT ?3",
            )?;
            let mut rows = stmt.query(params![team_id, pattern, limit as i64])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let content: String = row.get(2)?;
                out.push((row.get(0)?, row.get(1)?, snippet(&content, 160)));
            }
            Ok(out)
        })
        .await
    }
}

/// Everything that must land atomically at the end of a turn.
#[derive(Debug, Clone)]
pub struct CommitTurn {
    pub session: SessionRow,
    pub user: NewMessage,
    pub appended: Vec<NewMessage>,
    /// Serialized event trace, attached to the terminal assistant message.
    pub events_json: Option<String>,
    pub input_file_ids: Vec<String>,
    pub output_file_ids: Vec<String>,
}

fn insert_message(
    tx: &rusqlite::Transaction<'_>,
    session_id: &str,
    team_id: i64,
    ordinal: i64,
    message: &NewMessage,
    events_json: Option<&str>,
    now: &str,
) -> Result<i64> {
    tx.execute(
        "INSERT INTO chat_messages
         (session_id, team_id, ordinal, role, content, tool_calls_json,
          tool_call_id, events_json, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            session_id,
            team_id,
            ordinal,
            message.role,
            message.content,
            message.tool_calls_json,
            message.tool_call_id,
            events_json,
            now,
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

fn snippet(content: &str, max: usize) -> String {
    if content.len() <= max {
        content.to_string()
    } else {
        let mut end = max;
        while !content.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &content[..end])
    }
}

pub(crate) fn ignore_not_found<T>(err: rusqlite::Error) -> Result<Option<T>> {
    match err {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other.into()),
    }
}

/// Uniform timestamp encoding so SQL string comparisons order correctly.
pub(crate) fn fmt_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
