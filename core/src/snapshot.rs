//! Best-effort JSON snapshot mirror of sessions under the state home, so
//! `/history/search` can grep conversations without paging the database, plus
//! the workspace-side content search. Snapshot failures are logged and never
//! fail a turn.

use std::path::Path;
use std::path::PathBuf;

use aidesk_protocol::ChatMessage;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use crate::error::Result;
use crate::store::SessionRow;
use crate::workspace;

const SNAPSHOTS_SUBDIR: &str = "snapshots";

/// Upper bound on file size the workspace search will look into.
const SEARCH_MAX_FILE_BYTES: u64 = 512 * 1024;

#[derive(Clone)]
pub struct SnapshotWriter {
    dir: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionSnapshot {
    session_id: String,
    team_id: i64,
    updated_at: String,
    messages: Vec<SnapshotMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub source: String,
    pub path: String,
    pub snippet: String,
}

impl SnapshotWriter {
    pub fn new(state_home: &Path) -> Self {
        Self {
            dir: state_home.join(SNAPSHOTS_SUBDIR),
        }
    }

    fn team_dir(&self, team_id: i64) -> PathBuf {
        self.dir.join(team_id.to_string())
    }

    /// Mirrors the session after a committed turn. Failures only warn.
    pub async fn write_session(&self, session: &SessionRow, history: &[ChatMessage]) {
        let snapshot = SessionSnapshot {
            session_id: session.session_id.clone(),
            team_id: session.team_id,
            updated_at: session.updated_at.to_rfc3339(),
            messages: history
                .iter()
                .map(|m| SnapshotMessage {
                    role: m.role.as_str().to_string(),
                    content: m.content.clone(),
                })
                .collect(),
        };
        let dir = self.team_dir(session.team_id);
        let path = dir.join(format!("{}.json", session.session_id));
        let result = async {
            tokio::fs::create_dir_all(&dir).await?;
            let json = serde_json::to_vec_pretty(&snapshot)?;
            tokio::fs::write(&path, json).await?;
            Ok::<(), crate::error::CoreErr>(())
        }
        .await;
        if let Err(e) = result {
            warn!("failed to snapshot session {}: {e}", session.session_id);
        }
    }

    pub async fn delete_session(&self, team_id: i64, session_id: &str) {
        let path = self.team_dir(team_id).join(format!("{session_id}.json"));
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove snapshot {}: {e}", path.display());
            }
        }
    }

    /// Substring search over the team's snapshots.
    pub async fn search(&self, team_id: i64, query: &str, limit: usize) -> Vec<SearchHit> {
        let dir = self.team_dir(team_id);
        let query = query.to_lowercase();
        let mut hits = Vec::new();

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => return hits,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if hits.len() >= limit {
                break;
            }
            let Ok(raw) = tokio::fs::read_to_string(entry.path()).await else {
                continue;
            };
            let Ok(snapshot) = serde_json::from_str::<SessionSnapshot>(&raw) else {
                continue;
            };
            for message in &snapshot.messages {
                if message.content.to_lowercase().contains(&query) {
                    hits.push(SearchHit {
                        source: "history".to_string(),
                        path: snapshot.session_id.clone(),
                        snippet: snippet_around(&message.content, &query),
                    });
                    break;
                }
            }
        }
        hits
    }
}

/// Grep-style search over workspace files, bounded by `limit` hits and a
/// per-file size cap.
pub fn search_workspace(
    root: &Path,
    sub_path: Option<&str>,
    query: &str,
    limit: usize,
) -> Result<Vec<SearchHit>> {
    let base = match sub_path {
        Some(rel) => workspace::resolve(root, rel)?,
        None => root.to_path_buf(),
    };
    let query_lower = query.to_lowercase();
    let mut hits = Vec::new();
    walk_search(root, &base, &query_lower, limit, &mut hits)?;
    Ok(hits)
}

fn walk_search(
    root: &Path,
    dir: &Path,
    query: &str,
    limit: usize,
    hits: &mut Vec<SearchHit>,
) -> Result<()> {
    if hits.len() >= limit || !dir.is_dir() {
        return Ok(());
    }
    let mut children: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .collect();
    children.sort_by_key(|entry| entry.file_name());

    for child in children {
        if hits.len() >= limit {
            break;
        }
        let name = child.file_name().to_string_lossy().into_owned();
        // Sensitive names are excluded from search like everywhere else.
        if workspace::resolve(dir, &name).is_err() {
            continue;
        }
        let path = child.path();
        let Ok(file_type) = child.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            walk_search(root, &path, query, limit, hits)?;
            continue;
        }
        let small_enough = child
            .metadata()
            .map(|m| m.len() <= SEARCH_MAX_FILE_BYTES)
            .unwrap_or(false);
        if !small_enough {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        if content.to_lowercase().contains(query) {
            hits.push(SearchHit {
                source: "workspace".to_string(),
                path: workspace::relative_to_root(root, &path),
                snippet: snippet_around(&content, query),
            });
        }
    }
    Ok(())
}

fn snippet_around(content: &str, query_lower: &str) -> String {
    let lower = content.to_lowercase();
    let Some(pos) = lower.find(query_lower) else {
        return String::new();
    };
    let mut start = pos.saturating_sub(40);
    while !content.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (pos + query_lower.len() + 80).min(content.len());
    while !content.is_char_boundary(end) {
        end += 1;
    }
    content[start..end].replace('\n', " ")
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use chrono::Utc;

    use super::*;

    fn session(team_id: i64, session_id: &str) -> SessionRow {
        SessionRow {
            session_id: session_id.to_string(),
            team_id,
            project_id: None,
            role: "assistant".to_string(),
            provider: "mock".to_string(),
            model: "test".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_summary: None,
        }
    }

    #[tokio::test]
    async fn snapshot_search_is_team_scoped() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::new(dir.path());

        writer
            .write_session(
                &session(1, "s1"),
                &[ChatMessage::user("deploy the flux capacitor")],
            )
            .await;
        writer
            .write_session(&session(2, "s2"), &[ChatMessage::user("other team notes")])
            .await;

        let hits = writer.search(1, "flux capacitor", 10).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "s1");
        assert!(writer.search(2, "flux capacitor", 10).await.is_empty());
    }

    #[tokio::test]
    async fn delete_removes_the_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::new(dir.path());
        writer
            .write_session(&session(1, "s1"), &[ChatMessage::user("hello")])
            .await;
        writer.delete_session(1, "s1").await;
        assert!(writer.search(1, "hello", 10).await.is_empty());
    }

    #[test]
    fn workspace_search_skips_sensitive_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "the secret plan").unwrap();
        std::fs::write(dir.path().join(".env"), "SECRET=the secret plan").unwrap();

        let hits = search_workspace(dir.path(), None, "secret plan", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "notes.txt");
    }
}
