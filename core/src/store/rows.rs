use aidesk_protocol::TeamRole;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use super::parse_ts;
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: i64,
    pub name: String,
    pub workspace_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub team_id: i64,
    pub name: String,
    pub slug: String,
    pub path: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Membership {
    pub user_id: i64,
    pub team_id: i64,
    pub role: TeamRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamSkill {
    pub id: i64,
    pub team_id: i64,
    pub name: String,
    pub content: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementStatus {
    Incoming,
    Todo,
    InProgress,
    Done,
    Blocked,
}

impl RequirementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequirementStatus::Incoming => "incoming",
            RequirementStatus::Todo => "todo",
            RequirementStatus::InProgress => "in_progress",
            RequirementStatus::Done => "done",
            RequirementStatus::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "incoming" => Some(Self::Incoming),
            "todo" => Some(Self::Todo),
            "in_progress" => Some(Self::InProgress),
            "done" => Some(Self::Done),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Accepted,
    Rejected,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Pending => "pending",
            DeliveryState::Accepted => "accepted",
            DeliveryState::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// A requirement row. Delivered requirements exist only on the target team,
/// carrying `delivery_state` and the originating team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requirement {
    pub id: i64,
    pub team_id: i64,
    pub project_id: Option<i64>,
    pub title: String,
    pub description: String,
    pub status: RequirementStatus,
    pub priority: i64,
    pub source_team: Option<String>,
    pub delivery_state: Option<DeliveryState>,
    pub delivery_from_team_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRow {
    pub session_id: String,
    pub team_id: i64,
    pub project_id: Option<i64>,
    pub role: String,
    pub provider: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: i64,
    pub session_id: String,
    pub ordinal: i64,
    pub role: String,
    pub content: String,
    pub tool_calls_json: Option<String>,
    pub tool_call_id: Option<String>,
    pub events_json: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Message to append; ordinals and timestamps are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub role: String,
    pub content: String,
    pub tool_calls_json: Option<String>,
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_id: String,
    pub kind: String,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub team_id: i64,
    pub project_id: Option<i64>,
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub source_path: Option<String>,
}

pub(super) fn session_from_row(row: &rusqlite::Row<'_>) -> Result<SessionRow> {
    Ok(SessionRow {
        session_id: row.get(0)?,
        team_id: row.get(1)?,
        project_id: row.get(2)?,
        role: row.get(3)?,
        provider: row.get(4)?,
        model: row.get(5)?,
        created_at: parse_ts(row.get(6)?),
        updated_at: parse_ts(row.get(7)?),
        last_summary: row.get(8)?,
    })
}

pub(super) fn message_from_row(row: &rusqlite::Row<'_>) -> Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        ordinal: row.get(2)?,
        role: row.get(3)?,
        content: row.get(4)?,
        tool_calls_json: row.get(5)?,
        tool_call_id: row.get(6)?,
        events_json: row.get(7)?,
        created_at: parse_ts(row.get(8)?),
    })
}

pub(super) fn file_from_row(row: &rusqlite::Row<'_>) -> Result<FileRecord> {
    Ok(FileRecord {
        file_id: row.get(0)?,
        kind: row.get(1)?,
        filename: row.get(2)?,
        content_type: row.get(3)?,
        size_bytes: row.get(4)?,
        team_id: row.get(5)?,
        project_id: row.get(6)?,
        session_id: row.get(7)?,
        created_at: parse_ts(row.get(8)?),
        source_path: row.get(9)?,
    })
}

pub(super) fn requirement_from_row(row: &rusqlite::Row<'_>) -> Result<Requirement> {
    let status: String = row.get(5)?;
    let delivery: Option<String> = row.get(8)?;
    Ok(Requirement {
        id: row.get(0)?,
        team_id: row.get(1)?,
        project_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        status: RequirementStatus::parse(&status).unwrap_or(RequirementStatus::Incoming),
        priority: row.get(6)?,
        source_team: row.get(7)?,
        delivery_state: delivery.as_deref().and_then(DeliveryState::parse),
        delivery_from_team_id: row.get(9)?,
        created_at: parse_ts(row.get(10)?),
    })
}
