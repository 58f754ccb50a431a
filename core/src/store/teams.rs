//! Plain table operations around teams, memberships, projects, skills and
//! cross-team requirement delivery. The orchestration core only reads these;
//! mutation is driven by the auxiliary HTTP routes.

use aidesk_protocol::TeamRole;
use chrono::Utc;
use rusqlite::params;

use super::Store;
use super::ignore_not_found;
use super::rows;
use super::rows::DeliveryState;
use super::rows::Membership;
use super::rows::Project;
use super::rows::Requirement;
use super::rows::RequirementStatus;
use super::rows::Team;
use super::rows::TeamSkill;
use super::rows::User;
use crate::error::CoreErr;
use crate::error::Result;

impl Store {
    pub async fn create_user(&self, email: &str, display_name: &str) -> Result<User> {
        let email = email.to_string();
        let display_name = display_name.to_string();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO users (email, display_name, created_at) VALUES (?1, ?2, ?3)",
                params![email, display_name, super::fmt_ts(Utc::now())],
            )?;
            Ok(User {
                id: conn.last_insert_rowid(),
                email,
                display_name,
            })
        })
        .await
    }

    pub async fn create_team(&self, name: &str, workspace_path: Option<&str>) -> Result<Team> {
        let name = name.to_string();
        let workspace_path = workspace_path.map(str::to_string);
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO teams (name, workspace_path) VALUES (?1, ?2)",
                params![name, workspace_path],
            )?;
            Ok(Team {
                id: conn.last_insert_rowid(),
                name,
                workspace_path,
            })
        })
        .await
    }

    pub async fn get_team(&self, team_id: i64) -> Result<Option<Team>> {
        self.call(move |conn| {
            conn.query_row(
                "SELECT id, name, workspace_path FROM teams WHERE id = ?1",
                params![team_id],
                |row| {
                    Ok(Team {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        workspace_path: row.get(2)?,
                    })
                },
            )
            .map(Some)
            .or_else(ignore_not_found)
        })
        .await
    }

    pub async fn add_member(&self, user_id: i64, team_id: i64, role: TeamRole) -> Result<()> {
        self.call(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO memberships (user_id, team_id, role) VALUES (?1, ?2, ?3)",
                params![user_id, team_id, role.to_string()],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn membership(&self, user_id: i64, team_id: i64) -> Result<Option<Membership>> {
        self.call(move |conn| {
            conn.query_row(
                "SELECT user_id, team_id, role FROM memberships
                 WHERE user_id = ?1 AND team_id = ?2",
                params![user_id, team_id],
                |row| {
                    let role: String = row.get(2)?;
                    Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, role))
                },
            )
            .map(Some)
            .or_else(ignore_not_found)?
            .map(|(user_id, team_id, role)| {
                Ok(Membership {
                    user_id,
                    team_id,
                    role: role
                        .parse()
                        .map_err(|e: String| CoreErr::Validation(e))?,
                })
            })
            .transpose()
        })
        .await
    }

    pub async fn teams_for_user(&self, user_id: i64) -> Result<Vec<(Team, TeamRole)>> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT t.id, t.name, t.workspace_path, m.role
                 FROM teams t JOIN memberships m ON m.team_id = t.id
                 WHERE m.user_id = ?1 ORDER BY t.id",
            )?;
            let mut rows = stmt.query(params![user_id])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let role: String = row.get(3)?;
                out.push((
                    Team {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        workspace_path: row.get(2)?,
                    },
                    role.parse().map_err(|e: String| CoreErr::Validation(e))?,
                ));
            }
            Ok(out)
        })
        .await
    }

    // ------------------------------------------------------------------
    // API tokens (the default PrincipalResolver backend)
    // ------------------------------------------------------------------

    pub async fn insert_token(&self, token: &str, user_id: i64, team_id: i64) -> Result<()> {
        let token = token.to_string();
        self.call(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO api_tokens (token, user_id, team_id) VALUES (?1, ?2, ?3)",
                params![token, user_id, team_id],
            )?;
            Ok(())
        })
        .await
    }

    /// Bearer token → (user, active team, role in that team).
    pub async fn resolve_token(&self, token: &str) -> Result<Option<(i64, i64, TeamRole)>> {
        let token = token.to_string();
        self.call(move |conn| {
            conn.query_row(
                "SELECT a.user_id, a.team_id, m.role
                 FROM api_tokens a
                 JOIN memberships m ON m.user_id = a.user_id AND m.team_id = a.team_id
                 WHERE a.token = ?1",
                params![token],
                |row| {
                    let role: String = row.get(2)?;
                    Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, role))
                },
            )
            .map(Some)
            .or_else(ignore_not_found)?
            .map(|(user_id, team_id, role)| {
                Ok((
                    user_id,
                    team_id,
                    role.parse().map_err(|e: String| CoreErr::Validation(e))?,
                ))
            })
            .transpose()
        })
        .await
    }

    /// First-run bootstrap: one team, one owner, one token. Returns the token
    /// so the operator can log in; `None` when users already exist.
    pub async fn bootstrap(&self) -> Result<Option<String>> {
        let user_count: i64 = self
            .call(|conn| {
                let count = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
                Ok(count)
            })
            .await?;
        if user_count > 0 {
            return Ok(None);
        }
        let user = self.create_user("admin@localhost", "Admin").await?;
        let team = self.create_team("default", None).await?;
        self.add_member(user.id, team.id, TeamRole::Owner).await?;
        let token = crate::artifacts::random_token(32);
        self.insert_token(&token, user.id, team.id).await?;
        Ok(Some(token))
    }

    // ------------------------------------------------------------------
    // Projects
    // ------------------------------------------------------------------

    pub async fn create_project(
        &self,
        team_id: i64,
        name: &str,
        slug: &str,
        path: &str,
    ) -> Result<Project> {
        let name = name.to_string();
        let slug = slug.to_string();
        let path = path.to_string();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO team_projects (team_id, name, slug, path, enabled)
                 VALUES (?1, ?2, ?3, ?4, 1)",
                params![team_id, name, slug, path],
            )?;
            Ok(Project {
                id: conn.last_insert_rowid(),
                team_id,
                name,
                slug,
                path,
                enabled: true,
            })
        })
        .await
    }

    pub async fn get_project(&self, team_id: i64, project_id: i64) -> Result<Option<Project>> {
        self.call(move |conn| {
            conn.query_row(
                "SELECT id, team_id, name, slug, path, enabled FROM team_projects
                 WHERE id = ?1 AND team_id = ?2",
                params![project_id, team_id],
                |row| {
                    Ok(Project {
                        id: row.get(0)?,
                        team_id: row.get(1)?,
                        name: row.get(2)?,
                        slug: row.get(3)?,
                        path: row.get(4)?,
                        enabled: row.get::<_, i64>(5)? != 0,
                    })
                },
            )
            .map(Some)
            .or_else(ignore_not_found)
        })
        .await
    }

    pub async fn list_projects(&self, team_id: i64) -> Result<Vec<Project>> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, team_id, name, slug, path, enabled FROM team_projects
                 WHERE team_id = ?1 ORDER BY id",
            )?;
            let mut rows = stmt.query(params![team_id])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(Project {
                    id: row.get(0)?,
                    team_id: row.get(1)?,
                    name: row.get(2)?,
                    slug: row.get(3)?,
                    path: row.get(4)?,
                    enabled: row.get::<_, i64>(5)? != 0,
                });
            }
            Ok(out)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Skills
    // ------------------------------------------------------------------

    pub async fn add_skill(&self, team_id: i64, name: &str, content: &str) -> Result<TeamSkill> {
        let name = name.to_string();
        let content = content.to_string();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO team_skills (team_id, name, content, enabled) VALUES (?1, ?2, ?3, 1)",
                params![team_id, name, content],
            )?;
            Ok(TeamSkill {
                id: conn.last_insert_rowid(),
                team_id,
                name,
                content,
                enabled: true,
            })
        })
        .await
    }

    /// Enabled skills in id order; the prompt assembler relies on the order
    /// being stable across turns.
    pub async fn enabled_skills(&self, team_id: i64) -> Result<Vec<TeamSkill>> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, team_id, name, content, enabled FROM team_skills
                 WHERE team_id = ?1 AND enabled = 1 ORDER BY id",
            )?;
            let mut rows = stmt.query(params![team_id])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(TeamSkill {
                    id: row.get(0)?,
                    team_id: row.get(1)?,
                    name: row.get(2)?,
                    content: row.get(3)?,
                    enabled: row.get::<_, i64>(4)? != 0,
                });
            }
            Ok(out)
        })
        .await
    }

    pub async fn set_skill_enabled(&self, team_id: i64, skill_id: i64, enabled: bool) -> Result<bool> {
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE team_skills SET enabled = ?3 WHERE id = ?1 AND team_id = ?2",
                params![skill_id, team_id, enabled as i64],
            )?;
            Ok(n > 0)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Requirements & delivery
    // ------------------------------------------------------------------

    pub async fn create_requirement(
        &self,
        team_id: i64,
        project_id: Option<i64>,
        title: &str,
        description: &str,
        priority: i64,
    ) -> Result<Requirement> {
        let title = title.to_string();
        let description = description.to_string();
        self.call(move |conn| {
            let now = Utc::now();
            conn.execute(
                "INSERT INTO team_requirements
                 (team_id, project_id, title, description, status, priority, created_at)
                 VALUES (?1, ?2, ?3, ?4, 'todo', ?5, ?6)",
                params![team_id, project_id, title, description, priority, super::fmt_ts(now)],
            )?;
            Ok(Requirement {
                id: conn.last_insert_rowid(),
                team_id,
                project_id,
                title,
                description,
                status: RequirementStatus::Todo,
                priority,
                source_team: None,
                delivery_state: None,
                delivery_from_team_id: None,
                created_at: now,
            })
        })
        .await
    }

    pub async fn list_requirements(&self, team_id: i64) -> Result<Vec<Requirement>> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, team_id, project_id, title, description, status, priority,
                        source_team, delivery_state, delivery_from_team_id, created_at
                 FROM team_requirements WHERE team_id = ?1 ORDER BY priority DESC, id",
            )?;
            let mut rows = stmt.query(params![team_id])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(rows::requirement_from_row(row)?);
            }
            Ok(out)
        })
        .await
    }

    /// Cross-team delivery: the requirement is materialized on the *target*
    /// team only, in `incoming` status with a pending delivery state.
    pub async fn deliver_requirement(
        &self,
        from_team: &Team,
        requirement_id: i64,
        target_team_id: i64,
    ) -> Result<Requirement> {
        let from_team_id = from_team.id;
        let from_team_name = from_team.name.clone();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let (title, description, priority): (String, String, i64) = tx
                .query_row(
                    "SELECT title, description, priority FROM team_requirements
                     WHERE id = ?1 AND team_id = ?2",
                    params![requirement_id, from_team_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => {
                        CoreErr::NotFound(format!("requirement {requirement_id}"))
                    }
                    other => other.into(),
                })?;
            let now = Utc::now();
            tx.execute(
                "INSERT INTO team_requirements
                 (team_id, project_id, title, description, status, priority,
                  source_team, delivery_state, delivery_from_team_id, created_at)
                 VALUES (?1, NULL, ?2, ?3, 'incoming', ?4, ?5, 'pending', ?6, ?7)",
                params![
                    target_team_id,
                    title,
                    description,
                    priority,
                    from_team_name,
                    from_team_id,
                    super::fmt_ts(now)
                ],
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;
            Ok(Requirement {
                id,
                team_id: target_team_id,
                project_id: None,
                title,
                description,
                status: RequirementStatus::Incoming,
                priority,
                source_team: Some(from_team_name),
                delivery_state: Some(DeliveryState::Pending),
                delivery_from_team_id: Some(from_team_id),
                created_at: now,
            })
        })
        .await
    }

    /// Accept or reject a pending delivery on the receiving team.
    pub async fn set_delivery_state(
        &self,
        team_id: i64,
        requirement_id: i64,
        state: DeliveryState,
    ) -> Result<bool> {
        self.call(move |conn| {
            let status = match state {
                DeliveryState::Accepted => "todo",
                _ => "incoming",
            };
            let n = conn.execute(
                "UPDATE team_requirements SET delivery_state = ?3, status = ?4
                 WHERE id = ?1 AND team_id = ?2 AND delivery_state = 'pending'",
                params![requirement_id, team_id, state.as_str(), status],
            )?;
            Ok(n > 0)
        })
        .await
    }

    pub async fn set_requirement_status(
        &self,
        team_id: i64,
        requirement_id: i64,
        status: RequirementStatus,
    ) -> Result<bool> {
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE team_requirements SET status = ?3 WHERE id = ?1 AND team_id = ?2",
                params![requirement_id, team_id, status.as_str()],
            )?;
            Ok(n > 0)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[tokio::test]
    async fn bootstrap_runs_once() {
        let store = Store::open_in_memory().unwrap();
        let token = store.bootstrap().await.unwrap();
        assert!(token.is_some());
        assert!(store.bootstrap().await.unwrap().is_none());

        let resolved = store.resolve_token(&token.unwrap()).await.unwrap();
        let (_, _, role) = resolved.unwrap();
        assert_eq!(role, TeamRole::Owner);
    }

    #[tokio::test]
    async fn delivery_materializes_only_on_target_team() {
        let store = Store::open_in_memory().unwrap();
        let source = store.create_team("alpha", None).await.unwrap();
        let target = store.create_team("beta", None).await.unwrap();
        let req = store
            .create_requirement(source.id, None, "Ship it", "Details", 2)
            .await
            .unwrap();

        let delivered = store
            .deliver_requirement(&source, req.id, target.id)
            .await
            .unwrap();
        assert_eq!(delivered.team_id, target.id);
        assert_eq!(delivered.delivery_state, Some(DeliveryState::Pending));
        assert_eq!(delivered.status, RequirementStatus::Incoming);
        assert_eq!(delivered.source_team.as_deref(), Some("alpha"));

        // The source team still sees exactly its own row.
        let source_reqs = store.list_requirements(source.id).await.unwrap();
        assert_eq!(source_reqs.len(), 1);
        assert!(source_reqs[0].delivery_state.is_none());

        // Accepting moves it into the target's backlog.
        assert!(
            store
                .set_delivery_state(target.id, delivered.id, DeliveryState::Accepted)
                .await
                .unwrap()
        );
        let target_reqs = store.list_requirements(target.id).await.unwrap();
        assert_eq!(target_reqs[0].status, RequirementStatus::Todo);
        // A second accept is a no-op: the state is no longer pending.
        assert!(
            !store
                .set_delivery_state(target.id, delivered.id, DeliveryState::Accepted)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn skills_keep_id_order() {
        let store = Store::open_in_memory().unwrap();
        let team = store.create_team("alpha", None).await.unwrap();
        store.add_skill(team.id, "writing", "Write tersely.").await.unwrap();
        let disabled = store.add_skill(team.id, "legacy", "Old rules.").await.unwrap();
        store.add_skill(team.id, "review", "Review checklists.").await.unwrap();
        store
            .set_skill_enabled(team.id, disabled.id, false)
            .await
            .unwrap();

        let skills = store.enabled_skills(team.id).await.unwrap();
        let names: Vec<&str> = skills.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["writing", "review"]);
    }
}
