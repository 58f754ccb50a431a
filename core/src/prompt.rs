//! Prompt assembler: composes the transient system message from the role
//! template, the team's enabled skills (ordered by id) and the tool contract
//! boilerplate. The result is rebuilt on every turn and never persisted; only
//! user/assistant/tool messages survive in history.

use std::path::PathBuf;

use aidesk_protocol::ChatMessage;

use crate::store::TeamSkill;

/// Tool contract boilerplate appended to every role template.
const BASE_CONTRACT: &str = include_str!("../prompt.md");

/// Wraps team skills in a tag for the model to parse more easily.
const TEAM_SKILLS_START: &str = "<team_skills>\n\n";
const TEAM_SKILLS_END: &str = "\n\n</team_skills>";

const DEFAULT_ROLE: &str = "assistant";

#[derive(Clone)]
pub struct PromptAssembler {
    roles_dir: PathBuf,
}

impl PromptAssembler {
    pub fn new(state_home: &std::path::Path) -> Self {
        Self {
            roles_dir: state_home.join("roles"),
        }
    }

    /// Loads `roles/<name>.md` from the state home. Unknown roles fall back
    /// to the built-in template so a typo degrades instead of failing.
    pub async fn load_role(&self, role: &str) -> Option<String> {
        if !role
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return None;
        }
        let path = self.roles_dir.join(format!("{role}.md"));
        tokio::fs::read_to_string(path).await.ok()
    }

    pub fn assemble(
        &self,
        role: &str,
        role_template: Option<&str>,
        skills: &[TeamSkill],
    ) -> ChatMessage {
        let mut sections: Vec<String> = Vec::new();
        match role_template {
            Some(template) => sections.push(template.trim().to_string()),
            None => {
                if role != DEFAULT_ROLE {
                    sections.push(format!("You are acting in the `{role}` role."));
                }
            }
        }
        sections.push(BASE_CONTRACT.trim().to_string());

        if !skills.is_empty() {
            let body = skills
                .iter()
                .map(|s| format!("### {}\n{}", s.name, s.content.trim()))
                .collect::<Vec<_>>()
                .join("\n\n");
            sections.push(format!("{TEAM_SKILLS_START}{body}{TEAM_SKILLS_END}"));
        }

        ChatMessage::system(sections.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    fn skill(id: i64, name: &str, content: &str) -> TeamSkill {
        TeamSkill {
            id,
            team_id: 1,
            name: name.to_string(),
            content: content.to_string(),
            enabled: true,
        }
    }

    #[test]
    fn default_role_is_contract_only() {
        let assembler = PromptAssembler::new(std::path::Path::new("/tmp/aidesk-test"));
        let msg = assembler.assemble("assistant", None, &[]);
        assert!(msg.content.starts_with("You are a workspace assistant"));
        assert!(!msg.content.contains("<team_skills>"));
    }

    #[test]
    fn named_role_without_template_gets_a_role_line() {
        let assembler = PromptAssembler::new(std::path::Path::new("/tmp/aidesk-test"));
        let msg = assembler.assemble("analyst", None, &[]);
        assert!(msg.content.starts_with("You are acting in the `analyst` role."));
    }

    #[test]
    fn skills_appear_in_given_order_inside_tags() {
        let assembler = PromptAssembler::new(std::path::Path::new("/tmp/aidesk-test"));
        let skills = vec![
            skill(1, "tone", "Stay formal."),
            skill(3, "review", "Check twice."),
        ];
        let msg = assembler.assemble("assistant", None, &skills);
        let tone = msg.content.find("### tone").unwrap();
        let review = msg.content.find("### review").unwrap();
        assert!(tone < review);
        assert!(msg.content.contains("<team_skills>"));
        assert!(msg.content.contains("</team_skills>"));
    }

    #[tokio::test]
    async fn role_files_load_from_state_home() {
        let dir = tempfile::tempdir().unwrap();
        let roles = dir.path().join("roles");
        std::fs::create_dir_all(&roles).unwrap();
        std::fs::write(roles.join("pm.md"), "You are the project manager.").unwrap();

        let assembler = PromptAssembler::new(dir.path());
        let template = assembler.load_role("pm").await.unwrap();
        let msg = assembler.assemble("pm", Some(&template), &[]);
        assert!(msg.content.starts_with("You are the project manager."));

        // Traversal attempts never resolve to a file.
        assert!(assembler.load_role("../secret").await.is_none());
        assert!(assembler.load_role("missing").await.is_none());
    }
}
