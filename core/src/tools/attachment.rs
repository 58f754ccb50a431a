//! `attachment_read`: re-reads a prior artifact by `file_id`, within the
//! calling team only. Textual content comes back as text, binary as base64.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use serde_json::json;

use super::ToolCtx;
use super::ToolOutcome;
use crate::context::TRUNCATION_MARKER;
use crate::error::CoreErr;
use crate::error::Result;

#[derive(Deserialize)]
struct ReadArgs {
    file_id: String,
}

pub async fn read(args: &JsonValue, ctx: &ToolCtx) -> Result<ToolOutcome> {
    let args: ReadArgs = super::fs::parse(args)?;
    let record = ctx
        .store
        .get_team_file(ctx.team_id, &args.file_id)
        .await?
        .ok_or_else(|| CoreErr::NotFound(args.file_id.clone()))?;

    let path = ctx.artifacts.root().join(&record.file_id);
    let bytes = tokio::fs::read(&path).await?;

    let textual = record.content_type.starts_with("text/")
        || record.content_type == "application/json"
        || record.content_type.ends_with("+json")
        || record.content_type.ends_with("+xml");

    let result = if textual {
        let mut content = String::from_utf8_lossy(&bytes).into_owned();
        let limit = ctx.limits.max_file_read_chars;
        let truncated = content.chars().count() > limit;
        if truncated {
            content = content.chars().take(limit).collect();
            content.push_str(TRUNCATION_MARKER);
        }
        json!({
            "file_id": record.file_id,
            "filename": record.filename,
            "content_type": record.content_type,
            "text": content,
            "truncated": truncated,
        })
    } else {
        json!({
            "file_id": record.file_id,
            "filename": record.filename,
            "content_type": record.content_type,
            "base64": STANDARD.encode(&bytes),
        })
    };

    Ok(ToolOutcome::result(result))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use serde_json::json;

    use super::*;
    use crate::artifacts::ArtifactSource;
    use crate::artifacts::NewArtifact;
    use crate::test_support::tool_ctx_fixture;

    #[tokio::test]
    async fn reads_text_artifacts_back() {
        let (fixture, ctx) = tool_ctx_fixture().await;
        let record = fixture
            .artifacts
            .register(NewArtifact {
                kind: "generated".to_string(),
                filename: "notes.txt".to_string(),
                source: ArtifactSource::Bytes(b"artifact body".to_vec()),
                team_id: ctx.team_id,
                project_id: None,
                session_id: None,
            })
            .await
            .unwrap();

        let out = read(&json!({ "file_id": record.file_id }), &ctx).await.unwrap();
        assert_eq!(out.result["text"], "artifact body");
    }

    #[tokio::test]
    async fn binary_artifacts_come_back_as_base64() {
        let (fixture, ctx) = tool_ctx_fixture().await;
        let record = fixture
            .artifacts
            .register(NewArtifact {
                kind: "image".to_string(),
                filename: "pixel.png".to_string(),
                source: ArtifactSource::Bytes(vec![0x89, 0x50, 0x4e, 0x47]),
                team_id: ctx.team_id,
                project_id: None,
                session_id: None,
            })
            .await
            .unwrap();

        let out = read(&json!({ "file_id": record.file_id }), &ctx).await.unwrap();
        assert_eq!(out.result["base64"], STANDARD.encode([0x89, 0x50, 0x4e, 0x47]));
    }

    #[tokio::test]
    async fn other_teams_artifacts_are_invisible() {
        let (fixture, ctx) = tool_ctx_fixture().await;
        let record = fixture
            .artifacts
            .register(NewArtifact {
                kind: "file".to_string(),
                filename: "secret.txt".to_string(),
                source: ArtifactSource::Bytes(b"other team".to_vec()),
                team_id: ctx.team_id + 1,
                project_id: None,
                session_id: None,
            })
            .await
            .unwrap();

        let err = read(&json!({ "file_id": record.file_id }), &ctx).await.unwrap_err();
        assert!(matches!(err, CoreErr::NotFound(_)));
    }
}
