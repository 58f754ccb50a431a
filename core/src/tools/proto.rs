//! `proto_generate`: turns a page list into a single self-contained HTML
//! prototype bundle with a navigation rail, registered as an attachment and
//! reachable through the preview URL.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value as JsonValue;
use serde_json::json;

use super::ToolCtx;
use super::ToolOutcome;
use crate::artifacts::ArtifactSource;
use crate::artifacts::NewArtifact;
use crate::error::CoreErr;
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtoPage {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Optional page body; a wireframe placeholder is rendered otherwise.
    #[serde(default)]
    pub html: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtoPayload {
    pub project_name: String,
    pub pages: Vec<ProtoPage>,
}

pub async fn generate(args: &JsonValue, ctx: &ToolCtx) -> Result<ToolOutcome> {
    let payload: ProtoPayload = super::fs::parse(args)?;
    if payload.pages.is_empty() {
        return Err(CoreErr::ToolFailure(
            "a prototype needs at least one page".to_string(),
        ));
    }

    let bundle = render_bundle(&payload);
    let record = ctx
        .artifacts
        .register(NewArtifact {
            kind: "generated".to_string(),
            filename: format!("{}-prototype.html", slugify(&payload.project_name)),
            source: ArtifactSource::Bytes(bundle.into_bytes()),
            team_id: ctx.team_id,
            project_id: ctx.project_id,
            session_id: Some(ctx.session_id.clone()),
        })
        .await?;

    let url = ctx.artifacts.download_url(&record);
    let preview_url = ctx.artifacts.preview_url(&record);
    Ok(ToolOutcome {
        result: json!({
            "file_id": record.file_id,
            "filename": record.filename,
            "url": url,
            "preview_url": preview_url,
            "pages": payload.pages.len(),
        }),
        artifacts: vec![record],
    })
}

pub fn render_bundle(payload: &ProtoPayload) -> String {
    let mut nav = String::new();
    let mut sections = String::new();
    for (idx, p) in payload.pages.iter().enumerate() {
        nav.push_str(&format!(
            "<a href=\"#page-{idx}\">{}</a>",
            escape(&p.name)
        ));
        let body = match &p.html {
            Some(html) => html.clone(),
            None => format!(
                "<div class=\"wireframe\">{}</div>",
                escape(p.description.as_deref().unwrap_or("(empty page)"))
            ),
        };
        sections.push_str(&format!(
            "<section id=\"page-{idx}\"><h2>{}</h2>{}</section>\n",
            escape(&p.name),
            body
        ));
    }
    format!(
        "<!doctype html>\n<html><head><meta charset=\"utf-8\"><title>{}</title>\
         <style>body{{font-family:sans-serif;margin:0;display:flex}}\
         nav{{min-width:12rem;border-right:1px solid #ddd;padding:1rem;display:flex;flex-direction:column;gap:.5rem}}\
         main{{padding:1rem 2rem;flex:1}}section{{border-bottom:1px dashed #ccc;padding:1rem 0}}\
         .wireframe{{border:2px dashed #aaa;border-radius:.5rem;padding:2rem;color:#666}}</style>\
         </head><body><nav><strong>{}</strong>{}</nav><main>{}</main></body></html>\n",
        escape(&payload.project_name),
        escape(&payload.project_name),
        nav,
        sections,
    )
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn slugify(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('-');
    if trimmed.is_empty() {
        "prototype".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use serde_json::json;

    use super::*;
    use crate::test_support::tool_ctx_fixture;

    #[tokio::test]
    async fn bundle_contains_all_pages_and_preview_url() {
        let (_fixture, ctx) = tool_ctx_fixture().await;
        let out = generate(
            &json!({
                "project_name": "Alpha App",
                "pages": [
                    { "name": "Login", "description": "email + password" },
                    { "name": "Dashboard", "html": "<p>widgets</p>" },
                ],
            }),
            &ctx,
        )
        .await
        .unwrap();

        assert_eq!(out.result["pages"], 2);
        assert!(out.result["preview_url"]
            .as_str()
            .unwrap()
            .starts_with("/files/preview/"));
        let record = &out.artifacts[0];
        assert!(record.filename.starts_with("alpha-app"));
    }

    #[tokio::test]
    async fn empty_page_list_is_rejected() {
        let (_fixture, ctx) = tool_ctx_fixture().await;
        let err = generate(&json!({ "project_name": "x", "pages": [] }), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreErr::ToolFailure(_)));
    }
}
