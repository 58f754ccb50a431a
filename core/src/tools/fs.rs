//! Filesystem tools. Every path goes through the workspace sandbox first;
//! the handlers only ever see absolute paths proven to live under the root.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value as JsonValue;
use serde_json::json;

use super::ToolCtx;
use super::ToolOutcome;
use crate::context::TRUNCATION_MARKER;
use crate::error::CoreErr;
use crate::error::Result;
use crate::workspace;

const DEFAULT_DEPTH: usize = 2;
const MAX_DEPTH: usize = 5;
const DEFAULT_MAX_ENTRIES: usize = 500;
const MAX_MAX_ENTRIES: usize = 5_000;

#[derive(Deserialize)]
struct ListArgs {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    depth: Option<usize>,
    #[serde(default)]
    max_entries: Option<usize>,
}

pub async fn list(args: &JsonValue, ctx: &ToolCtx) -> Result<ToolOutcome> {
    let args: ListArgs = parse(args)?;
    let rel = args.path.unwrap_or_else(|| ".".to_string());
    let root = workspace::resolve(&ctx.workspace_root, &rel)?;
    let depth = args.depth.unwrap_or(DEFAULT_DEPTH).min(MAX_DEPTH);
    let max_entries = args.max_entries.unwrap_or(DEFAULT_MAX_ENTRIES).min(MAX_MAX_ENTRIES);

    let mut lines = Vec::new();
    let mut entries = 0usize;
    let truncated = walk(&root, 0, depth, max_entries, &mut entries, &mut lines)?;

    Ok(ToolOutcome::result(json!({
        "path": workspace::relative_to_root(&ctx.workspace_root, &root),
        "tree": lines.join("\n"),
        "entries": entries,
        "truncated": truncated,
    })))
}

fn walk(
    dir: &Path,
    level: usize,
    max_depth: usize,
    max_entries: usize,
    entries: &mut usize,
    lines: &mut Vec<String>,
) -> Result<bool> {
    if !dir.is_dir() {
        return Err(CoreErr::ToolFailure(format!(
            "{} is not a directory",
            dir.display()
        )));
    }
    let mut children: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .collect();
    children.sort_by_key(|entry| entry.file_name());

    for child in children {
        let name = child.file_name().to_string_lossy().into_owned();
        // Sensitive names never show up, matching the read/write rules.
        if workspace::resolve(dir, &name).is_err() {
            continue;
        }
        if *entries >= max_entries {
            return Ok(true);
        }
        *entries += 1;
        let is_dir = child.file_type().map(|t| t.is_dir()).unwrap_or(false);
        let indent = "  ".repeat(level);
        lines.push(format!("{indent}{name}{}", if is_dir { "/" } else { "" }));
        if is_dir && level + 1 < max_depth {
            if walk(&child.path(), level + 1, max_depth, max_entries, entries, lines)? {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

#[derive(Deserialize)]
struct ReadArgs {
    path: String,
}

pub async fn read(args: &JsonValue, ctx: &ToolCtx) -> Result<ToolOutcome> {
    let args: ReadArgs = parse(args)?;
    let abs = workspace::resolve_existing(&ctx.workspace_root, &args.path)?;
    let bytes = tokio::fs::read(&abs).await?;
    let mut content = String::from_utf8_lossy(&bytes).into_owned();

    let limit = ctx.limits.max_file_read_chars;
    let truncated = content.chars().count() > limit;
    if truncated {
        content = content.chars().take(limit).collect();
        content.push_str(TRUNCATION_MARKER);
    }

    Ok(ToolOutcome::result(json!({
        "path": workspace::relative_to_root(&ctx.workspace_root, &abs),
        "content": content,
        "size_bytes": bytes.len(),
        "truncated": truncated,
    })))
}

#[derive(Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
    #[serde(default)]
    mode: Option<String>,
}

pub async fn write(args: &JsonValue, ctx: &ToolCtx) -> Result<ToolOutcome> {
    let args: WriteArgs = parse(args)?;
    let append = match args.mode.as_deref() {
        None | Some("overwrite") => false,
        Some("append") => true,
        Some(other) => {
            return Err(CoreErr::ToolFailure(format!(
                "mode must be overwrite or append, got {other}"
            )));
        }
    };
    let abs = workspace::resolve(&ctx.workspace_root, &args.path)?;
    if let Some(parent) = abs.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if append {
        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&abs)
            .await?;
        file.write_all(args.content.as_bytes()).await?;
    } else {
        tokio::fs::write(&abs, args.content.as_bytes()).await?;
    }

    Ok(ToolOutcome::result(json!({
        "ok": true,
        "path": workspace::relative_to_root(&ctx.workspace_root, &abs),
        "bytes": args.content.len(),
        "mode": if append { "append" } else { "overwrite" },
    })))
}

pub(super) fn parse<T: serde::de::DeserializeOwned>(args: &JsonValue) -> Result<T> {
    serde_json::from_value(args.clone())
        .map_err(|e| CoreErr::ToolFailure(format!("invalid arguments: {e}")))
}
