//! Session-scoped headless browser tools. One logical browser per chat
//! session: `browser_start` binds it, `browser_navigate` sets the current
//! URL, `browser_screenshot` shells out to the headless binary and registers
//! the capture as an attachment.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value as JsonValue;
use serde_json::json;
use tokio::process::Command;
use tracing::debug;

use super::ToolCtx;
use super::ToolOutcome;
use crate::artifacts::ArtifactSource;
use crate::artifacts::NewArtifact;
use crate::error::CoreErr;
use crate::error::Result;

const SCREENSHOT_TIMEOUT: Duration = Duration::from_secs(45);

const BROWSER_CANDIDATES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "headless_shell",
];

#[derive(Default)]
struct BrowserSession {
    url: Option<String>,
}

/// Holds the per-session browser state. Entries disappear when the owning
/// chat session is evicted or explicitly closed.
#[derive(Default)]
pub struct BrowserManager {
    sessions: Mutex<HashMap<String, BrowserSession>>,
    binary: Option<PathBuf>,
}

impl BrowserManager {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            binary: find_browser_binary(),
        }
    }

    pub fn close_session(&self, session_id: &str) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(session_id);
        }
    }

    fn with_session<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut BrowserSession) -> T,
    ) -> Result<T> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| CoreErr::ToolFailure("browser state poisoned".to_string()))?;
        Ok(f(sessions.entry(session_id.to_string()).or_default()))
    }

    fn current_url(&self, session_id: &str) -> Result<Option<String>> {
        self.with_session(session_id, |s| s.url.clone())
    }
}

pub async fn start(_args: &JsonValue, ctx: &ToolCtx) -> Result<ToolOutcome> {
    let Some(binary) = ctx.browser.binary.clone() else {
        return Err(CoreErr::ToolFailure(
            "no headless browser binary found on this host".to_string(),
        ));
    };
    ctx.browser.with_session(&ctx.session_id, |_| ())?;
    Ok(ToolOutcome::result(json!({
        "ok": true,
        "browser": binary.file_name().map(|n| n.to_string_lossy().into_owned()),
    })))
}

#[derive(Deserialize)]
struct NavigateArgs {
    url: String,
}

pub async fn navigate(args: &JsonValue, ctx: &ToolCtx) -> Result<ToolOutcome> {
    let args: NavigateArgs = super::fs::parse(args)?;
    if !(args.url.starts_with("http://") || args.url.starts_with("https://")) {
        return Err(CoreErr::ToolFailure(
            "only http(s) URLs can be opened".to_string(),
        ));
    }
    ctx.browser
        .with_session(&ctx.session_id, |s| s.url = Some(args.url.clone()))?;
    Ok(ToolOutcome::result(json!({ "ok": true, "url": args.url })))
}

pub async fn screenshot(_args: &JsonValue, ctx: &ToolCtx) -> Result<ToolOutcome> {
    let Some(binary) = ctx.browser.binary.clone() else {
        return Err(CoreErr::ToolFailure(
            "no headless browser binary found on this host".to_string(),
        ));
    };
    let Some(url) = ctx.browser.current_url(&ctx.session_id)? else {
        return Err(CoreErr::ToolFailure(
            "no page open; call browser_navigate first".to_string(),
        ));
    };

    let capture = std::env::temp_dir().join(format!(
        "aidesk-shot-{}.png",
        crate::artifacts::random_token(8)
    ));

    let mut child = Command::new(&binary)
        .arg("--headless=new")
        .arg("--disable-gpu")
        .arg("--no-sandbox")
        .arg("--window-size=1280,800")
        .arg(format!("--screenshot={}", capture.display()))
        .arg(&url)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    let status = match tokio::time::timeout(SCREENSHOT_TIMEOUT, child.wait()).await {
        Ok(status) => status?,
        Err(_) => {
            child.start_kill()?;
            return Err(CoreErr::ToolTimeout(SCREENSHOT_TIMEOUT.as_millis() as u64));
        }
    };
    if !status.success() || !capture.exists() {
        return Err(CoreErr::ToolFailure(format!(
            "browser exited with {:?} without producing a capture",
            status.code()
        )));
    }

    let record = ctx
        .artifacts
        .register(NewArtifact {
            kind: "generated".to_string(),
            filename: "screenshot.png".to_string(),
            source: ArtifactSource::File(capture.clone()),
            team_id: ctx.team_id,
            project_id: ctx.project_id,
            session_id: Some(ctx.session_id.clone()),
        })
        .await?;
    if let Err(e) = tokio::fs::remove_file(&capture).await {
        debug!("failed to remove capture temp file: {e}");
    }

    let download = ctx.artifacts.download_url(&record);
    Ok(ToolOutcome {
        result: json!({
            "file_id": record.file_id,
            "filename": record.filename,
            "url": download,
            "source_url": url,
        }),
        artifacts: vec![record],
    })
}

fn find_browser_binary() -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        for candidate in BROWSER_CANDIDATES {
            let full = dir.join(candidate);
            if full.is_file() {
                return Some(full);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use serde_json::json;

    use super::*;
    use crate::test_support::tool_ctx_fixture;

    #[tokio::test]
    async fn navigate_requires_http_urls() {
        let (_fixture, ctx) = tool_ctx_fixture().await;
        let err = navigate(&json!({ "url": "file:///etc/passwd" }), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreErr::ToolFailure(_)));

        navigate(&json!({ "url": "https://example.com" }), &ctx)
            .await
            .unwrap();
        assert_eq!(
            ctx.browser.current_url(&ctx.session_id).unwrap().as_deref(),
            Some("https://example.com")
        );
    }

    #[tokio::test]
    async fn screenshot_without_navigation_fails_cleanly() {
        let (_fixture, ctx) = tool_ctx_fixture().await;
        // Regardless of whether the host has a browser binary, nothing was
        // opened for this session yet.
        let err = screenshot(&json!({}), &ctx).await.unwrap_err();
        assert!(matches!(err, CoreErr::ToolFailure(_)));
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let (_fixture, ctx) = tool_ctx_fixture().await;
        navigate(&json!({ "url": "https://example.com" }), &ctx)
            .await
            .unwrap();
        assert!(ctx.browser.current_url("other-session").unwrap().is_none());
        ctx.browser.close_session(&ctx.session_id);
        assert!(ctx.browser.current_url(&ctx.session_id).unwrap().is_none());
    }
}
