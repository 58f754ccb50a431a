//! The `shell_run` tool: host-shell execution with the workspace root as
//! working directory. The policy surface ends here; OS-level isolation is
//! the host's concern.

use serde::Deserialize;
use serde_json::Value as JsonValue;

use super::ToolCtx;
use super::ToolOutcome;
use crate::error::CoreErr;
use crate::error::Result;
use crate::exec;
use crate::exec::ExecParams;

#[derive(Deserialize)]
struct ShellArgs {
    command: String,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

pub async fn run(args: &JsonValue, ctx: &ToolCtx) -> Result<ToolOutcome> {
    let args: ShellArgs = super::fs::parse(args)?;
    if args.command.trim().is_empty() {
        return Err(CoreErr::ToolFailure("command must not be empty".to_string()));
    }
    if args.timeout_ms == Some(0) {
        return Err(CoreErr::ToolFailure(
            "timeout_ms must be greater than zero".to_string(),
        ));
    }
    if args.timeout_ms.is_some_and(|t| t > exec::MAX_TIMEOUT_MS) {
        return Err(CoreErr::ToolFailure(format!(
            "timeout_ms must be at most {}",
            exec::MAX_TIMEOUT_MS
        )));
    }

    let outcome = exec::run_shell(
        ExecParams {
            command: args.command,
            cwd: ctx.workspace_root.clone(),
            timeout_ms: args.timeout_ms,
        },
        &ctx.cancel,
    )
    .await?;

    Ok(ToolOutcome::result(serde_json::to_value(&outcome)?))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use serde_json::json;

    use super::*;
    use crate::test_support::tool_ctx_fixture;

    #[tokio::test]
    async fn runs_in_the_workspace_root() {
        let (fixture, ctx) = tool_ctx_fixture().await;
        std::fs::write(fixture.workspace().join("marker.txt"), "here").unwrap();
        let out = run(&json!({ "command": "ls" }), &ctx).await.unwrap();
        assert!(out.result["stdout"].as_str().unwrap().contains("marker.txt"));
        assert_eq!(out.result["exit_code"], 0);
        assert_eq!(out.result["timed_out"], false);
    }

    #[tokio::test]
    async fn zero_timeout_is_a_validation_failure() {
        let (_fixture, ctx) = tool_ctx_fixture().await;
        let err = run(&json!({ "command": "true", "timeout_ms": 0 }), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreErr::ToolFailure(_)));
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_result_not_an_error() {
        let (_fixture, ctx) = tool_ctx_fixture().await;
        let out = run(&json!({ "command": "exit 7" }), &ctx).await.unwrap();
        assert_eq!(out.result["exit_code"], 7);
    }
}
