//! In-crate test fixtures for `aidesk-core`'s own unit tests.
//!
//! Unit tests live inside `src/` and are compiled as part of the crate's
//! test build, which is a distinct compilation unit from the normal library
//! build that `core_test_support` (an external dev-dependency) links
//! against. Sharing `ToolCtx` values between the two would hit "multiple
//! different versions of crate `aidesk_core`" type errors, so internal unit
//! tests use this module instead; integration tests under `tests/` keep
//! using `core_test_support`.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use aidesk_protocol::CapabilitySet;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::artifacts::ArtifactStore;
use crate::config::Config;
use crate::store::Store;
use crate::tools::BrowserManager;
use crate::tools::HtmlBundleRenderer;
use crate::tools::ToolCtx;
use crate::tools::ToolLimits;

pub struct Fixture {
    pub dir: TempDir,
    pub config: Config,
    pub store: Store,
    pub artifacts: ArtifactStore,
}

impl Fixture {
    pub fn workspace(&self) -> PathBuf {
        self.config.workspace_default.clone()
    }
}

pub async fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let config = Config::for_tests(dir.path());
    std::fs::create_dir_all(&config.workspace_default).unwrap();
    std::fs::create_dir_all(&config.outputs_dir).unwrap();
    let store = Store::open_in_memory().unwrap();
    let artifacts = ArtifactStore::new(&config, b"test-secret".to_vec(), store.clone());
    Fixture {
        dir,
        config,
        store,
        artifacts,
    }
}

/// A fixture plus a fully-permitted tool context bound to team 1.
pub async fn tool_ctx_fixture() -> (Fixture, ToolCtx) {
    let fixture = fixture().await;
    let ctx = tool_ctx(&fixture, 1, "test-session");
    (fixture, ctx)
}

pub fn tool_ctx(fixture: &Fixture, team_id: i64, session_id: &str) -> ToolCtx {
    ToolCtx {
        team_id,
        project_id: None,
        session_id: session_id.to_string(),
        workspace_root: fixture.config.workspace_default.clone(),
        capabilities: CapabilitySet {
            shell: true,
            write: true,
            browser: true,
            dangerous: false,
        },
        limits: ToolLimits {
            max_tool_output_chars: fixture.config.max_tool_output_chars,
            max_file_read_chars: fixture.config.max_file_read_chars,
        },
        artifacts: fixture.artifacts.clone(),
        store: fixture.store.clone(),
        browser: Arc::new(BrowserManager::new()),
        renderer: Arc::new(HtmlBundleRenderer),
        cancel: CancellationToken::new(),
    }
}

/// Writes a file under `root`, creating parents.
pub fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}
