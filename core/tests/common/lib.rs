#![allow(clippy::unwrap_used)]

//! Shared fixtures for the aidesk-core test suites.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use aidesk_core::artifacts::ArtifactStore;
use aidesk_core::config::Config;
use aidesk_core::store::Store;
use aidesk_core::tools::BrowserManager;
use aidesk_core::tools::HtmlBundleRenderer;
use aidesk_core::tools::ToolCtx;
use aidesk_core::tools::ToolLimits;
use aidesk_protocol::CapabilitySet;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

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

/// A full chat service over an in-memory store with two teams:
/// an owner and a plain member on team one, and a sibling-team owner.
pub struct ChatFixture {
    pub dir: TempDir,
    pub service: aidesk_core::ChatService,
    pub owner: aidesk_core::Principal,
    pub member: aidesk_core::Principal,
    pub sibling: aidesk_core::Principal,
}

pub async fn chat_fixture() -> ChatFixture {
    use aidesk_protocol::TeamRole;

    let dir = TempDir::new().unwrap();
    let config = Config::for_tests(dir.path());
    std::fs::create_dir_all(&config.workspace_default).unwrap();
    let store = Store::open_in_memory().unwrap();

    let team_one = store.create_team("one", None).await.unwrap();
    let team_two = store.create_team("two", None).await.unwrap();
    let alice = store.create_user("alice@one", "Alice").await.unwrap();
    let bob = store.create_user("bob@one", "Bob").await.unwrap();
    let carol = store.create_user("carol@two", "Carol").await.unwrap();
    store.add_member(alice.id, team_one.id, TeamRole::Owner).await.unwrap();
    store.add_member(bob.id, team_one.id, TeamRole::Member).await.unwrap();
    store.add_member(carol.id, team_two.id, TeamRole::Owner).await.unwrap();

    let service = aidesk_core::ChatService::new(config, store).unwrap();
    ChatFixture {
        dir,
        service,
        owner: aidesk_core::Principal {
            user_id: alice.id,
            team_id: team_one.id,
            role: TeamRole::Owner,
        },
        member: aidesk_core::Principal {
            user_id: bob.id,
            team_id: team_one.id,
            role: TeamRole::Member,
        },
        sibling: aidesk_core::Principal {
            user_id: carol.id,
            team_id: team_two.id,
            role: TeamRole::Owner,
        },
    }
}
