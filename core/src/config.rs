use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use aidesk_protocol::CapabilitySet;
use serde::Deserialize;

const CONFIG_TOML_FILE: &str = "config.toml";
const SECRET_FILE: &str = "secret.key";

/// Application configuration loaded from `config.toml` under the state home
/// and merged with strongly-typed overrides from the CLI.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Provider used when a chat request does not name one.
    pub provider_default: String,

    /// Model used when a chat request does not name one.
    pub model_default: String,

    /// Workspace root for teams that have no `workspace_path` of their own.
    pub workspace_default: PathBuf,

    /// Directory roots a project path must live under to be accepted.
    pub projects_root_allowlist: Vec<PathBuf>,

    /// Server-wide capability ceiling. These are upper bounds; the request
    /// preset and the membership role can only narrow them.
    pub enable_shell: bool,
    pub enable_write: bool,
    pub enable_browser: bool,
    pub allow_dangerous: bool,

    /// Idle lifetime of an in-memory session before the TTL sweep drops it.
    pub session_ttl: Duration,

    /// In-memory session count bound; LRU eviction by `updated_at` beyond it.
    pub max_sessions: usize,

    /// Most-recent messages kept per session in memory and in the prompt.
    pub max_session_messages: usize,

    /// Character budget for the assembled prompt.
    pub max_context_chars: usize,

    /// Directory that owns generated and uploaded artifact files.
    pub outputs_dir: PathBuf,

    /// Age after which orphaned artifact files are collected.
    pub outputs_ttl: Duration,

    /// Stringified tool results longer than this are truncated with a marker.
    pub max_tool_output_chars: usize,

    /// `fs_read` / `attachment_read` content cap.
    pub max_file_read_chars: usize,

    /// Maximum assistant/tool rounds per turn.
    pub max_steps: usize,

    /// Overall budget for a single provider call.
    pub provider_budget: Duration,

    /// Lifetime of a signed artifact download token.
    pub download_token_ttl: Duration,

    /// Base URL used when rendering absolute download URLs.
    pub public_base_url: Option<String>,

    /// Listen address for the HTTP server.
    pub bind_addr: String,

    /// Directory containing all aidesk state (defaults to `~/.aidesk` but can
    /// be overridden by the `AIDESK_HOME` environment variable).
    pub state_home: PathBuf,

    /// SQLite database file.
    pub db_path: PathBuf,
}

impl Config {
    pub fn load(overrides: ConfigOverrides) -> io::Result<Self> {
        let state_home = find_state_home()?;
        let cfg = load_config_as_toml(&state_home)?;
        Ok(Self::from_parts(cfg, overrides, state_home))
    }

    pub fn from_parts(cfg: ConfigToml, overrides: ConfigOverrides, state_home: PathBuf) -> Self {
        let ConfigOverrides {
            provider,
            model,
            bind_addr,
        } = overrides;

        let workspace_default = cfg
            .workspace_default
            .unwrap_or_else(|| state_home.join("workspace"));
        let outputs_dir = cfg.outputs_dir.unwrap_or_else(|| state_home.join("outputs"));
        let db_path = cfg.db_path.unwrap_or_else(|| state_home.join("aidesk.sqlite3"));

        Self {
            provider_default: provider
                .or(cfg.provider_default)
                .unwrap_or_else(|| "native".to_string()),
            model_default: model
                .or(cfg.model_default)
                .unwrap_or_else(|| "gpt-4.1-mini".to_string()),
            workspace_default,
            projects_root_allowlist: cfg.projects_root_allowlist.unwrap_or_default(),
            enable_shell: cfg.enable_shell.unwrap_or(false),
            enable_write: cfg.enable_write.unwrap_or(true),
            enable_browser: cfg.enable_browser.unwrap_or(false),
            allow_dangerous: cfg.allow_dangerous.unwrap_or(false),
            session_ttl: Duration::from_secs(cfg.session_ttl.unwrap_or(3_600)),
            max_sessions: cfg.max_sessions.unwrap_or(256),
            max_session_messages: cfg.max_session_messages.unwrap_or(120),
            max_context_chars: cfg.max_context_chars.unwrap_or(120_000),
            outputs_dir,
            outputs_ttl: Duration::from_secs(cfg.outputs_ttl.unwrap_or(7 * 24 * 3_600)),
            max_tool_output_chars: cfg.max_tool_output_chars.unwrap_or(16_000),
            max_file_read_chars: cfg.max_file_read_chars.unwrap_or(64_000),
            max_steps: cfg.max_steps.unwrap_or(12),
            provider_budget: Duration::from_secs(cfg.provider_budget_secs.unwrap_or(120)),
            download_token_ttl: Duration::from_secs(cfg.download_token_ttl_secs.unwrap_or(600)),
            public_base_url: cfg.public_base_url,
            bind_addr: bind_addr
                .or(cfg.bind_addr)
                .unwrap_or_else(|| "127.0.0.1:8787".to_string()),
            state_home,
            db_path,
        }
    }

    /// The server-wide capability ceiling as a set.
    pub fn ceiling(&self) -> CapabilitySet {
        CapabilitySet {
            shell: self.enable_shell,
            write: self.enable_write,
            browser: self.enable_browser,
            dangerous: self.allow_dangerous,
        }
    }

    /// Configuration rooted at a throwaway directory, with everything the
    /// ceiling allows. Used by the test suites.
    pub fn for_tests(root: &Path) -> Self {
        Self {
            provider_default: "mock".to_string(),
            model_default: "test-model".to_string(),
            workspace_default: root.join("workspace"),
            projects_root_allowlist: vec![root.to_path_buf()],
            enable_shell: true,
            enable_write: true,
            enable_browser: true,
            allow_dangerous: false,
            session_ttl: Duration::from_secs(3_600),
            max_sessions: 16,
            max_session_messages: 120,
            max_context_chars: 120_000,
            outputs_dir: root.join("outputs"),
            outputs_ttl: Duration::from_secs(3_600),
            max_tool_output_chars: 16_000,
            max_file_read_chars: 64_000,
            max_steps: 8,
            provider_budget: Duration::from_secs(30),
            download_token_ttl: Duration::from_secs(600),
            public_base_url: None,
            bind_addr: "127.0.0.1:0".to_string(),
            state_home: root.to_path_buf(),
            db_path: root.join("aidesk.sqlite3"),
        }
    }
}

/// Strongly-typed overrides applied on top of `config.toml`.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub bind_addr: Option<String>,
}

/// Serde mirror of `config.toml`. Every field is optional so a missing file
/// yields the built-in defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigToml {
    pub provider_default: Option<String>,
    pub model_default: Option<String>,
    pub workspace_default: Option<PathBuf>,
    pub projects_root_allowlist: Option<Vec<PathBuf>>,
    pub enable_shell: Option<bool>,
    pub enable_write: Option<bool>,
    pub enable_browser: Option<bool>,
    pub allow_dangerous: Option<bool>,
    /// Seconds.
    pub session_ttl: Option<u64>,
    pub max_sessions: Option<usize>,
    pub max_session_messages: Option<usize>,
    pub max_context_chars: Option<usize>,
    pub outputs_dir: Option<PathBuf>,
    /// Seconds.
    pub outputs_ttl: Option<u64>,
    pub max_tool_output_chars: Option<usize>,
    pub max_file_read_chars: Option<usize>,
    pub max_steps: Option<usize>,
    pub provider_budget_secs: Option<u64>,
    pub download_token_ttl_secs: Option<u64>,
    pub public_base_url: Option<String>,
    pub bind_addr: Option<String>,
    pub db_path: Option<PathBuf>,
}

fn load_config_as_toml(state_home: &Path) -> io::Result<ConfigToml> {
    let path = state_home.join(CONFIG_TOML_FILE);
    match std::fs::read_to_string(&path) {
        Ok(contents) => toml::from_str(&contents).map_err(|e| {
            tracing::error!("failed to parse {}: {e}", path.display());
            io::Error::new(io::ErrorKind::InvalidData, e)
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::info!("{} not found, using defaults", path.display());
            Ok(ConfigToml::default())
        }
        Err(e) => Err(e),
    }
}

/// Returns the aidesk state directory, creating it if necessary. `AIDESK_HOME`
/// wins over `~/.aidesk`.
pub fn find_state_home() -> io::Result<PathBuf> {
    let home = match std::env::var("AIDESK_HOME") {
        Ok(value) if !value.is_empty() => PathBuf::from(value),
        _ => dirs::home_dir()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "could not find home directory"))?
            .join(".aidesk"),
    };
    std::fs::create_dir_all(&home)?;
    Ok(home)
}

/// Loads the HMAC key used for download tokens, generating it on first run.
pub fn load_or_create_secret(state_home: &Path) -> io::Result<Vec<u8>> {
    use rand::RngCore;

    let path = state_home.join(SECRET_FILE);
    match std::fs::read(&path) {
        Ok(bytes) if !bytes.is_empty() => Ok(bytes),
        Ok(_) | Err(_) => {
            let mut secret = vec![0u8; 32];
            rand::rng().fill_bytes(&mut secret);
            std::fs::create_dir_all(state_home)?;
            std::fs::write(&path, &secret)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let mut perms = std::fs::metadata(&path)?.permissions();
                perms.set_mode(0o600);
                std::fs::set_permissions(&path, perms)?;
            }
            Ok(secret)
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn defaults_fill_in_missing_fields() {
        let cfg = Config::from_parts(
            ConfigToml::default(),
            ConfigOverrides::default(),
            PathBuf::from("/tmp/aidesk-test"),
        );
        assert_eq!(cfg.provider_default, "native");
        assert_eq!(cfg.max_session_messages, 120);
        assert_eq!(cfg.outputs_dir, PathBuf::from("/tmp/aidesk-test/outputs"));
        assert!(!cfg.enable_shell);
        assert!(cfg.enable_write);
    }

    #[test]
    fn overrides_beat_toml_values() {
        let toml = ConfigToml {
            provider_default: Some("opencode".to_string()),
            bind_addr: Some("0.0.0.0:9000".to_string()),
            ..Default::default()
        };
        let cfg = Config::from_parts(
            toml,
            ConfigOverrides {
                provider: Some("codex".to_string()),
                model: None,
                bind_addr: None,
            },
            PathBuf::from("/tmp/aidesk-test"),
        );
        assert_eq!(cfg.provider_default, "codex");
        assert_eq!(cfg.bind_addr, "0.0.0.0:9000");
    }

    #[test]
    fn secret_is_created_once_and_stable() {
        let dir = tempfile::tempdir().unwrap();
        let a = load_or_create_secret(dir.path()).unwrap();
        let b = load_or_create_secret(dir.path()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }
}
