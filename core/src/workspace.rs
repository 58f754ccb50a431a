//! Workspace sandbox: translates user- and tool-supplied relative paths into
//! absolute paths rooted at the per-request workspace directory, refusing
//! anything that escapes the root or touches sensitive names.

use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use crate::config::Config;
use crate::error::CoreErr;
use crate::error::Result;
use crate::store::Project;
use crate::store::Team;

/// Env files allowed through the sensitive-name filter.
const ENV_SAMPLE_NAMES: &[&str] = &[".env.example", ".env.sample", ".env.template"];

/// Directory segments that are never exposed to tools, wherever they appear.
const RESERVED_SEGMENTS: &[&str] = &[".aistaff", ".jetlinks-ai"];

/// Resolve `rel` against `root`, normalizing `.`/`..` lexically. Fails with
/// `PathEscape` when the result is not `root` or a descendant and with
/// `SensitivePath` when any segment matches a protected name.
pub fn resolve(root: &Path, rel: &str) -> Result<PathBuf> {
    let candidate = Path::new(rel);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };

    let abs = normalize_lexically(&joined);
    let root = normalize_lexically(root);
    if !abs.starts_with(&root) {
        return Err(CoreErr::PathEscape(rel.to_string()));
    }

    for component in abs.strip_prefix(&root).unwrap_or(&abs).components() {
        if let Component::Normal(name) = component {
            let name = name.to_string_lossy();
            if is_sensitive_name(&name) {
                return Err(CoreErr::SensitivePath(rel.to_string()));
            }
        }
    }

    Ok(abs)
}

/// Like [`resolve`] but additionally follows symlinks on the existing portion
/// of the path and re-checks containment, so a link pointing outside the root
/// cannot be read through.
pub fn resolve_existing(root: &Path, rel: &str) -> Result<PathBuf> {
    let abs = resolve(root, rel)?;
    if !abs.exists() {
        return Err(CoreErr::NotFound(rel.to_string()));
    }
    let canonical = abs.canonicalize()?;
    let canonical_root = root.canonicalize().unwrap_or_else(|_| normalize_lexically(root));
    if !canonical.starts_with(&canonical_root) {
        return Err(CoreErr::PathEscape(rel.to_string()));
    }
    Ok(canonical)
}

/// Express `abs` relative to `root` for display in events and tool results.
pub fn relative_to_root(root: &Path, abs: &Path) -> String {
    abs.strip_prefix(&normalize_lexically(root))
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| abs.to_string_lossy().into_owned())
}

/// Root precedence: explicit project path (enabled and in-team, validated by
/// the caller) wins, then the team's configured workspace, then the server
/// default.
pub fn select_root(config: &Config, team: &Team, project: Option<&Project>) -> PathBuf {
    if let Some(project) = project {
        return PathBuf::from(&project.path);
    }
    match &team.workspace_path {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => config.workspace_default.clone(),
    }
}

/// A project path must lie under one of the configured allow-list roots.
pub fn project_path_allowed(allowlist: &[PathBuf], path: &Path) -> bool {
    let path = normalize_lexically(path);
    allowlist.iter().any(|root| path.starts_with(normalize_lexically(root)))
}

/// Collapses `.` and `..` purely lexically, so the containment check also
/// covers paths that do not exist yet. Built as a segment stack: a `..` only
/// cancels a preceding normal segment; against the filesystem root, a drive
/// prefix, or an empty stack it is swallowed, which is what keeps chains of
/// parent hops from climbing anywhere.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut kept: Vec<Component<'_>> = Vec::new();
    for segment in path.components() {
        match segment {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(kept.last(), Some(Component::Normal(_))) {
                    kept.pop();
                }
            }
            Component::RootDir | Component::Prefix(_) | Component::Normal(_) => {
                kept.push(segment);
            }
        }
    }
    kept.into_iter().collect()
}

fn is_sensitive_name(name: &str) -> bool {
    if RESERVED_SEGMENTS.contains(&name) {
        return true;
    }
    if name == ".env" {
        return true;
    }
    if name.starts_with(".env.") {
        return !ENV_SAMPLE_NAMES.contains(&name);
    }
    false
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use pretty_assertions::assert_eq;

    use super::*;

    fn root() -> PathBuf {
        PathBuf::from("/w")
    }

    #[test]
    fn resolves_simple_relative_paths() {
        let abs = resolve(&root(), "src/main.rs").unwrap();
        assert_eq!(abs, PathBuf::from("/w/src/main.rs"));
    }

    #[test]
    fn dot_dot_escape_is_rejected() {
        let err = resolve(&root(), "../etc/passwd").unwrap_err();
        assert!(matches!(err, CoreErr::PathEscape(_)));

        let err = resolve(&root(), "a/../../etc/passwd").unwrap_err();
        assert!(matches!(err, CoreErr::PathEscape(_)));
    }

    #[test]
    fn absolute_path_inside_root_is_allowed() {
        let abs = resolve(&root(), "/w/notes.txt").unwrap();
        assert_eq!(abs, PathBuf::from("/w/notes.txt"));

        let err = resolve(&root(), "/etc/passwd").unwrap_err();
        assert!(matches!(err, CoreErr::PathEscape(_)));
    }

    #[test]
    fn env_files_are_sensitive_except_samples() {
        assert!(matches!(
            resolve(&root(), ".env").unwrap_err(),
            CoreErr::SensitivePath(_)
        ));
        assert!(matches!(
            resolve(&root(), "config/.env.production").unwrap_err(),
            CoreErr::SensitivePath(_)
        ));
        assert!(resolve(&root(), ".env.example").is_ok());
        assert!(resolve(&root(), ".env.sample").is_ok());
        assert!(resolve(&root(), ".env.template").is_ok());
        // A file merely containing "env" is fine.
        assert!(resolve(&root(), "environment.rs").is_ok());
    }

    #[test]
    fn reserved_segments_are_sensitive_anywhere() {
        assert!(matches!(
            resolve(&root(), ".aistaff/config.json").unwrap_err(),
            CoreErr::SensitivePath(_)
        ));
        assert!(matches!(
            resolve(&root(), "nested/.jetlinks-ai/cache").unwrap_err(),
            CoreErr::SensitivePath(_)
        ));
    }

    #[test]
    fn resolve_roundtrip_under_root() {
        let abs = resolve(&root(), "a/b/c.txt").unwrap();
        let rel = relative_to_root(&root(), &abs);
        assert_eq!(resolve(&root(), &rel).unwrap(), abs);
    }

    #[test]
    fn dot_segments_collapse_without_leaving_root() {
        let abs = resolve(&root(), "a/./b/../c.txt").unwrap();
        assert_eq!(abs, PathBuf::from("/w/a/c.txt"));
        // Parent hops stop at the root instead of stacking up.
        assert_eq!(normalize_lexically(Path::new("/../../x")), PathBuf::from("/x"));
    }

    #[test]
    fn symlink_outside_root_fails_on_read_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let inside = dir.path().join("ws");
        std::fs::create_dir_all(&inside).unwrap();
        let outside = dir.path().join("outside.txt");
        std::fs::write(&outside, "secret").unwrap();
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(&outside, inside.join("link.txt")).unwrap();
            let err = resolve_existing(&inside, "link.txt").unwrap_err();
            assert!(matches!(err, CoreErr::PathEscape(_)));
        }
    }

    #[test]
    fn project_allowlist_check() {
        let allow = vec![PathBuf::from("/srv/projects")];
        assert!(project_path_allowed(&allow, Path::new("/srv/projects/alpha")));
        assert!(!project_path_allowed(&allow, Path::new("/srv/other/alpha")));
    }
}
