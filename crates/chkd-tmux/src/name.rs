//! Workspace path -> durable session name.
//!
//! Names are deterministic (no randomness, stable across restarts), only
//! contain `[A-Za-z0-9_]`, carry the `chkd_` namespace prefix and keep at
//! most [`MAX_NAME_CHARS`] characters after it.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Tag that scopes our sessions apart from anything else running in tmux.
pub const NAMESPACE_PREFIX: &str = "chkd_";

/// Longest body (after the prefix) a name may have.
pub const MAX_NAME_CHARS: usize = 50;

/// Hex characters of the path hash appended to truncated names.
const HASH_CHARS: usize = 8;

/// Identity of a durable session inside the multiplexer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DurableName(String);

impl DurableName {
    /// Accept an existing name, provided it belongs to our namespace.
    pub fn parse(name: &str) -> Option<Self> {
        Self::is_namespaced(name).then(|| Self(name.to_string()))
    }

    /// Whether `name` carries the namespace prefix and a non-empty body.
    pub fn is_namespaced(name: &str) -> bool {
        name.len() > NAMESPACE_PREFIX.len() && name.starts_with(NAMESPACE_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DurableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DurableName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derives [`DurableName`]s from workspace paths.
#[derive(Debug, Clone)]
pub struct NameResolver {
    home: Option<PathBuf>,
    collision_suffix: bool,
}

impl NameResolver {
    /// Resolver that shortens paths under `home`. Collision suffixes are on.
    pub fn new(home: Option<PathBuf>) -> Self {
        Self {
            home,
            collision_suffix: true,
        }
    }

    /// Resolver using the current user's home directory.
    pub fn for_current_user() -> Self {
        Self::new(dirs::home_dir())
    }

    /// When enabled, names that had to be truncated end in a short hash of
    /// the full path so long paths sharing a prefix stay distinct.
    pub fn with_collision_suffix(mut self, enabled: bool) -> Self {
        self.collision_suffix = enabled;
        self
    }

    pub fn resolve(&self, workspace: &Path) -> DurableName {
        let (relative, under_home) = match &self.home {
            Some(home) => match workspace.strip_prefix(home) {
                Ok(rest) => (rest, true),
                Err(_) => (workspace, false),
            },
            None => (workspace, false),
        };

        let mut body = sanitize(&relative.to_string_lossy());
        if body.is_empty() {
            body = if under_home { "home" } else { "root" }.to_string();
        }

        if body.len() > MAX_NAME_CHARS {
            body = if self.collision_suffix {
                let keep = MAX_NAME_CHARS - HASH_CHARS - 1;
                format!("{}_{}", &body[..keep], path_hash(workspace))
            } else {
                body[..MAX_NAME_CHARS].to_string()
            };
        }

        DurableName(format!("{NAMESPACE_PREFIX}{body}"))
    }
}

impl Default for NameResolver {
    fn default() -> Self {
        Self::for_current_user()
    }
}

/// Resolve `workspace` with the current user's home directory stripped.
pub fn resolve_session_name(workspace: &Path) -> DurableName {
    NameResolver::for_current_user().resolve(workspace)
}

/// Replace everything outside `[A-Za-z0-9]` with `_` and trim edge underscores.
///
/// The result is pure ASCII, so byte slicing it is char slicing.
fn sanitize(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    replaced.trim_matches('_').to_string()
}

fn path_hash(workspace: &Path) -> String {
    let digest = Sha256::digest(workspace.to_string_lossy().as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(HASH_CHARS);
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> NameResolver {
        NameResolver::new(Some(PathBuf::from("/home/alice")))
    }

    fn assert_well_formed(name: &DurableName) {
        let body = name
            .as_str()
            .strip_prefix(NAMESPACE_PREFIX)
            .expect("missing namespace prefix");
        assert!(!body.is_empty());
        assert!(body.len() <= MAX_NAME_CHARS, "too long: {name}");
        assert!(
            body.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'),
            "unsafe characters in {name}"
        );
    }

    #[test]
    fn test_home_prefix_is_stripped() {
        let name = alice().resolve(Path::new("/home/alice/projects/widget"));
        assert_eq!(name.as_str(), "chkd_projects_widget");
    }

    #[test]
    fn test_paths_outside_home_keep_full_path() {
        let name = alice().resolve(Path::new("/srv/work/api"));
        assert_eq!(name.as_str(), "chkd_srv_work_api");

        // Component-wise prefix: /home/alicebob is not under /home/alice.
        let name = alice().resolve(Path::new("/home/alicebob/x"));
        assert_eq!(name.as_str(), "chkd_home_alicebob_x");
    }

    #[test]
    fn test_no_home_directory() {
        let resolver = NameResolver::new(None);
        let name = resolver.resolve(Path::new("/home/alice/projects/widget"));
        assert_eq!(name.as_str(), "chkd_home_alice_projects_widget");
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let path = Path::new("/home/alice/some dir/with.dots-and-dashes");
        let first = alice().resolve(path);
        for _ in 0..10 {
            assert_eq!(alice().resolve(path), first);
        }
        assert_eq!(first.as_str(), "chkd_some_dir_with_dots_and_dashes");
    }

    #[test]
    fn test_unsafe_characters_are_replaced() {
        for path in [
            "/tmp/naïve café/項目",
            "/tmp/a:b.c;d e",
            "/tmp/$(rm -rf)/`x`",
            "relative/path",
            "/",
        ] {
            let name = alice().resolve(Path::new(path));
            assert_well_formed(&name);
        }
    }

    #[test]
    fn test_home_itself_and_root() {
        assert_eq!(alice().resolve(Path::new("/home/alice")).as_str(), "chkd_home");
        assert_eq!(alice().resolve(Path::new("/")).as_str(), "chkd_root");
    }

    #[test]
    fn test_trailing_slash_does_not_change_name() {
        assert_eq!(
            alice().resolve(Path::new("/home/alice/projects/widget/")),
            alice().resolve(Path::new("/home/alice/projects/widget"))
        );
    }

    #[test]
    fn test_long_paths_are_truncated_with_hash() {
        let base = "/home/alice/".to_string() + &"verylongdirectoryname/".repeat(4);
        let a = alice().resolve(Path::new(&(base.clone() + "service-a")));
        let b = alice().resolve(Path::new(&(base + "service-b")));

        assert_well_formed(&a);
        assert_well_formed(&b);
        assert_eq!(a.as_str().len(), NAMESPACE_PREFIX.len() + MAX_NAME_CHARS);
        assert_ne!(a, b, "hash suffix should separate diverging long paths");
    }

    #[test]
    fn test_long_paths_collide_without_hash() {
        let resolver = alice().with_collision_suffix(false);
        let base = "/home/alice/".to_string() + &"verylongdirectoryname/".repeat(4);
        let a = resolver.resolve(Path::new(&(base.clone() + "service-a")));
        let b = resolver.resolve(Path::new(&(base + "service-b")));

        assert_well_formed(&a);
        assert_eq!(a, b);
    }

    #[test]
    fn test_short_names_never_get_hash() {
        let name = alice().resolve(Path::new("/home/alice/x"));
        assert_eq!(name.as_str(), "chkd_x");
    }

    #[test]
    fn test_namespace_check() {
        assert!(DurableName::is_namespaced("chkd_projects_widget"));
        assert!(!DurableName::is_namespaced("chkd_"));
        assert!(!DurableName::is_namespaced("main"));
        assert!(!DurableName::is_namespaced("xchkd_main"));

        assert!(DurableName::parse("chkd_x").is_some());
        assert!(DurableName::parse("work").is_none());
    }
}
