//! core::types
//!
//! Strong types for core domain concepts.
//!
//! # Types
//!
//! - [`BranchName`] - Validated Git branch name
//! - [`Oid`] - Git object identifier (SHA)
//! - [`RepoUrl`] - Normalized repository location (remote URL or local path)
//! - [`Subpath`] - Safe relative path inside a destination repository
//!
//! # Validation
//!
//! These types enforce validity at construction time. A resolved
//! configuration can therefore never carry an empty branch or a subpath
//! that escapes its repository.
//!
//! # Examples
//!
//! ```
//! use igrelease::core::types::{BranchName, RepoUrl, Subpath};
//!
//! let branch = BranchName::new("release/my-ig").unwrap();
//! let url = RepoUrl::parse("HL7/fhir-ig-history-template").unwrap();
//! assert_eq!(url.as_str(), "https://github.com/HL7/fhir-ig-history-template.git");
//!
//! assert!(BranchName::new("invalid..name").is_err());
//! assert!(Subpath::new("../escape").is_err());
//! ```

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid branch name: {0}")]
    InvalidBranchName(String),

    #[error("invalid object id: {0}")]
    InvalidOid(String),

    #[error("invalid repository url '{url}': {reason}")]
    InvalidRepoUrl { url: String, reason: String },

    #[error("invalid subpath '{path}': {reason}")]
    InvalidSubpath { path: String, reason: String },
}

/// A validated Git branch name.
///
/// Branch names must conform to Git's refname rules (see `git check-ref-format`):
/// - Cannot be empty or exactly `@`
/// - Cannot start with `.` or `-`
/// - Cannot end with `.lock` or `/`
/// - Cannot contain `..`, `@{`, `//`, ASCII control characters, spaces,
///   `~`, `^`, `:`, `\`, `?`, `*`, `[`
///
/// # Example
///
/// ```
/// use igrelease::core::types::BranchName;
///
/// let name = BranchName::new("gh-pages").unwrap();
/// assert_eq!(name.as_str(), "gh-pages");
///
/// assert!(BranchName::new("").is_err());
/// assert!(BranchName::new("has space").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchName(String);

impl BranchName {
    /// Create a new validated branch name.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidBranchName` if the name violates Git's refname rules.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    fn validate(name: &str) -> Result<(), TypeError> {
        let reject = |why: &str| Err(TypeError::InvalidBranchName(why.to_string()));

        if name.is_empty() {
            return reject("branch name cannot be empty");
        }
        if name == "@" {
            return reject("branch name cannot be '@' (reserved)");
        }
        if name.starts_with('.') || name.starts_with('-') {
            return reject("branch name cannot start with '.' or '-'");
        }
        if name.ends_with(".lock") || name.ends_with('/') {
            return reject("branch name cannot end with '.lock' or '/'");
        }
        for bad in ["..", "@{", "//"] {
            if name.contains(bad) {
                return Err(TypeError::InvalidBranchName(format!(
                    "branch name cannot contain '{bad}'"
                )));
            }
        }
        if let Some(c) = name
            .chars()
            .find(|c| c.is_ascii_control() || " ~^:\\?*[".contains(*c))
        {
            return Err(TypeError::InvalidBranchName(format!(
                "branch name cannot contain {c:?}"
            )));
        }
        if name
            .split('/')
            .any(|part| part.starts_with('.') || part.ends_with(".lock"))
        {
            return reject("path component cannot start with '.' or end with '.lock'");
        }
        Ok(())
    }

    /// Get the branch name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BranchName {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<BranchName> for String {
    fn from(name: BranchName) -> Self {
        name.0
    }
}

impl AsRef<str> for BranchName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BranchName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A Git object identifier (SHA-1 or SHA-256), normalized to lowercase.
///
/// # Example
///
/// ```
/// use igrelease::core::types::Oid;
///
/// let oid = Oid::new("ABC123DEF4567890ABC123DEF4567890ABC12345").unwrap();
/// assert_eq!(oid.short(7), "abc123d");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Oid(String);

impl Oid {
    /// Create a new validated object id.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidOid` if the string is not a 40 or 64
    /// character hex string.
    pub fn new(oid: impl Into<String>) -> Result<Self, TypeError> {
        let oid = oid.into().trim().to_ascii_lowercase();
        if oid.len() != 40 && oid.len() != 64 {
            return Err(TypeError::InvalidOid(format!(
                "expected 40 or 64 hex characters, got {}",
                oid.len()
            )));
        }
        if !oid.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TypeError::InvalidOid(
                "object id must be hexadecimal".into(),
            ));
        }
        Ok(Self(oid))
    }

    /// Abbreviated form (first `len` characters).
    pub fn short(&self, len: usize) -> &str {
        &self.0[..len.min(self.0.len())]
    }

    /// Get the object id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Oid {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Oid> for String {
    fn from(oid: Oid) -> Self {
        oid.0
    }
}

impl std::fmt::Display for Oid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A repository location accepted by `git clone`.
///
/// Accepted forms:
/// - `owner/name` GitHub shorthand (expanded to `https://github.com/owner/name.git`)
/// - `http://`, `https://`, `ssh://`, `git://`, `file://` URLs
/// - scp-style `user@host:path`
/// - absolute local paths (used for mirrors and tests)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoUrl(String);

impl RepoUrl {
    /// Parse and normalize a repository location.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidRepoUrl` for empty strings, unsupported
    /// schemes, URLs without a host, or anything that is neither a URL nor
    /// a shorthand nor an absolute path.
    pub fn parse(raw: &str) -> Result<Self, TypeError> {
        let raw = raw.trim();
        let invalid = |reason: &str| TypeError::InvalidRepoUrl {
            url: raw.to_string(),
            reason: reason.to_string(),
        };

        if raw.is_empty() {
            return Err(invalid("repository url cannot be empty"));
        }
        if raw.chars().any(|c| c.is_whitespace() || c.is_ascii_control()) {
            return Err(invalid("repository url cannot contain whitespace"));
        }

        if raw.contains("://") {
            let parsed = url::Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
            return match parsed.scheme() {
                "file" => Ok(Self(raw.to_string())),
                "http" | "https" | "ssh" | "git" => {
                    if parsed.host_str().map_or(true, str::is_empty) {
                        Err(invalid("url has no host"))
                    } else if parsed.path().trim_matches('/').is_empty() {
                        Err(invalid("url has no repository path"))
                    } else {
                        Ok(Self(raw.to_string()))
                    }
                }
                other => Err(invalid(&format!("unsupported scheme '{other}'"))),
            };
        }

        if Path::new(raw).is_absolute() {
            return Ok(Self(raw.to_string()));
        }

        // scp-like syntax: git@github.com:owner/repo.git
        if let Some((host, path)) = raw.split_once(':') {
            if !host.is_empty() && !path.is_empty() && !host.contains('/') {
                return Ok(Self(raw.to_string()));
            }
            return Err(invalid("malformed scp-style location"));
        }

        let parts: Vec<&str> = raw.split('/').collect();
        if parts.len() == 2 && parts.iter().all(|p| is_github_name(p)) {
            let name = parts[1].strip_suffix(".git").unwrap_or(parts[1]);
            return Ok(Self(format!("https://github.com/{}/{}.git", parts[0], name)));
        }

        Err(invalid(
            "expected a URL, 'owner/name' shorthand, or an absolute path",
        ))
    }

    /// Get the location as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this location refers to the local filesystem.
    pub fn is_local(&self) -> bool {
        self.0.starts_with("file://") || Path::new(&self.0).is_absolute()
    }

    /// Compare two locations ignoring a trailing `.git` and `/`.
    pub fn same_repository(&self, other: &str) -> bool {
        fn norm(s: &str) -> &str {
            let s = s.trim().trim_end_matches('/');
            s.strip_suffix(".git").unwrap_or(s)
        }
        norm(&self.0) == norm(other)
    }
}

fn is_github_name(part: &str) -> bool {
    !part.is_empty()
        && !part.starts_with('.')
        && part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_.".contains(c))
}

impl TryFrom<String> for RepoUrl {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<RepoUrl> for String {
    fn from(url: RepoUrl) -> Self {
        url.0
    }
}

impl std::fmt::Display for RepoUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A relative path inside a destination repository.
///
/// Subpaths are where published trees land (`ig_folder`,
/// `sitepreview_dir`). They can never be absolute, empty, climb out of
/// the repository, or point into `.git`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Subpath(String);

impl Subpath {
    /// Create a validated subpath. Surrounding slashes are trimmed.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidSubpath` when the path is unsafe.
    pub fn new(raw: impl Into<String>) -> Result<Self, TypeError> {
        let raw = raw.into();
        let invalid = |reason: &str| TypeError::InvalidSubpath {
            path: raw.clone(),
            reason: reason.to_string(),
        };

        if Path::new(&raw).is_absolute() {
            return Err(invalid("must be relative"));
        }
        let trimmed = raw.trim().trim_matches('/');
        if trimmed.is_empty() || trimmed == "." {
            return Err(invalid("cannot be empty"));
        }
        for component in Path::new(trimmed).components() {
            match component {
                Component::Normal(part) if part == ".git" => {
                    return Err(invalid("cannot point into .git"))
                }
                Component::Normal(_) => {}
                _ => return Err(invalid("only plain path components are allowed")),
            }
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Get the subpath as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Join this subpath onto a repository root.
    pub fn under(&self, root: &Path) -> PathBuf {
        root.join(&self.0)
    }
}

impl TryFrom<String> for Subpath {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Subpath> for String {
    fn from(path: Subpath) -> Self {
        path.0
    }
}

impl std::fmt::Display for Subpath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod branch_name {
        use super::*;

        #[test]
        fn valid_branch_names() {
            for name in ["main", "gh-pages", "release/my-ig", "user@feature", "v1.0"] {
                assert!(BranchName::new(name).is_ok(), "{name} should be valid");
            }
        }

        #[test]
        fn invalid_branch_names() {
            for name in [
                "", "@", ".hidden", "-flag", "x.lock", "x/", "a..b", "a@{b", "a//b", "a b",
                "a~b", "a:b", "a\tb", "a/.b",
            ] {
                assert!(BranchName::new(name).is_err(), "{name:?} should be invalid");
            }
        }

        #[test]
        fn serde_roundtrip() {
            let branch = BranchName::new("release/x").unwrap();
            let json = serde_json::to_string(&branch).unwrap();
            assert_eq!(json, "\"release/x\"");
            let parsed: BranchName = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, branch);
            assert!(serde_json::from_str::<BranchName>("\"\"").is_err());
        }
    }

    mod oid {
        use super::*;

        #[test]
        fn normalizes_and_shortens() {
            let oid = Oid::new("ABC123DEF4567890ABC123DEF4567890ABC12345\n").unwrap();
            assert_eq!(oid.as_str(), "abc123def4567890abc123def4567890abc12345");
            assert_eq!(oid.short(7), "abc123d");
            assert_eq!(oid.short(100).len(), 40);
        }

        #[test]
        fn rejects_garbage() {
            assert!(Oid::new("abc").is_err());
            assert!(Oid::new("z".repeat(40)).is_err());
        }
    }

    mod repo_url {
        use super::*;

        #[test]
        fn expands_github_shorthand() {
            let url = RepoUrl::parse("FHIR/ig-registry").unwrap();
            assert_eq!(url.as_str(), "https://github.com/FHIR/ig-registry.git");
        }

        #[test]
        fn accepts_common_forms() {
            for raw in [
                "https://github.com/WorldHealthOrganization/smart-html",
                "ssh://git@github.com/owner/repo.git",
                "git@github.com:owner/repo.git",
                "file:///tmp/remote.git",
                "/srv/git/webroot.git",
            ] {
                assert!(RepoUrl::parse(raw).is_ok(), "{raw} should parse");
            }
        }

        #[test]
        fn rejects_malformed() {
            for raw in [
                "",
                "   ",
                "https://",
                "https://github.com/",
                "ftp://example.com/repo",
                "not a url",
                "relative/path/too/deep",
                ":nohost",
            ] {
                assert!(RepoUrl::parse(raw).is_err(), "{raw:?} should be rejected");
            }
        }

        #[test]
        fn local_detection() {
            assert!(RepoUrl::parse("/srv/git/x.git").unwrap().is_local());
            assert!(RepoUrl::parse("file:///srv/git/x.git").unwrap().is_local());
            assert!(!RepoUrl::parse("owner/x").unwrap().is_local());
        }

        #[test]
        fn same_repository_ignores_git_suffix() {
            let url = RepoUrl::parse("https://github.com/owner/repo.git").unwrap();
            assert!(url.same_repository("https://github.com/owner/repo"));
            assert!(url.same_repository("https://github.com/owner/repo/"));
            assert!(!url.same_repository("https://github.com/owner/other"));
        }
    }

    mod subpath {
        use super::*;

        #[test]
        fn trims_slashes() {
            assert_eq!(Subpath::new("/my-ig/").unwrap_err().to_string().contains("relative"), true);
            assert_eq!(Subpath::new("my-ig/").unwrap().as_str(), "my-ig");
            assert_eq!(Subpath::new("previews/my-ig").unwrap().as_str(), "previews/my-ig");
        }

        #[test]
        fn rejects_unsafe_paths() {
            for raw in ["", ".", "..", "../x", "a/../b", ".git", "a/.git/b"] {
                assert!(Subpath::new(raw).is_err(), "{raw:?} should be rejected");
            }
        }

        #[test]
        fn joins_under_root() {
            let sub = Subpath::new("my-ig").unwrap();
            assert_eq!(sub.under(Path::new("/w")), PathBuf::from("/w/my-ig"));
        }
    }
}
