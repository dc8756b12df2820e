//! Relative-path type tailored to `dvx`.
//!
//! Every path named inside an artifact record (`outs[i].path`, a dep key, a
//! manifest `relpath`) is relative to the repository root and must serialize
//! identically regardless of host platform. [`RelPath`] is a thin newtype
//! over a forward-slash-normalized `String` enforcing exactly that; it is
//! intentionally far lighter than a full typestate path hierarchy since this
//! crate only ever needs "relative, repo-rooted" paths plus the ordinary
//! `PathBuf` for absolute filesystem locations.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use color_eyre::{
    Report, Result,
    eyre::{Context, bail},
};
use serde::{Deserialize, Serialize};

/// A path relative to the repository root, stored with forward slashes so
/// that record files are byte-identical across platforms.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelPath(String);

impl RelPath {
    /// Validate and construct a relative path from a platform path.
    ///
    /// Rejects absolute paths and paths that climb above the root via `..`,
    /// since those can't be resolved unambiguously relative to a repository.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.is_absolute() {
            bail!("path must be relative: {path:?}");
        }

        let mut parts = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => {
                    let part = part.to_str().ok_or_else(|| {
                        color_eyre::eyre::eyre!("path is not valid UTF-8: {path:?}")
                    })?;
                    parts.push(part.to_owned());
                }
                Component::CurDir => {}
                Component::ParentDir => bail!("path escapes the repository root: {path:?}"),
                Component::RootDir | Component::Prefix(_) => {
                    bail!("path must be relative: {path:?}")
                }
            }
        }

        if parts.is_empty() {
            bail!("path must not be empty: {path:?}");
        }

        Ok(Self(parts.join("/")))
    }

    /// Join a path segment onto this one, producing a new relative path.
    pub fn join(&self, segment: &str) -> Result<Self> {
        Self::new(format!("{}/{segment}", self.0))
    }

    /// View this path as a platform [`PathBuf`] (for filesystem operations).
    pub fn as_std_path(&self) -> PathBuf {
        PathBuf::from(&self.0)
    }

    /// View the normalized forward-slash string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolve this path against an absolute repository root.
    pub fn resolve(&self, root: &Path) -> PathBuf {
        root.join(self.as_std_path())
    }

    /// Return the path, if any, remaining after stripping `prefix`.
    ///
    /// Used to resolve a path that falls under a tracked directory: if
    /// `self` is `data/raw/a.csv` and `prefix` is `data/raw`, the remainder
    /// is `a.csv`.
    pub fn strip_prefix(&self, prefix: &RelPath) -> Option<RelPath> {
        let rest = self.0.strip_prefix(prefix.0.as_str())?;
        let rest = rest.strip_prefix('/')?;
        if rest.is_empty() {
            return None;
        }
        Some(RelPath(rest.to_owned()))
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RelPath({:?})", self.0)
    }
}

impl TryFrom<&str> for RelPath {
    type Error = Report;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<String> for RelPath {
    type Error = Report;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<PathBuf> for RelPath {
    type Error = Report;

    fn try_from(value: PathBuf) -> Result<Self> {
        Self::new(value)
    }
}

impl AsRef<str> for RelPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Find the repository root by walking up from `start` looking for a `.git`
/// directory, falling back to `start` itself if none is found.
pub fn find_repo_root(start: &Path) -> Result<PathBuf> {
    let start = start
        .canonicalize()
        .with_context(|| format!("canonicalize {start:?}"))?;
    let mut current = start.as_path();
    loop {
        if current.join(".git").exists() {
            return Ok(current.to_path_buf());
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => return Ok(start),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq as pretty_assert_eq;

    #[test]
    fn normalizes_separators() {
        let path = RelPath::new("data/raw/a.csv").unwrap();
        pretty_assert_eq!(path.as_str(), "data/raw/a.csv");
    }

    #[test]
    fn rejects_absolute() {
        assert!(RelPath::new("/etc/passwd").is_err());
    }

    #[test]
    fn rejects_parent_escape() {
        assert!(RelPath::new("../outside").is_err());
    }

    #[test]
    fn strips_prefix() {
        let dir = RelPath::new("data/raw").unwrap();
        let file = RelPath::new("data/raw/a.csv").unwrap();
        let rest = file.strip_prefix(&dir).unwrap();
        pretty_assert_eq!(rest.as_str(), "a.csv");

        let other = RelPath::new("data/other/a.csv").unwrap();
        assert!(other.strip_prefix(&dir).is_none());
    }
}
