//! Source-control adapter.
//!
//! The freshness evaluator's fast path needs to know, cheaply, whether any
//! dependency's content changed between two revisions without re-hashing the
//! working tree. [`ScmAdapter`] abstracts that lookup so the evaluator and
//! executor aren't coupled to a specific VCS; the reference implementation,
//! [`GitAdapter`], shells out to the `git` binary rather than linking a VCS
//! library.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use color_eyre::{Result, eyre::Context, eyre::bail};
use tracing::{instrument, trace};

use crate::path::RelPath;

/// Abstraction over the subset of source-control operations the evaluator
/// and diff engine need. Blob-id equality is treated as content equality:
/// callers never read blob content through this trait just to compare it.
pub trait ScmAdapter: Send + Sync {
    /// The repository's current revision (e.g. `HEAD`), if any.
    fn current_revision(
        &self,
    ) -> impl std::future::Future<Output = Result<Option<String>>> + Send;

    /// Resolve the blob id of each of `paths` as recorded at `rev`. Paths
    /// with no entry at `rev` are omitted from the result map.
    fn blob_ids_at(
        &self,
        rev: &str,
        paths: &[RelPath],
    ) -> impl std::future::Future<Output = Result<HashMap<RelPath, String>>> + Send;

    /// Read the raw content of `path` as it existed at `rev`.
    fn read_blob_at(
        &self,
        rev: &str,
        path: &RelPath,
    ) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
}

/// `git`-backed adapter. Shells out to the `git` CLI rather than linking
/// `git2`, so behavior matches whatever `git` the user already has on
/// `PATH`.
#[derive(Clone, Debug)]
pub struct GitAdapter {
    repo_root: PathBuf,
}

impl GitAdapter {
    /// Construct an adapter rooted at `repo_root`, the directory containing
    /// `.git`.
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output> {
        trace!(?args, "run git");
        tokio::process::Command::new("git")
            .current_dir(&self.repo_root)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("spawn git {args:?}"))
    }
}

impl ScmAdapter for GitAdapter {
    async fn current_revision(&self) -> Result<Option<String>> {
        let output = self.run(&["rev-parse", "HEAD"]).await?;
        if !output.status.success() {
            // No commits yet, or not a git repository: fast path is simply
            // unavailable, not an error.
            return Ok(None);
        }
        let rev = String::from_utf8(output.stdout)
            .context("parse git rev-parse output")?
            .trim()
            .to_owned();
        Ok(Some(rev))
    }

    async fn blob_ids_at(&self, rev: &str, paths: &[RelPath]) -> Result<HashMap<RelPath, String>> {
        if paths.is_empty() {
            return Ok(HashMap::new());
        }

        let output = self.run(&["ls-tree", "-r", rev]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git ls-tree {rev} failed: {stderr}");
        }
        let listing = String::from_utf8(output.stdout).context("parse git ls-tree output")?;

        let mut by_path = HashMap::new();
        for line in listing.lines() {
            // Format: "<mode> <type> <object>\t<path>"
            let Some((meta, path)) = line.split_once('\t') else {
                continue;
            };
            let Some(object) = meta.split_whitespace().nth(2) else {
                continue;
            };
            by_path.insert(path.to_owned(), object.to_owned());
        }

        let mut result = HashMap::new();
        for path in paths {
            if let Some(object) = by_path.get(path.as_str()) {
                result.insert(path.clone(), object.clone());
            }
        }
        Ok(result)
    }

    async fn read_blob_at(&self, rev: &str, path: &RelPath) -> Result<Vec<u8>> {
        let spec = format!("{rev}:{}", path.as_str());
        let output = self.run(&["cat-file", "-p", &spec]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git cat-file {spec} failed: {stderr}");
        }
        Ok(output.stdout)
    }
}

/// An in-process fake used by tests so they don't depend on a real `git`
/// binary being on `PATH`.
#[derive(Clone, Debug, Default)]
pub struct FakeScm {
    /// Blob content keyed by `(revision, path)`.
    blobs: HashMap<(String, RelPath), Vec<u8>>,
    /// The revision returned by `current_revision`.
    pub head: Option<String>,
}

impl FakeScm {
    /// Construct an empty fake with no current revision.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `content` for `path` as it exists at `rev`.
    pub fn set_blob(&mut self, rev: impl Into<String>, path: RelPath, content: impl Into<Vec<u8>>) {
        self.blobs.insert((rev.into(), path), content.into());
    }
}

impl ScmAdapter for FakeScm {
    async fn current_revision(&self) -> Result<Option<String>> {
        Ok(self.head.clone())
    }

    async fn blob_ids_at(&self, rev: &str, paths: &[RelPath]) -> Result<HashMap<RelPath, String>> {
        let mut result = HashMap::new();
        for path in paths {
            if let Some(content) = self.blobs.get(&(rev.to_owned(), path.clone())) {
                result.insert(path.clone(), crate::hash::hash_bytes(content));
            }
        }
        Ok(result)
    }

    async fn read_blob_at(&self, rev: &str, path: &RelPath) -> Result<Vec<u8>> {
        self.blobs
            .get(&(rev.to_owned(), path.clone()))
            .cloned()
            .ok_or_else(|| color_eyre::eyre::eyre!("no blob for {path} at {rev}"))
    }
}

/// Discover the repository root for `start` by walking up looking for
/// `.git`, for constructing a [`GitAdapter`].
pub fn discover_repo_root(start: &Path) -> Result<PathBuf> {
    crate::path::find_repo_root(start)
}
