//! Content-addressed local cache store.
//!
//! Cached content is keyed by its md5 digest and stored two levels deep,
//! `{root}/{md5[0..2]}/{md5[2..]}`, so no single directory accumulates every
//! object in the store. Writes go through a temp-file-then-rename so a
//! reader never observes a partially written object. There is no remote
//! backend: push/pull are external collaborators, and no compression is
//! applied to stored objects.

use std::path::{Path, PathBuf};

use color_eyre::Result;
use derive_more::{Debug, Display};

use crate::fs;
use crate::hash::Hash;

/// Local, content-addressed cache store.
#[derive(Clone, Eq, PartialEq, Debug, Display)]
#[display("{}", root.display())]
pub struct LocalCache {
    root: PathBuf,
}

impl LocalCache {
    /// Open a cache rooted at `root`, creating it if necessary.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Filesystem root of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve the on-disk path for the object keyed by `md5`.
    ///
    /// This is the path exposed by the `cache_path` library operation so
    /// callers can read cached content directly.
    pub fn object_path(&self, md5: &str) -> PathBuf {
        let (prefix, rest) = md5.split_at(2.min(md5.len()));
        self.root.join(prefix).join(rest)
    }

    /// Whether an object keyed by `md5` is present.
    pub async fn contains(&self, md5: &str) -> bool {
        fs::exists(&self.object_path(md5)).await
    }

    /// Store `content`, addressed by the md5 of `content` itself.
    ///
    /// Returns the computed key. A no-op if an object with that key already
    /// exists (content-addressing guarantees it is identical).
    pub async fn put_bytes(&self, content: &[u8]) -> Result<Hash> {
        let key = crate::hash::hash_bytes(content);
        let dst = self.object_path(&key);
        if !fs::exists(&dst).await {
            fs::atomic_write(&dst, content).await?;
        }
        Ok(key)
    }

    /// Copy the file at `src` into the store under `md5`, the digest the
    /// caller already computed for it.
    ///
    /// The caller supplies the key rather than this method recomputing it so
    /// the hasher's mtime-cache memoization (`hash_file_cached`) is not
    /// bypassed.
    pub async fn put_file(&self, md5: &str, src: &Path) -> Result<()> {
        let dst = self.object_path(md5);
        if fs::exists(&dst).await {
            return Ok(());
        }
        let content = crate::fs::read_buffered(src)
            .await?
            .ok_or_else(|| color_eyre::eyre::eyre!("source file missing: {src:?}"))?;
        fs::atomic_write(&dst, content).await
    }

    /// Read the object keyed by `md5`. Returns `None` if absent.
    pub async fn get(&self, md5: &str) -> Result<Option<Vec<u8>>> {
        fs::read_buffered(&self.object_path(md5)).await
    }

    /// Restore the object keyed by `md5` to `dst` on the working tree.
    pub async fn restore(&self, md5: &str, dst: &Path) -> Result<()> {
        let content = self
            .get(md5)
            .await?
            .ok_or_else(|| color_eyre::eyre::eyre!("object not found in cache: {md5}"))?;
        fs::write(dst, content).await
    }

    /// Remove the object keyed by `md5`, if present. Used by `gc`.
    pub async fn remove(&self, md5: &str) -> Result<()> {
        fs::remove_file(&self.object_path(md5)).await
    }

    /// Walk every object key currently stored, for `gc` to compare against
    /// the set of keys still referenced by records.
    pub async fn list_keys(&self) -> Result<Vec<String>> {
        use futures::TryStreamExt;
        fs::walk_files(&self.root)
            .try_filter_map(|path| {
                let root = self.root.clone();
                async move {
                    let rel = path
                        .strip_prefix(&root)
                        .map_err(|err| color_eyre::eyre::eyre!(err))?;
                    let key: String = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect();
                    Ok(Some(key))
                }
            })
            .try_collect()
            .await
    }
}
