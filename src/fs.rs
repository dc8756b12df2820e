//! Filesystem operations tailored to `dvx`.
//!
//! Inside this module, we refer to `std::fs` or `tokio::fs` by its fully
//! qualified path to make it maximally clear what we are using.

use std::path::{Path, PathBuf};

use color_eyre::{Result, eyre::Context};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tap::{Pipe, TapFallible};
use tokio::task::spawn_blocking;
use tracing::{instrument, trace};

/// Determine the cache root for the current user.
///
/// Honors `DVX_CACHE_DIR` first; otherwise resolves a per-user cache
/// directory via [`directories::ProjectDirs`].
///
/// ## Errors
///
/// Fails if no cache directory can be determined for the platform.
#[instrument]
pub async fn user_global_cache_path() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("DVX_CACHE_DIR") {
        return Ok(PathBuf::from(dir));
    }

    let dirs = spawn_blocking(|| directories::ProjectDirs::from("", "", "dvx"))
        .await
        .context("join task")?
        .ok_or_else(|| color_eyre::eyre::eyre!("no cache directory available on this platform"))?;

    dirs.cache_dir()
        .to_path_buf()
        .pipe(Ok)
        .tap_ok(|dir| trace!(?dir, "user global cache path"))
}

/// Create the directory and all its parents, if they don't already exist.
#[instrument]
pub async fn create_dir_all(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("create dir: {dir:?}"))
        .tap_ok(|_| trace!(?dir, "create directory"))
}

/// Walk files in a directory recursively.
///
/// Only emits regular files; symbolic links and directories are not emitted.
#[instrument]
pub fn walk_files(root: &Path) -> impl Stream<Item = Result<PathBuf>> + Unpin {
    let (tx, rx) = flume::bounded::<Result<PathBuf>>(0);
    let root = root.to_path_buf();

    spawn_blocking(move || {
        for entry in jwalk::WalkDir::new(&root).skip_hidden(false) {
            let entry = match entry.with_context(|| format!("walk files in {root:?}")) {
                Ok(entry) => entry,
                Err(err) => {
                    if tx.send(Err(err)).is_err() {
                        return;
                    }
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            if tx.send(Ok(entry.path())).is_err() {
                return;
            }
        }
    });

    rx.into_stream().pipe(Box::pin)
}

/// Report whether the provided directory has no regular files beneath it.
#[instrument]
pub async fn is_dir_empty(path: &Path) -> Result<bool> {
    use futures::TryStreamExt;
    walk_files(path)
        .try_any(|_| async { true })
        .await
        .map(|found| !found)
}

/// Buffer the file content from disk.
///
/// Returns `None` if the file does not exist.
#[instrument]
pub async fn read_buffered(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(buf) => {
            trace!(?path, bytes = buf.len(), "read file");
            Ok(Some(buf))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).context(format!("read file: {path:?}")),
    }
}

/// Buffer the file content from disk and parse it as UTF-8.
///
/// Returns `None` if the file does not exist.
#[instrument]
pub async fn read_buffered_utf8(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(buf) => {
            trace!(?path, bytes = buf.len(), "read file as string");
            Ok(Some(buf))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).context(format!("read file: {path:?}")),
    }
}

/// Write the provided file content to disk, non-atomically.
///
/// Not suitable for record files or cache objects, which must never be
/// observed in a partially-written state: use [`atomic_write`] for those.
#[instrument(skip(content))]
pub async fn write(path: &Path, content: impl AsRef<[u8]>) -> Result<()> {
    let content = content.as_ref();
    if let Some(parent) = path.parent() {
        create_dir_all(parent)
            .await
            .context("create parent directory")?;
    }
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("write file: {path:?}"))
        .tap_ok(|_| trace!(?path, bytes = content.len(), "write file"))
}

/// Write `content` to `path` atomically: the file is written to a sibling
/// temp path and renamed into place, so readers never observe a torn write.
///
/// Used for artifact record files and cache objects, which must never be
/// partially visible to a concurrent reader.
#[instrument(skip(content))]
pub async fn atomic_write(path: &Path, content: impl AsRef<[u8]>) -> Result<()> {
    let content = content.as_ref();
    let parent = path
        .parent()
        .ok_or_else(|| color_eyre::eyre::eyre!("path has no parent: {path:?}"))?;
    create_dir_all(parent)
        .await
        .context("create parent directory")?;

    let tmp = temp_path(path);
    tokio::fs::write(&tmp, content)
        .await
        .with_context(|| format!("write temp file: {tmp:?}"))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("rename {tmp:?} -> {path:?}"))
        .tap_ok(|_| trace!(?path, bytes = content.len(), "atomic write"))
}

/// Construct a sibling temp path for atomic rename, unique per call.
fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| format!(".{}.tmp.{}", name.to_string_lossy(), uuid::Uuid::new_v4()))
        .unwrap_or_else(|| format!(".tmp.{}", uuid::Uuid::new_v4()));
    path.with_file_name(name)
}

/// Remove a file. Treats a missing file as success.
#[instrument]
pub async fn remove_file(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            trace!(?path, "removed file");
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).context(format!("remove file: {path:?}")),
    }
}

/// Remove the directory and all its contents. Treats a missing directory as
/// success.
#[instrument]
pub async fn remove_dir_all(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {
            trace!(?path, "removed directory");
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            trace!(?path, "removed directory (already removed)");
            Ok(())
        }
        Err(err) => Err(err).context(format!("remove directory: {path:?}")),
    }
}

/// Check whether the path exists.
///
/// Prone to races; prefer trying the operation and handling `NotFound`
/// where the subsequent use matters.
#[instrument]
pub async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// A cheap fingerprint of a file's on-disk identity, used as the mtime-cache
/// key: `(path, mtime_ns, size)` is assumed to uniquely identify content
/// without reading it, except across the narrow same-second same-size
/// mutation window the evaluator treats conservatively (spec's data-stale
/// path re-hashes on any doubt).
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct FileStamp {
    /// Modification time in nanoseconds since the Unix epoch.
    pub mtime_ns: i128,
    /// File size in bytes.
    pub len: u64,
}

impl FileStamp {
    /// Stat `path` and compute its stamp. Returns `None` if the file does
    /// not exist.
    #[instrument]
    pub async fn from_file(path: &Path) -> Result<Option<Self>> {
        match tokio::fs::metadata(path).await {
            Ok(metadata) => {
                let modified = metadata.modified().context("read mtime")?;
                let mtime_ns = modified
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_nanos() as i128)
                    .unwrap_or_else(|err| -(err.duration().as_nanos() as i128));
                Ok(Some(Self {
                    mtime_ns,
                    len: metadata.len(),
                }))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).context(format!("stat file: {path:?}")),
        }
    }
}
