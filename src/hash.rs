//! Content hashing.
//!
//! The record format commits to md5 (spec choice, not a security boundary)
//! so that hashes are short, fast to compute, and comparable with the hashes
//! already embedded in legacy pipeline records this format is meant to read.
//! Files are hashed in 1 MiB blocks so memory use stays flat regardless of
//! file size.

use std::path::Path;

use color_eyre::{Result, eyre::Context};
use md5::{Digest, Md5};
use tokio::io::AsyncReadExt;
use tracing::{instrument, trace};

/// Size of each block read while streaming a file through the hasher.
const BLOCK_SIZE: usize = 1024 * 1024;

/// A hex-encoded md5 digest.
pub type Hash = String;

/// Hash the contents of the file at `path`, streaming it in [`BLOCK_SIZE`]
/// blocks rather than buffering the whole file.
#[instrument]
pub async fn hash_file(path: &Path) -> Result<Hash> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("open file: {path:?}"))?;
    let mut hasher = Md5::new();
    let mut block = vec![0u8; BLOCK_SIZE];
    let mut bytes = 0usize;
    loop {
        let len = file
            .read(&mut block)
            .await
            .with_context(|| format!("read block: {path:?}"))?;
        if len == 0 {
            break;
        }
        hasher.update(&block[..len]);
        bytes += len;
    }
    let digest = hex::encode(hasher.finalize());
    trace!(?path, hash = %digest, bytes, "hash file");
    Ok(digest)
}

/// Hash an in-memory buffer.
pub fn hash_bytes(content: impl AsRef<[u8]>) -> Hash {
    let mut hasher = Md5::new();
    hasher.update(content.as_ref());
    hex::encode(hasher.finalize())
}

/// One entry in a directory manifest: a relative path beneath the directory
/// root paired with the md5 and size of that file's content. This is the
/// on-disk shape of the manifest object stored in the cache: a JSON array
/// of these entries, sorted by `relpath`.
#[derive(Clone, Eq, PartialEq, Debug, serde::Serialize, serde::Deserialize)]
pub struct ManifestEntry {
    /// Path relative to the directory root, forward-slash separated.
    pub relpath: String,
    /// md5 of the file's content.
    pub md5: Hash,
    /// Size in bytes.
    pub size: u64,
}

/// Hash a directory output as a manifest: walk its files, hash each one, and
/// encode the sorted entries into the manifest object's canonical JSON form.
/// The directory's recorded md5 is the md5 of that encoding, so the manifest
/// doubles as the cache object stored under the directory's own digest.
///
/// Entries are sorted by path before encoding so the digest does not depend
/// on walk order.
#[instrument]
pub async fn hash_dir(root: &Path) -> Result<(Hash, Vec<ManifestEntry>)> {
    use futures::TryStreamExt;

    let mut entries: Vec<ManifestEntry> = crate::fs::walk_files(root)
        .and_then(|file| {
            let root = root.to_path_buf();
            async move {
                let rel = file
                    .strip_prefix(&root)
                    .with_context(|| format!("make {file:?} relative to {root:?}"))?
                    .to_string_lossy()
                    .replace(std::path::MAIN_SEPARATOR, "/");
                let size = tokio::fs::metadata(&file)
                    .await
                    .with_context(|| format!("stat {file:?}"))?
                    .len();
                let md5 = hash_file(&file).await?;
                Ok(ManifestEntry {
                    relpath: rel,
                    md5,
                    size,
                })
            }
        })
        .try_collect()
        .await?;

    entries.sort_by(|a, b| a.relpath.cmp(&b.relpath));

    let encoded = encode_manifest(&entries)?;
    Ok((hash_bytes(&encoded), entries))
}

/// Serialize a directory manifest to its canonical JSON form for storage in
/// the cache, keyed by the digest returned alongside it from [`hash_dir`].
pub fn encode_manifest(entries: &[ManifestEntry]) -> Result<Vec<u8>> {
    serde_json::to_vec(entries).context("encode manifest")
}

/// Parse a directory manifest read back from the cache.
pub fn decode_manifest(content: &[u8]) -> Result<Vec<ManifestEntry>> {
    serde_json::from_slice(content).context("decode manifest")
}
