//! Mtime-keyed hash memoization.
//!
//! Recomputing md5 for every tracked file on every invocation is wasteful
//! when the file hasn't moved since it was last hashed. This stores
//! `(path, mtime_ns, size) -> md5` in a small SQLite database so the hasher
//! can skip straight to a cached digest when the file's stamp hasn't
//! changed. A stamp match is a memoization hint, not a freshness guarantee:
//! the evaluator still compares against the recorded `outs[i].md5`.

use std::path::Path;

use color_eyre::{Result, eyre::Context};
use rusqlite::{Connection, params};
use tokio::sync::Mutex;
use tracing::{instrument, trace};

use crate::fs::FileStamp;
use crate::hash::Hash;

/// Current schema version. Bumping this clears the table on next open
/// rather than failing to parse rows written by an older version.
const SCHEMA_VERSION: i64 = 1;

/// SQLite-backed memoization cache for file content hashes.
pub struct MtimeCache {
    conn: Mutex<Connection>,
}

impl MtimeCache {
    /// Open or create the cache database at `path`.
    #[instrument(name = "MtimeCache::open", skip(path))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create mtime cache directory {parent:?}"))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("open mtime cache database {path:?}"))?;
        Self::from_connection(conn)
    }

    /// Open an in-memory cache, used in tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory mtime cache")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let cache = Self {
            conn: Mutex::new(conn),
        };
        cache.init_schema()?;
        Ok(cache)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self
            .conn
            .try_lock()
            .expect("no concurrent access during init");

        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .context("read schema version")?;

        if version != 0 && version != SCHEMA_VERSION {
            trace!(version, expected = SCHEMA_VERSION, "clearing stale mtime cache schema");
            conn.execute_batch("DROP TABLE IF EXISTS hashes;")
                .context("drop stale table")?;
        }

        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS hashes (
                path TEXT NOT NULL,
                mtime_ns INTEGER NOT NULL,
                size INTEGER NOT NULL,
                md5 TEXT NOT NULL,
                PRIMARY KEY (path, mtime_ns, size)
            );
            PRAGMA user_version = {SCHEMA_VERSION};
            "#
        ))
        .context("initialize schema")?;

        Ok(())
    }

    /// Look up a memoized hash for `path` at the given stamp.
    #[instrument(name = "MtimeCache::get", skip(self))]
    pub async fn get(&self, path: &Path, stamp: FileStamp) -> Result<Option<Hash>> {
        let conn = self.conn.lock().await;
        let path = path.to_string_lossy().into_owned();
        conn.query_row(
            "SELECT md5 FROM hashes WHERE path = ?1 AND mtime_ns = ?2 AND size = ?3",
            params![path, stamp.mtime_ns.to_string(), stamp.len],
            |row| row.get::<_, String>(0),
        )
        .map(Some)
        .or_else(|err| match err {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            err => Err(err).context("query mtime cache"),
        })
    }

    /// Memoize `hash` for `path` at the given stamp.
    #[instrument(name = "MtimeCache::put", skip(self))]
    pub async fn put(&self, path: &Path, stamp: FileStamp, hash: &Hash) -> Result<()> {
        let conn = self.conn.lock().await;
        let path_str = path.to_string_lossy().into_owned();
        conn.execute(
            "INSERT OR REPLACE INTO hashes (path, mtime_ns, size, md5) VALUES (?1, ?2, ?3, ?4)",
            params![path_str, stamp.mtime_ns.to_string(), stamp.len, hash],
        )
        .context("insert mtime cache entry")?;
        trace!(?path, hash, "memoized hash");
        Ok(())
    }

    /// Clear every memoized entry.
    #[instrument(name = "MtimeCache::clear", skip(self))]
    pub async fn clear(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM hashes", [])
            .context("clear mtime cache")?;
        Ok(())
    }

    /// Number of memoized entries. Exposed for tests and `gc` reporting.
    pub async fn len(&self) -> Result<usize> {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM hashes", [], |row| row.get(0))
            .context("count mtime cache entries")?;
        Ok(count as usize)
    }
}

/// Hash `path`, consulting and updating `cache` so repeat calls with an
/// unchanged stamp skip rehashing.
#[instrument(skip(cache))]
pub async fn hash_file_cached(cache: &MtimeCache, path: &Path) -> Result<Hash> {
    let Some(stamp) = FileStamp::from_file(path).await? else {
        color_eyre::eyre::bail!("file does not exist: {path:?}");
    };

    if let Some(hash) = cache.get(path, stamp).await? {
        trace!(?path, hash, "mtime cache hit");
        return Ok(hash);
    }

    let hash = crate::hash::hash_file(path).await?;
    cache.put(path, stamp, &hash).await?;
    Ok(hash)
}
