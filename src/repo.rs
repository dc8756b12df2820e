//! Repository facade.
//!
//! `Repo` is the single entry point the CLI binary drives: it
//! owns the repository root, the local cache, and the mtime-cache
//! memoization database, and exposes `add`/`status`/`run`/`diff`/`cat`/
//! `cache_path`/`cache_md5`/`gc`/`remove` as inherent methods that scan
//! `.dvx` sidecar files into the path-keyed record map every other module
//! already assumes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use color_eyre::{Result, eyre::Context};
use indexmap::IndexMap;
use tracing::instrument;

use crate::cache::LocalCache;
use crate::exec::{CancellationToken, ExecOptions, ExecReport, UnitEvent};
use crate::graph::{self, Dag};
use crate::mtime_cache::MtimeCache;
use crate::path::RelPath;
use crate::record::{self, Computation, Output, Record};
use crate::scm::{GitAdapter, ScmAdapter};
use crate::status::{self, StatusEntry, Target};

/// A repository rooted at a working tree, bundling the collaborators every
/// operation needs: the cache store, the mtime memoization database, and a
/// source-control adapter.
pub struct Repo<S: ScmAdapter> {
    root: PathBuf,
    cache: LocalCache,
    mtime_cache: Arc<MtimeCache>,
    scm: S,
}

impl Repo<GitAdapter> {
    /// Open a repository rooted at `root`, resolving the cache under a
    /// repo-local `.dvx/cache` directory if one exists, else the per-user
    /// cache path (`DVX_CACHE_DIR` or a platform default).
    #[instrument(skip_all)]
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let cache_root = Self::resolve_cache_root(&root).await?;
        let mtime_cache = MtimeCache::open(cache_root.join("mtime.sqlite3"))?;
        Ok(Self {
            cache: LocalCache::new(cache_root),
            mtime_cache: Arc::new(mtime_cache),
            scm: GitAdapter::new(&root),
            root,
        })
    }

    async fn resolve_cache_root(root: &Path) -> Result<PathBuf> {
        let local = root.join(".dvx");
        if crate::fs::exists(&local).await {
            return Ok(local.join("cache"));
        }
        crate::fs::user_global_cache_path().await
    }
}

impl<S: ScmAdapter + Clone + 'static> Repo<S> {
    /// Build a repo directly from its collaborators, for tests and for
    /// callers supplying a non-git adapter.
    pub fn with_collaborators(root: impl Into<PathBuf>, cache: LocalCache, mtime_cache: Arc<MtimeCache>, scm: S) -> Self {
        Self {
            root: root.into(),
            cache,
            mtime_cache,
            scm,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    /// Scan every `.dvx` sidecar file under the root into the canonical
    /// sidecar-path-keyed record map (a record's sidecar path is its output
    /// path with [`record::RECORD_SUFFIX`] appended).
    #[instrument(skip(self))]
    pub async fn scan_records(&self) -> Result<HashMap<RelPath, Record>> {
        use futures::TryStreamExt;

        crate::fs::walk_files(&self.root)
            .try_filter_map(|abs| {
                let root = self.root.clone();
                async move {
                    if abs.extension().and_then(|e| e.to_str()) != Some("dvx") {
                        return Ok(None);
                    }
                    let rel = abs
                        .strip_prefix(&root)
                        .map_err(|err| color_eyre::eyre::eyre!(err))?;
                    let rel_path = RelPath::new(rel).with_context(|| format!("record path: {rel:?}"))?;
                    let record = Record::read(&abs)
                        .await?
                        .ok_or_else(|| color_eyre::eyre::eyre!("record vanished mid-scan: {abs:?}"))?;
                    Ok(Some((rel_path, record)))
                }
            })
            .try_collect()
            .await
    }

    /// Track `paths` as artifact records. When `cmd` is
    /// given, the record carries computation metadata; `deps` are snapshotted
    /// to their current content at add time, the same resolution the
    /// evaluator and executor use (a tracked dependency's own recorded md5,
    /// else the live file's hash). Re-running `add` on an unchanged path is
    /// idempotent since the record is fully recomputed from current state
    /// rather than patched.
    #[instrument(skip(self))]
    pub async fn add(
        &self,
        paths: &[RelPath],
        deps: Option<&[RelPath]>,
        cmd: Option<&str>,
        recursive: bool,
    ) -> Result<()> {
        let records = self.scan_records().await?;
        let record_index = crate::fresh::index_by_output(&records);

        for path in paths {
            let abs = path.resolve(&self.root);
            if recursive && abs.is_dir() {
                let children = self.collect_dir_files(&abs).await?;
                Box::pin(self.add(&children, deps, cmd, recursive)).await?;
                continue;
            }
            self.add_one(path, deps, cmd, &record_index).await?;
        }
        Ok(())
    }

    async fn collect_dir_files(&self, abs_dir: &Path) -> Result<Vec<RelPath>> {
        use futures::TryStreamExt;
        crate::fs::walk_files(abs_dir)
            .and_then(|file| {
                let root = self.root.clone();
                async move {
                    let rel = file.strip_prefix(&root).map_err(|err| color_eyre::eyre::eyre!(err))?;
                    RelPath::new(rel).with_context(|| format!("path under {root:?}: {rel:?}"))
                }
            })
            .try_collect()
            .await
    }

    async fn add_one(
        &self,
        path: &RelPath,
        deps: Option<&[RelPath]>,
        cmd: Option<&str>,
        record_index: &crate::fresh::RecordIndex<'_>,
    ) -> Result<()> {
        let abs = path.resolve(&self.root);
        let exists = crate::fs::exists(&abs).await;
        let is_dir = exists && abs.is_dir();

        let (md5, size) = if exists {
            if is_dir {
                let (md5, entries) = crate::hash::hash_dir(&abs).await?;
                self.cache.put_bytes(&crate::hash::encode_manifest(&entries)?).await?;
                (Some(md5), None)
            } else {
                let md5 = crate::mtime_cache::hash_file_cached(&self.mtime_cache, &abs).await?;
                self.cache.put_file(&md5, &abs).await?;
                let size = tokio::fs::metadata(&abs).await.map(|m| m.len()).ok();
                (Some(md5), size)
            }
        } else {
            // A command not yet run leaves a placeholder; a pure data add
            // with nothing on disk has nothing to track.
            if cmd.is_none() {
                color_eyre::eyre::bail!("nothing to add, no such path: {path}");
            }
            (None, None)
        };

        let computation = cmd.map(|cmd| {
            let mut dep_map = IndexMap::new();
            if let Some(deps) = deps {
                for dep in deps {
                    dep_map.insert(dep.clone(), String::new());
                }
            }
            Computation {
                cmd: Some(cmd.to_owned()),
                code_ref: None,
                deps: dep_map,
                params: Default::default(),
            }
        });

        let mut record = Record {
            outs: vec![Output {
                path: path.clone(),
                md5,
                size,
                is_dir,
                extra: Default::default(),
            }],
            computation,
            extra_meta: Default::default(),
        };

        if let Some(computation) = &mut record.computation {
            for (dep_path, recorded) in computation.deps.iter_mut() {
                *recorded = self.resolve_dep_md5(dep_path, record_index).await?.unwrap_or_default();
            }
        }

        record.write(&record::record_path_for(path).resolve(&self.root)).await
    }

    async fn resolve_dep_md5(&self, dep_path: &RelPath, record_index: &crate::fresh::RecordIndex<'_>) -> Result<Option<String>> {
        if let Some(dep_record) = record_index.get(dep_path) {
            let out = dep_record.outs.iter().find(|o| &o.path == dep_path);
            return Ok(out.and_then(|o| o.md5.clone()));
        }
        let abs = dep_path.resolve(&self.root);
        if !crate::fs::exists(&abs).await {
            return Ok(None);
        }
        Ok(Some(crate::mtime_cache::hash_file_cached(&self.mtime_cache, &abs).await?))
    }

    /// Delete the tracked records for `paths`. Cache objects they reference
    /// are left alone;
    /// `gc` is the only operation that deletes cache content.
    #[instrument(skip(self))]
    pub async fn remove(&self, paths: &[RelPath]) -> Result<()> {
        for path in paths {
            crate::fs::remove_file(&record::record_path_for(path).resolve(&self.root)).await?;
        }
        Ok(())
    }

    /// Classify `targets` as fresh, stale, or missing.
    #[instrument(skip(self, targets))]
    pub async fn status(&self, targets: &[Target], workers: usize) -> Result<Vec<StatusEntry>> {
        let records = self.scan_records().await?;
        Ok(status::status(targets, &records, &self.root, &self.scm, &self.mtime_cache, workers).await)
    }

    /// Run (or dry-run) every unit reachable from `targets`, restricted to
    /// the transitive dependency closure so an unrelated stale unit
    /// elsewhere in the tree is never dispatched.
    #[instrument(skip(self, targets, on_event))]
    pub async fn run(
        &self,
        targets: &[Target],
        options: ExecOptions<'_>,
        cancellation: &CancellationToken,
        on_event: impl FnMut(UnitEvent),
    ) -> Result<ExecReport> {
        let records = self.scan_records().await?;
        let selected = self.dependency_closure(targets, &records);
        let dag = self.build_dag(&selected)?;
        crate::exec::run(&dag, &selected, &self.root, &self.scm, self.mtime_cache.clone(), &self.cache, options, cancellation, on_event).await
    }

    fn build_dag(&self, records: &HashMap<RelPath, Record>) -> Result<Dag> {
        let pairs: Vec<(RelPath, Record)> = records.iter().map(|(p, r)| (p.clone(), r.clone())).collect();
        Ok(graph::build(&pairs)?)
    }

    /// Every record whose output matches `targets`, plus every record that
    /// (transitively) produces one of their dependencies.
    fn dependency_closure(&self, targets: &[Target], records: &HashMap<RelPath, Record>) -> HashMap<RelPath, Record> {
        // Output path -> the path of the sidecar file that tracks it.
        let mut owning_record_path: HashMap<RelPath, RelPath> = HashMap::new();
        for (record_path, record) in records {
            for out in &record.outs {
                owning_record_path.insert(out.path.clone(), record_path.clone());
            }
        }

        let selected_outputs = status::expand_targets(targets, records);

        let mut keep: HashMap<RelPath, Record> = HashMap::new();
        let mut frontier: Vec<RelPath> = selected_outputs;
        while let Some(output) = frontier.pop() {
            let Some(record_path) = owning_record_path.get(&output) else { continue };
            if keep.contains_key(record_path) {
                continue;
            }
            let record = records[record_path].clone();
            if let Some(computation) = &record.computation {
                frontier.extend(computation.deps.keys().cloned());
            }
            keep.insert(record_path.clone(), record);
        }
        keep
    }

    /// Fetch `path`'s content as of `revspec` (the working tree if `None`),
    /// resolving through the owning record the same way the diff engine does
    /// from record to cache object.
    #[instrument(skip(self))]
    pub async fn cat(&self, path: &RelPath, revspec: Option<&str>) -> Result<Vec<u8>> {
        let record = match revspec {
            None => Record::read(&record::record_path_for(path).resolve(&self.root)).await?,
            Some(rev) => match self.scm.read_blob_at(rev, &record::record_path_for(path)).await {
                Ok(bytes) => Some(Record::from_yaml(&String::from_utf8(bytes).context("record blob is not utf-8")?)?),
                Err(_) => None,
            },
        };

        if let Some(record) = record
            && let Some(out) = record.outs.iter().find(|o| &o.path == path)
            && let Some(md5) = &out.md5
            && let Some(content) = self.cache.get(md5).await?
        {
            return Ok(content);
        }

        if revspec.is_none() {
            let abs = path.resolve(&self.root);
            if let Some(content) = crate::fs::read_buffered(&abs).await? {
                return Ok(content);
            }
        }

        color_eyre::eyre::bail!("no content found for {path} at {}", revspec.unwrap_or("working tree"))
    }

    /// Resolve `path`'s current cache object location.
    #[instrument(skip(self))]
    pub async fn cache_path(&self, path: &RelPath) -> Result<PathBuf> {
        let md5 = self.cache_md5(path).await?;
        Ok(self.cache.object_path(&md5))
    }

    /// Resolve `path`'s current recorded content hash.
    #[instrument(skip(self))]
    pub async fn cache_md5(&self, path: &RelPath) -> Result<String> {
        let record = Record::read(&record::record_path_for(path).resolve(&self.root))
            .await?
            .ok_or_else(|| color_eyre::eyre::eyre!("not tracked: {path}"))?;
        record
            .outs
            .iter()
            .find(|o| &o.path == path)
            .and_then(|o| o.md5.clone())
            .ok_or_else(|| color_eyre::eyre::eyre!("no content recorded yet for {path}"))
    }

    /// Delete every cache object not referenced by any current record (spec
    /// §6.3 `gc`; §3 "Lifecycle": cache objects are deleted only by `gc`, and
    /// only once every record is scanned so a still-referenced blob is never
    /// removed). Returns the number of bytes freed.
    #[instrument(skip(self))]
    pub async fn gc(&self) -> Result<u64> {
        let records = self.scan_records().await?;
        let mut referenced: std::collections::HashSet<String> = std::collections::HashSet::new();
        for record in records.values() {
            for out in &record.outs {
                let Some(md5) = &out.md5 else { continue };
                referenced.insert(md5.clone());
                if out.is_dir && let Some(bytes) = self.cache.get(md5).await? {
                    for entry in crate::hash::decode_manifest(&bytes)? {
                        referenced.insert(entry.md5);
                    }
                }
            }
        }

        let mut freed = 0u64;
        for key in self.cache.list_keys().await? {
            if referenced.contains(&key) {
                continue;
            }
            let object = self.cache.object_path(&key);
            if let Ok(metadata) = tokio::fs::metadata(&object).await {
                freed += metadata.len();
            }
            self.cache.remove(&key).await?;
        }
        Ok(freed)
    }

    /// Diff tracked paths across a revision range.
    #[instrument(skip(self, options))]
    pub async fn diff(&self, paths: &[RelPath], revspec: &str, options: &crate::diff::DiffOptions) -> Result<String> {
        crate::diff::diff(paths, revspec, &self.root, &self.scm, &self.cache, options).await
    }
}
