//! Freshness evaluator.
//!
//! Decides, for one artifact record, whether its outputs are already
//! up-to-date with respect to the command and dependencies that produced
//! them. This is a pure function over the record plus its collaborators
//! (the SCM adapter, the cache store, the mtime cache) — it never unwinds;
//! IO or parse failure is folded into [`FreshnessOutcome::Error`] so callers
//! can report a whole plan even when one record can't be classified.

use std::collections::HashMap;
use std::path::Path;

use crate::mtime_cache::MtimeCache;
use crate::path::RelPath;
use crate::record::Record;
use crate::scm::ScmAdapter;

/// Maps a dependency path to the record that tracks it as an output, if
/// any. Built by the caller (the DAG builder scans every record file once);
/// used so a dependency on a tracked path is resolved via its record's
/// current `outs[*].md5` instead of rehashing the file.
pub type RecordIndex<'a> = HashMap<&'a RelPath, &'a Record>;

/// Build a [`RecordIndex`] from the full record set as loaded from disk —
/// one entry per sidecar file, keyed by *where the sidecar lives* — by
/// mapping each record's own output paths to it instead. Dependency keys
/// name the file being depended on (an output path), never a sidecar path,
/// so this is the index `evaluate` and the executor's dep resolution need.
pub fn index_by_output(records: &HashMap<RelPath, Record>) -> RecordIndex<'_> {
    records
        .values()
        .flat_map(|record| record.outs.iter().map(move |out| (&out.path, record)))
        .collect()
}

/// The result of classifying one record against the working tree.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum FreshnessOutcome {
    /// Every output matches its recorded hash and no dependency changed.
    Fresh,
    /// An output file is missing from the working tree.
    MissingOutput { path: RelPath },
    /// An output file's current content no longer matches its recorded
    /// hash.
    DataStale { path: RelPath },
    /// A dependency's recorded hash no longer matches its current hash.
    DepStale { path: RelPath },
    /// A dependency path resolves to nothing the evaluator can hash.
    MissingDep { path: RelPath },
    /// Classification could not complete (IO failure, malformed record).
    Error { message: String },
}

impl FreshnessOutcome {
    /// Whether this outcome means the record's unit needs to run.
    pub fn is_stale(&self) -> bool {
        !matches!(self, FreshnessOutcome::Fresh)
    }
}

/// Evaluate the freshness of a single record.
///
/// `records` indexes every other tracked record by the output path it
/// claims, so a dependency that is itself a tracked output resolves against
/// that record's current `outs[*].md5` rather than rehashing the file.
pub async fn evaluate<S: ScmAdapter>(
    record: &Record,
    repo_root: &Path,
    scm: &S,
    records: &RecordIndex<'_>,
    mtime_cache: &MtimeCache,
) -> FreshnessOutcome {
    match evaluate_inner(record, repo_root, scm, records, mtime_cache).await {
        Ok(outcome) => outcome,
        Err(err) => FreshnessOutcome::Error {
            message: format!("{err:#}"),
        },
    }
}

async fn evaluate_inner<S: ScmAdapter>(
    record: &Record,
    repo_root: &Path,
    scm: &S,
    records: &RecordIndex<'_>,
    mtime_cache: &MtimeCache,
) -> color_eyre::Result<FreshnessOutcome> {
    // Step 1: missing-output. A placeholder output (no recorded md5) is
    // never "missing" in this sense since there's nothing to compare yet.
    for out in &record.outs {
        let Some(expected) = &out.md5 else {
            continue;
        };
        let abs = out.path.resolve(repo_root);
        if !crate::fs::exists(&abs).await {
            return Ok(FreshnessOutcome::MissingOutput {
                path: out.path.clone(),
            });
        }

        // Step 2: data-stale.
        let current = if out.is_dir {
            crate::hash::hash_dir(&abs).await?.0
        } else {
            crate::mtime_cache::hash_file_cached(mtime_cache, &abs).await?
        };
        if &current != expected {
            return Ok(FreshnessOutcome::DataStale {
                path: out.path.clone(),
            });
        }
    }

    // Step 3: no computation metadata means there's nothing further to
    // stale-check; a data record with matching outputs is fresh.
    let Some(computation) = &record.computation else {
        return Ok(FreshnessOutcome::Fresh);
    };

    // Step 4: SCM fast path. If every dep's blob id at HEAD matches its
    // blob id at the recorded code_ref, treat the whole unit as fresh
    // without re-resolving each dep individually.
    if let Some(code_ref) = &computation.code_ref {
        let dep_paths: Vec<RelPath> = computation.deps.keys().cloned().collect();
        if let Some(head) = scm.current_revision().await? {
            let at_head = scm.blob_ids_at(&head, &dep_paths).await?;
            let at_code_ref = scm.blob_ids_at(code_ref, &dep_paths).await?;
            let all_match = dep_paths.len() == at_head.len()
                && dep_paths.len() == at_code_ref.len()
                && dep_paths
                    .iter()
                    .all(|p| at_head.get(p) == at_code_ref.get(p));
            if all_match {
                return Ok(FreshnessOutcome::Fresh);
            }
        }
    }

    // Step 5: per-dependency comparison against current content.
    for (dep_path, recorded_md5) in &computation.deps {
        let current = if let Some(dep_record) = records.get(dep_path) {
            // Tracked as another record's output: compare against its
            // current md5 rather than rehashing the file ourselves.
            let out = dep_record
                .outs
                .iter()
                .find(|out| &out.path == dep_path)
                .ok_or_else(|| color_eyre::eyre::eyre!("dep record missing its own output: {dep_path}"))?;
            match &out.md5 {
                Some(md5) => md5.clone(),
                None => {
                    return Ok(FreshnessOutcome::MissingDep {
                        path: dep_path.clone(),
                    });
                }
            }
        } else {
            let abs = dep_path.resolve(repo_root);
            if !crate::fs::exists(&abs).await {
                return Ok(FreshnessOutcome::MissingDep {
                    path: dep_path.clone(),
                });
            }
            crate::mtime_cache::hash_file_cached(mtime_cache, &abs).await?
        };

        if &current != recorded_md5 {
            return Ok(FreshnessOutcome::DepStale {
                path: dep_path.clone(),
            });
        }
    }

    Ok(FreshnessOutcome::Fresh)
}
