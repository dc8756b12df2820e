//! Parallel executor.
//!
//! Runs a [`graph::Dag`] level by level: within a level, a bounded worker
//! pool dispatches each unit's `cmd` as a subprocess over a fixed-size
//! `JoinSet` of workers. Between levels there is a strict happens-before:
//! every record update in level `k` is on disk before any unit in level
//! `k + 1` is dispatched.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use color_eyre::Result;
use glob::Pattern;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::instrument;

use crate::cache::LocalCache;
use crate::fresh::RecordIndex;
use crate::graph::{Dag, Unit, UnitId};
use crate::mtime_cache::MtimeCache;
use crate::path::RelPath;
use crate::record::Record;
use crate::scm::ScmAdapter;

/// How a unit's staleness is forced, overriding the evaluator.
#[derive(Clone, Debug, Default)]
pub enum ForceMode {
    /// No override: staleness comes entirely from the evaluator.
    #[default]
    None,
    /// Every unit is treated as stale.
    All,
    /// Units with an output path matching `pattern` are forced stale in
    /// addition to whatever the evaluator says.
    Upstream(Pattern),
    /// Units with an output path matching `pattern` are treated as fresh
    /// even if the evaluator says otherwise.
    Cached(Pattern),
}

/// Cooperative cancellation handle shared between the caller and the
/// executor. Polled between unit dispatches rather than tearing down
/// in-flight work abruptly.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one unit's dispatch.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum UnitOutcome {
    /// The unit was already fresh; nothing ran.
    Skipped,
    /// The unit ran and its records were updated.
    Succeeded,
    /// The unit's subprocess failed (nonzero exit or a missing output).
    Failed { message: String },
    /// A predecessor in an earlier level failed, so this unit never ran.
    SkippedDueToAncestor,
    /// The run was cancelled before this unit could be dispatched.
    Cancelled,
}

/// One unit's transition, for progress reporting.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum UnitEvent {
    Queued(UnitId),
    Running(UnitId),
    Finished(UnitId, UnitOutcome),
}

/// Options controlling one `run` invocation.
pub struct ExecOptions<'a> {
    pub workers: usize,
    pub force_mode: &'a ForceMode,
    pub dry_run: bool,
    /// Grace period between SIGTERM and SIGKILL on cancellation.
    pub grace_period: Duration,
}

impl Default for ExecOptions<'_> {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            force_mode: &ForceMode::None,
            dry_run: false,
            grace_period: Duration::from_secs(10),
        }
    }
}

/// The result of running (or dry-running) a whole DAG.
pub struct ExecReport {
    pub outcomes: HashMap<UnitId, UnitOutcome>,
}

impl ExecReport {
    pub fn is_all_fresh(&self) -> bool {
        self.outcomes
            .values()
            .all(|o| matches!(o, UnitOutcome::Skipped))
    }

    /// Whether any unit failed outright or was skipped because an ancestor
    /// failed — the condition a real (non-dry) run should exit `1` for.
    pub fn any_failed(&self) -> bool {
        self.outcomes
            .values()
            .any(|o| matches!(o, UnitOutcome::Failed { .. } | UnitOutcome::SkippedDueToAncestor))
    }
}

/// Run `dag` to completion (or just plan it, under `dry_run`).
///
/// `records` is the path -> record map the DAG was built from; `repo_root` is
/// the working tree root units execute in. `on_event` receives one
/// [`UnitEvent`] per transition. A unit's rehashed output content is pushed
/// into `cache` right after its record is rewritten, since cache objects are
/// created by the executor.
#[instrument(skip_all)]
pub async fn run<S: ScmAdapter + Clone + 'static>(
    dag: &Dag,
    records: &HashMap<RelPath, Record>,
    repo_root: &Path,
    scm: &S,
    mtime_cache: Arc<MtimeCache>,
    cache: &LocalCache,
    options: ExecOptions<'_>,
    cancellation: &CancellationToken,
    mut on_event: impl FnMut(UnitEvent),
) -> Result<ExecReport> {
    // A working copy updated after each level, so a level-`k+1` unit's
    // freshness check and dep-md5 snapshot see level-`k`'s just-written
    // records rather than the state records were in when `run` started.
    let mut records = records.clone();
    let mut outcomes: HashMap<UnitId, UnitOutcome> = HashMap::new();
    let mut failed_ancestor = false;

    for level in &dag.levels {
        if cancellation.is_cancelled() {
            for &id in level {
                outcomes.insert(id, UnitOutcome::Cancelled);
            }
            continue;
        }

        if failed_ancestor {
            for &id in level {
                outcomes.insert(id, UnitOutcome::SkippedDueToAncestor);
            }
            continue;
        }

        let mut to_run: Vec<&Unit> = Vec::new();
        {
            let record_index = crate::fresh::index_by_output(&records);
            for &id in level {
                let unit = &dag.units[id.index()];
                on_event(UnitEvent::Queued(id));
                let stale = classify(
                    unit,
                    &records,
                    &record_index,
                    repo_root,
                    scm,
                    &mtime_cache,
                    options.force_mode,
                )
                .await;
                match stale {
                    Some(outcome) => {
                        outcomes.insert(id, outcome);
                    }
                    None => to_run.push(unit),
                }
            }
        }

        if options.dry_run {
            for unit in &to_run {
                outcomes.insert(unit.id, UnitOutcome::Succeeded);
            }
            continue;
        }

        let level_results = run_level(
            &to_run,
            &records,
            repo_root,
            scm,
            &mtime_cache,
            cache,
            options.workers,
            options.grace_period,
            cancellation,
            &mut on_event,
        )
        .await?;

        let mut any_failed = false;
        for (id, outcome, updated) in level_results {
            if matches!(outcome, UnitOutcome::Failed { .. }) {
                any_failed = true;
            }
            if let Some(updated) = updated {
                records.extend(updated);
            }
            outcomes.insert(id, outcome);
        }
        if any_failed {
            failed_ancestor = true;
        }
    }

    Ok(ExecReport { outcomes })
}

/// Decide whether a unit can be skipped without running anything, honoring
/// force modes. Returns `Some(outcome)` if no dispatch is needed.
async fn classify<S: ScmAdapter>(
    unit: &Unit,
    all_records: &HashMap<RelPath, Record>,
    record_index: &RecordIndex<'_>,
    repo_root: &Path,
    scm: &S,
    mtime_cache: &MtimeCache,
    force_mode: &ForceMode,
) -> Option<UnitOutcome> {
    // A unit with no computation never executes; it's a pure data record.
    if unit.cmd.is_none() {
        return Some(UnitOutcome::Skipped);
    }

    let forced_fresh = matches!(force_mode, ForceMode::Cached(pattern) if unit_matches(unit, pattern));
    if forced_fresh {
        return Some(UnitOutcome::Skipped);
    }

    let forced_stale = match force_mode {
        ForceMode::All => true,
        ForceMode::Upstream(pattern) => unit_matches(unit, pattern),
        _ => false,
    };
    if forced_stale {
        return None;
    }

    let mut any_stale = false;
    for path in &unit.record_paths {
        let Some(record) = all_records.get(path) else {
            continue;
        };
        let outcome = crate::fresh::evaluate(record, repo_root, scm, record_index, mtime_cache).await;
        if outcome.is_stale() {
            any_stale = true;
        }
    }

    if any_stale { None } else { Some(UnitOutcome::Skipped) }
}

fn unit_matches(unit: &Unit, pattern: &Pattern) -> bool {
    unit.outs.iter().any(|path| pattern.matches(path.as_str()))
}

/// Dispatch `units` concurrently, bounded to `workers` in flight at once.
#[allow(clippy::too_many_arguments)]
async fn run_level<S: ScmAdapter + Clone + 'static>(
    units: &[&Unit],
    records: &HashMap<RelPath, Record>,
    repo_root: &Path,
    scm: &S,
    mtime_cache: &Arc<MtimeCache>,
    cache: &LocalCache,
    workers: usize,
    grace_period: Duration,
    cancellation: &CancellationToken,
    on_event: &mut impl FnMut(UnitEvent),
) -> Result<Vec<(UnitId, UnitOutcome, Option<HashMap<RelPath, Record>>)>> {
    let record_index = crate::fresh::index_by_output(records);
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut joins = JoinSet::new();
    let mut early_results: Vec<(UnitId, UnitOutcome, Option<HashMap<RelPath, Record>>)> = Vec::new();

    for unit in units {
        if cancellation.is_cancelled() {
            break;
        }

        // Snapshot every dep's md5 before the subprocess starts, the same
        // resolution order the evaluator uses: another tracked record's
        // current output md5 first, else hash the file as it stands now.
        // Recorded deps must reflect the md5 as of run start.
        let dep_snapshot = match snapshot_deps(unit, &record_index, repo_root, mtime_cache).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                on_event(UnitEvent::Running(unit.id));
                let outcome = UnitOutcome::Failed {
                    message: format!("resolve deps: {err:#}"),
                };
                on_event(UnitEvent::Finished(unit.id, outcome.clone()));
                early_results.push((unit.id, outcome, None));
                continue;
            }
        };

        let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
        let unit = (*unit).clone();
        let unit_records: HashMap<RelPath, Record> = unit
            .record_paths
            .iter()
            .filter_map(|p| records.get(p).map(|r| (p.clone(), r.clone())))
            .collect();
        let repo_root = repo_root.to_path_buf();
        let scm = scm.clone();
        let mtime_cache = mtime_cache.clone();
        let cache = cache.clone();
        let cancellation = cancellation.clone();

        on_event(UnitEvent::Running(unit.id));
        joins.spawn(async move {
            let _permit = permit;
            let (outcome, updated) = run_unit(
                &unit,
                &unit_records,
                &repo_root,
                &scm,
                &mtime_cache,
                &cache,
                &dep_snapshot,
                grace_period,
                &cancellation,
            )
            .await;
            (unit.id, outcome, updated)
        });
    }

    let mut results = early_results;
    while let Some(joined) = joins.join_next().await {
        let (id, outcome, updated) = joined.expect("unit task panicked");
        on_event(UnitEvent::Finished(id, outcome.clone()));
        results.push((id, outcome, updated));
    }
    Ok(results)
}

/// Resolve every dependency path of `unit` to its current md5: another
/// tracked record's current output md5 if the dep is itself tracked,
/// otherwise hash the live file. Mirrors the evaluator's step 5 resolution
/// (`fresh::evaluate`) so the snapshot taken here agrees with the one the
/// evaluator would have used to decide this unit was stale.
async fn snapshot_deps(
    unit: &Unit,
    records: &RecordIndex<'_>,
    repo_root: &Path,
    mtime_cache: &MtimeCache,
) -> Result<HashMap<RelPath, String>> {
    let mut snapshot = HashMap::new();
    for dep_path in &unit.deps {
        let md5 = if let Some(dep_record) = records.get(dep_path) {
            let out = dep_record
                .outs
                .iter()
                .find(|out| &out.path == dep_path)
                .ok_or_else(|| color_eyre::eyre::eyre!("dep record missing its own output: {dep_path}"))?;
            match &out.md5 {
                Some(md5) => md5.clone(),
                None => continue,
            }
        } else {
            let abs = dep_path.resolve(repo_root);
            if !crate::fs::exists(&abs).await {
                continue;
            }
            crate::mtime_cache::hash_file_cached(mtime_cache, &abs).await?
        };
        snapshot.insert(dep_path.clone(), md5);
    }
    Ok(snapshot)
}

/// Run one unit's command, then on success rehash its outputs and rewrite
/// its member records. Returns the records actually written, for the caller
/// to merge into its working copy for the next level.
#[allow(clippy::too_many_arguments)]
async fn run_unit<S: ScmAdapter>(
    unit: &Unit,
    unit_records: &HashMap<RelPath, Record>,
    repo_root: &Path,
    scm: &S,
    mtime_cache: &MtimeCache,
    cache: &LocalCache,
    dep_snapshot: &HashMap<RelPath, String>,
    grace_period: Duration,
    cancellation: &CancellationToken,
) -> (UnitOutcome, Option<HashMap<RelPath, Record>>) {
    let Some(cmd) = &unit.cmd else {
        return (UnitOutcome::Skipped, None);
    };

    let mut child = match tokio::process::Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .current_dir(repo_root)
        .stdin(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            return (
                UnitOutcome::Failed {
                    message: format!("spawn {cmd:?}: {err}"),
                },
                None,
            );
        }
    };

    let status = tokio::select! {
        status = child.wait() => status,
        _ = wait_for_cancellation(cancellation) => {
            terminate(&mut child, grace_period).await;
            return (UnitOutcome::Cancelled, None);
        }
    };

    let status = match status {
        Ok(status) => status,
        Err(err) => {
            return (
                UnitOutcome::Failed {
                    message: format!("wait on {cmd:?}: {err}"),
                },
                None,
            );
        }
    };

    if !status.success() {
        return (
            UnitOutcome::Failed {
                message: format!("{cmd:?} exited with {status}"),
            },
            None,
        );
    }

    for path in &unit.outs {
        if !crate::fs::exists(&path.resolve(repo_root)).await {
            return (
                UnitOutcome::Failed {
                    message: format!("expected output missing after run: {path}"),
                },
                None,
            );
        }
    }

    match finalize_records(unit, unit_records, repo_root, scm, mtime_cache, cache, dep_snapshot).await {
        Ok(updated) => (UnitOutcome::Succeeded, Some(updated)),
        Err(err) => (
            UnitOutcome::Failed {
                message: format!("record update after {cmd:?}: {err:#}"),
            },
            None,
        ),
    }
}

async fn wait_for_cancellation(token: &CancellationToken) {
    loop {
        if token.is_cancelled() {
            return;
        }
        token.notify.notified().await;
    }
}

/// Send SIGTERM, wait up to `grace_period`, then SIGKILL if still running.
async fn terminate(child: &mut tokio::process::Child, grace_period: Duration) {
    if let Some(pid) = child.id() {
        // SAFETY: `pid` is a live child process id owned by `child`; sending
        // SIGTERM does not touch memory.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }

    let graced = tokio::time::timeout(grace_period, child.wait()).await;
    if graced.is_err()
        && let Some(pid) = child.id()
    {
        // SAFETY: same as above, escalating to SIGKILL after the grace
        // period elapsed without the process exiting.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGKILL);
        }
        let _ = child.wait().await;
    }
}

/// Rehash every output of `unit`, push its content into `cache`, rewrite
/// each member record's `outs`, set `deps` from `dep_snapshot` (captured
/// before the subprocess started) and `code_ref` to the current revision,
/// then atomically write the record file. Returns the written records,
/// keyed by record path.
///
/// Cache objects are created by the executor: a record's `md5` is worthless
/// to `diff`/`cat`/`cache_path` until the content it names actually lives in
/// the cache.
async fn finalize_records<S: ScmAdapter>(
    unit: &Unit,
    unit_records: &HashMap<RelPath, Record>,
    repo_root: &Path,
    scm: &S,
    mtime_cache: &MtimeCache,
    cache: &LocalCache,
    dep_snapshot: &HashMap<RelPath, String>,
) -> Result<HashMap<RelPath, Record>> {
    let mut current_md5: HashMap<RelPath, String> = HashMap::new();
    for path in &unit.outs {
        let abs = path.resolve(repo_root);
        let md5 = if abs.is_dir() {
            let (md5, entries) = crate::hash::hash_dir(&abs).await?;
            let encoded = crate::hash::encode_manifest(&entries)?;
            cache.put_bytes(&encoded).await?;
            md5
        } else {
            let md5 = crate::mtime_cache::hash_file_cached(mtime_cache, &abs).await?;
            cache.put_file(&md5, &abs).await?;
            md5
        };
        current_md5.insert(path.clone(), md5);
    }

    let code_ref = scm.current_revision().await?;
    let mut written = HashMap::new();

    for path in &unit.record_paths {
        let Some(record) = unit_records.get(path) else {
            continue;
        };
        let mut record = record.clone();

        for out in &mut record.outs {
            if let Some(md5) = current_md5.get(&out.path) {
                let abs = out.path.resolve(repo_root);
                out.is_dir = abs.is_dir();
                out.size = if out.is_dir {
                    None
                } else {
                    tokio::fs::metadata(&abs).await.map(|m| m.len()).ok()
                };
                out.md5 = Some(md5.clone());
            }
        }

        if let Some(computation) = &mut record.computation {
            for (dep_path, recorded) in computation.deps.iter_mut() {
                if let Some(snapshotted) = dep_snapshot.get(dep_path) {
                    *recorded = snapshotted.clone();
                }
            }
            computation.code_ref = code_ref.clone();
        }

        record.write(&path.resolve(repo_root)).await?;
        written.insert(path.clone(), record);
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Computation, Output};
    use crate::scm::FakeScm;
    use tempfile::TempDir;

    fn out_record(out_path: &RelPath, cmd: &str, deps: &[(&RelPath, &str)]) -> Record {
        let mut dep_map = indexmap::IndexMap::new();
        for (path, md5) in deps {
            dep_map.insert((*path).clone(), md5.to_string());
        }
        Record {
            outs: vec![Output {
                path: out_path.clone(),
                md5: None,
                size: None,
                is_dir: false,
                extra: Default::default(),
            }],
            computation: Some(Computation {
                cmd: Some(cmd.to_owned()),
                code_ref: None,
                deps: dep_map,
                params: Default::default(),
            }),
            extra_meta: Default::default(),
        }
    }

    #[tokio::test]
    async fn runs_stale_unit_and_updates_record() {
        let dir = TempDir::new().unwrap();
        let out_path = RelPath::new("out.txt").unwrap();
        let record_path = RelPath::new("out.txt.yaml").unwrap();
        let record = out_record(&out_path, "echo hi > out.txt", &[]);

        let mut records = HashMap::new();
        records.insert(record_path.clone(), record.clone());

        let dag = crate::graph::build(&[(record_path.clone(), record)]).unwrap();
        let scm = FakeScm::new();
        let mtime_cache = Arc::new(MtimeCache::in_memory().unwrap());
        let cache = LocalCache::new(dir.path().join("cache"));
        let cancellation = CancellationToken::new();

        let report = run(
            &dag,
            &records,
            dir.path(),
            &scm,
            mtime_cache,
            &cache,
            ExecOptions::default(),
            &cancellation,
            |_| {},
        )
        .await
        .unwrap();

        assert_eq!(report.outcomes[&dag.units[0].id], UnitOutcome::Succeeded);
        let written = Record::read(&record_path.resolve(dir.path()))
            .await
            .unwrap()
            .expect("record file written after successful run");
        let written_md5 = written.outs[0].md5.clone().unwrap();
        assert_eq!(written_md5, crate::hash::hash_bytes(b"hi\n"));
        assert!(cache.contains(&written_md5).await);
    }

    #[tokio::test]
    async fn fresh_unit_is_skipped() {
        let dir = TempDir::new().unwrap();
        let out_path = RelPath::new("out.txt").unwrap();
        crate::fs::write(out_path.resolve(dir.path()), b"content").await.unwrap();
        let md5 = crate::hash::hash_bytes(b"content");

        let record = Record {
            outs: vec![Output {
                path: out_path.clone(),
                md5: Some(md5),
                size: Some(7),
                is_dir: false,
                extra: Default::default(),
            }],
            computation: None,
            extra_meta: Default::default(),
        };
        let mut records = HashMap::new();
        records.insert(out_path.clone(), record.clone());

        let dag = crate::graph::build(&[(out_path.clone(), record)]).unwrap();
        let scm = FakeScm::new();
        let mtime_cache = Arc::new(MtimeCache::in_memory().unwrap());
        let cache = LocalCache::new(dir.path().join("cache"));
        let cancellation = CancellationToken::new();

        let report = run(
            &dag,
            &records,
            dir.path(),
            &scm,
            mtime_cache,
            &cache,
            ExecOptions::default(),
            &cancellation,
            |_| {},
        )
        .await
        .unwrap();

        assert!(report.is_all_fresh());
    }

    #[tokio::test]
    async fn failing_command_marks_unit_failed() {
        let dir = TempDir::new().unwrap();
        let out_path = RelPath::new("out.txt").unwrap();
        let record = out_record(&out_path, "exit 1", &[]);
        let mut records = HashMap::new();
        records.insert(out_path.clone(), record.clone());

        let dag = crate::graph::build(&[(out_path.clone(), record)]).unwrap();
        let scm = FakeScm::new();
        let mtime_cache = Arc::new(MtimeCache::in_memory().unwrap());
        let cache = LocalCache::new(dir.path().join("cache"));
        let cancellation = CancellationToken::new();

        let report = run(
            &dag,
            &records,
            dir.path(),
            &scm,
            mtime_cache,
            &cache,
            ExecOptions::default(),
            &cancellation,
            |_| {},
        )
        .await
        .unwrap();

        assert!(matches!(
            report.outcomes[&dag.units[0].id],
            UnitOutcome::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn force_all_reruns_fresh_unit() {
        let dir = TempDir::new().unwrap();
        let out_path = RelPath::new("out.txt").unwrap();
        crate::fs::write(out_path.resolve(dir.path()), b"content").await.unwrap();
        let md5 = crate::hash::hash_bytes(b"content");

        let record = Record {
            outs: vec![Output {
                path: out_path.clone(),
                md5: Some(md5),
                size: Some(7),
                is_dir: false,
                extra: Default::default(),
            }],
            computation: Some(Computation {
                cmd: Some("echo hi > out.txt".to_owned()),
                code_ref: None,
                deps: Default::default(),
                params: Default::default(),
            }),
            extra_meta: Default::default(),
        };
        let mut records = HashMap::new();
        records.insert(out_path.clone(), record.clone());

        let dag = crate::graph::build(&[(out_path.clone(), record)]).unwrap();
        let scm = FakeScm::new();
        let mtime_cache = Arc::new(MtimeCache::in_memory().unwrap());
        let cache = LocalCache::new(dir.path().join("cache"));
        let cancellation = CancellationToken::new();
        let force = ForceMode::All;

        let report = run(
            &dag,
            &records,
            dir.path(),
            &scm,
            mtime_cache,
            &cache,
            ExecOptions {
                force_mode: &force,
                ..ExecOptions::default()
            },
            &cancellation,
            |_| {},
        )
        .await
        .unwrap();

        assert_eq!(report.outcomes[&dag.units[0].id], UnitOutcome::Succeeded);
    }

    #[tokio::test]
    async fn dry_run_executes_nothing() {
        let dir = TempDir::new().unwrap();
        let out_path = RelPath::new("out.txt").unwrap();
        let record = out_record(&out_path, "echo hi > out.txt", &[]);
        let mut records = HashMap::new();
        records.insert(out_path.clone(), record.clone());

        let dag = crate::graph::build(&[(out_path.clone(), record)]).unwrap();
        let scm = FakeScm::new();
        let mtime_cache = Arc::new(MtimeCache::in_memory().unwrap());
        let cache = LocalCache::new(dir.path().join("cache"));
        let cancellation = CancellationToken::new();

        let report = run(
            &dag,
            &records,
            dir.path(),
            &scm,
            mtime_cache,
            &cache,
            ExecOptions {
                dry_run: true,
                ..ExecOptions::default()
            },
            &cancellation,
            |_| {},
        )
        .await
        .unwrap();

        assert_eq!(report.outcomes[&dag.units[0].id], UnitOutcome::Succeeded);
        assert!(!crate::fs::exists(&out_path.resolve(dir.path())).await);
    }
}
