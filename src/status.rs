//! Status/plan reporter.
//!
//! Expands CLI-level targets (a record's output path, a directory prefix, or
//! a glob) into the matching tracked records, evaluates each with the
//! freshness evaluator over a bounded worker budget, and renders either a
//! human-readable report or a structured JSON one.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use color_eyre::{Result, eyre::Context};
use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::fresh::{self, FreshnessOutcome};
use crate::mtime_cache::MtimeCache;
use crate::path::RelPath;
use crate::record::Record;
use crate::scm::ScmAdapter;

/// One target as given by the caller: an exact output path (which also
/// matches everything nested under it, for a directory artifact), or a glob
/// over the relative path.
#[derive(Clone, Debug)]
pub enum Target {
    Path(RelPath),
    Glob(glob::Pattern),
}

impl Target {
    /// Parse one target string. A string containing glob metacharacters is
    /// treated as a pattern; otherwise it's an exact path or directory
    /// prefix.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.contains(['*', '?', '[']) {
            Ok(Target::Glob(glob::Pattern::new(raw).context("parse target glob")?))
        } else {
            Ok(Target::Path(RelPath::new(raw)?))
        }
    }

    fn matches(&self, candidate: &RelPath) -> bool {
        match self {
            Target::Path(path) => candidate == path || candidate.strip_prefix(path).is_some(),
            Target::Glob(pattern) => pattern.matches(candidate.as_str()),
        }
    }
}

/// Expand `targets` into the set of tracked output paths they select,
/// ordered by input order then lexicographically within each target (spec
/// §4.6, "ordering of the report is by input order then lexicographic").
pub fn expand_targets(targets: &[Target], records: &HashMap<RelPath, Record>) -> Vec<RelPath> {
    let mut all_outputs: Vec<&RelPath> = records.values().flat_map(|r| r.outs.iter().map(|o| &o.path)).collect();
    all_outputs.sort();
    all_outputs.dedup();

    let mut seen = HashSet::new();
    let mut ordered = Vec::new();
    for target in targets {
        let mut matching: Vec<&RelPath> = all_outputs.iter().copied().filter(|p| target.matches(p)).collect();
        matching.sort();
        for path in matching {
            if seen.insert(path.clone()) {
                ordered.push(path.clone());
            }
        }
    }
    ordered
}

/// A record's classification, flattened from [`FreshnessOutcome`] for
/// serialization.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Fresh,
    DataStale,
    DepStale,
    MissingOutput,
    MissingDep,
    Error,
}

impl State {
    /// Icon prefixed to each line of the human-readable report.
    pub fn icon(self) -> &'static str {
        match self {
            State::Fresh => "✓",
            State::DataStale | State::DepStale => "~",
            State::MissingOutput | State::MissingDep => "!",
            State::Error => "✗",
        }
    }
}

impl From<&FreshnessOutcome> for State {
    fn from(outcome: &FreshnessOutcome) -> Self {
        match outcome {
            FreshnessOutcome::Fresh => State::Fresh,
            FreshnessOutcome::DataStale { .. } => State::DataStale,
            FreshnessOutcome::DepStale { .. } => State::DepStale,
            FreshnessOutcome::MissingOutput { .. } => State::MissingOutput,
            FreshnessOutcome::MissingDep { .. } => State::MissingDep,
            FreshnessOutcome::Error { .. } => State::Error,
        }
    }
}

/// One path's entry in a status report.
#[derive(Clone, Debug, Serialize)]
pub struct StatusEntry {
    pub path: RelPath,
    pub state: State,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_md5: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recorded_md5: Option<String>,
}

/// Classify every output path selected by `targets`, in the order
/// [`expand_targets`] produces. Evaluation never throws (it's the same
/// non-throwing [`FreshnessOutcome`] the executor matches on), so neither
/// does this.
pub async fn status<S: ScmAdapter>(
    targets: &[Target],
    records: &HashMap<RelPath, Record>,
    repo_root: &Path,
    scm: &S,
    mtime_cache: &MtimeCache,
    workers: usize,
) -> Vec<StatusEntry> {
    let ordered = expand_targets(targets, records);
    let record_index = fresh::index_by_output(records);

    let jobs = ordered
        .into_iter()
        .filter_map(|path| record_index.get(&path).map(|record| (path, (*record).clone())));

    stream::iter(jobs)
        .map(|(path, record)| {
            let record_index = &record_index;
            async move {
                let outcome = fresh::evaluate(&record, repo_root, scm, record_index, mtime_cache).await;
                build_entry(path, &record, outcome, repo_root, mtime_cache).await
            }
        })
        .buffered(workers.max(1))
        .collect()
        .await
}

async fn build_entry(
    path: RelPath,
    record: &Record,
    outcome: FreshnessOutcome,
    repo_root: &Path,
    mtime_cache: &MtimeCache,
) -> StatusEntry {
    let recorded_md5 = record.outs.iter().find(|o| o.path == path).and_then(|o| o.md5.clone());

    let abs = path.resolve(repo_root);
    let current_md5 = if crate::fs::exists(&abs).await {
        if abs.is_dir() {
            crate::hash::hash_dir(&abs).await.ok().map(|(md5, _)| md5)
        } else {
            crate::mtime_cache::hash_file_cached(mtime_cache, &abs).await.ok()
        }
    } else {
        None
    };

    let reason = match &outcome {
        FreshnessOutcome::Fresh => None,
        FreshnessOutcome::MissingOutput { path } => Some(format!("missing output: {path}")),
        FreshnessOutcome::DataStale { path } => Some(format!("content changed: {path}")),
        FreshnessOutcome::DepStale { path } => Some(format!("dependency changed: {path}")),
        FreshnessOutcome::MissingDep { path } => Some(format!("missing dependency: {path}")),
        FreshnessOutcome::Error { message } => Some(message.clone()),
    };

    StatusEntry {
        path,
        state: State::from(&outcome),
        reason,
        current_md5,
        recorded_md5,
    }
}

/// Render a human-readable report: one icon-prefixed line per entry, then a
/// trailing summary count.
pub fn render_human(entries: &[StatusEntry]) -> String {
    let mut out = String::new();
    let stale = entries.iter().filter(|e| e.state != State::Fresh).count();

    for entry in entries {
        match &entry.reason {
            Some(reason) => out.push_str(&format!("{} {} ({reason})\n", entry.state.icon(), entry.path)),
            None => out.push_str(&format!("{} {}\n", entry.state.icon(), entry.path)),
        }
    }
    out.push_str(&format!("{stale} stale, {} fresh\n", entries.len() - stale));
    out
}

/// Render the structured JSON report: `path -> {state, reason, current_md5?, recorded_md5?}`.
pub fn render_json(entries: &[StatusEntry]) -> Result<String> {
    let map: indexmap::IndexMap<&str, &StatusEntry> = entries.iter().map(|e| (e.path.as_str(), e)).collect();
    serde_json::to_string_pretty(&map).context("encode status report as json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Computation, Output};
    use crate::scm::FakeScm;
    use pretty_assertions::assert_eq as pretty_assert_eq;
    use tempfile::TempDir;

    fn data_record(path: &RelPath, md5: &str) -> Record {
        Record {
            outs: vec![Output {
                path: path.clone(),
                md5: Some(md5.to_owned()),
                size: Some(1),
                is_dir: false,
                extra: Default::default(),
            }],
            computation: None,
            extra_meta: Default::default(),
        }
    }

    #[test]
    fn expand_targets_orders_by_input_then_lexicographic() {
        let mut records = HashMap::new();
        for name in ["b.txt", "a.txt", "c/d.txt"] {
            let path = RelPath::new(name).unwrap();
            records.insert(path.clone(), data_record(&path, "X"));
        }

        let targets = vec![
            Target::parse("c").unwrap(),
            Target::Glob(glob::Pattern::new("*.txt").unwrap()),
        ];
        let ordered = expand_targets(&targets, &records);
        let names: Vec<_> = ordered.iter().map(|p| p.as_str().to_owned()).collect();
        pretty_assert_eq!(names, vec!["c/d.txt", "a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn status_classifies_fresh_and_data_stale() {
        let dir = TempDir::new().unwrap();
        let fresh_path = RelPath::new("fresh.txt").unwrap();
        crate::fs::write(fresh_path.resolve(dir.path()), b"content").await.unwrap();
        let fresh_md5 = crate::hash::hash_bytes(b"content");

        let stale_path = RelPath::new("stale.txt").unwrap();
        crate::fs::write(stale_path.resolve(dir.path()), b"changed").await.unwrap();

        let mut records = HashMap::new();
        records.insert(fresh_path.clone(), data_record(&fresh_path, &fresh_md5));
        records.insert(stale_path.clone(), data_record(&stale_path, "not-the-real-hash"));

        let scm = FakeScm::new();
        let mtime_cache = MtimeCache::in_memory().unwrap();
        let targets = vec![Target::Glob(glob::Pattern::new("*.txt").unwrap())];

        let entries = status(&targets, &records, dir.path(), &scm, &mtime_cache, 4).await;
        pretty_assert_eq!(entries.len(), 2);

        let fresh_entry = entries.iter().find(|e| e.path == fresh_path).unwrap();
        pretty_assert_eq!(fresh_entry.state, State::Fresh);

        let stale_entry = entries.iter().find(|e| e.path == stale_path).unwrap();
        pretty_assert_eq!(stale_entry.state, State::DataStale);
        assert!(stale_entry.reason.is_some());

        let human = render_human(&entries);
        assert!(human.contains("1 stale, 1 fresh"));

        let json = render_json(&entries).unwrap();
        assert!(json.contains("\"data_stale\""));
    }

    #[tokio::test]
    async fn missing_output_reports_placeholder_as_missing() {
        let dir = TempDir::new().unwrap();
        let path = RelPath::new("missing.txt").unwrap();
        let mut records = HashMap::new();
        records.insert(path.clone(), data_record(&path, "deadbeef"));

        let scm = FakeScm::new();
        let mtime_cache = MtimeCache::in_memory().unwrap();
        let targets = vec![Target::parse("missing.txt").unwrap()];

        let entries = status(&targets, &records, dir.path(), &scm, &mtime_cache, 1).await;
        pretty_assert_eq!(entries.len(), 1);
        pretty_assert_eq!(entries[0].state, State::MissingOutput);
        pretty_assert_eq!(entries[0].current_md5, None);
    }

    #[tokio::test]
    async fn dep_stale_is_reported_with_reason() {
        let dir = TempDir::new().unwrap();
        let out_path = RelPath::new("b.txt").unwrap();
        crate::fs::write(out_path.resolve(dir.path()), b"out").await.unwrap();
        let out_md5 = crate::hash::hash_bytes(b"out");

        let dep_path = RelPath::new("a.txt").unwrap();
        crate::fs::write(dep_path.resolve(dir.path()), b"new").await.unwrap();

        let mut deps = indexmap::IndexMap::new();
        deps.insert(dep_path.clone(), "stale".to_owned());
        let record = Record {
            outs: vec![Output {
                path: out_path.clone(),
                md5: Some(out_md5),
                size: Some(3),
                is_dir: false,
                extra: Default::default(),
            }],
            computation: Some(Computation {
                cmd: Some("touch b".to_owned()),
                code_ref: None,
                deps,
                params: Default::default(),
            }),
            extra_meta: Default::default(),
        };
        let mut records = HashMap::new();
        records.insert(out_path.clone(), record);

        let scm = FakeScm::new();
        let mtime_cache = MtimeCache::in_memory().unwrap();
        let targets = vec![Target::parse("b.txt").unwrap()];

        let entries = status(&targets, &records, dir.path(), &scm, &mtime_cache, 1).await;
        pretty_assert_eq!(entries[0].state, State::DepStale);
        assert!(entries[0].reason.as_deref().unwrap().contains("a.txt"));
    }
}
