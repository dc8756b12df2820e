//! Named seed scenarios, exercised end-to-end through [`Repo`] rather than
//! any one module in isolation.

use std::sync::Arc;

use dvx::cache::LocalCache;
use dvx::diff::DiffOptions;
use dvx::exec::{CancellationToken, ExecOptions, ForceMode};
use dvx::mtime_cache::MtimeCache;
use dvx::path::RelPath;
use dvx::record::{Computation, Output, Record};
use dvx::repo::Repo;
use dvx::scm::FakeScm;
use dvx::status::Target;
use pretty_assertions::assert_eq as pretty_assert_eq;
use tempfile::TempDir;

fn test_repo(dir: &TempDir) -> Repo<FakeScm> {
    Repo::with_collaborators(
        dir.path(),
        LocalCache::new(dir.path().join(".cache")),
        Arc::new(MtimeCache::in_memory().unwrap()),
        FakeScm::new(),
    )
}

async fn write(path: &RelPath, dir: &TempDir, content: &[u8]) {
    dvx::fs::write(&path.resolve(dir.path()), content).await.unwrap();
}

/// An up-to-date two-record graph re-run executes nothing.
#[test_log::test(tokio::test)]
async fn fresh_no_op_run_executes_nothing() {
    let dir = TempDir::new().unwrap();
    let repo = test_repo(&dir);

    let a = RelPath::new("a").unwrap();
    write(&a, &dir, b"a-content").await;
    repo.add(&[a.clone()], None, None, false).await.unwrap();

    let b = RelPath::new("b").unwrap();
    repo.add(&[b.clone()], Some(&[a.clone()]), Some("touch b"), false)
        .await
        .unwrap();

    // Run once to materialize `b` and record its real hash.
    let cancellation = CancellationToken::new();
    repo.run(&[Target::parse("b").unwrap()], ExecOptions::default(), &cancellation, |_| {})
        .await
        .unwrap();

    // Second run over the whole graph: everything is already fresh.
    let report = repo
        .run(&[Target::parse("*").unwrap()], ExecOptions::default(), &cancellation, |_| {})
        .await
        .unwrap();

    assert!(report.is_all_fresh());
    pretty_assert_eq!(report.outcomes.len(), 2);
}

/// A dependency's content changing ripples into a single downstream re-run.
#[test_log::test(tokio::test)]
async fn dependency_content_change_triggers_downstream_rerun() {
    let dir = TempDir::new().unwrap();
    let repo = test_repo(&dir);

    let a = RelPath::new("a").unwrap();
    write(&a, &dir, b"A0").await;
    // `a` is itself produced by a (no-op) command so it can be rehashed and
    // its record updated in place when its content changes underneath it.
    repo.add(&[a.clone()], None, Some("true"), false).await.unwrap();

    let b = RelPath::new("b").unwrap();
    repo.add(&[b.clone()], Some(&[a.clone()]), Some("touch b"), false)
        .await
        .unwrap();

    let cancellation = CancellationToken::new();
    repo.run(&[Target::parse("*").unwrap()], ExecOptions::default(), &cancellation, |_| {})
        .await
        .unwrap();

    // Mutate `a`'s content directly, bypassing the tool.
    write(&a, &dir, b"A1-different").await;

    let report = repo
        .run(&[Target::parse("*").unwrap()], ExecOptions::default(), &cancellation, |_| {})
        .await
        .unwrap();
    assert!(!report.is_all_fresh());

    let a_record = Record::read(&dvx::record::record_path_for(&a).resolve(dir.path()))
        .await
        .unwrap()
        .unwrap();
    let b_record = Record::read(&dvx::record::record_path_for(&b).resolve(dir.path()))
        .await
        .unwrap()
        .unwrap();

    let a_md5 = a_record.outs[0].md5.clone().unwrap();
    pretty_assert_eq!(a_md5, dvx::hash::hash_bytes(b"A1-different"));
    pretty_assert_eq!(b_record.computation.unwrap().deps[&a], a_md5);
}

/// Co-outputs sharing one `cmd` run as exactly one subprocess.
#[test_log::test(tokio::test)]
async fn co_outputs_run_as_one_subprocess() {
    let dir = TempDir::new().unwrap();
    let repo = test_repo(&dir);

    let x = RelPath::new("x").unwrap();
    let y = RelPath::new("y").unwrap();
    let cmd = "touch x y";
    repo.add(&[x.clone()], None, Some(cmd), false).await.unwrap();
    repo.add(&[y.clone()], None, Some(cmd), false).await.unwrap();

    let cancellation = CancellationToken::new();
    let report = repo
        .run(&[Target::parse("*").unwrap()], ExecOptions::default(), &cancellation, |_| {})
        .await
        .unwrap();

    // One computation unit for the shared `cmd`, one outcome for it.
    pretty_assert_eq!(report.outcomes.len(), 1);
    assert!(dvx::fs::exists(&x.resolve(dir.path())).await);
    assert!(dvx::fs::exists(&y.resolve(dir.path())).await);
}

/// `force_upstream` reruns a fresh unit and whatever depends on it.
#[test_log::test(tokio::test)]
async fn force_upstream_reruns_fresh_unit_and_dependents() {
    let dir = TempDir::new().unwrap();
    let repo = test_repo(&dir);

    let raw = RelPath::new("raw/r.parquet").unwrap();
    write(&raw, &dir, b"raw-data").await;
    repo.add(&[raw.clone()], None, None, false).await.unwrap();

    let norm = RelPath::new("norm/n.parquet").unwrap();
    repo.add(&[norm.clone()], Some(&[raw.clone()]), Some("touch norm/n.parquet"), false)
        .await
        .unwrap();

    let cancellation = CancellationToken::new();
    repo.run(&[Target::parse("*").unwrap()], ExecOptions::default(), &cancellation, |_| {})
        .await
        .unwrap();

    // Both are fresh; force `raw/*` stale.
    let force = ForceMode::Upstream(glob::Pattern::new("raw/*").unwrap());
    let report = repo
        .run(
            &[Target::parse("*").unwrap()],
            ExecOptions {
                force_mode: &force,
                ..ExecOptions::default()
            },
            &cancellation,
            |_| {},
        )
        .await
        .unwrap();

    assert!(!report.is_all_fresh());
}

/// A directory diff reports added/removed/modified entries in
/// alphabetical order.
#[test_log::test(tokio::test)]
async fn directory_diff_reports_sorted_changes() {
    let dir = TempDir::new().unwrap();
    let mut scm = FakeScm::new();

    let manifest_old = dvx::hash::encode_manifest(&[
        entry("a", "MA0", 1),
        entry("b", "MB0", 1),
    ])
    .unwrap();
    let manifest_old_md5 = dvx::hash::hash_bytes(&manifest_old);

    let manifest_new = dvx::hash::encode_manifest(&[
        entry("a", "MA1", 1),
        entry("c", "MC0", 1),
    ])
    .unwrap();
    let manifest_new_md5 = dvx::hash::hash_bytes(&manifest_new);

    let d = RelPath::new("d").unwrap();
    let record_path = dvx::record::record_path_for(&d);
    scm.set_blob("old", record_path.clone(), dir_record_yaml(&d, &manifest_old_md5, true));
    scm.set_blob("new", record_path.clone(), dir_record_yaml(&d, &manifest_new_md5, true));

    let cache = LocalCache::new(dir.path().join(".cache"));
    cache.put_bytes(&manifest_old).await.unwrap();
    cache.put_bytes(&manifest_new).await.unwrap();

    let options = DiffOptions::default();
    let rendered = dvx::diff::diff(&[d], "old..new", dir.path(), &scm, &cache, &options)
        .await
        .unwrap();

    let b_pos = rendered.find("- b").expect("removed entry present");
    let c_pos = rendered.find("+ c").expect("added entry present");
    let a_pos = rendered.find("~ a").expect("modified entry present");
    assert!(b_pos < c_pos && c_pos < a_pos, "entries out of order:\n{rendered}");
}

/// A preprocessing command runs on each side before the textual diff.
#[test_log::test(tokio::test)]
async fn preprocessed_diff_compares_transformed_content() {
    let dir = TempDir::new().unwrap();
    let mut scm = FakeScm::new();

    let path = RelPath::new("data.txt").unwrap();
    let record_path = dvx::record::record_path_for(&path);
    let old_md5 = dvx::hash::hash_bytes(b"line-one-old\nrest\n");
    let new_md5 = dvx::hash::hash_bytes(b"line-one-new\nrest\n");
    scm.set_blob("old", record_path.clone(), file_record_yaml(&path, &old_md5));
    scm.set_blob("new", record_path.clone(), file_record_yaml(&path, &new_md5));

    let cache = LocalCache::new(dir.path().join(".cache"));
    cache.put_bytes(b"line-one-old\nrest\n").await.unwrap();
    cache.put_bytes(b"line-one-new\nrest\n").await.unwrap();

    let options = DiffOptions {
        preprocess: Some("head -n1 {}".to_owned()),
        ..DiffOptions::default()
    };
    let rendered = dvx::diff::diff(&[path], "old..new", dir.path(), &scm, &cache, &options)
        .await
        .unwrap();

    assert!(rendered.contains("line-one-old"));
    assert!(rendered.contains("line-one-new"));
    assert!(!rendered.contains("rest"));
}

fn entry(relpath: &str, md5: &str, size: u64) -> dvx::hash::ManifestEntry {
    dvx::hash::ManifestEntry {
        relpath: relpath.to_owned(),
        md5: md5.to_owned(),
        size,
    }
}

fn dir_record_yaml(path: &RelPath, md5: &str, is_dir: bool) -> Vec<u8> {
    let record = Record {
        outs: vec![Output {
            path: path.clone(),
            md5: Some(md5.to_owned()),
            size: Some(0),
            is_dir,
            extra: Default::default(),
        }],
        computation: None,
        extra_meta: Default::default(),
    };
    record.to_yaml().unwrap().into_bytes()
}

fn file_record_yaml(path: &RelPath, md5: &str) -> Vec<u8> {
    let record = Record {
        outs: vec![Output {
            path: path.clone(),
            md5: Some(md5.to_owned()),
            size: Some(0),
            is_dir: false,
            extra: Default::default(),
        }],
        computation: Some(Computation {
            cmd: None,
            code_ref: None,
            deps: Default::default(),
            params: Default::default(),
        }),
        extra_meta: Default::default(),
    };
    record.to_yaml().unwrap().into_bytes()
}
