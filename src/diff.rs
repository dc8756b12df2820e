//! Diff engine.
//!
//! Produces content diffs for one or more tracked paths across two
//! revisions (or one revision and the live working tree), optionally piping
//! each side through a preprocessing command before comparison. Directory
//! artifacts diff structurally over their manifests rather than as opaque
//! blobs.

use std::collections::BTreeSet;
use std::path::Path;

use color_eyre::Result;
use color_eyre::eyre::{Context, bail};
use colored::Colorize;
use similar::TextDiff;
use tracing::instrument;

use crate::cache::LocalCache;
use crate::hash::ManifestEntry;
use crate::path::RelPath;
use crate::record::{self, Output, Record};
use crate::scm::ScmAdapter;

/// One side of a diff: a named revision, or the live working tree.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum RevSide {
    Revision(String),
    WorkingTree,
}

/// Split a revision-range expression (`X`, `X..Y`, `X^..X`) into its two
/// sides. A bare `X` diffs `X` against the working tree. The adapter's
/// revision strings
/// already accept git's own range suffixes like `X^`, so splitting on `..`
/// is all the resolution this needs.
pub fn resolve_range(spec: &str) -> (RevSide, RevSide) {
    match spec.split_once("..") {
        Some((old, new)) => (RevSide::Revision(old.to_owned()), RevSide::Revision(new.to_owned())),
        None => (RevSide::Revision(spec.to_owned()), RevSide::WorkingTree),
    }
}

/// How a path's content was found for one side of a diff.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum CacheStatus {
    TrackedPresent,
    TrackedMissingFromCache,
    NotTracked,
    Absent,
}

/// Options controlling one `diff` invocation.
pub struct DiffOptions {
    /// Lines of context around each unified-diff hunk.
    pub context_lines: usize,
    /// Trim trailing whitespace from each line before comparing.
    pub ignore_whitespace: bool,
    pub color: bool,
    /// Bypass content fetching; emit only `path: old[:8] -> new[:8]`.
    pub summary: bool,
    /// Shell command with a literal `{}` placeholder for the material
    /// file path, run on each side before comparison.
    pub preprocess: Option<String>,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            context_lines: 3,
            ignore_whitespace: false,
            color: true,
            summary: false,
            preprocess: None,
        }
    }
}

/// What one side of a diff resolved to.
enum Resolved {
    File {
        status: CacheStatus,
        md5: Option<String>,
        content: Option<Vec<u8>>,
    },
    Dir {
        status: CacheStatus,
        md5: Option<String>,
        manifest: Vec<ManifestEntry>,
    },
    Absent,
}

/// Diff `paths` between the two sides of `revspec`, returning the rendered
/// textual output (or, under `options.summary`, the compact summary form).
#[instrument(skip(repo_root, scm, cache, options))]
pub async fn diff<S: ScmAdapter>(
    paths: &[RelPath],
    revspec: &str,
    repo_root: &Path,
    scm: &S,
    cache: &LocalCache,
    options: &DiffOptions,
) -> Result<String> {
    let (old_side, new_side) = resolve_range(revspec);
    let mut out = String::new();

    for path in paths {
        let old = resolve_side(&old_side, path, repo_root, scm, cache).await?;
        let new = resolve_side(&new_side, path, repo_root, scm, cache).await?;

        if options.summary {
            let old_md5 = md5_of(&old);
            let new_md5 = md5_of(&new);
            if old_md5 != new_md5 {
                out.push_str(&format!(
                    "{path}: {} -> {}\n",
                    short_or_none(old_md5.as_deref()),
                    short_or_none(new_md5.as_deref()),
                ));
            }
            continue;
        }

        render_pair(path, old, new, options, &mut out).await?;
    }

    Ok(out)
}

/// Resolve `path` on `side` to its content: a direct record at `side`, else
/// an entry inside some ancestor directory's tracked manifest, else (on the
/// working tree only) the live file, else absent.
async fn resolve_side<S: ScmAdapter>(
    side: &RevSide,
    path: &RelPath,
    repo_root: &Path,
    scm: &S,
    cache: &LocalCache,
) -> Result<Resolved> {
    if let Some(record) = read_record(side, &record::record_path_for(path), repo_root, scm).await? {
        if let Some(out) = record.outs.iter().find(|o| o.path == *path) {
            return resolve_tracked(out, cache).await;
        }
    }

    if let Some(resolved) = resolve_under_directory(side, path, repo_root, scm, cache).await? {
        return Ok(resolved);
    }

    match side {
        RevSide::WorkingTree => {
            let abs = path.resolve(repo_root);
            match crate::fs::read_buffered(&abs).await? {
                Some(content) => {
                    let md5 = crate::hash::hash_bytes(&content);
                    Ok(Resolved::File {
                        status: CacheStatus::NotTracked,
                        md5: Some(md5),
                        content: Some(content),
                    })
                }
                None => Ok(Resolved::Absent),
            }
        }
        RevSide::Revision(_) => Ok(Resolved::Absent),
    }
}

/// Read and parse the record at `record_path` on `side`. A record absent at
/// that revision (or unreadable as UTF-8 YAML) is simply "no record here",
/// not an error.
async fn read_record<S: ScmAdapter>(
    side: &RevSide,
    record_path: &RelPath,
    repo_root: &Path,
    scm: &S,
) -> Result<Option<Record>> {
    match side {
        RevSide::WorkingTree => Record::read(&record_path.resolve(repo_root)).await,
        RevSide::Revision(rev) => match scm.read_blob_at(rev, record_path).await {
            Ok(bytes) => {
                let text = String::from_utf8(bytes).context("record blob is not utf-8")?;
                Record::from_yaml(&text).map(Some)
            }
            Err(_) => Ok(None),
        },
    }
}

/// Walk upward from `path`'s nearest ancestor looking for a directory
/// record whose manifest contains `path`'s remainder: resolution walks
/// upward to the nearest artifact record whose output is a directory.
async fn resolve_under_directory<S: ScmAdapter>(
    side: &RevSide,
    path: &RelPath,
    repo_root: &Path,
    scm: &S,
    cache: &LocalCache,
) -> Result<Option<Resolved>> {
    let parts: Vec<&str> = path.as_str().split('/').collect();
    for len in (1..parts.len()).rev() {
        let prefix = RelPath::new(parts[..len].join("/"))?;
        let Some(record) = read_record(side, &record::record_path_for(&prefix), repo_root, scm).await? else {
            continue;
        };
        let Some(out) = record.outs.iter().find(|o| o.path == prefix && o.is_dir) else {
            continue;
        };
        let Some(rest) = path.strip_prefix(&prefix) else {
            continue;
        };

        return Ok(Some(match resolve_tracked(out, cache).await? {
            Resolved::Dir {
                status: CacheStatus::TrackedMissingFromCache,
                ..
            } => Resolved::File {
                status: CacheStatus::TrackedMissingFromCache,
                md5: None,
                content: None,
            },
            Resolved::Dir { manifest, .. } => match manifest.into_iter().find(|e| e.relpath == rest.as_str()) {
                Some(entry) => Resolved::File {
                    status: CacheStatus::TrackedPresent,
                    md5: Some(entry.md5.clone()),
                    content: cache.get(&entry.md5).await?,
                },
                None => Resolved::Absent,
            },
            other => other,
        }));
    }
    Ok(None)
}

/// Resolve a record's own output entry to its cached content or manifest.
async fn resolve_tracked(out: &Output, cache: &LocalCache) -> Result<Resolved> {
    let Some(md5) = &out.md5 else {
        return Ok(Resolved::Absent);
    };

    if out.is_dir {
        match cache.get(md5).await? {
            Some(bytes) => Ok(Resolved::Dir {
                status: CacheStatus::TrackedPresent,
                md5: Some(md5.clone()),
                manifest: crate::hash::decode_manifest(&bytes)?,
            }),
            None => Ok(Resolved::Dir {
                status: CacheStatus::TrackedMissingFromCache,
                md5: Some(md5.clone()),
                manifest: Vec::new(),
            }),
        }
    } else {
        match cache.get(md5).await? {
            Some(content) => Ok(Resolved::File {
                status: CacheStatus::TrackedPresent,
                md5: Some(md5.clone()),
                content: Some(content),
            }),
            None => Ok(Resolved::File {
                status: CacheStatus::TrackedMissingFromCache,
                md5: Some(md5.clone()),
                content: None,
            }),
        }
    }
}

fn md5_of(resolved: &Resolved) -> Option<String> {
    match resolved {
        Resolved::File { md5, .. } | Resolved::Dir { md5, .. } => md5.clone(),
        Resolved::Absent => None,
    }
}

fn short_or_none(md5: Option<&str>) -> String {
    match md5 {
        Some(md5) => md5.chars().take(8).collect(),
        None => "none".to_owned(),
    }
}

async fn render_pair(
    path: &RelPath,
    old: Resolved,
    new: Resolved,
    options: &DiffOptions,
    out: &mut String,
) -> Result<()> {
    for (label, resolved) in [("old", &old), ("new", &new)] {
        let missing = matches!(
            resolved,
            Resolved::File {
                status: CacheStatus::TrackedMissingFromCache,
                ..
            } | Resolved::Dir {
                status: CacheStatus::TrackedMissingFromCache,
                ..
            }
        );
        if missing {
            out.push_str(&format!(
                "{path}: {label} side is tracked but missing from the cache; run the pull command to fetch it\n"
            ));
        }
    }

    match (old, new) {
        (
            Resolved::Dir {
                manifest: old_manifest,
                ..
            },
            Resolved::Dir {
                manifest: new_manifest,
                ..
            },
        ) => {
            out.push_str(&format!("--- {path} (old)\n+++ {path} (new)\n"));
            out.push_str(&diff_manifests(&old_manifest, &new_manifest, options.color));
        }
        (old, new) => {
            let old_bytes = take_bytes(old, options).await?;
            let new_bytes = take_bytes(new, options).await?;
            out.push_str(&diff_text(&old_bytes, &new_bytes, options));
        }
    }

    Ok(())
}

async fn take_bytes(resolved: Resolved, options: &DiffOptions) -> Result<Vec<u8>> {
    let content = match resolved {
        Resolved::File { content, .. } => content.unwrap_or_default(),
        Resolved::Dir { .. } | Resolved::Absent => Vec::new(),
    };
    match &options.preprocess {
        Some(cmd) if !content.is_empty() => preprocess(&content, cmd).await,
        _ => Ok(content),
    }
}

/// Materialize `content` to a temp file and run `cmd` with its literal `{}`
/// substituted for that file's path, capturing stdout as the side's content.
async fn preprocess(content: &[u8], cmd: &str) -> Result<Vec<u8>> {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().context("create preprocess tempfile")?;
    file.write_all(content).context("write preprocess tempfile")?;
    let path = file.path().to_string_lossy().into_owned();
    let full_cmd = cmd.replace("{}", &path);

    let output = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(&full_cmd)
        .output()
        .await
        .with_context(|| format!("spawn preprocess command: {full_cmd:?}"))?;
    if !output.status.success() {
        bail!("preprocess command failed: {full_cmd:?}");
    }
    Ok(output.stdout)
}

fn diff_text(old: &[u8], new: &[u8], options: &DiffOptions) -> String {
    let old_text = String::from_utf8_lossy(old);
    let new_text = String::from_utf8_lossy(new);

    let (old_text, new_text) = if options.ignore_whitespace {
        (trim_lines(&old_text), trim_lines(&new_text))
    } else {
        (old_text.into_owned(), new_text.into_owned())
    };

    let diff = TextDiff::from_lines(old_text.as_str(), new_text.as_str());
    let rendered = diff
        .unified_diff()
        .context_radius(options.context_lines)
        .header("old", "new")
        .to_string();

    if options.color { colorize_unified(&rendered) } else { rendered }
}

fn trim_lines(text: &str) -> String {
    text.lines().map(|line| line.trim_end()).collect::<Vec<_>>().join("\n")
}

fn colorize_unified(rendered: &str) -> String {
    let mut out = String::new();
    for line in rendered.lines() {
        if line.starts_with("+++") || line.starts_with("---") || line.starts_with("@@") {
            out.push_str(line);
        } else if let Some(rest) = line.strip_prefix('+') {
            out.push('+');
            out.push_str(&rest.green().to_string());
        } else if let Some(rest) = line.strip_prefix('-') {
            out.push('-');
            out.push_str(&rest.red().to_string());
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    out
}

/// Structural diff of two directory manifests, sorted lexicographically by
/// `relpath`.
fn diff_manifests(old: &[ManifestEntry], new: &[ManifestEntry], color: bool) -> String {
    let old_by_path: std::collections::HashMap<&str, &ManifestEntry> =
        old.iter().map(|e| (e.relpath.as_str(), e)).collect();
    let new_by_path: std::collections::HashMap<&str, &ManifestEntry> =
        new.iter().map(|e| (e.relpath.as_str(), e)).collect();

    let mut relpaths: BTreeSet<&str> = BTreeSet::new();
    relpaths.extend(old_by_path.keys());
    relpaths.extend(new_by_path.keys());

    let mut out = String::new();
    for relpath in relpaths {
        let line = match (old_by_path.get(relpath), new_by_path.get(relpath)) {
            (None, Some(n)) => Some((format!("+ {relpath} {} {}", short(&n.md5), n.size), color.then_some(Color::Green))),
            (Some(o), None) => Some((format!("- {relpath} {} {}", short(&o.md5), o.size), color.then_some(Color::Red))),
            (Some(o), Some(n)) if o.md5 != n.md5 => Some((
                format!("~ {relpath} {} -> {}", short(&o.md5), short(&n.md5)),
                color.then_some(Color::Yellow),
            )),
            _ => None,
        };
        if let Some((line, tint)) = line {
            out.push_str(&match tint {
                Some(Color::Green) => line.green().to_string(),
                Some(Color::Red) => line.red().to_string(),
                Some(Color::Yellow) => line.yellow().to_string(),
                None => line,
            });
            out.push('\n');
        }
    }
    out
}

enum Color {
    Green,
    Red,
    Yellow,
}

fn short(md5: &str) -> &str {
    &md5[..md5.len().min(8)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Output;
    use crate::scm::FakeScm;
    use pretty_assertions::assert_eq as pretty_assert_eq;
    use tempfile::TempDir;

    fn file_record(path: &RelPath, md5: &str) -> Record {
        Record {
            outs: vec![Output {
                path: path.clone(),
                md5: Some(md5.to_owned()),
                size: Some(md5.len() as u64),
                is_dir: false,
                extra: Default::default(),
            }],
            computation: None,
            extra_meta: Default::default(),
        }
    }

    #[test]
    fn resolve_range_splits_on_dotdot() {
        let (old, new) = resolve_range("r1..r2");
        pretty_assert_eq!(old, RevSide::Revision("r1".to_owned()));
        pretty_assert_eq!(new, RevSide::Revision("r2".to_owned()));

        let (old, new) = resolve_range("r1");
        pretty_assert_eq!(old, RevSide::Revision("r1".to_owned()));
        pretty_assert_eq!(new, RevSide::WorkingTree);
    }

    #[tokio::test]
    async fn identical_revisions_diff_to_empty() {
        let dir = TempDir::new().unwrap();
        let cache = LocalCache::new(dir.path().join("cache"));
        let path = RelPath::new("a.txt").unwrap();
        let md5 = cache.put_bytes(b"content").await.unwrap();

        let mut scm = FakeScm::new();
        let record_path = record::record_path_for(&path);
        scm.set_blob("r1", record_path, file_record(&path, &md5).to_yaml().unwrap());

        let output = diff(
            &[path],
            "r1..r1",
            dir.path(),
            &scm,
            &cache,
            &DiffOptions {
                color: false,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        pretty_assert_eq!(output, "");
    }

    #[tokio::test]
    async fn summary_mode_reports_changed_md5() {
        let dir = TempDir::new().unwrap();
        let cache = LocalCache::new(dir.path().join("cache"));
        let path = RelPath::new("a.txt").unwrap();
        let md5_old = cache.put_bytes(b"old content").await.unwrap();
        let md5_new = cache.put_bytes(b"new content").await.unwrap();

        let mut scm = FakeScm::new();
        let record_path = record::record_path_for(&path);
        scm.set_blob("r1", record_path.clone(), file_record(&path, &md5_old).to_yaml().unwrap());
        scm.set_blob("r2", record_path, file_record(&path, &md5_new).to_yaml().unwrap());

        let output = diff(
            &[path],
            "r1..r2",
            dir.path(),
            &scm,
            &cache,
            &DiffOptions {
                summary: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(output.contains(&md5_old[..8]));
        assert!(output.contains(&md5_new[..8]));
    }

    #[tokio::test]
    async fn unified_diff_shows_added_and_removed_lines() {
        let dir = TempDir::new().unwrap();
        let cache = LocalCache::new(dir.path().join("cache"));
        let path = RelPath::new("a.txt").unwrap();
        let md5_old = cache.put_bytes(b"line one\nline two\n").await.unwrap();
        let md5_new = cache.put_bytes(b"line one\nline three\n").await.unwrap();

        let mut scm = FakeScm::new();
        let record_path = record::record_path_for(&path);
        scm.set_blob("r1", record_path.clone(), file_record(&path, &md5_old).to_yaml().unwrap());
        scm.set_blob("r2", record_path, file_record(&path, &md5_new).to_yaml().unwrap());

        let output = diff(
            &[path],
            "r1..r2",
            dir.path(),
            &scm,
            &cache,
            &DiffOptions {
                color: false,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(output.contains("-line two"));
        assert!(output.contains("+line three"));
    }

    #[tokio::test]
    async fn directory_manifest_diff_matches_seed_scenario() {
        let dir = TempDir::new().unwrap();
        let cache = LocalCache::new(dir.path().join("cache"));

        let old_entries = vec![
            ManifestEntry {
                relpath: "a".to_owned(),
                md5: "MA0".to_owned(),
                size: 1,
            },
            ManifestEntry {
                relpath: "b".to_owned(),
                md5: "MB0".to_owned(),
                size: 1,
            },
        ];
        let new_entries = vec![
            ManifestEntry {
                relpath: "a".to_owned(),
                md5: "MA1".to_owned(),
                size: 1,
            },
            ManifestEntry {
                relpath: "c".to_owned(),
                md5: "MC0".to_owned(),
                size: 1,
            },
        ];
        let old_md5 = cache
            .put_bytes(&crate::hash::encode_manifest(&old_entries).unwrap())
            .await
            .unwrap();
        let new_md5 = cache
            .put_bytes(&crate::hash::encode_manifest(&new_entries).unwrap())
            .await
            .unwrap();

        let path = RelPath::new("d").unwrap();
        let record = |md5: &str| Record {
            outs: vec![Output {
                path: path.clone(),
                md5: Some(md5.to_owned()),
                size: None,
                is_dir: true,
                extra: Default::default(),
            }],
            computation: None,
            extra_meta: Default::default(),
        };

        let mut scm = FakeScm::new();
        let record_path = record::record_path_for(&path);
        scm.set_blob("r1", record_path.clone(), record(&old_md5).to_yaml().unwrap());
        scm.set_blob("r2", record_path, record(&new_md5).to_yaml().unwrap());

        let output = diff(
            &[path],
            "r1..r2",
            dir.path(),
            &scm,
            &cache,
            &DiffOptions {
                color: false,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(output.contains("- b MB0 1"));
        assert!(output.contains("+ c MC0 1"));
        assert!(output.contains("~ a MA0 -> MA1"));
    }

    #[tokio::test]
    async fn not_tracked_working_tree_file_diffs_against_absent_revision() {
        let dir = TempDir::new().unwrap();
        let cache = LocalCache::new(dir.path().join("cache"));
        let path = RelPath::new("scratch.txt").unwrap();
        crate::fs::write(path.resolve(dir.path()), b"hello\n").await.unwrap();

        let scm = FakeScm::new();
        let output = diff(
            &[path],
            "r1",
            dir.path(),
            &scm,
            &cache,
            &DiffOptions {
                color: false,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(output.contains("+hello"));
    }

    #[tokio::test]
    async fn missing_from_cache_surfaces_hint() {
        let dir = TempDir::new().unwrap();
        let cache = LocalCache::new(dir.path().join("cache"));
        let path = RelPath::new("a.txt").unwrap();

        let mut scm = FakeScm::new();
        let record_path = record::record_path_for(&path);
        scm.set_blob(
            "r1",
            record_path,
            file_record(&path, "deadbeefdeadbeefdeadbeefdeadbeef").to_yaml().unwrap(),
        );

        let output = diff(
            &[path],
            "r1",
            dir.path(),
            &scm,
            &cache,
            &DiffOptions {
                color: false,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(output.contains("missing from the cache"));
    }
}
