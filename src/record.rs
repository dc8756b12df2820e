//! Artifact record codec.
//!
//! A record is the sidecar document tracking one or more outputs and,
//! optionally, the computation that produces them. Records are plain YAML so
//! they diff cleanly in source control; [`Record::to_yaml`] emits keys in a
//! fixed order so two semantically-identical records serialize byte-for-byte
//! identically.

use std::path::Path;

use color_eyre::{Result, eyre::Context};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::hash::Hash;
use crate::path::RelPath;

/// One output entry tracked by a record.
///
/// `md5` and `size` are absent for a placeholder record: a "prep" phase can
/// write `cmd`/`deps` before any expensive computation has filled in the
/// content hash.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct Output {
    /// Path relative to the repository root.
    pub path: RelPath,
    /// Content hash of the cached copy, if already computed.
    pub md5: Option<Hash>,
    /// Size in bytes of the cached copy, if already computed.
    pub size: Option<u64>,
    /// Whether this output is a directory (tracked via a manifest) rather
    /// than a single file. Persisted rather than derived: `diff` resolves
    /// records against arbitrary SCM revisions with no live working-tree
    /// copy to stat, so the shape has to travel with the record itself.
    pub is_dir: bool,
    /// Opaque attributes not otherwise interpreted by core, preserved
    /// round-trip so newer tooling can add fields without breaking older
    /// readers.
    pub extra: serde_yaml::Mapping,
}

/// The computation that produced a record's outputs, if any. Absent for a
/// pure data record (no `meta.computation`).
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct Computation {
    /// Shell command that (re)produces the outputs.
    pub cmd: Option<String>,
    /// Source-control revision captured at the end of the last successful
    /// run. Opaque to core; only ever compared for equality.
    pub code_ref: Option<String>,
    /// Dependency path to the md5 recorded for it at the time `cmd` last
    /// ran. Insertion order is preserved on re-emission.
    pub deps: IndexMap<RelPath, Hash>,
    /// Free-form parameters. Never consulted by freshness evaluation.
    pub params: serde_yaml::Mapping,
}

/// A parsed artifact record.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct Record {
    /// The tracked outputs. Core treats a single-element list as the common
    /// case but must tolerate more (co-outputs sharing one record file).
    pub outs: Vec<Output>,
    /// The optional computation metadata.
    pub computation: Option<Computation>,
    /// Opaque `meta` keys other than `computation`, preserved round-trip.
    pub extra_meta: serde_yaml::Mapping,
}

/// Conventional on-disk suffix for a record's sidecar file: the record
/// tracking output path `p` lives at `p` with this suffix appended
/// (`data/a.csv` -> `data/a.csv.dvx`), the same sidecar-per-output shape the
/// spec's own examples use (`a.dvc`, `b.dvc`) under this crate's name.
pub const RECORD_SUFFIX: &str = ".dvx";

/// The record path for tracked output `path`.
pub fn record_path_for(path: &RelPath) -> RelPath {
    RelPath::new(format!("{}{RECORD_SUFFIX}", path.as_str()))
        .expect("suffixing a valid RelPath stays a valid RelPath")
}

/// The output path a record file at `record_path` tracks, if `record_path`
/// carries the conventional suffix.
pub fn output_path_for_record(record_path: &RelPath) -> Option<RelPath> {
    record_path
        .as_str()
        .strip_suffix(RECORD_SUFFIX)
        .and_then(|stem| RelPath::new(stem).ok())
}

impl Record {
    /// Parse a record from its on-disk YAML representation.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let raw: RawRecord = serde_yaml::from_str(content).context("parse record")?;
        raw.try_into()
    }

    /// Serialize the record to its canonical on-disk form: `outs` first,
    /// each entry in `md5, size, hash, path` order (`md5`/`size` omitted
    /// for a placeholder; `hash` always present), then `meta` if present.
    pub fn to_yaml(&self) -> Result<String> {
        let raw = RawRecord::from(self.clone());
        let mut content = serde_yaml::to_string(&raw).context("encode record")?;
        if !content.ends_with('\n') {
            content.push('\n');
        }
        Ok(content)
    }

    /// Read and parse a record file. Returns `None` if it does not exist.
    pub async fn read(path: &Path) -> Result<Option<Self>> {
        match crate::fs::read_buffered_utf8(path).await? {
            Some(content) => Record::from_yaml(&content)
                .with_context(|| format!("parse record: {path:?}"))
                .map(Some),
            None => Ok(None),
        }
    }

    /// Atomically write the record to `path`.
    pub async fn write(&self, path: &Path) -> Result<()> {
        let content = self.to_yaml()?;
        crate::fs::atomic_write(path, content).await
    }

    /// Whether any output in this record is still missing its computed
    /// hash (a "prep" phase wrote `cmd`/`deps` but hasn't filled it in yet).
    pub fn is_placeholder(&self) -> bool {
        self.outs.iter().any(|out| out.md5.is_none())
    }
}

/// Serde-facing mirror of [`Record`], matching the on-disk shape exactly so
/// field order can be controlled precisely.
#[derive(Serialize, Deserialize)]
struct RawRecord {
    outs: Vec<RawOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    meta: Option<RawMeta>,
}

#[derive(Serialize, Deserialize)]
struct RawOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    md5: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(default = "default_hash_algo")]
    hash: String,
    path: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    is_dir: bool,
    #[serde(flatten)]
    extra: serde_yaml::Mapping,
}

/// The only hash algorithm a record's `hash` field can name; also the
/// default assumed for records written before this field existed.
fn default_hash_algo() -> String {
    "md5".to_owned()
}

#[derive(Serialize, Deserialize)]
struct RawMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    computation: Option<RawComputation>,
    #[serde(flatten)]
    extra: serde_yaml::Mapping,
}

#[derive(Serialize, Deserialize)]
struct RawComputation {
    #[serde(skip_serializing_if = "Option::is_none")]
    cmd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    deps: Vec<RawDep>,
    #[serde(default, skip_serializing_if = "serde_yaml::Mapping::is_empty")]
    params: serde_yaml::Mapping,
}

#[derive(Serialize, Deserialize)]
struct RawDep {
    path: String,
    md5: String,
}

impl TryFrom<RawRecord> for Record {
    type Error = color_eyre::Report;

    fn try_from(raw: RawRecord) -> Result<Self> {
        let outs = raw
            .outs
            .into_iter()
            .map(|out| -> Result<Output> {
                if out.hash != "md5" {
                    color_eyre::eyre::bail!("unknown hash algorithm: {}", out.hash);
                }
                Ok(Output {
                    path: RelPath::new(&out.path)
                        .with_context(|| format!("output path: {}", out.path))?,
                    md5: out.md5,
                    size: out.size,
                    is_dir: out.is_dir,
                    extra: out.extra,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let (computation, extra_meta) = match raw.meta {
            Some(meta) => {
                let computation = meta
                    .computation
                    .map(|raw| -> Result<Computation> {
                        let mut deps = IndexMap::new();
                        for dep in raw.deps {
                            deps.insert(
                                RelPath::new(&dep.path)
                                    .with_context(|| format!("dep path: {}", dep.path))?,
                                dep.md5,
                            );
                        }
                        Ok(Computation {
                            cmd: raw.cmd,
                            code_ref: raw.code_ref,
                            deps,
                            params: raw.params,
                        })
                    })
                    .transpose()?;
                (computation, meta.extra)
            }
            None => (None, serde_yaml::Mapping::new()),
        };

        Ok(Record {
            outs,
            computation,
            extra_meta,
        })
    }
}

impl From<Record> for RawRecord {
    fn from(record: Record) -> Self {
        let outs = record
            .outs
            .into_iter()
            .map(|out| RawOutput {
                hash: default_hash_algo(),
                md5: out.md5,
                size: out.size,
                path: out.path.to_string(),
                is_dir: out.is_dir,
                extra: out.extra,
            })
            .collect();

        let meta = if record.computation.is_some() || !record.extra_meta.is_empty() {
            Some(RawMeta {
                computation: record.computation.map(|comp| RawComputation {
                    cmd: comp.cmd,
                    code_ref: comp.code_ref,
                    deps: comp
                        .deps
                        .into_iter()
                        .map(|(path, md5)| RawDep {
                            path: path.to_string(),
                            md5,
                        })
                        .collect(),
                    params: comp.params,
                }),
                extra: record.extra_meta,
            })
        } else {
            None
        };

        RawRecord { outs, meta }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq as pretty_assert_eq;

    #[test]
    fn round_trips_filled_record() {
        let yaml = "outs:\n- md5: abc123\n  size: 10\n  hash: md5\n  path: b\nmeta:\n  computation:\n    cmd: touch b\n    deps:\n    - path: a\n      md5: A0\n";
        let record = Record::from_yaml(yaml).unwrap();
        pretty_assert_eq!(record.outs.len(), 1);
        pretty_assert_eq!(record.outs[0].md5.as_deref(), Some("abc123"));
        let computation = record.computation.as_ref().unwrap();
        pretty_assert_eq!(computation.cmd.as_deref(), Some("touch b"));

        let reencoded = record.to_yaml().unwrap();
        let reparsed = Record::from_yaml(&reencoded).unwrap();
        pretty_assert_eq!(reparsed, record);
    }

    #[test]
    fn placeholder_omits_md5_and_size() {
        let record = Record {
            outs: vec![Output {
                path: RelPath::new("out.bin").unwrap(),
                md5: None,
                size: None,
                is_dir: false,
                extra: Default::default(),
            }],
            computation: Some(Computation {
                cmd: Some("gen".to_owned()),
                code_ref: None,
                deps: Default::default(),
                params: Default::default(),
            }),
            extra_meta: Default::default(),
        };
        let yaml = record.to_yaml().unwrap();
        assert!(!yaml.contains("md5:"));
        assert!(!yaml.contains("size:"));
        assert!(yaml.contains("hash: md5"));
        assert!(record.is_placeholder());
    }

    #[test]
    fn rejects_unknown_hash_algorithm() {
        let yaml = "outs:\n- md5: abc\n  hash: sha256\n  path: b\n";
        assert!(Record::from_yaml(yaml).is_err());
    }

    #[test]
    fn record_path_round_trips_through_suffix() {
        let output = RelPath::new("data/raw/a.csv").unwrap();
        let record_path = record_path_for(&output);
        pretty_assert_eq!(record_path.as_str(), "data/raw/a.csv.dvx");
        pretty_assert_eq!(output_path_for_record(&record_path), Some(output));
    }

    #[test]
    fn deps_preserve_insertion_order() {
        let yaml = "outs:\n- path: b\nmeta:\n  computation:\n    cmd: x\n    deps:\n    - path: z\n      md5: Z0\n    - path: a\n      md5: A0\n";
        let record = Record::from_yaml(yaml).unwrap();
        let keys: Vec<_> = record
            .computation
            .unwrap()
            .deps
            .keys()
            .map(|k| k.to_string())
            .collect();
        pretty_assert_eq!(keys, vec!["z".to_owned(), "a".to_owned()]);
    }
}
