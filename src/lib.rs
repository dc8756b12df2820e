//! Library for `dvx`.
//!
//! Core data-version-control primitives: the artifact record codec, content
//! hasher, freshness evaluator, DAG builder and parallel executor, diff
//! engine, and status reporter. The CLI binary (`src/bin/dvx`) is a thin
//! consumer of [`repo::Repo`]'s operations.

pub mod cache;
pub mod diff;
pub mod exec;
pub mod fresh;
pub mod fs;
pub mod graph;
pub mod hash;
pub mod mtime_cache;
pub mod path;
pub mod progress;
pub mod record;
pub mod repo;
pub mod scm;
pub mod status;
