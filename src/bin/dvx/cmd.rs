//! CLI subcommand implementations.
//!
//! Each module wraps exactly one `repo::Repo` operation; flag parsing and
//! output rendering live here, the actual work lives in the library.

pub mod add;
pub mod cache;
pub mod cat;
pub mod diff;
pub mod gc;
pub mod remove;
pub mod run;
pub mod status;

/// Worker-count flag shared by every command that fans out over the
/// executor or status pool. Defaults to the number of CPUs, overrideable.
pub fn default_workers() -> usize {
    num_cpus::get()
}

/// Open the repo rooted at the current directory (or its nearest ancestor
/// `.git`, matching `GitAdapter`'s expectations).
pub async fn open_repo() -> color_eyre::Result<dvx::repo::Repo<dvx::scm::GitAdapter>> {
    let cwd = std::env::current_dir()?;
    let root = dvx::scm::discover_repo_root(&cwd).unwrap_or(cwd);
    dvx::repo::Repo::open(root).await
}

/// Parse CLI-given target strings into [`dvx::status::Target`]s.
pub fn parse_targets(raw: &[String]) -> color_eyre::Result<Vec<dvx::status::Target>> {
    raw.iter().map(|t| dvx::status::Target::parse(t)).collect()
}

/// Parse a single CLI-given relative path.
pub fn parse_path(raw: &str) -> color_eyre::Result<dvx::path::RelPath> {
    dvx::path::RelPath::new(raw)
}
