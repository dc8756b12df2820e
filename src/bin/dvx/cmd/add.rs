use clap::Args;
use color_eyre::Result;
use tracing::instrument;

use crate::cmd::open_repo;

#[derive(Clone, Debug, Args)]
pub struct Options {
    /// Paths to track.
    paths: Vec<String>,

    /// Dependency paths this output's command reads, snapshotted to their
    /// current content.
    #[arg(long = "dep")]
    deps: Vec<String>,

    /// Shell command that (re)produces the outputs. Without this, the
    /// record is pure data with no `meta.computation`.
    #[arg(long)]
    cmd: Option<String>,

    /// Track every file under a directory argument individually instead of
    /// as one directory artifact.
    #[arg(short = 'R', long)]
    recursive: bool,
}

#[instrument(skip_all)]
pub async fn exec(options: Options) -> Result<()> {
    let repo = open_repo().await?;
    let paths = options
        .paths
        .iter()
        .map(|p| dvx::path::RelPath::new(p))
        .collect::<Result<Vec<_>>>()?;
    let deps = options
        .deps
        .iter()
        .map(|p| dvx::path::RelPath::new(p))
        .collect::<Result<Vec<_>>>()?;
    let deps = (!deps.is_empty()).then_some(deps.as_slice());

    repo.add(&paths, deps, options.cmd.as_deref(), options.recursive).await?;
    for path in &paths {
        println!("added {path}");
    }
    Ok(())
}
