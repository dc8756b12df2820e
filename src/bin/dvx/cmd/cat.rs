use std::io::Write;

use clap::Args;
use color_eyre::Result;
use tracing::instrument;

use crate::cmd::{open_repo, parse_path};

#[derive(Clone, Debug, Args)]
pub struct Options {
    /// Tracked path to read.
    path: String,

    /// Revision to read the path's record at. Reads the working tree when
    /// omitted.
    #[arg(long)]
    rev: Option<String>,
}

#[instrument(skip_all)]
pub async fn exec(options: Options) -> Result<()> {
    let repo = open_repo().await?;
    let path = parse_path(&options.path)?;
    let content = repo.cat(&path, options.rev.as_deref()).await?;
    std::io::stdout().write_all(&content)?;
    Ok(())
}
