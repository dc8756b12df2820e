use clap::Args;
use color_eyre::Result;
use tracing::instrument;

use crate::cmd::{open_repo, parse_path};

#[derive(Clone, Debug, Args)]
pub struct Options {
    /// Tracked path to resolve.
    path: String,
}

#[instrument(skip_all)]
pub async fn exec(options: Options) -> Result<()> {
    let repo = open_repo().await?;
    let path = parse_path(&options.path)?;
    let md5 = repo.cache_md5(&path).await?;
    println!("{md5}");
    Ok(())
}
