use clap::Args;
use color_eyre::Result;
use tracing::instrument;

use crate::cmd::open_repo;

#[derive(Clone, Debug, Args)]
pub struct Options {}

#[instrument(skip_all)]
pub async fn exec(_options: Options) -> Result<()> {
    let repo = open_repo().await?;
    let freed = repo.gc().await?;
    println!("freed {}", dvx::progress::format_size(freed));
    Ok(())
}
