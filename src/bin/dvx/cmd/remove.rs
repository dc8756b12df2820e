use clap::Args;
use color_eyre::Result;
use tracing::instrument;

use crate::cmd::open_repo;

#[derive(Clone, Debug, Args)]
pub struct Options {
    /// Tracked paths whose records should be deleted. The underlying cache
    /// objects are left alone; `dvx gc` reclaims anything left unreferenced.
    paths: Vec<String>,
}

#[instrument(skip_all)]
pub async fn exec(options: Options) -> Result<()> {
    let repo = open_repo().await?;
    let paths = options
        .paths
        .iter()
        .map(|p| dvx::path::RelPath::new(p))
        .collect::<Result<Vec<_>>>()?;
    repo.remove(&paths).await?;
    for path in &paths {
        println!("removed {path}");
    }
    Ok(())
}
