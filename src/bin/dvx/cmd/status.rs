use clap::Args;
use color_eyre::Result;
use dvx::status::State;
use tracing::instrument;

use crate::cmd::{default_workers, open_repo, parse_targets};

#[derive(Clone, Debug, Args)]
pub struct Options {
    /// Targets to check: exact output paths, directory prefixes, or globs.
    /// Everything tracked is checked when none are given.
    targets: Vec<String>,

    /// Number of concurrent evaluations.
    #[arg(long, default_value_t = default_workers())]
    workers: usize,

    /// Emit the structured JSON report instead of the human-readable one.
    #[arg(long)]
    json: bool,
}

/// Whether every checked target came back fresh, for the caller to pick an
/// exit code (status exits `2` when stale artifacts are found).
pub struct Outcome {
    pub all_fresh: bool,
}

#[instrument(skip_all)]
pub async fn exec(options: Options) -> Result<Outcome> {
    let repo = open_repo().await?;
    let targets = if options.targets.is_empty() {
        vec![dvx::status::Target::parse("*")?]
    } else {
        parse_targets(&options.targets)?
    };

    let entries = repo.status(&targets, options.workers).await?;
    if options.json {
        println!("{}", dvx::status::render_json(&entries)?);
    } else {
        print!("{}", dvx::status::render_human(&entries));
    }

    let all_fresh = entries.iter().all(|e| e.state == State::Fresh);
    Ok(Outcome { all_fresh })
}
