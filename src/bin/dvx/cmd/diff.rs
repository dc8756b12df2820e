use clap::Args;
use color_eyre::Result;
use dvx::diff::DiffOptions;
use tracing::instrument;

use crate::cmd::open_repo;

#[derive(Clone, Debug, Args)]
pub struct Options {
    /// Tracked paths to diff. Every tracked path is diffed when none are
    /// given.
    paths: Vec<String>,

    /// Revision spec: `X`, `X..Y`, or `X^..X`. A bare `X` diffs against the
    /// working tree.
    #[arg(long, default_value = "HEAD")]
    rev: String,

    /// Shell command with a literal `{}` placeholder for the material file
    /// path, run on each side before comparison.
    #[arg(long)]
    preprocess: Option<String>,

    /// Bypass content fetching; emit only `path: old[:8] -> new[:8]`.
    #[arg(long)]
    summary: bool,

    /// Lines of context around each unified-diff hunk.
    #[arg(short = 'U', long, default_value_t = 3)]
    unified: usize,

    /// Trim trailing whitespace from each line before comparing.
    #[arg(long)]
    ignore_whitespace: bool,

    /// Never colorize output, even on an interactive terminal.
    #[arg(long)]
    no_color: bool,
}

#[instrument(skip_all)]
pub async fn exec(options: Options) -> Result<()> {
    let repo = open_repo().await?;
    let paths = options
        .paths
        .iter()
        .map(|p| dvx::path::RelPath::new(p))
        .collect::<Result<Vec<_>>>()?;

    let diff_options = DiffOptions {
        context_lines: options.unified,
        ignore_whitespace: options.ignore_whitespace,
        color: !options.no_color,
        summary: options.summary,
        preprocess: options.preprocess,
    };

    let rendered = repo.diff(&paths, &options.rev, &diff_options).await?;
    print!("{rendered}");
    Ok(())
}
