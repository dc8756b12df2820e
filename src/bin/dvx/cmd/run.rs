use clap::Args;
use color_eyre::Result;
use dvx::exec::{CancellationToken, ExecOptions, ForceMode, UnitEvent, UnitOutcome};
use tracing::instrument;

use crate::cmd::{default_workers, open_repo, parse_targets};

#[derive(Clone, Debug, Args)]
pub struct Options {
    /// Targets to run: exact output paths, directory prefixes, or globs.
    /// Everything reachable is run when none are given.
    targets: Vec<String>,

    /// Number of concurrent workers.
    #[arg(long, default_value_t = default_workers())]
    workers: usize,

    /// Compute and print the plan without executing anything.
    #[arg(long)]
    dry_run: bool,

    /// Force every unit stale regardless of the evaluator.
    #[arg(long)]
    force_all: bool,

    /// Additionally force units whose output matches this glob stale.
    #[arg(long)]
    force_upstream: Option<String>,

    /// Treat units whose output matches this glob as fresh even if stale.
    #[arg(long)]
    cached: Option<String>,
}

/// Enough of the run's outcome for the caller to pick an exit code: a
/// dry-run that found stale artifacts exits `2`, a real run that failed a
/// unit exits `1`, anything else exits `0`.
pub struct Outcome {
    pub dry_run: bool,
    pub all_fresh: bool,
    pub any_failed: bool,
}

#[instrument(skip_all)]
pub async fn exec(options: Options) -> Result<Outcome> {
    let repo = open_repo().await?;
    let targets = if options.targets.is_empty() {
        vec![dvx::status::Target::parse("*")?]
    } else {
        parse_targets(&options.targets)?
    };

    let force_mode = match (options.force_all, &options.force_upstream, &options.cached) {
        (true, _, _) => ForceMode::All,
        (false, Some(pattern), _) => ForceMode::Upstream(glob::Pattern::new(pattern)?),
        (false, None, Some(pattern)) => ForceMode::Cached(glob::Pattern::new(pattern)?),
        (false, None, None) => ForceMode::None,
    };

    let exec_options = ExecOptions {
        workers: options.workers,
        force_mode: &force_mode,
        dry_run: options.dry_run,
        ..ExecOptions::default()
    };

    let cancellation = CancellationToken::new();
    {
        let cancellation = cancellation.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancellation.cancel();
            }
        });
    }

    let report = repo
        .run(&targets, exec_options, &cancellation, |event| print_event(&event))
        .await?;

    Ok(Outcome {
        dry_run: options.dry_run,
        all_fresh: report.is_all_fresh(),
        any_failed: report.any_failed(),
    })
}

fn print_event(event: &UnitEvent) {
    match event {
        UnitEvent::Queued(id) => println!("queued unit {}", id.index()),
        UnitEvent::Running(id) => println!("running unit {}", id.index()),
        UnitEvent::Finished(id, outcome) => {
            let label = match outcome {
                UnitOutcome::Skipped => "fresh",
                UnitOutcome::Succeeded => "done",
                UnitOutcome::Failed { message } => {
                    println!("unit {} failed: {message}", id.index());
                    return;
                }
                UnitOutcome::SkippedDueToAncestor => "skipped (ancestor failed)",
                UnitOutcome::Cancelled => "cancelled",
            };
            println!("unit {}: {label}", id.index());
        }
    }
}
