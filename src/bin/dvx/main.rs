//! The binary entrypoint for `dvx`.

use std::process::ExitCode;

use clap::{Parser, Subcommand, crate_version};
use color_eyre::{Result, eyre::Context};
use tracing::instrument;
use tracing_subscriber::util::SubscriberInitExt;

// Since this is a binary crate, we need to ensure these modules aren't pub
// so that they can correctly warn about dead code:
// https://github.com/rust-lang/rust/issues/74970
//
// Relatedly, in this file specifically nothing should be `pub`.
mod cmd;
mod log;

#[derive(Clone, Debug, Parser)]
#[command(name = "dvx", about = "A minimal data-version-control tool", version = crate_version!())]
struct TopLevelFlags {
    #[command(subcommand)]
    command: Command,

    /// Emit flamegraph profiling data.
    #[arg(long, hide(true))]
    profile: Option<std::path::PathBuf>,

    /// When to colorize output.
    #[arg(long, value_enum, default_value_t = log::WhenColor::Auto)]
    color: log::WhenColor,
}

#[derive(Clone, Debug, Subcommand)]
enum Command {
    /// Track paths as artifact records.
    Add(cmd::add::Options),

    /// Delete the tracked records for paths. Cache objects are left alone.
    #[command(name = "rm")]
    Remove(cmd::remove::Options),

    /// Classify tracked targets as fresh/stale/missing.
    Status(cmd::status::Options),

    /// Execute every stale unit reachable from the given targets.
    Run(cmd::run::Options),

    /// Diff tracked paths across two revisions (or one revision and the
    /// working tree).
    Diff(cmd::diff::Options),

    /// Print a tracked path's content.
    Cat(cmd::cat::Options),

    /// Inspect the content-addressed cache.
    #[clap(subcommand)]
    Cache(cmd::cache::Command),

    /// Delete cache objects not referenced by any current record.
    Gc(cmd::gc::Options),
}

#[instrument]
#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let top = TopLevelFlags::parse();

    let (logger, flame_guard) = log::make_logger(std::io::stderr, top.profile.clone(), top.color)?;
    logger.init();

    let code = match top.command {
        Command::Add(options) => run_fallible(cmd::add::exec(options)).await?,
        Command::Remove(options) => run_fallible(cmd::remove::exec(options)).await?,
        Command::Status(options) => match cmd::status::exec(options).await {
            Ok(outcome) => exit_code_for_freshness(outcome.all_fresh),
            Err(err) => return Err(err),
        },
        Command::Run(options) => match cmd::run::exec(options).await {
            Ok(outcome) => exit_code_for_run(&outcome),
            Err(err) => match classify_plan_error(&err) {
                Some(code) => {
                    eprintln!("{err:?}");
                    code
                }
                None => return Err(err),
            },
        },
        Command::Diff(options) => run_fallible(cmd::diff::exec(options)).await?,
        Command::Cat(options) => run_fallible(cmd::cat::exec(options)).await?,
        Command::Cache(cmd::cache::Command::Path(options)) => run_fallible(cmd::cache::path::exec(options)).await?,
        Command::Cache(cmd::cache::Command::Md5(options)) => run_fallible(cmd::cache::md5::exec(options)).await?,
        Command::Gc(options) => run_fallible(cmd::gc::exec(options)).await?,
    };

    if let Some(flame_guard) = flame_guard {
        flame_guard.flush().context("flush flame guard")?;
    }

    Ok(code)
}

/// Run a fallible command that has no special exit-code meaning: success is
/// always `0`, failure propagates to `main`'s default error handling (exit
/// `1`).
async fn run_fallible(result: Result<()>) -> Result<ExitCode> {
    result.map(|()| ExitCode::from(0))
}

/// Exit `0` if every checked target was fresh, else `2` (stale artifacts
/// found in status/dry-run).
fn exit_code_for_freshness(all_fresh: bool) -> ExitCode {
    ExitCode::from(if all_fresh { 0 } else { 2 })
}

/// A dry run reports staleness the same way `status` does (exit `2`); a
/// real run reports whether anything actually failed (exit `1`), since
/// rebuilding stale artifacts successfully is the normal case, not a
/// failure.
fn exit_code_for_run(outcome: &cmd::run::Outcome) -> ExitCode {
    if outcome.dry_run {
        exit_code_for_freshness(outcome.all_fresh)
    } else {
        ExitCode::from(if outcome.any_failed { 1 } else { 0 })
    }
}

/// Identify a plan error (graph cycle or conflicting outputs) surfaced from
/// `run`, which gets its own exit code rather than the generic failure one
/// (a plan error: cycle, or conflicting outputs).
fn classify_plan_error(err: &color_eyre::Report) -> Option<ExitCode> {
    err.downcast_ref::<dvx::graph::PlanError>()
        .map(|_| ExitCode::from(3))
}
