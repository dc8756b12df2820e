//! Progress rendering for interactive and CI environments.
//!
//! A live bar in an interactive terminal, periodic log lines everywhere
//! else, driven off a background thread that free-runs independently of the
//! work it reports on.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use derive_more::Deref;
use indicatif::{HumanDuration, ProgressBar, ProgressStyle};

use crate::exec::{UnitEvent, UnitOutcome};

/// A progress bar wrapper that emits periodic updates.
///
/// - In interactive terminals, displays a normal progress bar.
/// - In non-interactive environments emits log lines every 5 seconds.
#[derive(Deref)]
pub struct UnitProgress {
    #[deref]
    progress: ProgressBar,
    start: Instant,
    handle: Option<JoinHandle<()>>,
    signal: Option<Arc<StopSignal>>,
}

impl UnitProgress {
    /// Creates a tracker for a run of `total` units.
    pub fn new(total: u64) -> Self {
        let progress = ProgressBar::new(total);
        let style = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("invalid progress bar template")
            .progress_chars("=> ");
        progress.set_style(style);
        progress.set_message("queued");

        let start = Instant::now();
        if is_interactive() {
            Self {
                progress,
                start,
                handle: None,
                signal: None,
            }
        } else {
            let signal = StopSignal::new();
            let handle = thread::spawn({
                let progress = progress.clone();
                let signal = signal.clone();
                move || {
                    log_status(&progress, start);
                    let interval = Duration::from_secs(5);
                    loop {
                        if signal.wait_timeout(interval) {
                            break;
                        }
                        if progress.is_finished() {
                            break;
                        }
                        log_status(&progress, start);
                    }
                }
            });
            Self {
                progress,
                start,
                handle: Some(handle),
                signal: Some(signal),
            }
        }
    }

    /// Update the bar for one [`UnitEvent`]. Pass as the `on_event` callback
    /// to [`crate::exec::run`].
    pub fn on_event(&self, event: &UnitEvent) {
        match event {
            UnitEvent::Queued(_) => {}
            UnitEvent::Running(_) => self.progress.set_message("running"),
            UnitEvent::Finished(_, outcome) => {
                self.progress.inc(1);
                self.progress.set_message(outcome_label(outcome));
            }
        }
    }
}

fn outcome_label(outcome: &UnitOutcome) -> &'static str {
    match outcome {
        UnitOutcome::Skipped => "fresh",
        UnitOutcome::Succeeded => "ran",
        UnitOutcome::Failed { .. } => "failed",
        UnitOutcome::SkippedDueToAncestor => "blocked",
        UnitOutcome::Cancelled => "cancelled",
    }
}

fn log_status(progress: &ProgressBar, start: Instant) {
    let elapsed = HumanDuration(start.elapsed());
    let pos = progress.position();
    let len = progress.length().unwrap_or(0);
    let msg = progress.message();
    progress.suspend(|| {
        println!("[{elapsed}] [{pos}/{len}] {msg}");
    });
}

impl Drop for UnitProgress {
    fn drop(&mut self) {
        if let Some(signal) = &self.signal {
            signal.stop();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        if !is_interactive() {
            log_status(&self.progress, self.start);
        }
    }
}

/// A simple signal for stopping a thread using a condition variable.
struct StopSignal {
    stopped: Mutex<bool>,
    condvar: Condvar,
}

impl StopSignal {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            stopped: Mutex::new(false),
            condvar: Condvar::new(),
        })
    }

    /// Wait for the signal or timeout. Returns true if signaled to stop.
    fn wait_timeout(&self, timeout: Duration) -> bool {
        let stopped = self.stopped.lock().expect("mutex is poisoned");
        let (stop, _) = self
            .condvar
            .wait_timeout(stopped, timeout)
            .expect("mutex is poisoned");
        *stop
    }

    /// Signal the thread to stop.
    fn stop(&self) {
        let mut stopped = self.stopped.lock().unwrap();
        *stopped = true;
        self.condvar.notify_one();
    }
}

/// Detects if running in an interactive terminal environment.
fn is_interactive() -> bool {
    console::Term::stderr().is_term()
}

/// Formats a byte count as a string like "10 MB", used by `gc`'s freed-bytes
/// report.
pub fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::DECIMAL)
}
