//! Progress reporting for a running integration.
//!
//! The scheduler calls a [`Reporter`] after every response it processes.
//! Reporters only observe; they never influence scheduling.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::Serialize;

/// Snapshot of a run after one response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Progress {
    /// Width already folded into the result.
    pub covered: f64,
    /// Width of the whole domain.
    pub total: f64,
    /// Segments accepted so far.
    pub accepted: usize,
    /// Segments still in the list.
    pub outstanding: usize,
    /// Sum of accepted contributions so far.
    pub partial_value: f64,
}

impl Progress {
    /// Covered fraction of the domain, in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.total > 0.0 {
            (self.covered / self.total).clamp(0.0, 1.0)
        } else {
            1.0
        }
    }
}

/// Receives progress snapshots from the scheduler.
pub trait Reporter {
    fn report(&mut self, progress: &Progress);

    /// Called once when the run ends, successfully or not.
    fn finish(&mut self) {}
}

/// Discards every snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn report(&mut self, _progress: &Progress) {}
}

/// Resolution of the progress bar.
const BAR_STEPS: u64 = 1000;

/// Terminal progress bar showing covered domain width.
pub struct BarReporter {
    bar: ProgressBar,
}

impl BarReporter {
    pub fn new() -> Self {
        let bar = ProgressBar::new(BAR_STEPS);
        bar.set_draw_target(ProgressDrawTarget::stderr());
        bar.set_style(
            ProgressStyle::default_bar()
                .template("  [{bar:40.cyan/blue}] {percent}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓▒░  "),
        );
        Self { bar }
    }

    /// Bar that never draws; used in tests.
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::with_draw_target(Some(BAR_STEPS), ProgressDrawTarget::hidden()),
        }
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }
}

impl Default for BarReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for BarReporter {
    fn report(&mut self, progress: &Progress) {
        self.bar
            .set_position((progress.fraction() * BAR_STEPS as f64) as u64);
        self.bar.set_message(format!(
            "{} accepted, {} outstanding, ≈ {:.6}",
            progress.accepted, progress.outstanding, progress.partial_value
        ));
    }

    fn finish(&mut self) {
        self.bar.finish_and_clear();
    }
}
