//! Terminal progress for the transmit phase
//!
//! A byte-count bar while copying, replaced by a one-line summary when the
//! transfer finishes, fails or is interrupted.

use crossterm::style::{Color, Stylize};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

use crate::transmit::ProgressSink;

/// Created once the first relay has accepted the connection, so the rate
/// only covers time spent copying.
pub struct TransferProgress {
    bar: ProgressBar,
}

impl TransferProgress {
    pub fn new(total_bytes: u64) -> Self {
        let bar = ProgressBar::new(total_bytes);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg} [{bar:40.green/blue}] {bytes}/{total_bytes} {binary_bytes_per_sec} ETA {eta}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.set_message("Copying");
        bar.enable_steady_tick(Duration::from_millis(120));

        Self { bar }
    }

    /// Bar that draws nothing, for `--quiet`.
    pub fn hidden(total_bytes: u64) -> Self {
        let p = Self::new(total_bytes);
        p.bar.set_draw_target(ProgressDrawTarget::hidden());
        p
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn message(&self) -> String {
        self.bar.message().to_string()
    }
}

fn summary(bytes: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    let throughput = if secs > 0.0 {
        bytes as f64 / secs / 1_048_576.0
    } else {
        0.0
    };
    format!(
        "{:.1} MB in {:.1}s ({:.1} MB/s)",
        bytes as f64 / 1_048_576.0,
        secs,
        throughput
    )
}

impl ProgressSink for TransferProgress {
    fn advance(&self, bytes: u64) {
        self.bar.inc(bytes);
    }

    fn finish(&self, bytes: u64, elapsed: Duration) {
        self.bar.finish_with_message(format!(
            "{} {}",
            "Completed".with(Color::Green).bold(),
            summary(bytes, elapsed)
        ));
    }

    fn fail(&self, msg: &str) {
        self.bar
            .abandon_with_message(format!("{} {}", "Failed".with(Color::Red).bold(), msg));
    }

    fn interrupted(&self) {
        self.bar.abandon_with_message(format!(
            "{} after {} bytes",
            "Interrupted".with(Color::Yellow).bold(),
            self.bar.position()
        ));
    }
}
