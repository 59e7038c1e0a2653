use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// A single run-wide bar on stderr; spins when the schedule is empty.
pub(crate) struct HumanProgress {
    pb: ProgressBar,
}

impl HumanProgress {
    pub(crate) fn new() -> Self {
        let pb = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr_with_hz(5));
        pb.set_style(bar_style());
        pb.set_prefix("run");
        Self { pb }
    }

    pub(crate) fn update(&self, total_duration: Duration, elapsed: Duration, message: String) {
        self.pb.set_message(message);

        if total_duration.is_zero() {
            self.pb.tick();
            return;
        }

        let total_ms = total_duration.as_millis() as u64;
        let elapsed_ms = elapsed.as_millis() as u64;
        self.pb.set_length(total_ms);
        self.pb.set_position(elapsed_ms.min(total_ms));
    }

    pub(crate) fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix} [ {bar:20.cyan/blue} ] {percent:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█░")
}
