use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::styling::{bright, bright_green, bright_yellow};

/// Spinner feedback for the sequential phases of a scan.
pub struct PhaseProgress {
    pb: ProgressBar,
    phase: usize,
    total: usize,
    label: String,
}

impl PhaseProgress {
    pub fn start(total: usize, label: &str) -> Self {
        eprintln!("{}  {}", bright("⚙️"), bright("Phases").underlined());
        Self::spin(1, total, label)
    }

    /// Marks the current phase done and starts the next one.
    pub fn advance(self, label: &str) -> Self {
        let next = self.phase + 1;
        let total = self.total;
        self.finish_current();
        Self::spin(next, total, label)
    }

    pub fn finish(self) {
        self.finish_current();
        eprintln!();
    }

    fn spin(phase: usize, total: usize, label: &str) -> Self {
        let pb = create_spinner(bright_yellow(format!("Phase {phase}/{total}: {label}")).to_string());
        Self {
            pb,
            phase,
            total,
            label: label.to_string(),
        }
    }

    fn finish_current(&self) {
        self.pb.finish_with_message(
            bright_green(format!("Phase {}/{}: {} ✓", self.phase, self.total, self.label)).to_string(),
        );
    }
}

fn create_spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("  {msg} {spinner}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}
