use std::sync::Mutex;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

/// One indicatif line per scenario on stderr, in the order scenarios first report.
pub(crate) struct HumanProgress {
    multi: MultiProgress,
    lines: Mutex<Vec<(String, Line)>>,
}

/// A scenario waiting for its start offset spins; a running one fills a bar
/// over its schedule duration.
enum Line {
    Waiting(ProgressBar),
    Running(ProgressBar),
}

impl Line {
    fn bar(&self) -> &ProgressBar {
        match self {
            Self::Waiting(pb) | Self::Running(pb) => pb,
        }
    }
}

impl HumanProgress {
    pub(crate) fn new() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::stderr_with_hz(5)),
            lines: Mutex::new(Vec::new()),
        }
    }

    /// `total` is `None` while the scenario waits for its start offset.
    pub(crate) fn update(
        &self,
        scenario: &str,
        total: Option<Duration>,
        scenario_elapsed: Duration,
        message: String,
    ) {
        let mut lines = self
            .lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let idx = match lines.iter().position(|(name, _)| name == scenario) {
            Some(idx) => idx,
            None => {
                lines.push((scenario.to_string(), self.waiting(scenario)));
                lines.len() - 1
            }
        };
        let Some((_, line)) = lines.get_mut(idx) else {
            return;
        };

        match (total, matches!(line, Line::Waiting(_))) {
            (Some(_), true) => {
                let running = self.multi.insert_after(line.bar(), ProgressBar::new(0));
                running.set_style(bar_style());
                running.set_prefix(scenario.to_string());
                let waiting = std::mem::replace(line, Line::Running(running));
                waiting.bar().finish_and_clear();
                self.multi.remove(waiting.bar());
            }
            (None, true) => line.bar().tick(),
            _ => {}
        }

        let pb = line.bar();
        pb.set_message(message);
        if let (Some(total), Line::Running(_)) = (total, &*line) {
            let total_ms = (total.as_millis() as u64).max(1);
            pb.set_length(total_ms);
            pb.set_position((scenario_elapsed.as_millis() as u64).min(total_ms));
        }
    }

    pub(crate) fn finish(&self) {
        let mut lines = self
            .lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (_, line) in lines.drain(..) {
            line.bar().finish_and_clear();
        }
        let _ = self.multi.clear();
    }

    fn waiting(&self, scenario: &str) -> Line {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(spinner_style());
        pb.set_prefix(scenario.to_string());
        pb.enable_steady_tick(Duration::from_millis(120));
        Line::Waiting(pb)
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix:>14} {bar:24.green/white} {percent:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix:>14} {spinner} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}
