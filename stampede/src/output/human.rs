use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

mod format;
mod progress;
mod summary;

use format::{format_duration, format_rate};
use progress::HumanProgress;
use summary::render;

use stampede_core::ViolationReason;

use super::OutputFormatter;

pub(crate) struct HumanReadableOutput {
    progress: Arc<HumanProgress>,
    start_times: Arc<Mutex<HashMap<String, Duration>>>,
}

impl HumanReadableOutput {
    pub(crate) fn new() -> Self {
        Self {
            progress: Arc::new(HumanProgress::new()),
            start_times: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, document: &std::path::Path, scenarios: &[stampede_core::ScenarioConfig]) {
        let mut start_times = self
            .start_times
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        println!("document: {}", document.display());
        for s in scenarios {
            start_times.insert(s.name.to_string(), s.start_time);
            println!(
                "scenario: {} executor={} max_vus={} start={}",
                s.name,
                s.executor.kind(),
                s.executor.max_vus(),
                format_duration(s.start_time),
            );
        }
        if !scenarios.is_empty() {
            println!();
        }
    }

    fn progress(&self) -> Option<stampede_core::ProgressFn> {
        let progress = self.progress.clone();
        let start_times = self.start_times.clone();

        Some(Arc::new(move |u| {
            if !u.started {
                let starts_in = start_times
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .get(&u.scenario)
                    .map(|start| start.saturating_sub(u.elapsed))
                    .unwrap_or_default();
                progress.update(
                    &u.scenario,
                    None,
                    Duration::ZERO,
                    format!("waiting, starts in {}", format_duration(starts_in)),
                );
                return;
            }

            let start = start_times
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .get(&u.scenario)
                .copied()
                .unwrap_or_default();
            let scenario_elapsed = u.elapsed.saturating_sub(start);

            let mut message = format!("vus={}/{}", u.active_vus, u.target_vus);
            if let Some(stage) = &u.stage {
                message.push_str(&format!(
                    " stage={}/{} stage_remaining={}",
                    stage.stage,
                    stage.stages,
                    format_duration(stage.stage_remaining)
                ));
            }
            message.push_str(&format!(
                " elapsed={} reqs={} rps={} iters={} expected={} unexpected={}",
                format_duration(scenario_elapsed),
                u.requests_total,
                format_rate(u.rps_now),
                u.iterations_total,
                u.expected_total,
                u.unexpected_total,
            ));

            progress.update(&u.scenario, Some(u.total_duration), scenario_elapsed, message);
        }))
    }

    fn print_summary(&self, summary: &stampede_core::SummaryReport) -> anyhow::Result<()> {
        self.progress.finish();
        print!("{}", render(summary));

        if summary.thresholds_failed() {
            eprintln!("thresholds failed:");
            for v in &summary.threshold_violations {
                let key = match &v.scenario {
                    Some(s) => format!("{}{{scenario={s}}}", v.metric),
                    None => v.metric.clone(),
                };
                match (v.reason, v.observed) {
                    (ViolationReason::NotMet, Some(obs)) => {
                        eprintln!("  {key}: {} (observed {obs})", v.expression);
                    }
                    (ViolationReason::NoSamples, _) => {
                        eprintln!("  {key}: {} (no samples recorded)", v.expression);
                    }
                    _ => eprintln!("  {key}: {} (missing series)", v.expression),
                }
            }
        }

        Ok(())
    }
}
