use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use stampede_metrics::{CounterSnapshot, Registry};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::{
    DEFAULT_MAX_DURATION, MAX_CONFIGURED_DURATION, RunConfig, ScenarioConfig, ScenarioExecutor,
    ScenarioExecutorKind, ScenarioOptions, Stage,
};
use crate::error::{Error, Result};
use crate::gate::Signal;
use crate::hooks::{HookContext, RunHooks};
use crate::outcome::{ScenarioMetrics, check_metric_names};
use crate::progress::{ProgressFn, ProgressUpdate, StageProgress};
use crate::shared::SharedVars;
use crate::summary::{RunRecord, ScenarioRecord, SummaryReport, build_summary};
use crate::thresholds::ThresholdSet;
use crate::transport::Transport;
use crate::vu::{RunContext, ScenarioRuntime, VuContext, run_vu};

fn total_stage_duration(stages: &[Stage]) -> Duration {
    stages
        .iter()
        .fold(Duration::ZERO, |acc, st| acc.saturating_add(st.duration))
}

/// Validates declared scenarios and applies CLI overrides.
///
/// CLI flags have the highest priority. `--iterations` turns any scenario into
/// `per-vu-iterations`; `--vus`/`--duration` turn a ramping scenario into a
/// constant one.
pub fn scenarios_from_options(
    opts: Vec<ScenarioOptions>,
    cfg: &RunConfig,
) -> Result<Vec<ScenarioConfig>> {
    let mut seen = HashSet::new();
    for s in &opts {
        if !seen.insert(s.name.clone()) {
            return Err(Error::DuplicateScenario(s.name.clone()));
        }
    }
    for name in &cfg.only {
        if !seen.contains(name) {
            return Err(Error::UnknownScenario(name.clone()));
        }
    }

    let mut out = Vec::with_capacity(opts.len());
    for s in opts {
        if !cfg.only.is_empty() && !cfg.only.contains(&s.name) {
            continue;
        }
        let executor = scenario_executor(&s, cfg)?;
        check_durations(&s, &executor)?;
        check_metric_names(&s.plan, &s.rules).map_err(|clash| Error::MetricNameConflict {
            scenario: s.name.clone(),
            name: clash.name,
            existing: clash.existing,
            declared: clash.declared,
        })?;
        out.push(ScenarioConfig {
            name: Arc::from(s.name),
            start_time: s.start_time,
            executor,
            plan: s.plan,
            rules: s.rules,
        });
    }

    if out.is_empty() {
        return Err(Error::NoScenarios);
    }
    Ok(out)
}

fn scenario_executor(s: &ScenarioOptions, cfg: &RunConfig) -> Result<ScenarioExecutor> {
    let scenario = || s.name.clone();

    let kind = match s.executor.as_deref() {
        Some(name) => name
            .parse::<ScenarioExecutorKind>()
            .map_err(|_| Error::InvalidExecutor {
                scenario: scenario(),
                executor: name.to_string(),
            })?,
        None if !s.stages.is_empty() => ScenarioExecutorKind::RampingVus,
        None if s.iterations.is_some() => ScenarioExecutorKind::PerVuIterations,
        None => ScenarioExecutorKind::ConstantVus,
    };

    if let Some(iterations) = cfg.iterations {
        let vus = cfg.vus.or(s.vus).unwrap_or(1);
        let max_duration = cfg
            .duration
            .or(s.max_duration)
            .unwrap_or(DEFAULT_MAX_DURATION);
        return per_vu_iterations(s, vus, iterations, max_duration);
    }

    match kind {
        ScenarioExecutorKind::RampingVus if cfg.vus.is_some() || cfg.duration.is_some() => {
            let stage_max = s.stages.iter().map(|st| st.target).max();
            let vus = cfg
                .vus
                .or(s.vus)
                .or(stage_max)
                .unwrap_or(1)
                .max(s.start_vus.unwrap_or(0));
            let duration = cfg
                .duration
                .or(s.duration)
                .unwrap_or_else(|| total_stage_duration(&s.stages));
            constant_vus(s, vus, duration)
        }
        ScenarioExecutorKind::RampingVus => {
            if s.iterations.is_some() {
                return Err(Error::InvalidIterations {
                    scenario: scenario(),
                });
            }
            if s.stages.is_empty() || total_stage_duration(&s.stages).is_zero() {
                return Err(Error::InvalidStages {
                    scenario: scenario(),
                });
            }
            let executor = ScenarioExecutor::RampingVus {
                start_vus: s.start_vus.unwrap_or(0),
                stages: s.stages.clone(),
            };
            if executor.max_vus() == 0 {
                return Err(Error::InvalidVus {
                    scenario: scenario(),
                });
            }
            Ok(executor)
        }
        ScenarioExecutorKind::ConstantVus => {
            let vus = cfg.vus.or(s.vus).unwrap_or(1);
            let duration = cfg.duration.or(s.duration).ok_or(Error::InvalidDuration {
                scenario: scenario(),
            })?;
            constant_vus(s, vus, duration)
        }
        ScenarioExecutorKind::PerVuIterations => {
            let vus = cfg.vus.or(s.vus).unwrap_or(1);
            let iterations = s.iterations.ok_or(Error::InvalidIterations {
                scenario: scenario(),
            })?;
            let max_duration = cfg
                .duration
                .or(s.max_duration)
                .unwrap_or(DEFAULT_MAX_DURATION);
            per_vu_iterations(s, vus, iterations, max_duration)
        }
    }
}

fn check_durations(s: &ScenarioOptions, executor: &ScenarioExecutor) -> Result<()> {
    let check = |field: &'static str, value: Duration| {
        if value > MAX_CONFIGURED_DURATION {
            return Err(Error::DurationTooLong {
                scenario: s.name.clone(),
                field,
                value,
            });
        }
        Ok(())
    };

    check("startTime", s.start_time)?;
    match executor {
        ScenarioExecutor::RampingVus { stages, .. } => check("stages", total_stage_duration(stages)),
        ScenarioExecutor::ConstantVus { duration, .. } => check("duration", *duration),
        ScenarioExecutor::PerVuIterations { max_duration, .. } => {
            check("maxDuration", *max_duration)
        }
    }
}

fn constant_vus(s: &ScenarioOptions, vus: u64, duration: Duration) -> Result<ScenarioExecutor> {
    if vus == 0 {
        return Err(Error::InvalidVus {
            scenario: s.name.clone(),
        });
    }
    if duration.is_zero() {
        return Err(Error::InvalidDuration {
            scenario: s.name.clone(),
        });
    }
    Ok(ScenarioExecutor::ConstantVus { vus, duration })
}

fn per_vu_iterations(
    s: &ScenarioOptions,
    vus: u64,
    iterations: u64,
    max_duration: Duration,
) -> Result<ScenarioExecutor> {
    if vus == 0 {
        return Err(Error::InvalidVus {
            scenario: s.name.clone(),
        });
    }
    if iterations == 0 {
        return Err(Error::InvalidIterations {
            scenario: s.name.clone(),
        });
    }
    if max_duration.is_zero() {
        return Err(Error::InvalidMaxDuration {
            scenario: s.name.clone(),
            max_duration,
        });
    }
    Ok(ScenarioExecutor::PerVuIterations {
        vus,
        iterations,
        max_duration,
    })
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub base_url: String,
    pub request_timeout: Option<Duration>,
    /// Overall wall-clock budget. In-flight iterations finish; no new ones start.
    pub budget: Option<Duration>,
    pub thresholds: Vec<ThresholdSet>,
    /// Seeds every VU's RNG for reproducible request mixes.
    pub seed: Option<u64>,
    pub progress_interval: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            request_timeout: Some(Duration::from_secs(30)),
            budget: None,
            thresholds: Vec::new(),
            seed: None,
            progress_interval: Duration::from_secs(1),
        }
    }
}

/// Drives every scenario concurrently and produces the run's [`SummaryReport`].
pub struct RunCoordinator {
    scenarios: Vec<ScenarioConfig>,
    opts: RunOptions,
}

impl RunCoordinator {
    pub fn new(scenarios: Vec<ScenarioConfig>, opts: RunOptions) -> Self {
        Self { scenarios, opts }
    }

    pub fn scenarios(&self) -> &[ScenarioConfig] {
        &self.scenarios
    }

    pub async fn run<T, H>(
        self,
        transport: Arc<T>,
        hooks: &H,
        progress: Option<ProgressFn>,
    ) -> Result<SummaryReport>
    where
        T: Transport,
        H: RunHooks,
    {
        let Self { scenarios, opts } = self;
        let shared = Arc::new(SharedVars::new());

        info!(scenarios = scenarios.len(), "running setup");
        hooks
            .setup(HookContext {
                transport: &*transport,
                shared: &shared,
                base_url: &opts.base_url,
                timeout: opts.request_timeout,
                seed: opts.seed,
            })
            .await
            .map_err(Error::Setup)?;

        let run = Arc::new(RunContext {
            transport: transport.clone(),
            shared: shared.clone(),
            base_url: opts.base_url.clone(),
            request_timeout: opts.request_timeout,
            seed: opts.seed,
            start: Signal::new(),
            stop: Signal::new(),
            run_started: OnceLock::new(),
        });

        let runtimes: Vec<(Arc<Registry>, Arc<ScenarioRuntime>)> = scenarios
            .into_iter()
            .map(|config| {
                let registry = Arc::new(Registry::default());
                let metrics = ScenarioMetrics::new(registry.clone(), &config.plan, &config.rules);
                (registry, Arc::new(ScenarioRuntime::new(config, metrics)))
            })
            .collect();

        let total_vus: u64 = runtimes
            .iter()
            .map(|(_, rt)| rt.config.executor.max_vus())
            .sum();
        let mut handles = Vec::with_capacity(total_vus.min(usize::MAX as u64) as usize);
        let mut next_vu_id: u64 = 1;
        for (_, runtime) in &runtimes {
            for scenario_vu in 1..=runtime.config.executor.max_vus() {
                let ctx = VuContext {
                    vu_id: next_vu_id,
                    scenario_vu,
                    scenario: runtime.clone(),
                    run: run.clone(),
                };
                next_vu_id = next_vu_id.saturating_add(1);
                handles.push(tokio::spawn(run_vu(ctx)));
            }
        }

        let started = Instant::now();
        let _ = run.run_started.set(started);
        run.start.fire();
        info!(vus = total_vus, budget = ?opts.budget, "run started");

        let budget_handle = opts.budget.map(|budget| {
            let run = run.clone();
            tokio::spawn(async move {
                tokio::time::sleep(budget).await;
                warn!(budget = ?budget, "run budget exhausted; letting in-flight iterations finish");
                run.stop.fire();
            })
        });

        let progress_handle = progress.map(|progress| {
            let scenarios: Vec<Arc<ScenarioRuntime>> =
                runtimes.iter().map(|(_, rt)| rt.clone()).collect();
            tokio::spawn(progress_loop(
                progress,
                scenarios,
                started,
                opts.progress_interval,
            ))
        });

        let mut join_err = None;
        for h in handles {
            if let Err(err) = h.await {
                join_err.get_or_insert(err);
            }
        }
        let elapsed = started.elapsed();

        for h in [budget_handle, progress_handle].into_iter().flatten() {
            h.abort();
            let _ = h.await;
        }
        if let Some(err) = join_err {
            return Err(Error::Join(err));
        }

        let records: Vec<ScenarioRecord<'_>> = runtimes
            .iter()
            .map(|(registry, rt)| ScenarioRecord {
                config: &rt.config,
                registry,
                started: rt.started_at().is_some(),
                interrupted: rt.was_interrupted(),
                cut_off: rt.gate.was_cut_off(),
            })
            .collect();
        let budget_exceeded = run.stop.is_fired()
            && records.iter().any(|r| r.interrupted || !r.started);

        let report = build_summary(
            RunRecord {
                elapsed,
                budget: opts.budget,
                budget_exceeded,
            },
            &records,
            &opts.thresholds,
        );
        info!(
            elapsed = ?elapsed,
            requests = report.requests_total(),
            unexpected = report.unexpected_total(),
            budget_exceeded,
            "run finished"
        );

        // Teardown is verification only; the report is already final.
        if let Err(err) = hooks
            .teardown(HookContext {
                transport: &*transport,
                shared: &shared,
                base_url: &opts.base_url,
                timeout: opts.request_timeout,
                seed: opts.seed,
            })
            .await
        {
            error!(error = %err, "teardown failed");
        }

        Ok(report)
    }
}

async fn progress_loop(
    progress: ProgressFn,
    scenarios: Vec<Arc<ScenarioRuntime>>,
    started: Instant,
    every: Duration,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut tick_id: u64 = 0;
    let mut last_at = Instant::now();
    let mut last_requests: Vec<Option<CounterSnapshot>> = vec![None; scenarios.len()];

    loop {
        interval.tick().await;

        tick_id = tick_id.saturating_add(1);
        let now = Instant::now();
        let dt = now.duration_since(last_at);
        last_at = now;
        let elapsed = now.duration_since(started);

        for (s, last) in scenarios.iter().zip(last_requests.iter_mut()) {
            let requests_total = s.metrics.requests_total();
            let snapshot = CounterSnapshot::new(requests_total);
            let rps_now = snapshot.per_sec_since(*last, dt.as_secs_f64());
            *last = Some(snapshot);

            let scenario_elapsed = s.started_at().map(|at| now.saturating_duration_since(at));
            let target_vus = scenario_elapsed.map_or(0, |e| s.schedule.target_at(e));
            let stage = scenario_elapsed
                .and_then(|e| s.schedule.stage_snapshot_at(e))
                .map(|st| StageProgress {
                    stage: st.index + 1,
                    stages: st.count,
                    stage_elapsed: st.stage_elapsed,
                    stage_remaining: st.stage_remaining,
                    start_target: st.start_target,
                    end_target: st.end_target,
                    current_target: st.current_target,
                });

            (progress)(ProgressUpdate {
                tick: tick_id,
                elapsed,
                scenario: s.config.name.to_string(),
                exec: s.config.executor.kind(),
                started: scenario_elapsed.is_some(),
                active_vus: s.metrics.active_vus().max(0) as u64,
                target_vus,
                total_duration: s.schedule.total_duration(),
                stage,
                requests_total,
                rps_now,
                iterations_total: s.metrics.iterations_total(),
                expected_total: s.metrics.expected_total(),
                unexpected_total: s.metrics.unexpected_total(),
            });
        }
    }
}
