use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::classify::{Verdict, classify_response, classify_transport_error};
use crate::config::{ScenarioConfig, ScenarioExecutor};
use crate::gate::{IterationGate, Signal};
use crate::outcome::{ActiveVuGuard, RequestOutcome, ScenarioMetrics};
use crate::schedule::RampSchedule;
use crate::shared::SharedVars;
use crate::template::{IterationVars, TemplateContext};
use crate::transport::Transport;

const LOG_BODY_LIMIT: usize = 256;

/// Run-wide state shared by every VU.
#[derive(Debug)]
pub struct RunContext<T> {
    pub transport: Arc<T>,
    pub shared: Arc<SharedVars>,
    pub base_url: String,
    pub request_timeout: Option<Duration>,
    pub seed: Option<u64>,
    pub start: Signal,
    /// Fired when the run budget expires.
    pub stop: Signal,
    pub run_started: OnceLock<Instant>,
}

/// Per-scenario state shared by that scenario's VUs.
#[derive(Debug)]
pub struct ScenarioRuntime {
    pub config: ScenarioConfig,
    pub schedule: RampSchedule,
    pub gate: IterationGate,
    pub metrics: ScenarioMetrics,
    started_at: OnceLock<Instant>,
    interrupted: AtomicBool,
    iterations_started: AtomicU64,
}

impl ScenarioRuntime {
    pub fn new(config: ScenarioConfig, metrics: ScenarioMetrics) -> Self {
        let schedule = RampSchedule::for_executor(&config.executor);
        let gate = IterationGate::new(match &config.executor {
            ScenarioExecutor::RampingVus { .. } => None,
            ScenarioExecutor::ConstantVus { duration, .. } => Some(*duration),
            ScenarioExecutor::PerVuIterations { max_duration, .. } => Some(*max_duration),
        });
        Self {
            config,
            schedule,
            gate,
            metrics,
            started_at: OnceLock::new(),
            interrupted: AtomicBool::new(false),
            iterations_started: AtomicU64::new(0),
        }
    }

    fn mark_started(&self, at: Instant) {
        if self.started_at.set(at).is_ok() {
            self.gate.start_at(at);
            debug!(scenario = %self.config.name, "scenario started");
        }
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at.get().copied()
    }

    fn mark_interrupted(&self) {
        self.interrupted.store(true, Ordering::Relaxed);
    }

    /// The run budget stopped this scenario before its natural end.
    pub fn was_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Relaxed)
    }
}

pub struct VuContext<T> {
    /// Run-wide id, 1-based.
    pub vu_id: u64,
    /// 1-based index within the scenario.
    pub scenario_vu: u64,
    pub scenario: Arc<ScenarioRuntime>,
    pub run: Arc<RunContext<T>>,
}

enum Flow {
    Continue,
    Stop,
}

impl<T: Transport> VuContext<T> {
    fn rng(&self) -> StdRng {
        match self.run.seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ self.vu_id.wrapping_mul(0x9E37_79B9_7F4A_7C15)),
            None => StdRng::from_entropy(),
        }
    }

    /// Sleeps `dur`, waking early on run stop. Stopping marks the scenario interrupted.
    async fn pause(&self, dur: Duration) -> Flow {
        if self.run.stop.sleep_or_fired(dur).await {
            self.scenario.mark_interrupted();
            return Flow::Stop;
        }
        Flow::Continue
    }

    fn stopped(&self) -> bool {
        if self.run.stop.is_fired() {
            self.scenario.mark_interrupted();
            return true;
        }
        false
    }

    async fn iteration(&self, iter: u64, rng: &mut StdRng) {
        let scenario = &self.scenario;
        let plan = &scenario.config.plan;
        let rules = &scenario.config.rules;
        let name = &scenario.config.name;

        let started = Instant::now();
        let scenario_iter = scenario.iterations_started.fetch_add(1, Ordering::Relaxed);
        let mut vars = IterationVars::new();
        let mut endpoint = plan.select(rng);

        while let Some(ep) = endpoint {
            let built = {
                let mut tctx = TemplateContext {
                    vu: self.vu_id,
                    scenario_vu: self.scenario_vu,
                    iter,
                    scenario_iter,
                    vars: &vars,
                    shared: &self.run.shared,
                    rng: &mut *rng,
                };
                ep.build(&self.run.base_url, self.run.request_timeout, &mut tctx)
            };
            let req = match built {
                Ok(req) => req,
                Err(err) => {
                    scenario.metrics.record_plan_error();
                    debug!(scenario = %name, endpoint = %ep.name, error = %err, "request not built");
                    break;
                }
            };

            let sent = Instant::now();
            let res = self.run.transport.send(req).await;
            let latency = sent.elapsed();

            let (classification, status, body) = match res {
                Ok(res) => {
                    let verdict = classify_response(res.status, &res.body, rules);
                    match &verdict {
                        Verdict::Undecodable(err) => warn!(
                            scenario = %name,
                            endpoint = %ep.name,
                            status = res.status,
                            body = %String::from_utf8_lossy(&res.body[..res.body.len().min(LOG_BODY_LIMIT)]),
                            error = %err,
                            "undecodable error response"
                        ),
                        Verdict::Mismatch(_) => warn!(
                            scenario = %name,
                            endpoint = %ep.name,
                            status = res.status,
                            body = %String::from_utf8_lossy(&res.body),
                            "unexpected failure"
                        ),
                        Verdict::Classified(_) => {}
                    }
                    (verdict.classification(), Some(res.status), Some(res.body))
                }
                Err(err) => {
                    debug!(
                        scenario = %name,
                        endpoint = %ep.name,
                        failure = %err.failure(),
                        error = %err,
                        "transport error"
                    );
                    (classify_transport_error(&err, rules), None, None)
                }
            };

            let success = classification.is_success();
            scenario.metrics.record(RequestOutcome {
                classification,
                latency,
                status,
                scenario: name.clone(),
                endpoint: ep.id,
            });
            if !success {
                break;
            }

            if let Some(body) = body
                && let Err(err) = ep.capture_into(&body, &mut vars)
            {
                scenario.metrics.record_plan_error();
                debug!(scenario = %name, endpoint = %ep.name, error = %err, "capture failed");
                break;
            }
            endpoint = ep.then.as_deref();
        }

        scenario.metrics.record_iteration(started.elapsed());
    }

    async fn think(&self, rng: &mut StdRng, bound: Option<Duration>) -> Flow {
        let think = &self.scenario.config.plan.think_time;
        if think.is_zero() {
            // Keep a zero-think VU from monopolising its worker.
            tokio::task::yield_now().await;
            return Flow::Continue;
        }
        let mut dur = think.sample(rng);
        if let Some(bound) = bound {
            dur = dur.min(bound);
        }
        self.pause(dur).await
    }

    async fn run_ramping(&self, scenario_start: Instant, rng: &mut StdRng) {
        let RampSchedule::Ramping(schedule) = &self.scenario.schedule else {
            return;
        };
        let mut active: Option<ActiveVuGuard> = None;
        let mut iter = 0u64;

        loop {
            if self.stopped() {
                break;
            }
            let elapsed = scenario_start.elapsed();
            if schedule.is_done(elapsed) {
                break;
            }

            // Retire (or stay dormant) at the iteration boundary.
            if self.scenario_vu > schedule.target_at(elapsed) {
                active = None;
                let wait = schedule
                    .next_recheck_in(elapsed, self.scenario_vu)
                    .max(Duration::from_millis(1));
                if let Flow::Stop = self.pause(wait).await {
                    break;
                }
                continue;
            }

            if active.is_none() {
                active = Some(self.scenario.metrics.enter_active_vu());
            }
            self.iteration(iter, rng).await;
            iter += 1;

            let remaining = schedule
                .total_duration()
                .saturating_sub(scenario_start.elapsed());
            if let Flow::Stop = self.think(rng, Some(remaining)).await {
                break;
            }
        }
    }

    async fn run_constant(&self, rng: &mut StdRng) {
        let _active = self.scenario.metrics.enter_active_vu();
        let gate = &self.scenario.gate;
        let mut iter = 0u64;

        while gate.next() {
            if self.stopped() {
                break;
            }
            self.iteration(iter, rng).await;
            iter += 1;
            if !gate.next() {
                break;
            }
            if let Flow::Stop = self.think(rng, gate.remaining()).await {
                break;
            }
        }
    }

    async fn run_per_vu_iterations(&self, iterations: u64, rng: &mut StdRng) {
        let _active = self.scenario.metrics.enter_active_vu();
        let gate = &self.scenario.gate;

        for iter in 0..iterations {
            if self.stopped() {
                break;
            }
            if !gate.next() {
                gate.mark_cut_off();
                break;
            }
            self.iteration(iter, rng).await;
            if iter + 1 < iterations
                && let Flow::Stop = self.think(rng, gate.remaining()).await
            {
                break;
            }
        }
    }
}

pub async fn run_vu<T: Transport>(ctx: VuContext<T>) {
    ctx.run.start.wait().await;

    let run_started = ctx
        .run
        .run_started
        .get()
        .copied()
        .unwrap_or_else(Instant::now);
    let Some(scenario_start) = run_started.checked_add(ctx.scenario.config.start_time) else {
        debug!(scenario = %ctx.scenario.config.name, "start offset out of range");
        return;
    };

    if let Flow::Stop = ctx
        .pause(scenario_start.saturating_duration_since(Instant::now()))
        .await
    {
        return;
    }
    ctx.scenario.mark_started(scenario_start);

    let mut rng = ctx.rng();
    match &ctx.scenario.config.executor {
        ScenarioExecutor::RampingVus { .. } => ctx.run_ramping(scenario_start, &mut rng).await,
        ScenarioExecutor::ConstantVus { .. } => ctx.run_constant(&mut rng).await,
        ScenarioExecutor::PerVuIterations { iterations, .. } => {
            ctx.run_per_vu_iterations(*iterations, &mut rng).await;
        }
    }
}
