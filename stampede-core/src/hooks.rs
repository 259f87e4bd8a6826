use std::future::Future;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info};

use crate::plan::{Endpoint, PlanError};
use crate::shared::SharedVars;
use crate::template::{IterationVars, TemplateContext};
use crate::transport::Transport;

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("step `{step}` could not reach the target: {source}")]
    Transport {
        step: String,
        #[source]
        source: stampede_http::Error,
    },

    #[error("step `{step}`: none of {attempts} request(s) succeeded (last status {last_status})")]
    NoSuccess {
        step: String,
        attempts: u64,
        last_status: u16,
    },

    #[error("step `{step}`: {source}")]
    Plan {
        step: String,
        #[source]
        source: PlanError,
    },
}

pub struct HookContext<'a, T> {
    pub transport: &'a T,
    pub shared: &'a SharedVars,
    pub base_url: &'a str,
    pub timeout: Option<Duration>,
    /// Seeds `${rand}` placeholders in hook requests.
    pub seed: Option<u64>,
}

impl<T> HookContext<'_, T> {
    fn rng(&self) -> StdRng {
        self.seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64)
    }
}

/// Run-level hooks. `setup` runs once before any scenario and may seed
/// shared variables; `teardown` runs once after the summary is built.
pub trait RunHooks: Send + Sync {
    fn setup<T: Transport>(
        &self,
        ctx: HookContext<'_, T>,
    ) -> impl Future<Output = Result<(), HookError>> + Send;

    fn teardown<T: Transport>(
        &self,
        ctx: HookContext<'_, T>,
    ) -> impl Future<Output = Result<(), HookError>> + Send;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl RunHooks for NoHooks {
    async fn setup<T: Transport>(&self, _ctx: HookContext<'_, T>) -> Result<(), HookError> {
        Ok(())
    }

    async fn teardown<T: Transport>(&self, _ctx: HookContext<'_, T>) -> Result<(), HookError> {
        Ok(())
    }
}

/// A declarative request issued `repeat` times. Captured values are appended
/// to shared list variables of the same name.
#[derive(Debug, Clone)]
pub struct HookStep {
    pub endpoint: Endpoint,
    pub repeat: u64,
}

#[derive(Debug, Clone, Default)]
pub struct StepHooks {
    pub setup: Vec<HookStep>,
    pub teardown: Vec<HookStep>,
}

/// Runs one step. Each repetition follows the endpoint's `then` chain with
/// the values captured so far and counts as succeeded only if every request
/// in the chain did. Transport errors abort immediately; otherwise the step
/// fails only if no repetition succeeded.
async fn run_step<T: Transport>(
    step: &HookStep,
    ctx: &HookContext<'_, T>,
    rng: &mut StdRng,
) -> Result<u64, HookError> {
    let name = step.endpoint.name.to_string();
    let mut succeeded = 0u64;
    let mut last_status = 0u16;
    let attempts = step.repeat.max(1);

    for i in 0..attempts {
        let mut vars = IterationVars::new();
        let mut endpoint = Some(&step.endpoint);
        let mut completed = false;

        while let Some(ep) = endpoint {
            let mut tctx = TemplateContext {
                vu: 0,
                scenario_vu: 0,
                iter: i,
                scenario_iter: i,
                vars: &vars,
                shared: ctx.shared,
                rng: &mut *rng,
            };
            let req = ep
                .build(ctx.base_url, ctx.timeout, &mut tctx)
                .map_err(|source| HookError::Plan {
                    step: name.clone(),
                    source,
                })?;

            let res = ctx
                .transport
                .send(req)
                .await
                .map_err(|source| HookError::Transport {
                    step: name.clone(),
                    source,
                })?;

            last_status = res.status;
            if !res.is_success() {
                debug!(
                    step = %name,
                    endpoint = %ep.name,
                    status = res.status,
                    "hook request did not succeed"
                );
                break;
            }

            let mut captured = IterationVars::new();
            if let Err(err) = ep.capture_into(&res.body, &mut captured) {
                debug!(step = %name, endpoint = %ep.name, error = %err, "hook capture skipped");
                completed = ep.then.is_none();
                break;
            }
            for (k, v) in &captured {
                ctx.shared.push(k, v.clone());
            }
            vars.extend(captured);

            endpoint = ep.then.as_deref();
            completed = endpoint.is_none();
        }

        if completed {
            succeeded += 1;
        }
    }

    if succeeded == 0 {
        return Err(HookError::NoSuccess {
            step: name,
            attempts,
            last_status,
        });
    }
    Ok(succeeded)
}

impl RunHooks for StepHooks {
    async fn setup<T: Transport>(&self, ctx: HookContext<'_, T>) -> Result<(), HookError> {
        let mut rng = ctx.rng();
        for step in &self.setup {
            let ok = run_step(step, &ctx, &mut rng).await?;
            info!(step = %step.endpoint.name, succeeded = ok, "setup step done");
        }
        Ok(())
    }

    async fn teardown<T: Transport>(&self, ctx: HookContext<'_, T>) -> Result<(), HookError> {
        let mut rng = ctx.rng();
        let mut first_err = None;
        for step in &self.teardown {
            match run_step(step, &ctx, &mut rng).await {
                Ok(ok) => info!(step = %step.endpoint.name, succeeded = ok, "teardown step done"),
                Err(err) => {
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
