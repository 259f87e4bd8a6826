use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tracing::info;

use stampede_core::{HttpClient, RunConfig, RunCoordinator, RunOptions, SummaryReport};

use crate::cli::RunArgs;
use crate::exit_codes::ExitCode;
use crate::output;
use crate::run_error::{RunError, classify_core_error};
use crate::run_support::{merged_env, write_report};
use crate::scenario_yaml::load_document;

const DEFAULT_BASE_URL: &str = "http://localhost:8080";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let out = output::formatter(args.output);

    let env = merged_env(&args.env).map_err(RunError::InvalidInput)?;
    let doc = load_document(&args.document, &env)
        .await
        .map_err(RunError::InvalidInput)?;

    let cfg = RunConfig {
        vus: args.vus,
        iterations: args.iterations,
        duration: args.duration,
        only: args.scenarios.clone(),
    };
    let scenarios = stampede_core::scenarios_from_options(doc.scenarios, &cfg)
        .map_err(|err| classify_core_error("invalid scenario config", err))?;

    let base_url = args
        .base_url
        .clone()
        .or(doc.base_url)
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    let opts = RunOptions {
        base_url: base_url.clone(),
        request_timeout: doc.timeout.or(RunOptions::default().request_timeout),
        budget: args.budget.or(doc.budget),
        thresholds: doc.thresholds,
        seed: args.seed,
        ..RunOptions::default()
    };

    out.print_header(&args.document, &scenarios);
    info!(base_url = %base_url, scenarios = scenarios.len(), "starting run");

    let transport = Arc::new(HttpClient::new(Some(CONNECT_TIMEOUT)));
    let summary = RunCoordinator::new(scenarios, opts)
        .run(transport, &doc.hooks, out.progress())
        .await
        .map_err(|err| classify_core_error("run failed", err))?;

    out.print_summary(&summary)
        .map_err(RunError::RuntimeError)?;

    if let Some(path) = &args.summary_out {
        write_summary(path, &summary)
            .await
            .map_err(RunError::RuntimeError)?;
    }

    Ok(ExitCode::from_quality_gates(
        summary.has_unexpected(),
        summary.thresholds_failed(),
    ))
}

async fn write_summary(path: &Path, summary: &SummaryReport) -> anyhow::Result<()> {
    let doc = output::summary_document(summary);
    let bytes = serde_json::to_vec_pretty(&doc).context("failed to encode summary")?;
    write_report(path, &bytes).await
}
