use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use stampede_core::MAX_CONFIGURED_DURATION;

fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 10s, 250ms, 1m)".to_string());
    }
    let d = match s.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => humantime::parse_duration(s).map_err(|err| {
            format!("invalid duration '{s}' ({err}; expected e.g. 10s, 250ms, 1m)")
        })?,
    };
    if d > MAX_CONFIGURED_DURATION {
        return Err(format!(
            "duration '{s}' exceeds the limit of {}",
            humantime::format_duration(MAX_CONFIGURED_DURATION)
        ));
    }
    Ok(d)
}

fn parse_positive(input: &str) -> Result<u64, String> {
    match input.trim().parse::<u64>() {
        Ok(0) => Err("must be a positive integer".to_string()),
        Ok(v) => Ok(v),
        Err(err) => Err(format!("invalid number '{input}': {err}")),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Live progress bars on stderr and a text summary on stdout.
    HumanReadable,
    /// NDJSON progress lines and a JSON summary document on stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "stampede",
    author,
    version,
    about = "Scenario-driven HTTP load generator",
    long_about = "stampede drives populations of virtual users against an HTTP service.\n\nA YAML document declares scenarios (ramping-vus, constant-vus, per-vu-iterations), the endpoints each virtual user calls, which error responses count as expected business failures, and the thresholds that decide pass/fail.\n\n`${env:NAME}` placeholders in the document are resolved from the process environment; use `--env KEY=VALUE` to add/override values.",
    after_help = "Examples:\n  stampede run scenarios/coupon.yaml\n  stampede run scenarios/point.yaml --vus 10 --iterations 5\n  stampede run scenarios/run-all.yaml --scenario popular --budget 2m\n  stampede run scenarios/order.yaml --env BASE_URL=http://localhost:8080 --output json"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a scenario document
    #[command(
        long_about = "Run every scenario of a document concurrently and print the summary.\n\nCLI flags override values from the document."
    )]
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the scenario document (.yaml)
    pub document: PathBuf,

    /// Run every scenario as per-vu-iterations with this many iterations per VU
    #[arg(long, value_parser = parse_positive)]
    pub iterations: Option<u64>,

    /// Number of virtual users
    #[arg(long, value_parser = parse_positive)]
    pub vus: Option<u64>,

    /// Scenario duration (e.g. 10s, 250ms, 1m)
    #[arg(long, value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Overall run budget; in-flight iterations finish, no new ones start
    #[arg(long, value_parser = parse_duration)]
    pub budget: Option<Duration>,

    /// Only run the named scenario (repeatable)
    #[arg(long = "scenario", value_name = "NAME")]
    pub scenarios: Vec<String>,

    /// Target base URL (overrides the document's `baseUrl`)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Seed for reproducible endpoint selection and template randomness
    #[arg(long)]
    pub seed: Option<u64>,

    /// Add/override env vars visible to `${env:..}` placeholders (repeatable, KEY=VALUE).
    /// CLI-provided vars override the current process env.
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,

    /// Also write the JSON summary document to this path
    #[arg(long, value_name = "PATH")]
    pub summary_out: Option<PathBuf>,

    /// Log filter (e.g. info, stampede_core=debug); defaults to RUST_LOG or `warn`
    #[arg(long, value_name = "FILTER")]
    pub log_level: Option<String>,
}
