mod cli;
mod exit_codes;
mod output;
mod run;
mod run_error;
mod run_support;
mod scenario_yaml;

use clap::Parser;
use mimalloc::MiMalloc;
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// `--log-level` wins over `RUST_LOG`; anything unparsable falls back to `warn`.
fn log_filter(level: Option<&str>) -> EnvFilter {
    match level {
        Some(level) => EnvFilter::try_new(level).ok(),
        None => EnvFilter::try_from_default_env().ok(),
    }
    .unwrap_or_else(|| EnvFilter::new("warn"))
}

/// Logs go to stderr; stdout carries summaries and NDJSON.
fn init_logging(level: Option<&str>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_filter(level))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() {
    let cli = match cli::Cli::try_parse() {
        Ok(v) => v,
        Err(err) => {
            use clap::error::ErrorKind;
            let _ = err.print();
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                    exit_codes::ExitCode::Success.as_i32()
                }
                _ => exit_codes::ExitCode::InvalidInput.as_i32(),
            };
            std::process::exit(code);
        }
    };

    let code = match cli.command {
        cli::Command::Run(args) => {
            init_logging(args.log_level.as_deref());
            match run::run(args).await {
                Ok(code) => code.as_i32(),
                Err(err) => {
                    eprintln!("{err}");
                    err.exit_code().as_i32()
                }
            }
        }
    };

    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_flag_is_parsed_and_bad_levels_fall_back_to_warn() {
        assert_eq!(log_filter(Some("debug")).to_string(), "debug");
        assert_eq!(log_filter(Some("stampede=loud")).to_string(), "warn");
    }
}
