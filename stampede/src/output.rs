use std::path::Path;

use crate::cli::OutputFormat;

mod human;
mod json;

pub(crate) use json::summary_document;

pub(crate) trait OutputFormatter: Send + Sync {
    fn print_header(&self, document: &Path, scenarios: &[stampede_core::ScenarioConfig]);
    fn progress(&self) -> Option<stampede_core::ProgressFn>;
    fn print_summary(&self, summary: &stampede_core::SummaryReport) -> anyhow::Result<()>;
}

pub(crate) fn formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::HumanReadable => Box::new(human::HumanReadableOutput::new()),
        OutputFormat::Json => Box::new(json::JsonOutput),
    }
}
