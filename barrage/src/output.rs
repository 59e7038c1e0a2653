use std::path::Path;

use barrage_core::{ProgressFn, RunConfig, RunSummary};

use crate::cli::OutputFormat;
use crate::workload::HttpPlan;

mod human;
mod json;

pub(crate) trait OutputFormatter: Send + Sync {
    fn print_header(&self, plan_path: &Path, config: &RunConfig, http: &HttpPlan);
    fn progress(&self) -> Option<ProgressFn>;
    fn print_summary(&self, summary: &RunSummary) -> anyhow::Result<()>;
}

pub(crate) fn formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::HumanReadable => Box::new(human::HumanReadableOutput::new()),
        OutputFormat::Json => Box::new(json::JsonOutput),
    }
}
