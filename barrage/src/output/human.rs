use std::path::Path;
use std::sync::Arc;

use barrage_core::{ProgressFn, ProgressUpdate, RunConfig, RunSummary, render_text};

mod format;
mod progress;

use format::{format_duration_single, format_rate};
use progress::HumanProgress;

use super::OutputFormatter;
use crate::workload::HttpPlan;

pub(crate) struct HumanReadableOutput {
    progress: Arc<HumanProgress>,
}

impl HumanReadableOutput {
    pub(crate) fn new() -> Self {
        Self {
            progress: Arc::new(HumanProgress::new()),
        }
    }
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, plan_path: &Path, config: &RunConfig, http: &HttpPlan) {
        println!("plan: {}", plan_path.display());
        println!("target: {}", http.base_url);
        println!(
            "stages: {} duration={} max_vus={} graceful_stop={}",
            config.stages.len(),
            format_duration_single(config.total_duration()),
            config.max_target(),
            format_duration_single(config.graceful_stop),
        );
        println!();
    }

    fn progress(&self) -> Option<ProgressFn> {
        let progress = self.progress.clone();

        Some(Arc::new(move |u: ProgressUpdate| {
            let mut message = match &u.stage {
                Some(stage) => format!(
                    "stage={}/{} target={} stage_remaining={}",
                    stage.stage,
                    stage.stages,
                    stage.current_target,
                    format_duration_single(stage.stage_remaining),
                ),
                None => "stage=-".to_string(),
            };
            message.push_str(&format!(
                " vus={}/{} iters={} iters/s={}",
                u.live_vus,
                u.max_vus,
                u.iterations_total,
                format_rate(u.iterations_per_sec_now),
            ));

            progress.update(u.total_duration, u.elapsed, message);
        }))
    }

    fn print_summary(&self, summary: &RunSummary) -> anyhow::Result<()> {
        self.progress.finish();
        print!("{}", render_text(summary));

        let failed: Vec<_> = summary.thresholds.iter().filter(|t| !t.ok).collect();
        if !failed.is_empty() {
            eprintln!("thresholds failed:");
            for t in failed {
                match t.observed {
                    Some(obs) => eprintln!("  {}: {} (observed {obs})", t.metric, t.expression),
                    None => eprintln!("  {}: {} (no samples)", t.metric, t.expression),
                }
            }
        }
        if let Some(reason) = &summary.abort_reason {
            eprintln!("run aborted: {reason}");
        }

        Ok(())
    }
}
