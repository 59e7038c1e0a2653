use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use barrage_core::{ProgressFn, ProgressUpdate, RunConfig, RunSummary};
use serde::Serialize;

use super::OutputFormatter;
use crate::workload::HttpPlan;

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _plan_path: &Path, _config: &RunConfig, _http: &HttpPlan) {}

    fn progress(&self) -> Option<ProgressFn> {
        Some(Arc::new(move |u: ProgressUpdate| {
            emit_json_line(&build_progress_line(&u));
        }))
    }

    fn print_summary(&self, summary: &RunSummary) -> anyhow::Result<()> {
        let line = JsonSummaryLine {
            kind: "summary",
            summary,
        };
        emit_json_line(&line);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonProgressLine {
    pub kind: &'static str,
    pub tick: u64,
    pub elapsed_secs: f64,
    pub total_secs: f64,
    pub live_vus: u64,
    pub max_vus: u64,
    pub iterations_total: u64,
    pub iterations_per_sec: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stages: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_vus: Option<u64>,
}

#[derive(Debug, Serialize)]
struct JsonSummaryLine<'a> {
    kind: &'static str,
    summary: &'a RunSummary,
}

fn build_progress_line(u: &ProgressUpdate) -> JsonProgressLine {
    JsonProgressLine {
        kind: "progress",
        tick: u.tick,
        elapsed_secs: u.elapsed.as_secs_f64(),
        total_secs: u.total_duration.as_secs_f64(),
        live_vus: u.live_vus,
        max_vus: u.max_vus,
        iterations_total: u.iterations_total,
        iterations_per_sec: if u.iterations_per_sec_now.is_finite() {
            u.iterations_per_sec_now
        } else {
            0.0
        },
        stage: u.stage.as_ref().map(|s| s.stage),
        stages: u.stage.as_ref().map(|s| s.stages),
        target_vus: u.stage.as_ref().map(|s| s.current_target),
    }
}

fn emit_json_line<T: Serialize>(line: &T) {
    let mut out = std::io::stdout().lock();
    if serde_json::to_writer(&mut out, line).is_ok() {
        let _ = writeln!(out);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use barrage_core::StageProgress;
    use serde_json::Value;

    use super::*;

    #[test]
    fn progress_line_flattens_stage() {
        let u = ProgressUpdate {
            tick: 4,
            elapsed: Duration::from_millis(1500),
            total_duration: Duration::from_secs(120),
            live_vus: 3,
            max_vus: 10,
            iterations_total: 42,
            iterations_per_sec_now: 6.0,
            stage: Some(StageProgress {
                stage: 1,
                stages: 3,
                stage_elapsed: Duration::from_millis(1500),
                stage_remaining: Duration::from_millis(28_500),
                start_target: 0,
                end_target: 10,
                current_target: 1,
            }),
        };

        let v: Value = match serde_json::to_value(build_progress_line(&u)) {
            Ok(v) => v,
            Err(err) => panic!("to_value failed: {err}"),
        };
        assert_eq!(v.get("kind").and_then(Value::as_str), Some("progress"));
        assert_eq!(v.get("elapsed_secs").and_then(Value::as_f64), Some(1.5));
        assert_eq!(v.get("stage").and_then(Value::as_u64), Some(1));
        assert_eq!(v.get("target_vus").and_then(Value::as_u64), Some(1));
    }

    #[test]
    fn progress_line_omits_stage_after_schedule() {
        let u = ProgressUpdate {
            tick: 0,
            elapsed: Duration::ZERO,
            total_duration: Duration::ZERO,
            live_vus: 0,
            max_vus: 0,
            iterations_total: 0,
            iterations_per_sec_now: f64::NAN,
            stage: None,
        };
        let v: Value = match serde_json::to_value(build_progress_line(&u)) {
            Ok(v) => v,
            Err(err) => panic!("to_value failed: {err}"),
        };
        assert!(v.get("stage").is_none());
        assert_eq!(v.get("iterations_per_sec").and_then(Value::as_f64), Some(0.0));
    }
}
