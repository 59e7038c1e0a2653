use std::sync::Arc;
use std::time::Duration;

use barrage_metrics::{Registry, Sampler, Snapshot};
use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::executor::VuPool;
use crate::progress::{ProgressFn, ProgressUpdate};
use crate::schedule::RampingSchedule;
use crate::summary::{RunSummary, SummaryReporter};
use crate::thresholds::{Threshold, ThresholdOutcome, evaluate_thresholds};
use crate::workload::Workload;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Aborted,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    fn can_become(self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Aborted)
        )
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub summary: RunSummary,
    pub snapshot: Snapshot,
    pub thresholds: Vec<ThresholdOutcome>,
    /// Reporter failures; the run itself still produced a summary.
    pub report_errors: Vec<String>,
}

impl RunOutcome {
    pub fn thresholds_passed(&self) -> bool {
        self.thresholds.iter().all(|t| t.passed)
    }
}

/// Owns a run from validation to its single summary.
pub struct RunController {
    config: RunConfig,
    schedule: RampingSchedule,
    thresholds: Vec<Threshold>,
    registry: Arc<Registry>,
    status: RunStatus,
    progress: Option<ProgressFn>,
    reporters: Vec<Box<dyn SummaryReporter>>,
}

impl RunController {
    /// Validates `config`; every configuration error surfaces here, before the run starts.
    pub fn new(config: RunConfig) -> Result<Self> {
        let thresholds = config.validate()?;
        let schedule = RampingSchedule::new(config.stages.clone());

        Ok(Self {
            config,
            schedule,
            thresholds,
            registry: Arc::new(Registry::default()),
            status: RunStatus::Pending,
            progress: None,
            reporters: Vec::new(),
        })
    }

    #[must_use]
    pub fn with_registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: Box<dyn SummaryReporter>) -> Self {
        self.reporters.push(reporter);
        self
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn schedule(&self) -> &RampingSchedule {
        &self.schedule
    }

    fn transition(&mut self, next: RunStatus) -> Result<()> {
        if !self.status.can_become(next) {
            return Err(Error::IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        tracing::debug!(from = %self.status, to = %next, "run state");
        self.status = next;
        Ok(())
    }

    /// Drives the run to a terminal state.
    ///
    /// Cancelling `cancel` aborts the run: in-flight iterations are interrupted and the
    /// summary is marked incomplete.
    pub async fn run<W: Workload>(
        &mut self,
        workload: W,
        cancel: CancellationToken,
    ) -> Result<RunOutcome> {
        self.transition(RunStatus::Running)?;
        let started = Instant::now();
        let workload = Arc::new(workload);

        tracing::info!(
            stages = self.schedule.stages().len(),
            duration = ?self.schedule.total_duration(),
            max_vus = self.schedule.max_target(),
            thresholds = self.thresholds.len(),
            "run starting"
        );

        let setup = tokio::select! {
            res = workload.setup() => res.map_err(|e| format!("setup failed: {e}")),
            _ = cancel.cancelled() => Err("cancelled during setup".to_string()),
        };
        if let Err(reason) = setup {
            tracing::error!(reason = %reason, "run aborted before start");
            return Ok(self.finish(RunStatus::Aborted, Some(reason), started.elapsed()));
        }

        let abort = cancel.child_token();
        let mut pool = VuPool::new(
            workload.clone(),
            Sampler::new(self.registry.clone()),
            self.config.env.clone(),
            abort.clone(),
        );

        let mut abort_reason = self.drive(&mut pool, started, &cancel).await;

        if abort_reason.is_some() {
            abort.cancel();
            pool.drain(Duration::ZERO).await;
        } else {
            pool.reconcile(0);
            pool.drain(self.config.graceful_stop).await;
            if cancel.is_cancelled() {
                abort_reason = Some("cancelled".to_string());
            }
        }

        if abort_reason.is_none() && pool.join_failures() > 0 {
            abort_reason = Some(format!("{} worker task(s) failed", pool.join_failures()));
        }

        if let Err(err) = workload.teardown().await {
            tracing::warn!(error = %err, "teardown failed");
        }

        let status = if abort_reason.is_some() {
            RunStatus::Aborted
        } else {
            RunStatus::Completed
        };
        Ok(self.finish(status, abort_reason, started.elapsed()))
    }

    /// Runs the schedule; returns the abort reason if the run did not finish it.
    async fn drive<W: Workload>(
        &self,
        pool: &mut VuPool<W>,
        started: Instant,
        cancel: &CancellationToken,
    ) -> Option<String> {
        let total = self.schedule.total_duration();
        let end = tokio::time::sleep_until(started + total);
        tokio::pin!(end);

        let mut tick = tokio::time::interval(self.config.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let interval = self.config.threshold_interval;
        let mut eval = tokio::time::interval_at(started + interval, interval);
        eval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut progress_tick =
            tokio::time::interval_at(started + PROGRESS_INTERVAL, PROGRESS_INTERVAL);
        progress_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut progress_id: u64 = 0;
        let mut last_iterations: u64 = 0;
        let mut last_progress_at = started;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::warn!("run cancelled");
                    return Some("cancelled".to_string());
                }
                _ = &mut end => {
                    tracing::info!(
                        elapsed = ?started.elapsed(),
                        "schedule complete, stopping workers"
                    );
                    return None;
                }
                _ = tick.tick() => {
                    pool.reconcile(self.schedule.target_at(started.elapsed()));
                }
                _ = eval.tick(), if !self.thresholds.is_empty() => {
                    if let Some(reason) = self.evaluate_periodic(started.elapsed()) {
                        return Some(reason);
                    }
                }
                _ = progress_tick.tick(), if self.progress.is_some() => {
                    let now = Instant::now();
                    let iterations = pool.iterations();
                    let dt = now.duration_since(last_progress_at).as_secs_f64().max(1e-9);
                    progress_id = progress_id.saturating_add(1);

                    let elapsed = started.elapsed();
                    let update = ProgressUpdate {
                        tick: progress_id,
                        elapsed,
                        total_duration: total,
                        live_vus: pool.live(),
                        max_vus: self.schedule.max_target(),
                        iterations_total: iterations,
                        iterations_per_sec_now:
                            iterations.saturating_sub(last_iterations) as f64 / dt,
                        stage: self.schedule.stage_snapshot_at(elapsed).map(Into::into),
                    };
                    last_iterations = iterations;
                    last_progress_at = now;

                    if let Some(progress) = &self.progress {
                        progress(update);
                    }
                }
            }
        }
    }

    fn evaluate_periodic(&self, elapsed: Duration) -> Option<String> {
        let snapshot = self.registry.snapshot();
        let outcomes = evaluate_thresholds(&snapshot, &self.thresholds, elapsed);

        let mut abort = None;
        for o in outcomes.iter().filter(|o| !o.passed) {
            tracing::warn!(
                metric = %o.metric,
                expression = %o.expression,
                observed = ?o.observed,
                "threshold breached"
            );
            if o.abort_on_fail && abort.is_none() {
                abort = Some(format!("threshold {} on {} breached", o.expression, o.metric));
            }
        }
        abort
    }

    fn finish(
        &mut self,
        status: RunStatus,
        reason: Option<String>,
        elapsed: Duration,
    ) -> RunOutcome {
        // `run` only calls this from Running.
        if let Err(err) = self.transition(status) {
            tracing::error!(error = %err, "unexpected run state");
        }

        let snapshot = self.registry.snapshot();
        let thresholds = evaluate_thresholds(&snapshot, &self.thresholds, elapsed);
        for o in thresholds.iter().filter(|o| !o.passed) {
            tracing::warn!(
                metric = %o.metric,
                expression = %o.expression,
                observed = ?o.observed,
                "threshold failed"
            );
        }

        let summary = RunSummary::build(
            status,
            reason,
            elapsed,
            &snapshot,
            &self.thresholds,
            &thresholds,
            &self.config.summary_trend_stats,
        );

        let mut report_errors = Vec::new();
        for reporter in &self.reporters {
            if let Err(err) = reporter.report(&summary) {
                tracing::error!(error = %err, "summary reporter failed");
                report_errors.push(err.to_string());
            }
        }

        tracing::info!(
            status = %status,
            elapsed = ?elapsed,
            passed = summary.passed,
            "run finished"
        );

        RunOutcome {
            status,
            summary,
            snapshot,
            thresholds,
            report_errors,
        }
    }
}
