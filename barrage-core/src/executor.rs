use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use barrage_metrics::{MetricKind, Sampler};
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::EnvVars;
use crate::vu::VuContext;
use crate::workload::{Workload, WorkloadError};

pub(crate) const METRIC_ITERATIONS: &str = "iterations";
pub(crate) const METRIC_ITERATION_DURATION: &str = "iteration_duration";
pub(crate) const METRIC_VUS: &str = "vus";
pub(crate) const METRIC_VUS_MAX: &str = "vus_max";

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum IterationStatus {
    Success,
    Failure,
    /// Cut short by a run abort or an expired graceful stop.
    Interrupted,
}

struct Worker {
    id: u64,
    retire: CancellationToken,
    handle: JoinHandle<()>,
}

/// The live population of virtual users for one run.
pub struct VuPool<W: Workload> {
    workload: Arc<W>,
    sampler: Sampler,
    env: EnvVars,
    abort: CancellationToken,
    workers: Vec<Worker>,
    retiring: Vec<JoinHandle<()>>,
    next_id: u64,
    peak: u64,
    iterations: Arc<AtomicU64>,
    join_failures: u64,
}

impl<W: Workload> VuPool<W> {
    pub fn new(workload: Arc<W>, sampler: Sampler, env: EnvVars, abort: CancellationToken) -> Self {
        let registry = sampler.registry();
        for (name, kind) in [
            (METRIC_ITERATIONS, MetricKind::Counter),
            (METRIC_ITERATION_DURATION, MetricKind::Trend),
            (METRIC_VUS, MetricKind::Gauge),
            (METRIC_VUS_MAX, MetricKind::Gauge),
        ] {
            if let Err(err) = registry.register(name, kind) {
                tracing::warn!(metric = name, error = %err, "built-in metric not registered");
            }
        }

        Self {
            workload,
            sampler,
            env,
            abort,
            workers: Vec::new(),
            retiring: Vec::new(),
            next_id: 1,
            peak: 0,
            iterations: Arc::new(AtomicU64::new(0)),
            join_failures: 0,
        }
    }

    /// Workers that have not been retired.
    pub fn live(&self) -> u64 {
        self.workers.len() as u64
    }

    pub fn peak(&self) -> u64 {
        self.peak
    }

    /// Iterations finished so far, whatever their status.
    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    /// Worker tasks that ended abnormally instead of returning.
    pub fn join_failures(&self) -> u64 {
        self.join_failures
    }

    /// Spawns or retires workers until `target` are live.
    ///
    /// Retirement picks the newest workers; they finish their current iteration first.
    pub fn reconcile(&mut self, target: u64) {
        self.reap_retired();

        let live = self.live();
        if live < target {
            for _ in live..target {
                self.spawn();
            }
            tracing::debug!(from = live, to = target, "scaled up");
        } else if live > target {
            for _ in target..live {
                let Some(worker) = self.workers.pop() else {
                    break;
                };
                tracing::trace!(vu = worker.id, "retiring");
                worker.retire.cancel();
                self.retiring.push(worker.handle);
            }
            tracing::debug!(from = live, to = target, "scaled down");
        }

        self.peak = self.peak.max(self.live());
        self.sampler.gauge(METRIC_VUS, self.live() as f64, &[]);
        self.sampler.gauge(METRIC_VUS_MAX, self.peak as f64, &[]);
    }

    /// Retires every worker and waits for all of them.
    ///
    /// Once `grace` expires the abort token fires, so iterations still running are
    /// interrupted instead of awaited.
    pub async fn drain(&mut self, grace: Duration) {
        for worker in &self.workers {
            worker.retire.cancel();
        }

        let mut handles: Vec<JoinHandle<()>> = self.workers.drain(..).map(|w| w.handle).collect();
        handles.append(&mut self.retiring);

        let all = futures::future::join_all(handles);
        tokio::pin!(all);
        let results = tokio::select! {
            results = &mut all => results,
            _ = tokio::time::sleep(grace) => {
                if !self.abort.is_cancelled() {
                    tracing::warn!(grace = ?grace, "graceful stop expired, interrupting iterations");
                }
                self.abort.cancel();
                all.await
            }
        };

        for res in results {
            self.note_join(res);
        }

        self.sampler.gauge(METRIC_VUS, 0.0, &[]);
    }

    fn spawn(&mut self) {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);

        let retire = CancellationToken::new();
        let handle = tokio::spawn(run_worker(
            self.workload.clone(),
            id,
            self.sampler.clone(),
            self.env.clone(),
            self.abort.clone(),
            retire.clone(),
            self.iterations.clone(),
        ));

        tracing::trace!(vu = id, "spawned");
        self.workers.push(Worker { id, retire, handle });
    }

    fn reap_retired(&mut self) {
        let mut still_running = Vec::with_capacity(self.retiring.len());
        for mut handle in std::mem::take(&mut self.retiring) {
            match (&mut handle).now_or_never() {
                Some(res) => self.note_join(res),
                None => still_running.push(handle),
            }
        }
        self.retiring = still_running;
    }

    fn note_join(&mut self, res: Result<(), tokio::task::JoinError>) {
        if let Err(err) = res {
            tracing::error!(error = %err, "worker task failed");
            self.join_failures = self.join_failures.saturating_add(1);
        }
    }
}

async fn run_worker<W: Workload>(
    workload: Arc<W>,
    vu_id: u64,
    sampler: Sampler,
    env: EnvVars,
    abort: CancellationToken,
    retire: CancellationToken,
    completed: Arc<AtomicU64>,
) {
    let mut iteration: u64 = 0;

    loop {
        // A workload that never awaits must still let the controller and timers run.
        tokio::task::yield_now().await;
        if retire.is_cancelled() || abort.is_cancelled() {
            break;
        }

        let ctx = VuContext::new(vu_id, iteration, sampler.clone(), env.clone(), abort.clone());
        let started = Instant::now();

        let status = tokio::select! {
            biased;
            _ = abort.cancelled() => IterationStatus::Interrupted,
            res = AssertUnwindSafe(workload.iterate(&ctx)).catch_unwind() => match res {
                Ok(Ok(())) => IterationStatus::Success,
                Ok(Err(WorkloadError::Interrupted)) => IterationStatus::Interrupted,
                Ok(Err(err)) => {
                    tracing::debug!(vu = vu_id, iteration, error = %err, "iteration failed");
                    IterationStatus::Failure
                }
                Err(panic) => {
                    tracing::warn!(
                        vu = vu_id,
                        iteration,
                        panic = %panic_message(panic.as_ref()),
                        "iteration panicked"
                    );
                    IterationStatus::Failure
                }
            },
        };

        sampler.add(METRIC_ITERATIONS, 1.0, &[("status", status.as_ref())]);
        if status != IterationStatus::Interrupted {
            let ms = started.elapsed().as_secs_f64() * 1000.0;
            sampler.trend(METRIC_ITERATION_DURATION, ms, &[]);
        }
        completed.fetch_add(1, Ordering::Relaxed);
        iteration = iteration.saturating_add(1);

        if status == IterationStatus::Interrupted {
            break;
        }

        let pause = workload.pause();
        if !pause.is_zero() {
            tokio::select! {
                _ = retire.cancelled() => break,
                _ = abort.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
