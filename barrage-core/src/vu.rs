use std::time::Duration;

use barrage_metrics::Sampler;
use tokio_util::sync::CancellationToken;

use crate::config::EnvVars;
use crate::workload::WorkloadError;

/// Per-iteration view a workload gets of its virtual user.
#[derive(Debug, Clone)]
pub struct VuContext {
    vu_id: u64,
    iteration: u64,
    sampler: Sampler,
    env: EnvVars,
    abort: CancellationToken,
}

impl VuContext {
    /// Builds a context outside a run, for driving a workload directly.
    pub fn new(
        vu_id: u64,
        iteration: u64,
        sampler: Sampler,
        env: EnvVars,
        abort: CancellationToken,
    ) -> Self {
        Self {
            vu_id,
            iteration,
            sampler,
            env,
            abort,
        }
    }

    /// 1-based id, unique within the run.
    pub fn vu_id(&self) -> u64 {
        self.vu_id
    }

    /// 0-based iteration number of this worker.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    pub fn env(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k.as_ref() == key)
            .map(|(_, v)| v.as_ref())
    }

    /// Records `ok` into the `checks` rate under `check=label` and returns it.
    pub fn check(&self, ok: bool, label: &str) -> bool {
        self.sampler.rate("checks", ok, &[("check", label)]);
        ok
    }

    /// Sleeps unless the run is aborted first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), WorkloadError> {
        tokio::select! {
            _ = self.abort.cancelled() => Err(WorkloadError::Interrupted),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    /// Resolves once the run is aborted; for racing long-running I/O.
    pub async fn aborted(&self) {
        self.abort.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use barrage_metrics::Registry;
    use std::sync::Arc;

    fn ctx(abort: CancellationToken) -> (Arc<Registry>, VuContext) {
        let registry = Arc::new(Registry::default());
        let env: EnvVars = Arc::from(vec![(Arc::from("BASE_URL"), Arc::from("http://x"))]);
        let ctx = VuContext::new(3, 7, Sampler::new(registry.clone()), env, abort);
        (registry, ctx)
    }

    #[test]
    fn exposes_identity_and_env() {
        let (_, ctx) = ctx(CancellationToken::new());
        assert_eq!(ctx.vu_id(), 3);
        assert_eq!(ctx.iteration(), 7);
        assert_eq!(ctx.env("BASE_URL"), Some("http://x"));
        assert_eq!(ctx.env("MISSING"), None);
    }

    #[test]
    fn check_records_into_checks_rate() {
        let (registry, ctx) = ctx(CancellationToken::new());
        assert!(ctx.check(true, "status is 200"));
        assert!(!ctx.check(false, "status is 200"));

        let snap = registry.snapshot();
        let checks = snap.rate("checks").unwrap_or_else(|| panic!("missing checks"));
        assert_eq!((checks.passes, checks.total), (1, 2));
        let metric = snap.get("checks").unwrap_or_else(|| panic!("missing checks"));
        assert_eq!(metric.series[0].tag("check"), Some("status is 200"));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_is_interrupted_by_abort() {
        let abort = CancellationToken::new();
        let (_, ctx) = ctx(abort.clone());

        let sleeper = tokio::spawn(async move { ctx.sleep(Duration::from_secs(3600)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        abort.cancel();

        let res = sleeper.await.unwrap_or_else(|e| panic!("join: {e}"));
        assert!(matches!(res, Err(WorkloadError::Interrupted)));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_completes_without_abort() {
        let (_, ctx) = ctx(CancellationToken::new());
        let start = tokio::time::Instant::now();
        assert!(ctx.sleep(Duration::from_secs(2)).await.is_ok());
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}
