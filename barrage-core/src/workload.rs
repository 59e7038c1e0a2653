use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::vu::VuContext;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Why a workload call did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum WorkloadError {
    #[error("{0}")]
    Message(String),

    /// The run was aborted while the iteration was waiting.
    #[error("interrupted")]
    Interrupted,

    #[error(transparent)]
    Other(BoxError),
}

impl WorkloadError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    pub fn other(err: impl Into<BoxError>) -> Self {
        Self::Other(err.into())
    }
}

/// The unit of work a virtual user repeats.
///
/// `iterate` is called sequentially per worker and concurrently across workers.
/// `setup` and `teardown` run once per run, before the first and after the last worker.
pub trait Workload: Send + Sync + 'static {
    fn setup(&self) -> impl Future<Output = Result<(), WorkloadError>> + Send {
        async { Ok(()) }
    }

    fn iterate(&self, ctx: &VuContext) -> impl Future<Output = Result<(), WorkloadError>> + Send;

    /// Think time between two iterations of the same worker.
    fn pause(&self) -> Duration {
        Duration::ZERO
    }

    fn teardown(&self) -> impl Future<Output = Result<(), WorkloadError>> + Send {
        async { Ok(()) }
    }
}

type IterateFn = dyn Fn(VuContext) -> futures::future::BoxFuture<'static, Result<(), WorkloadError>>
    + Send
    + Sync;

/// Adapts a closure into a [`Workload`].
#[derive(Clone)]
pub struct FnWorkload {
    iterate: Arc<IterateFn>,
    pause: Duration,
}

impl FnWorkload {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(VuContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), WorkloadError>> + Send + 'static,
    {
        Self {
            iterate: Arc::new(move |ctx| Box::pin(f(ctx))),
            pause: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }
}

impl fmt::Debug for FnWorkload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnWorkload")
            .field("pause", &self.pause)
            .finish_non_exhaustive()
    }
}

impl Workload for FnWorkload {
    fn iterate(&self, ctx: &VuContext) -> impl Future<Output = Result<(), WorkloadError>> + Send {
        (self.iterate)(ctx.clone())
    }

    fn pause(&self) -> Duration {
        self.pause
    }
}
