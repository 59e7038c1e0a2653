#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// The run completed but one or more thresholds failed.
    ThresholdsFailed = 11,

    /// The run was aborted (setup failure, abort-on-fail threshold, interrupt, worker crash).
    RunAborted = 20,

    /// Invalid CLI flags or test plan (bad durations, threshold syntax, unreadable plan, etc.).
    InvalidInput = 30,

    /// Internal/runtime error (summary export failed, unexpected invariants).
    RuntimeError = 40,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn from_outcome(aborted: bool, thresholds_passed: bool) -> Self {
        match (aborted, thresholds_passed) {
            (true, _) => Self::RunAborted,
            (false, true) => Self::Success,
            (false, false) => Self::ThresholdsFailed,
        }
    }
}
