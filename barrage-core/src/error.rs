use crate::run::RunStatus;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("`tick` must be a positive duration")]
    InvalidTick,

    #[error("`threshold_interval` must be a positive duration")]
    InvalidThresholdInterval,

    #[error("invalid threshold expression for metric `{metric}`: {error}")]
    InvalidThresholdExpr { metric: String, error: String },

    #[error("invalid threshold metric key `{key}`: {error}")]
    InvalidThresholdMetric { key: String, error: String },

    #[error("unknown summary trend stat `{0}`")]
    InvalidTrendStat(String),

    #[error("illegal run state transition from {from} to {to}")]
    IllegalTransition { from: RunStatus, to: RunStatus },
}
