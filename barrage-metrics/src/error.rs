use crate::MetricKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("metric `{name}` is registered as {registered}, cannot record a {requested} sample")]
    KindConflict {
        name: String,
        registered: MetricKind,
        requested: MetricKind,
    },

    #[error("metric name must not be empty")]
    EmptyName,

    #[error("metric `{name}` received a non-finite value")]
    NonFinite { name: String },

    #[error("trend histogram could not be created: {0}")]
    Histogram(String),
}
