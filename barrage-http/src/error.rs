use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse failure class, used as a metric tag value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    InvalidUrl,
    UnsupportedScheme,
    InvalidRequest,
    Connect,
    Timeout,
    BodyRead,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("only http:// and https:// URLs are supported: {0}")]
    UnsupportedScheme(String),

    #[error("http request build failed: {0}")]
    RequestBuild(#[from] http::Error),

    #[error("invalid http method: {0}")]
    Method(#[from] http::method::InvalidMethod),

    #[error("invalid http header name: {0}")]
    HeaderName(#[from] http::header::InvalidHeaderName),

    #[error("invalid http header value: {0}")]
    HeaderValue(#[from] http::header::InvalidHeaderValue),

    #[error("http request failed: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),

    #[error("http request timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to read response body: {0}")]
    BodyRead(#[from] hyper::Error),
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidUrl(_) => ErrorKind::InvalidUrl,
            Self::UnsupportedScheme(_) => ErrorKind::UnsupportedScheme,
            Self::RequestBuild(_) | Self::Method(_) | Self::HeaderName(_) | Self::HeaderValue(_) => {
                ErrorKind::InvalidRequest
            }
            Self::Request(_) => ErrorKind::Connect,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::BodyRead(_) => ErrorKind::BodyRead,
        }
    }
}
