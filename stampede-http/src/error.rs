use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse transport failure category, used as a log field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum TransportFailure {
    /// The request never left the process (bad URL, scheme or header).
    InvalidRequest,
    /// No connection to the target (refused, unreachable, connect timeout).
    Connect,
    /// The per-request deadline expired.
    Timeout,
    /// The connection broke while sending or reading the response.
    Exchange,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid target url `{0}`")]
    InvalidUrl(String),

    #[error("unsupported scheme in `{0}` (expected http or https)")]
    UnsupportedScheme(String),

    #[error("cannot build request: {0}")]
    RequestBuild(#[from] http::Error),

    #[error("bad header name: {0}")]
    HeaderName(#[from] http::header::InvalidHeaderName),

    #[error("bad header value: {0}")]
    HeaderValue(#[from] http::header::InvalidHeaderValue),

    #[error("request to target failed: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("response body interrupted: {0}")]
    BodyRead(#[from] hyper::Error),
}

impl Error {
    #[must_use]
    pub fn failure(&self) -> TransportFailure {
        match self {
            Self::InvalidUrl(_)
            | Self::UnsupportedScheme(_)
            | Self::RequestBuild(_)
            | Self::HeaderName(_)
            | Self::HeaderValue(_) => TransportFailure::InvalidRequest,
            Self::Request(err) if err.is_connect() => TransportFailure::Connect,
            Self::Request(_) | Self::BodyRead(_) => TransportFailure::Exchange,
            Self::Timeout(_) => TransportFailure::Timeout,
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
