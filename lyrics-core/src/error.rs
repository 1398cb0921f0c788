use std::time::Duration;

use thiserror::Error;

/// Error taxonomy surfaced by the public core API.
///
/// Each variant corresponds to one of the six failure modes the request
/// plane can terminate in; callers at the HTTP boundary map these onto
/// status codes rather than inspecting message text.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("circuit breaker is not admitting requests (retry after {retry_after:?})")]
    NotAdmitted { retry_after: Duration },

    #[error("request exhausted all retries (last status {last_status:?}): {message}")]
    Exhausted {
        last_status: Option<u16>,
        message: String,
    },

    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("no usable account credentials available")]
    NoCredentials,

    #[error("no result satisfied the match criteria")]
    NoMatch,

    #[error("required configuration is missing: {0}")]
    ConfigMissing(String),
}

impl CoreError {
    pub fn upstream(err: &reqwest::Error) -> Self {
        CoreError::UpstreamUnreachable(err.to_string())
    }
}
