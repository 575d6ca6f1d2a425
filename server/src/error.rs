use hyper::StatusCode;
use thiserror::Error;

use pathstore::StoreError;

/// Why a request failed. Each kind maps to one HTTP status; the message becomes the `detail`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    /// The routing service couldn't be reached, or didn't answer in time
    #[error("routing request failed: {0}")]
    UpstreamFailure(String),

    /// The routing service answered, but not with a usable route
    #[error("routing service error: {0}")]
    UpstreamInvalid(String),

    /// Local I/O or bookkeeping went wrong. Displays the whole context chain.
    #[error("{0:#}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::UpstreamFailure(_)
            | ApiError::UpstreamInvalid(_)
            | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> ApiError {
        match err {
            StoreError::NotFound(msg) => ApiError::NotFound(msg),
            err => ApiError::Internal(anyhow::Error::new(err)),
        }
    }
}
