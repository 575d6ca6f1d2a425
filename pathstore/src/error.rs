use thiserror::Error;

/// Everything that can go wrong reading or writing one of the documents.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The file or the requested entry doesn't exist. The message is meant for end users.
    #[error("{0}")]
    NotFound(String),

    /// `fs_err` already names the file in the message
    #[error(transparent)]
    Io(#[from] std::io::Error),

    // Not a `source`, so printing the whole chain doesn't repeat the parse error
    #[error("couldn't parse {path}: {err}")]
    Json { path: String, err: serde_json::Error },

    /// The file parsed as JSON, but isn't shaped the way we need
    #[error("{0}")]
    Malformed(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
