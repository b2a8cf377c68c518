use thiserror::Error;

/// Failures talking to a remote model worker
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkerError {
    /// Payload could not be built or serialized; never retried
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Response body did not match the worker protocol
    #[error("Decoding error: {0}")]
    Decoding(String),

    /// Transport failure (refused, reset, timed out)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Status code outside the worker protocol
    #[error("Unexpected HTTP status {status}: {detail}")]
    Http { status: u16, detail: String },

    /// Worker answered a submit with something other than 202
    #[error("Worker rejected request with status {status}: {detail}")]
    RemoteWorker { status: u16, detail: String },

    #[error("Invalid worker URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl WorkerError {
    /// Whether a failed query should be retried against the poll budget
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Decoding(_) | Self::Connection(_) | Self::Http { .. }
        )
    }
}

impl From<reqwest::Error> for WorkerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decoding(err.to_string())
        } else {
            Self::Connection(err.to_string())
        }
    }
}

pub type WorkerResult<T> = Result<T, WorkerError>;
