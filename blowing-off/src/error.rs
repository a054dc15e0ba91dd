//! Client-side error taxonomy (§7): distinguishes transport failures from
//! protocol failures the way `funkygibbon::error::AppError` distinguishes
//! wire error kinds on the server, following `romilpunetha-tao/src/error.rs`.

use std::fmt;

#[derive(Debug)]
pub enum ClientError {
    /// Connection refused, DNS failure, timeout — retried with backoff,
    /// never mutates the tracker (§4.5 step 2).
    Transport(String),
    /// A non-2xx body from the server: `{error_kind, detail}` (§6.4).
    Protocol { error_kind: String, detail: String },
    /// Local store or tracker failure.
    Storage(String),
    Internal(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Transport(msg) => write!(f, "transport error: {msg}"),
            ClientError::Protocol { error_kind, detail } => write!(f, "server rejected sync ({error_kind}): {detail}"),
            ClientError::Storage(msg) => write!(f, "local storage error: {msg}"),
            ClientError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for ClientError {}

impl ClientError {
    /// Whether this failure belongs to the transport-retry policy (§4.5,
    /// §7) rather than being a fatal protocol rejection.
    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Transport(_))
    }
}

impl From<inbetweenies::InbetweeniesError> for ClientError {
    fn from(err: inbetweenies::InbetweeniesError) -> Self {
        ClientError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            ClientError::Transport(err.to_string())
        } else {
            ClientError::Internal(err.to_string())
        }
    }
}

impl From<sqlx::Error> for ClientError {
    fn from(err: sqlx::Error) -> Self {
        ClientError::Storage(err.to_string())
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
