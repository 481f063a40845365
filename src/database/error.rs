use std::fmt::{Display, Formatter};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DatabaseErrorCode {
    InvalidArgument,
    Internal,
    /// Connect, header, or response-read deadline exceeded.
    Timeout,
    /// Any other connection-level failure.
    Network,
    RedirectLimitExceeded,
    /// The service answered with a non-2xx status.
    RemoteRejected,
    Decode,
    StreamTerminated,
    StreamAlreadyActive,
}

impl DatabaseErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseErrorCode::InvalidArgument => "database/invalid-argument",
            DatabaseErrorCode::Internal => "database/internal",
            DatabaseErrorCode::Timeout => "database/timeout",
            DatabaseErrorCode::Network => "database/network-request-failed",
            DatabaseErrorCode::RedirectLimitExceeded => "database/redirect-limit-exceeded",
            DatabaseErrorCode::RemoteRejected => "database/remote-rejected",
            DatabaseErrorCode::Decode => "database/decode",
            DatabaseErrorCode::StreamTerminated => "database/stream-terminated",
            DatabaseErrorCode::StreamAlreadyActive => "database/stream-already-active",
        }
    }
}

#[derive(Clone, Debug)]
pub struct DatabaseError {
    pub code: DatabaseErrorCode,
    message: String,
    status: Option<u16>,
    server_response: Option<String>,
}

impl DatabaseError {
    pub fn new(code: DatabaseErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status: None,
            server_response: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_server_response(mut self, body: impl Into<String>) -> Self {
        self.server_response = Some(body.into());
        self
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// HTTP status of a rejected request.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Raw response body returned by the service for a rejected request.
    pub fn server_response(&self) -> Option<&str> {
        self.server_response.as_deref()
    }

    pub fn is_timeout(&self) -> bool {
        self.code == DatabaseErrorCode::Timeout
    }
}

impl Display for DatabaseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl std::error::Error for DatabaseError {}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

pub fn invalid_argument(message: impl Into<String>) -> DatabaseError {
    DatabaseError::new(DatabaseErrorCode::InvalidArgument, message)
}

pub fn internal_error(message: impl Into<String>) -> DatabaseError {
    DatabaseError::new(DatabaseErrorCode::Internal, message)
}

pub fn timeout_error(message: impl Into<String>) -> DatabaseError {
    DatabaseError::new(DatabaseErrorCode::Timeout, message)
}

pub fn network_error(message: impl Into<String>) -> DatabaseError {
    DatabaseError::new(DatabaseErrorCode::Network, message)
}

pub fn redirect_limit_exceeded(hops: usize) -> DatabaseError {
    DatabaseError::new(
        DatabaseErrorCode::RedirectLimitExceeded,
        format!("{hops} consecutive requests (redirects)"),
    )
}

/// Builds the error for a non-2xx response; the message is the body verbatim.
pub fn remote_rejected(status: u16, body: impl Into<String>) -> DatabaseError {
    let body = body.into();
    DatabaseError::new(DatabaseErrorCode::RemoteRejected, body.clone())
        .with_status(status)
        .with_server_response(body)
}

pub fn decode_error(message: impl Into<String>) -> DatabaseError {
    DatabaseError::new(DatabaseErrorCode::Decode, message)
}

pub fn stream_terminated(message: impl Into<String>) -> DatabaseError {
    DatabaseError::new(DatabaseErrorCode::StreamTerminated, message)
}

pub fn stream_already_active() -> DatabaseError {
    DatabaseError::new(
        DatabaseErrorCode::StreamAlreadyActive,
        "a stream is already active on this reference",
    )
}
