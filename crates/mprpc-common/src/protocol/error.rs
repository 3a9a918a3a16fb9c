use rmpv::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MprpcError {
    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Connection reset: {0}")]
    ConnectionReset(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The remote method failed; `message` is the error payload as text.
    #[error("{message}")]
    Remote { message: String, payload: Value },

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// A handler's own failure. Displays as the bare message so it reaches
    /// the caller unchanged.
    #[error("{0}")]
    Application(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Pool acquire timeout after {0}ms")]
    PoolTimeout(u64),

    #[error("Pool closed")]
    PoolClosed,
}

impl MprpcError {
    /// Builds the caller-side error for a non-nil response `error` field.
    pub fn remote(payload: Value) -> Self {
        let message = match payload.as_str() {
            Some(s) => s.to_string(),
            None => payload.to_string(),
        };
        MprpcError::Remote { message, payload }
    }

    /// True for a call or connect that ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, MprpcError::Timeout(_))
    }

    /// True for socket-level failures, timeouts included.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            MprpcError::Timeout(_)
                | MprpcError::ConnectionRefused(_)
                | MprpcError::ConnectionReset(_)
                | MprpcError::Connection(_)
                | MprpcError::Io(_)
        )
    }

    /// True when the peer broke the wire format.
    pub fn is_protocol(&self) -> bool {
        matches!(self, MprpcError::Protocol(_))
    }

    /// True when the remote method itself reported an error.
    pub fn is_remote(&self) -> bool {
        matches!(self, MprpcError::Remote { .. })
    }

    /// Whether a connection that produced this error can no longer be trusted.
    pub fn breaks_connection(&self) -> bool {
        self.is_transport() || self.is_protocol()
    }

    /// Maps an I/O error to a transport variant by kind.
    ///
    /// `timeout_ms` is what a `Timeout` reports, since the OS error carries
    /// no duration.
    pub fn from_io(err: std::io::Error, context: &str, timeout_ms: u64) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => MprpcError::Timeout(timeout_ms),
            ErrorKind::ConnectionRefused => {
                MprpcError::ConnectionRefused(format!("{}: {}", context, err))
            }
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
            | ErrorKind::NotConnected => {
                MprpcError::ConnectionReset(format!("{}: Connection lost", context))
            }
            _ => MprpcError::Io(err),
        }
    }
}

impl From<rmpv::ext::Error> for MprpcError {
    fn from(err: rmpv::ext::Error) -> Self {
        MprpcError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MprpcError>;
