//! MessagePack-RPC Response Types

use rmpv::Value;

use super::error::{MprpcError, Result};
use super::MsgId;

/// A response frame: `[1, msgid, error, result]`.
///
/// Exactly one of `error` and `result` is meaningful: a non-nil `error`
/// marks a failed call, in which case `result` is nil.
///
/// # Example
///
/// ```
/// use mprpc_common::protocol::Response;
/// use rmpv::Value;
///
/// let ok = Response::success(7, Value::from(3));
/// assert_eq!(ok.into_result().unwrap(), Value::from(3));
///
/// let failed = Response::error(7, "Division by zero");
/// assert_eq!(failed.into_result().unwrap_err().to_string(), "Division by zero");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Echo of the request's msgid
    pub msgid: MsgId,
    /// Error payload, nil on success
    pub error: Value,
    /// Result value, nil on failure
    pub result: Value,
}

impl Response {
    /// Create a successful response with a nil error.
    pub fn success(msgid: MsgId, result: Value) -> Self {
        Response {
            msgid,
            error: Value::Nil,
            result,
        }
    }

    /// Create an error response with a nil result.
    pub fn error(msgid: MsgId, error: impl Into<Value>) -> Self {
        Response {
            msgid,
            error: error.into(),
            result: Value::Nil,
        }
    }

    /// True if the error field is non-nil.
    pub fn is_error(&self) -> bool {
        !self.error.is_nil()
    }

    /// Converts the response into the caller-facing outcome.
    ///
    /// A non-nil `error` becomes [`MprpcError::Remote`].
    pub fn into_result(self) -> Result<Value> {
        if self.is_error() {
            Err(MprpcError::remote(self.error))
        } else {
            Ok(self.result)
        }
    }
}
