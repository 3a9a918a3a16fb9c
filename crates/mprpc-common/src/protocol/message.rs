use rmpv::Value;

use super::error::{MprpcError, Result};
use super::{MsgId, Request, Response};

/// Wire type code of a request frame.
pub const MSGPACKRPC_REQUEST: u64 = 0;
/// Wire type code of a response frame.
pub const MSGPACKRPC_RESPONSE: u64 = 1;

/// One complete MessagePack-RPC frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    /// The msgid carried by either kind of frame.
    pub fn msgid(&self) -> MsgId {
        match self {
            Message::Request(req) => req.msgid,
            Message::Response(resp) => resp.msgid,
        }
    }

    /// Builds the 4-element wire array for this message.
    pub fn to_value(&self) -> Value {
        match self {
            Message::Request(req) => Value::Array(vec![
                Value::from(MSGPACKRPC_REQUEST),
                Value::from(req.msgid),
                req.method.clone(),
                req.params.clone(),
            ]),
            Message::Response(resp) => Value::Array(vec![
                Value::from(MSGPACKRPC_RESPONSE),
                Value::from(resp.msgid),
                resp.error.clone(),
                resp.result.clone(),
            ]),
        }
    }

    /// Validates the frame shape and splits it into a typed message.
    ///
    /// Anything other than a 4-element array whose first element is `0` or
    /// `1` and whose msgid fits in a `u32` is a protocol error.
    pub fn from_value(value: Value) -> Result<Self> {
        let items = match value {
            Value::Array(items) => items,
            other => {
                return Err(MprpcError::Protocol(format!(
                    "expected a 4-element array, got {}",
                    other
                )))
            }
        };

        let len = items.len();
        let [kind, msgid, third, fourth]: [Value; 4] = items.try_into().map_err(|_| {
            MprpcError::Protocol(format!("expected a 4-element array, got {} elements", len))
        })?;

        let msgid = parse_msgid(&msgid)?;

        match kind.as_u64() {
            Some(MSGPACKRPC_REQUEST) => Ok(Message::Request(Request {
                msgid,
                method: third,
                params: fourth,
            })),
            Some(MSGPACKRPC_RESPONSE) => Ok(Message::Response(Response {
                msgid,
                error: third,
                result: fourth,
            })),
            _ => Err(MprpcError::Protocol(format!("unknown message type {}", kind))),
        }
    }
}

impl From<Request> for Message {
    fn from(req: Request) -> Self {
        Message::Request(req)
    }
}

impl From<Response> for Message {
    fn from(resp: Response) -> Self {
        Message::Response(resp)
    }
}

fn parse_msgid(value: &Value) -> Result<MsgId> {
    value
        .as_u64()
        .and_then(|id| MsgId::try_from(id).ok())
        .ok_or_else(|| MprpcError::Protocol(format!("invalid msgid {}", value)))
}
