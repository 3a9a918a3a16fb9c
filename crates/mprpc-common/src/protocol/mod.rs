pub mod error;
pub mod message;
pub mod requests;
pub mod responses;

#[cfg(test)]
mod tests;

pub use error::{MprpcError, Result};
pub use message::{Message, MSGPACKRPC_REQUEST, MSGPACKRPC_RESPONSE};
pub use requests::{MethodName, MsgId, Request, RpcParams};
pub use responses::Response;
