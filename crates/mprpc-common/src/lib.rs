//! mprpc Common Types and Transport
//!
//! This crate holds the MessagePack-RPC protocol definitions and the stream
//! transport pieces shared by `mprpc-client` and `mprpc-server`.
//!
//! # Wire Protocol
//!
//! Every message is one MessagePack array of exactly four elements:
//!
//! | Field | Request | Response |
//! |---|---|---|
//! | `[0]` type | `0` | `1` |
//! | `[1]` msgid | `u32` | `u32`, echoing the request |
//! | `[2]` | method name | error, nil on success |
//! | `[3]` | params array | result, nil on failure |
//!
//! There is no separate length prefix. Stream readers feed bytes into a
//! [`transport::StreamDecoder`] until a whole array has arrived.
//!
//! # Components
//!
//! - [`protocol`] - Message types and the error taxonomy
//! - [`transport`] - Codec, streaming decoder and TCP helpers
//!
//! # Example
//!
//! ```
//! use mprpc_common::{Message, Request, Response};
//! use mprpc_common::transport::MsgpackCodec;
//! use rmpv::Value;
//!
//! let request = Request::new(1, "sum", vec![Value::from(1), Value::from(2)]);
//! let bytes = MsgpackCodec::encode_message(&request.clone().into()).unwrap();
//! assert_eq!(MsgpackCodec::decode_message(&bytes).unwrap(), Message::Request(request));
//!
//! let response = Response::success(1, Value::from(3));
//! assert_eq!(response.into_result().unwrap(), Value::from(3));
//! ```

pub mod protocol;
pub mod transport;

pub use protocol::*;
pub use rmpv::Value;
