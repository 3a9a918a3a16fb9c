use rmpv::Value;

use crate::protocol::error::{MprpcError, Result};
use crate::protocol::{Message, MsgId, MSGPACKRPC_REQUEST, MSGPACKRPC_RESPONSE};
use crate::transport::decoder::StreamDecoder;

/// MessagePack codec for MessagePack-RPC frames.
///
/// Every frame is a single MessagePack array of four elements; there is no
/// extra length prefix on the wire, so framing on a stream is done by the
/// [`StreamDecoder`].
///
/// # Example
///
/// ```
/// use mprpc_common::transport::MsgpackCodec;
/// use mprpc_common::protocol::Message;
/// use rmpv::Value;
///
/// let encoded = MsgpackCodec::encode_request(1, "sum", &[Value::from(1), Value::from(2)]).unwrap();
/// match MsgpackCodec::decode_message(&encoded).unwrap() {
///     Message::Request(req) => assert_eq!(req.method_name(), Some("sum")),
///     Message::Response(_) => unreachable!(),
/// }
/// ```
pub struct MsgpackCodec;

impl MsgpackCodec {
    /// Encodes `[0, msgid, method, params]`.
    pub fn encode_request(msgid: MsgId, method: &str, params: &[Value]) -> Result<Vec<u8>> {
        Self::encode_value(&Value::Array(vec![
            Value::from(MSGPACKRPC_REQUEST),
            Value::from(msgid),
            Value::from(method),
            Value::Array(params.to_vec()),
        ]))
    }

    /// Encodes `[1, msgid, error, result]`.
    pub fn encode_response(msgid: MsgId, error: &Value, result: &Value) -> Result<Vec<u8>> {
        Self::encode_value(&Value::Array(vec![
            Value::from(MSGPACKRPC_RESPONSE),
            Value::from(msgid),
            error.clone(),
            result.clone(),
        ]))
    }

    /// Encode either kind of frame
    ///
    /// # Arguments
    ///
    /// * `message` - The request or response to encode
    ///
    /// # Returns
    ///
    /// The MessagePack-encoded frame as a byte vector
    pub fn encode_message(message: &Message) -> Result<Vec<u8>> {
        Self::encode_value(&message.to_value())
    }

    /// Decodes a buffer holding exactly one complete frame.
    pub fn decode_message(data: &[u8]) -> Result<Message> {
        let mut decoder = StreamDecoder::new();
        decoder.feed(data);

        let message = decoder
            .next_message()?
            .ok_or_else(|| MprpcError::Protocol("incomplete frame".to_string()))?;

        if decoder.buffered() > 0 {
            return Err(MprpcError::Protocol(format!(
                "{} trailing bytes after frame",
                decoder.buffered()
            )));
        }

        Ok(message)
    }

    fn encode_value(value: &Value) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, value)
            .map_err(|e| MprpcError::Encode(e.to_string()))?;
        Ok(buf)
    }
}
