use std::io;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::protocol::error::{MprpcError, Result};
use crate::protocol::Message;
use crate::transport::tcp::{MAX_BUFFER_SIZE, SOCKET_RECV_SIZE};

/// Spare capacity made available before each socket read.
const READ_RESERVE: usize = 64 * 1024;

/// Incremental MessagePack-RPC decoder.
///
/// Bytes are appended with [`feed`](Self::feed) (or read straight from a
/// socket with [`read_from`](Self::read_from)) and complete frames are pulled
/// out with [`next_message`](Self::next_message). A frame split across many
/// reads stays buffered until its last byte arrives; several frames in one
/// read are returned one at a time.
///
/// The extent of a pending frame is worked out from its MessagePack headers
/// alone, without copying any payload. Once the decoder knows a frame needs
/// at least `n` bytes, it does not look at the buffer again until `n` bytes
/// are there, so a frame trickling in over many reads costs time linear in
/// its size. A frame whose headers already announce more than the buffer
/// limit is rejected before its body arrives.
///
/// # Example
///
/// ```
/// use mprpc_common::transport::{MsgpackCodec, StreamDecoder};
/// use rmpv::Value;
///
/// let frame = MsgpackCodec::encode_request(1, "echo", &[Value::from("hi")]).unwrap();
/// let (head, tail) = frame.split_at(3);
///
/// let mut decoder = StreamDecoder::new();
/// decoder.feed(head);
/// assert!(decoder.next_message().unwrap().is_none());
///
/// decoder.feed(tail);
/// let message = decoder.next_message().unwrap().unwrap();
/// assert_eq!(message.msgid(), 1);
/// ```
#[derive(Debug)]
pub struct StreamDecoder {
    buffer: BytesMut,
    max_buffer: usize,
    /// Buffered length below which the pending frame cannot be complete
    needed: usize,
}

impl StreamDecoder {
    /// Creates a decoder with the default [`MAX_BUFFER_SIZE`] limit.
    pub fn new() -> Self {
        Self::with_max_buffer(MAX_BUFFER_SIZE)
    }

    /// Creates a decoder that rejects a pending frame once more than
    /// `max_buffer` bytes are buffered without completing it.
    pub fn with_max_buffer(max_buffer: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_buffer,
            needed: 1,
        }
    }

    /// Appends raw bytes received from the peer.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Reads at most [`SOCKET_RECV_SIZE`] bytes from `reader` into the buffer.
    ///
    /// Returns the number of bytes read; `0` means the peer closed the stream.
    pub async fn read_from<R>(&mut self, reader: &mut R) -> io::Result<usize>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.buffer.reserve(READ_RESERVE);
        let mut limited = (&mut self.buffer).limit(SOCKET_RECV_SIZE);
        reader.read_buf(&mut limited).await
    }

    /// Pops the next complete message, or `Ok(None)` if more bytes are needed.
    ///
    /// Malformed MessagePack and frames of the wrong shape are protocol
    /// errors; the caller must close the connection after one.
    pub fn next_message(&mut self) -> Result<Option<Message>> {
        if self.buffer.len() < self.needed {
            return Ok(None);
        }

        match measure(&self.buffer)? {
            Extent::Partial(needed) => {
                if needed > self.max_buffer {
                    return Err(MprpcError::Protocol(format!(
                        "Message too large: frame needs at least {} bytes, limit is {}",
                        needed, self.max_buffer
                    )));
                }
                self.needed = needed;
                Ok(None)
            }
            Extent::Complete(len) => {
                self.needed = 1;
                let frame = self.buffer.split_to(len);
                let mut bytes = &frame[..];
                let value = rmpv::decode::read_value(&mut bytes).map_err(|e| {
                    MprpcError::Protocol(format!("malformed MessagePack: {}", e))
                })?;
                Message::from_value(value).map(Some)
            }
        }
    }

    /// Number of bytes buffered but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drops all buffered bytes, including any partial frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.needed = 1;
    }
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// How much of a buffer the first MessagePack value occupies.
#[derive(Debug, PartialEq, Eq)]
enum Extent {
    /// The value is complete and spans this many bytes.
    Complete(usize),
    /// The value is cut short; the buffer needs at least this many bytes.
    Partial(usize),
}

/// Walks the headers of the first value in `buf` and skips over payloads,
/// without decoding or copying anything.
fn measure(buf: &[u8]) -> Result<Extent> {
    let mut pos = 0usize;
    // values still to be walked, counting nested elements
    let mut pending: u64 = 1;

    while pending > 0 {
        if pos >= buf.len() {
            // every pending value takes at least one byte
            let rest = usize::try_from(pending).unwrap_or(usize::MAX);
            return Ok(Extent::Partial(pos.saturating_add(rest)));
        }
        pending -= 1;

        let marker = buf[pos];
        let (header, len_bytes, kind) = match marker {
            0x00..=0x7f | 0xe0..=0xff | 0xc0 | 0xc2 | 0xc3 => (1, 0, Body::Fixed(0)),
            0x80..=0x8f => (1, 0, Body::Items(2 * u64::from(marker & 0x0f))),
            0x90..=0x9f => (1, 0, Body::Items(u64::from(marker & 0x0f))),
            0xa0..=0xbf => (1, 0, Body::Fixed(usize::from(marker & 0x1f))),
            0xc4 | 0xd9 => (2, 1, Body::Bytes),
            0xc5 | 0xda => (3, 2, Body::Bytes),
            0xc6 | 0xdb => (5, 4, Body::Bytes),
            // ext: length, then a type byte, then the data
            0xc7 => (3, 1, Body::Bytes),
            0xc8 => (4, 2, Body::Bytes),
            0xc9 => (6, 4, Body::Bytes),
            0xca => (1, 0, Body::Fixed(4)),
            0xcb => (1, 0, Body::Fixed(8)),
            0xcc | 0xd0 => (1, 0, Body::Fixed(1)),
            0xcd | 0xd1 => (1, 0, Body::Fixed(2)),
            0xce | 0xd2 => (1, 0, Body::Fixed(4)),
            0xcf | 0xd3 => (1, 0, Body::Fixed(8)),
            0xd4 => (1, 0, Body::Fixed(2)),
            0xd5 => (1, 0, Body::Fixed(3)),
            0xd6 => (1, 0, Body::Fixed(5)),
            0xd7 => (1, 0, Body::Fixed(9)),
            0xd8 => (1, 0, Body::Fixed(17)),
            0xdc => (3, 2, Body::Count(1)),
            0xdd => (5, 4, Body::Count(1)),
            0xde => (3, 2, Body::Count(2)),
            0xdf => (5, 4, Body::Count(2)),
            0xc1 => {
                return Err(MprpcError::Protocol(
                    "malformed MessagePack: reserved marker 0xc1".to_string(),
                ))
            }
        };

        if pos + header > buf.len() {
            return Ok(Extent::Partial(pos + header));
        }
        let length = read_length(&buf[pos + 1..pos + 1 + len_bytes]);
        pos += header;

        match kind {
            Body::Fixed(size) => pos += size,
            Body::Bytes => pos = pos.saturating_add(usize::try_from(length).unwrap_or(usize::MAX)),
            Body::Items(items) => pending += items,
            Body::Count(per_entry) => pending += per_entry * length,
        }

        if pos > buf.len() {
            let rest = usize::try_from(pending).unwrap_or(usize::MAX);
            return Ok(Extent::Partial(pos.saturating_add(rest)));
        }
    }

    Ok(Extent::Complete(pos))
}

/// What follows a MessagePack header.
enum Body {
    /// A payload of known size
    Fixed(usize),
    /// A payload whose size is the header's length field
    Bytes,
    /// A known number of nested values
    Items(u64),
    /// Nested values: the header's length field times this factor
    Count(u64),
}

/// Big-endian unsigned integer of up to four bytes.
fn read_length(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MsgpackCodec;
    use rmpv::Value;

    #[test]
    fn test_empty_decoder_needs_more_data() {
        let mut decoder = StreamDecoder::new();
        assert!(decoder.next_message().unwrap().is_none());
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_byte_at_a_time() {
        let payload = "x".repeat(700);
        let frame = MsgpackCodec::encode_request(42, "echo", &[Value::from(payload.as_str())])
            .unwrap();

        let mut decoder = StreamDecoder::new();
        for (i, byte) in frame.iter().enumerate() {
            decoder.feed(std::slice::from_ref(byte));
            let decoded = decoder.next_message().unwrap();
            if i + 1 < frame.len() {
                assert!(decoded.is_none(), "decoded early at byte {}", i);
            } else {
                let message = decoded.expect("frame should be complete");
                assert_eq!(message.msgid(), 42);
            }
        }
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_multiple_frames_in_one_feed() {
        let mut bytes = MsgpackCodec::encode_response(1, &Value::Nil, &Value::from(1)).unwrap();
        bytes.extend(MsgpackCodec::encode_response(2, &Value::Nil, &Value::from(2)).unwrap());
        let third = MsgpackCodec::encode_response(3, &Value::Nil, &Value::from(3)).unwrap();
        bytes.extend_from_slice(&third[..2]);

        let mut decoder = StreamDecoder::new();
        decoder.feed(&bytes);

        assert_eq!(decoder.next_message().unwrap().unwrap().msgid(), 1);
        assert_eq!(decoder.next_message().unwrap().unwrap().msgid(), 2);
        assert!(decoder.next_message().unwrap().is_none());
        assert_eq!(decoder.buffered(), 2);

        decoder.feed(&third[2..]);
        assert_eq!(decoder.next_message().unwrap().unwrap().msgid(), 3);
    }

    #[test]
    fn test_non_array_frame_is_protocol_error() {
        let mut bytes = Vec::new();
        rmpv::encode::write_value(&mut bytes, &Value::from("not a frame")).unwrap();

        let mut decoder = StreamDecoder::new();
        decoder.feed(&bytes);
        let err = decoder.next_message().unwrap_err();
        assert!(err.is_protocol());
    }

    #[test]
    fn test_oversized_partial_frame_rejected() {
        // bin32 header announcing 1 KiB, followed by only part of the body
        let mut bytes = vec![0xc6, 0x00, 0x00, 0x04, 0x00];
        bytes.extend(std::iter::repeat(0u8).take(100));

        let mut decoder = StreamDecoder::with_max_buffer(64);
        decoder.feed(&bytes);
        let err = decoder.next_message().unwrap_err();
        assert!(err.is_protocol());
    }

    #[test]
    fn test_announced_size_rejected_before_body_arrives() {
        // [0, 1, "m", [bin32 of 1 MiB]] with only the headers sent
        let bytes = [0x94, 0x00, 0x01, 0xa1, b'm', 0x91, 0xc6, 0x00, 0x10, 0x00, 0x00];

        let mut decoder = StreamDecoder::with_max_buffer(64 * 1024);
        decoder.feed(&bytes);
        let err = decoder.next_message().unwrap_err();
        assert!(err.is_protocol());
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_large_frame_in_chunks_waits_for_announced_length() {
        let payload = Value::Binary(vec![7u8; 4 * 1024 * 1024]);
        let frame = MsgpackCodec::encode_request(3, "upload", &[payload.clone()]).unwrap();

        let mut decoder = StreamDecoder::new();
        let mut chunks = frame.chunks(64 * 1024);

        decoder.feed(chunks.next().unwrap());
        assert!(decoder.next_message().unwrap().is_none());
        assert_eq!(decoder.needed, frame.len());

        let mut decoded = None;
        for chunk in chunks {
            assert!(decoded.is_none(), "decoded before the last chunk");
            decoder.feed(chunk);
            decoded = decoder.next_message().unwrap();
        }

        match decoded {
            Some(Message::Request(request)) => {
                assert_eq!(request.msgid, 3);
                assert_eq!(request.params, Value::Array(vec![payload]));
            }
            other => panic!("expected request, got {:?}", other),
        }
        assert_eq!(decoder.buffered(), 0);
        assert_eq!(decoder.needed, 1);
    }

    #[test]
    fn test_measure_matches_encoded_length() {
        let values = vec![
            Value::Nil,
            Value::from(-1),
            Value::from(u64::MAX),
            Value::from(i64::MIN),
            Value::from(1.5f32),
            Value::from(2.5f64),
            Value::from("x".repeat(40)),
            Value::from("y".repeat(70_000)),
            Value::Binary(vec![1; 300]),
            Value::Ext(5, vec![1, 2, 3, 4]),
            Value::Ext(6, vec![9; 20]),
            Value::Array((0..20).map(Value::from).collect()),
            Value::Map(vec![
                (Value::from("k"), Value::Array(vec![Value::from(true), Value::Nil])),
                (Value::from(1), Value::Map(vec![])),
            ]),
        ];

        for value in values {
            let mut bytes = Vec::new();
            rmpv::encode::write_value(&mut bytes, &value).unwrap();
            assert_eq!(measure(&bytes).unwrap(), Extent::Complete(bytes.len()), "{}", value);

            let cut = &bytes[..bytes.len() - 1];
            match measure(cut).unwrap() {
                Extent::Partial(needed) => assert!(needed > cut.len() && needed <= bytes.len()),
                other => panic!("cut value measured as {:?}", other),
            }
        }
    }

    #[test]
    fn test_reserved_marker_is_protocol_error() {
        let mut decoder = StreamDecoder::new();
        decoder.feed(&[0xc1]);
        assert!(decoder.next_message().unwrap_err().is_protocol());
    }

    #[tokio::test]
    async fn test_read_from_stream() {
        let frame = MsgpackCodec::encode_request(8, "sum", &[Value::from(1), Value::from(2)])
            .unwrap();
        let (mut client, mut server) = tokio::io::duplex(16);

        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            client.write_all(&frame).await.unwrap();
        });

        let mut decoder = StreamDecoder::new();
        let message = loop {
            if let Some(message) = decoder.next_message().unwrap() {
                break message;
            }
            let n = decoder.read_from(&mut server).await.unwrap();
            assert!(n > 0, "stream closed before a full frame arrived");
        };
        writer.await.unwrap();

        match message {
            Message::Request(req) => assert_eq!(req.method_name(), Some("sum")),
            other => panic!("expected request, got {:?}", other),
        }
    }
}
