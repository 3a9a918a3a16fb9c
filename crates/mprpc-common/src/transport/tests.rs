//! Tests for the transport layer
//!
//! These push frames through `write_frame` and the streaming decoder over an
//! in-memory duplex pipe, the same path the client and server use.

#[cfg(test)]
mod tests {
    use crate::protocol::{Message, Request, Response};
    use crate::transport::{write_frame, MsgpackCodec, StreamDecoder};
    use rmpv::Value;

    #[tokio::test]
    async fn test_frames_survive_small_pipe() {
        let (mut tx, mut rx) = tokio::io::duplex(7);

        let writer = tokio::spawn(async move {
            for msgid in 0..5u32 {
                let frame = MsgpackCodec::encode_request(
                    msgid,
                    "echo",
                    &[Value::from("message".repeat(100))],
                )
                .unwrap();
                write_frame(&mut tx, &frame).await.unwrap();
            }
        });

        let mut decoder = StreamDecoder::new();
        let mut seen = Vec::new();
        while seen.len() < 5 {
            match decoder.next_message().unwrap() {
                Some(Message::Request(req)) => {
                    assert_eq!(
                        req.params,
                        Value::Array(vec![Value::from("message".repeat(100))])
                    );
                    seen.push(req.msgid);
                }
                Some(other) => panic!("unexpected message {:?}", other),
                None => {
                    let n = decoder.read_from(&mut rx).await.unwrap();
                    assert!(n > 0);
                }
            }
        }
        writer.await.unwrap();

        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_empty_params_and_nil_result() {
        let request = MsgpackCodec::encode_message(&Request::new(0, "noop", vec![]).into()).unwrap();
        match MsgpackCodec::decode_message(&request).unwrap() {
            Message::Request(req) => assert_eq!(req.params, Value::Array(vec![])),
            other => panic!("unexpected message {:?}", other),
        }

        let response =
            MsgpackCodec::encode_message(&Response::success(0, Value::Nil).into()).unwrap();
        match MsgpackCodec::decode_message(&response).unwrap() {
            Message::Response(resp) => {
                assert!(!resp.is_error());
                assert!(resp.result.is_nil());
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_invalid_bytes_return_error() {
        // a bare fixint is valid MessagePack but not a frame; 7 is no message type
        assert!(MsgpackCodec::decode_message(&[0x05]).is_err());
        assert!(MsgpackCodec::decode_message(&[0x94, 0x07, 0x00, 0xc0, 0xc0]).is_err());
    }
}
