//! Tests for the protocol module
//!
//! These cover frame shape validation, msgid handling and the mapping of
//! response error payloads onto caller-facing errors.

#[cfg(test)]
mod tests {
    use super::super::*;
    use rmpv::Value;

    fn frame(items: Vec<Value>) -> Value {
        Value::Array(items)
    }

    #[test]
    fn test_request_creation() {
        let req = Request::new(3, "echo", vec![Value::from("hi")]);
        assert_eq!(req.msgid, 3);
        assert_eq!(req.method_name(), Some("echo"));
        assert_eq!(req.params, Value::Array(vec![Value::from("hi")]));
    }

    #[test]
    fn test_response_success() {
        let resp = Response::success(9, Value::from(42));
        assert!(!resp.is_error());
        assert!(resp.error.is_nil());
        assert_eq!(resp.into_result().unwrap(), Value::from(42));
    }

    #[test]
    fn test_response_error_message_is_exact() {
        let resp = Response::error(9, "error msg");
        assert!(resp.is_error());
        assert!(resp.result.is_nil());

        let err = resp.into_result().unwrap_err();
        assert!(err.is_remote());
        assert!(!err.breaks_connection());
        assert_eq!(err.to_string(), "error msg");
    }

    #[test]
    fn test_response_error_non_string_payload() {
        let resp = Response::error(1, Value::from(500));
        match resp.into_result().unwrap_err() {
            MprpcError::Remote { message, payload } => {
                assert_eq!(message, "500");
                assert_eq!(payload, Value::from(500));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_message_from_request_frame() {
        let msg = Message::from_value(frame(vec![
            Value::from(0),
            Value::from(17),
            Value::from("sum"),
            Value::Array(vec![Value::from(1), Value::from(2)]),
        ]))
        .unwrap();

        assert_eq!(msg.msgid(), 17);
        match msg {
            Message::Request(req) => {
                assert_eq!(req.method_name(), Some("sum"));
                assert_eq!(req.params.as_array().map(|p| p.len()), Some(2));
            }
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_message_to_value_shape() {
        let value = Message::from(Response::success(5, Value::Nil)).to_value();
        let items = value.as_array().unwrap();
        assert_eq!(items.len(), 4);
        assert_eq!(items[0], Value::from(MSGPACKRPC_RESPONSE));
        assert_eq!(items[1], Value::from(5));
    }

    #[test]
    fn test_request_with_non_string_method_still_decodes() {
        let msg = Message::from_value(frame(vec![
            Value::from(0),
            Value::from(1),
            Value::from(99),
            Value::Nil,
        ]))
        .unwrap();

        match msg {
            Message::Request(req) => assert!(req.method_name().is_none()),
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_non_array() {
        let err = Message::from_value(Value::from("hello")).unwrap_err();
        assert!(err.is_protocol());
    }

    #[test]
    fn test_rejects_wrong_length() {
        let err = Message::from_value(frame(vec![
            Value::from(2),
            Value::from("notify"),
            Value::Array(vec![]),
        ]))
        .unwrap_err();
        assert!(err.is_protocol());
        assert!(err.to_string().contains("3 elements"));
    }

    #[test]
    fn test_rejects_unknown_type() {
        let err = Message::from_value(frame(vec![
            Value::from(2),
            Value::from(1),
            Value::from("m"),
            Value::Array(vec![]),
        ]))
        .unwrap_err();
        assert!(err.is_protocol());
        assert!(err.breaks_connection());
    }

    #[test]
    fn test_rejects_msgid_out_of_range() {
        let err = Message::from_value(frame(vec![
            Value::from(1),
            Value::from(u64::from(u32::MAX) + 1),
            Value::Nil,
            Value::Nil,
        ]))
        .unwrap_err();
        assert!(err.is_protocol());

        let err = Message::from_value(frame(vec![
            Value::from(1),
            Value::from(-1),
            Value::Nil,
            Value::Nil,
        ]))
        .unwrap_err();
        assert!(err.is_protocol());
    }

    #[test]
    fn test_io_error_classification() {
        use std::io::{Error, ErrorKind};

        let timeout = MprpcError::from_io(Error::from(ErrorKind::TimedOut), "reading", 100);
        assert!(matches!(timeout, MprpcError::Timeout(100)));

        let refused =
            MprpcError::from_io(Error::from(ErrorKind::ConnectionRefused), "connecting", 0);
        assert!(matches!(refused, MprpcError::ConnectionRefused(_)));

        let reset = MprpcError::from_io(Error::from(ErrorKind::ConnectionReset), "reading", 0);
        assert!(matches!(reset, MprpcError::ConnectionReset(_)));

        let other = MprpcError::from_io(Error::from(ErrorKind::PermissionDenied), "binding", 0);
        assert!(matches!(other, MprpcError::Io(_)));
        assert!(other.is_transport());
    }
}
