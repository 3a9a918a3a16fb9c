use rmpv::Value;

pub type MsgId = u32;
pub type MethodName = String;
pub type RpcParams = Vec<Value>;

/// A decoded or outgoing request frame: `[0, msgid, method, params]`.
///
/// `method` and `params` are kept as raw values. A frame whose method is not
/// a string, or whose params are not an array, is still a well-formed
/// message; the dispatcher reports it back as an application error.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub msgid: MsgId,
    pub method: Value,
    pub params: Value,
}

impl Request {
    /// Create a new request
    ///
    /// # Arguments
    ///
    /// * `msgid` - Id the response will echo
    /// * `method` - The method name
    /// * `params` - Positional parameters
    pub fn new(msgid: MsgId, method: impl Into<MethodName>, params: RpcParams) -> Self {
        Request {
            msgid,
            method: Value::from(method.into()),
            params: Value::Array(params),
        }
    }

    /// The method name, if the frame carried a valid UTF-8 string.
    pub fn method_name(&self) -> Option<&str> {
        self.method.as_str()
    }
}
