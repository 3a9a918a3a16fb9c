use std::collections::VecDeque;
use std::time::Duration;

use mprpc_common::protocol::error::{MprpcError, Result};
use mprpc_common::protocol::{Message, MsgId, Response};
use mprpc_common::transport::{self, MsgpackCodec, StreamDecoder};
use rmpv::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::TcpStream;

/// Connection settings for an [`RpcClient`].
///
/// # Example
///
/// ```rust
/// use mprpc_client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::new("127.0.0.1", 6000).with_timeout(Duration::from_secs(5));
/// assert_eq!(config.addr(), "127.0.0.1:6000");
/// ```
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Bounds the connect and every call's full request/response exchange.
    /// `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl ClientConfig {
    /// Creates a config for `host:port` with no timeout.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: None,
        }
    }

    /// Sets the timeout for the connect and for each call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the address as `host:port`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("127.0.0.1", 6000)
    }
}

/// MessagePack-RPC client over a single TCP connection.
///
/// A connection carries one call at a time: [`call`](Self::call) takes
/// `&mut self`, writes the request and waits for the matching response
/// before returning. For concurrent callers, borrow clients from a
/// [`ConnectionPool`](crate::ConnectionPool) instead.
///
/// Any transport or protocol failure, including a timeout, closes the
/// socket, because a late response could otherwise be read as the reply to
/// the next call. The same holds for a call whose future is dropped before
/// it completes, e.g. by an outer `tokio::time::timeout` or `select!`.
/// [`is_connected`](Self::is_connected) reports `false` afterwards;
/// [`reconnect`](Self::reconnect) opens a fresh socket.
///
/// # Example
///
/// ```rust,no_run
/// use mprpc_client::RpcClient;
/// use rmpv::Value;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut client = RpcClient::connect("127.0.0.1", 6000).await?;
/// let sum = client.call("sum", vec![Value::from(1), Value::from(2)]).await?;
/// assert_eq!(sum, Value::from(3));
///
/// let sum: i64 = client.call_typed("sum", &(1, 2)).await?;
/// assert_eq!(sum, 3);
/// # Ok(())
/// # }
/// ```
pub struct RpcClient {
    config: ClientConfig,
    stream: Option<TcpStream>,
    decoder: StreamDecoder,
    next_msgid: MsgId,
    /// msgids of notifications whose responses are still to arrive
    notified: VecDeque<MsgId>,
    /// Set while a request is being written or its response awaited. Still
    /// set afterwards only if that future was dropped midway.
    in_flight: bool,
}

impl RpcClient {
    /// Connects to `host:port` with no timeout.
    pub async fn connect(host: impl Into<String>, port: u16) -> Result<Self> {
        Self::connect_with(ClientConfig::new(host, port)).await
    }

    /// Connects using `config`; its timeout also bounds the connect itself.
    pub async fn connect_with(config: ClientConfig) -> Result<Self> {
        let stream = transport::connect(&config.host, config.port, config.timeout).await?;
        tracing::debug!(addr = %config.addr(), "Connected");

        Ok(Self {
            config,
            stream: Some(stream),
            decoder: StreamDecoder::new(),
            next_msgid: 0,
            notified: VecDeque::new(),
            in_flight: false,
        })
    }

    /// Returns the settings this client connects with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// True while the socket is open and no failure has been observed on it.
    ///
    /// False as well after a call was abandoned mid-exchange, since its
    /// response may still arrive on the socket.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some() && !self.in_flight
    }

    /// Closes the socket. Calling it again is a no-op.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!(addr = %self.config.addr(), "Connection closed");
        }
        self.decoder.clear();
        self.notified.clear();
        self.in_flight = false;
    }

    /// Drops the current socket, if any, and connects again.
    pub async fn reconnect(&mut self) -> Result<()> {
        self.close();
        let stream =
            transport::connect(&self.config.host, self.config.port, self.config.timeout).await?;
        tracing::debug!(addr = %self.config.addr(), "Reconnected");
        self.stream = Some(stream);
        Ok(())
    }

    /// Calls `method` with positional `params` and waits for its result.
    ///
    /// # Errors
    ///
    /// - [`MprpcError::Remote`] if the remote method failed; the connection
    ///   stays usable
    /// - [`MprpcError::Timeout`] if the configured timeout elapsed
    /// - [`MprpcError::Protocol`] on a malformed frame or msgid mismatch
    /// - [`MprpcError::Connection`] if the client is closed, or an earlier
    ///   call on it was abandoned before completing
    /// - other transport variants if the socket failed
    pub async fn call(&mut self, method: &str, params: Vec<Value>) -> Result<Value> {
        let msgid = self.allocate_msgid();
        let frame = MsgpackCodec::encode_request(msgid, method, &params)?;

        self.begin()?;
        let timeout = self.config.timeout;
        let outcome = match timeout {
            Some(limit) => tokio::time::timeout(limit, self.exchange(msgid, &frame))
                .await
                .unwrap_or_else(|_| Err(MprpcError::Timeout(limit.as_millis() as u64))),
            None => self.exchange(msgid, &frame).await,
        };
        self.in_flight = false;

        match outcome {
            Ok(response) => response.into_result(),
            Err(err) => {
                self.discard(&err, method);
                Err(err)
            }
        }
    }

    /// Typed variant of [`call`](Self::call).
    ///
    /// `args` is converted with serde: a tuple, sequence or struct becomes
    /// the positional params, `()` means no params, and any other value is
    /// sent as a single param. The result is deserialized into `R`.
    pub async fn call_typed<A, R>(&mut self, method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = into_params(rmpv::ext::to_value(args)?);
        let result = self.call(method, params).await?;
        Ok(rmpv::ext::from_value(result)?)
    }

    /// Sends a request without waiting for its response.
    ///
    /// The server still answers. While the request is being written, the
    /// socket is read as well, and any responses to earlier notifications
    /// that have arrived are discarded; responses still outstanding after
    /// that are skipped by the next [`call`](Self::call). A long run of
    /// notifications therefore never stalls on a server blocked writing
    /// responses nobody reads.
    ///
    /// # Errors
    ///
    /// - [`MprpcError::Timeout`] if the write did not finish in time
    /// - [`MprpcError::Protocol`] if something other than a notification
    ///   response arrives
    /// - other transport variants if the socket failed
    pub async fn notify(&mut self, method: &str, params: Vec<Value>) -> Result<()> {
        let msgid = self.allocate_msgid();
        let frame = MsgpackCodec::encode_request(msgid, method, &params)?;

        self.begin()?;
        // queued before the write: the response can arrive while it finishes
        self.notified.push_back(msgid);

        let timeout = self.config.timeout;
        let written = match timeout {
            Some(limit) => tokio::time::timeout(limit, self.send(&frame))
                .await
                .unwrap_or_else(|_| Err(MprpcError::Timeout(limit.as_millis() as u64))),
            None => self.send(&frame).await,
        };
        self.in_flight = false;

        match written {
            Ok(()) => Ok(()),
            Err(err) => {
                self.discard(&err, method);
                Err(err)
            }
        }
    }

    fn allocate_msgid(&mut self) -> MsgId {
        let msgid = self.next_msgid;
        self.next_msgid = self.next_msgid.wrapping_add(1);
        msgid
    }

    /// Marks the start of an exchange. A client still marked from an
    /// abandoned exchange is closed first, so it fails as not connected.
    fn begin(&mut self) -> Result<()> {
        if self.in_flight {
            tracing::warn!(
                addr = %self.config.addr(),
                "Closing connection left mid-call by a dropped future"
            );
            self.close();
        }
        if self.stream.is_none() {
            return Err(not_connected());
        }
        self.in_flight = true;
        Ok(())
    }

    async fn send(&mut self, frame: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;
        write_while_reading(stream, &mut self.decoder, frame).await?;

        while let Some(message) = self.decoder.next_message()? {
            match message {
                Message::Response(response) if self.notified.front() == Some(&response.msgid) => {
                    self.notified.pop_front();
                    tracing::trace!(msgid = response.msgid, "Skipped notification response");
                }
                other => {
                    return Err(MprpcError::Protocol(format!(
                        "unexpected frame (msgid {}) while only notifications are pending",
                        other.msgid()
                    )))
                }
            }
        }
        Ok(())
    }

    async fn exchange(&mut self, msgid: MsgId, frame: &[u8]) -> Result<Response> {
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;
        write_while_reading(stream, &mut self.decoder, frame).await?;

        loop {
            while let Some(message) = self.decoder.next_message()? {
                match message {
                    Message::Response(response) if response.msgid == msgid => return Ok(response),
                    Message::Response(response) if self.notified.front() == Some(&response.msgid) => {
                        self.notified.pop_front();
                        tracing::trace!(msgid = response.msgid, "Skipped notification response");
                    }
                    Message::Response(response) => {
                        return Err(MprpcError::Protocol(format!(
                            "msgid mismatch: expected {}, got {}",
                            msgid, response.msgid
                        )))
                    }
                    Message::Request(request) => {
                        return Err(MprpcError::Protocol(format!(
                            "unexpected request frame (msgid {}) on a client connection",
                            request.msgid
                        )))
                    }
                }
            }

            let n = self
                .decoder
                .read_from(stream)
                .await
                .map_err(|e| MprpcError::from_io(e, "reading response", 0))?;
            if n == 0 {
                return Err(MprpcError::ConnectionReset(
                    "connection closed by peer".to_string(),
                ));
            }
        }
    }

    /// Closes the socket after an error that leaves it untrustworthy.
    fn discard(&mut self, err: &MprpcError, method: &str) {
        if err.breaks_connection() && self.stream.is_some() {
            tracing::warn!(
                addr = %self.config.addr(),
                method,
                error = %err,
                "Closing connection after failed call"
            );
            self.close();
        }
    }
}

/// Writes `frame` while buffering whatever the peer sends meanwhile.
///
/// A server answering earlier notifications can block on a full socket
/// buffer and stop reading; reading here keeps both sides moving. Bytes
/// are only buffered, the caller decodes them once the write is done.
async fn write_while_reading(
    stream: &mut TcpStream,
    decoder: &mut StreamDecoder,
    frame: &[u8],
) -> Result<()> {
    let (mut reader, mut writer) = stream.split();
    let write = transport::write_frame(&mut writer, frame);
    tokio::pin!(write);

    let mut peer_open = true;
    loop {
        tokio::select! {
            written = &mut write => return written,
            read = decoder.read_from(&mut reader), if peer_open => {
                match read {
                    Ok(0) => peer_open = false,
                    Ok(_) => {}
                    Err(e) => return Err(MprpcError::from_io(e, "reading response", 0)),
                }
            }
        }
    }
}

fn not_connected() -> MprpcError {
    MprpcError::Connection("client is not connected".to_string())
}

fn into_params(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Nil => Vec::new(),
        other => vec![other],
    }
}
