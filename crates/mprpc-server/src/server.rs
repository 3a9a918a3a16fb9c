//! TCP server for mprpc
//!
//! # Architecture
//!
//! - One tokio task per accepted connection
//! - Each task runs [`serve_connection`]: read into a streaming decoder,
//!   dispatch every complete request, write the response, repeat
//! - Requests on one connection are handled strictly in order; separate
//!   connections never wait on each other
//! - A protocol violation closes only the offending connection
//!
//! # Example
//!
//! ```no_run
//! use mprpc_server::{MethodTable, RpcServer, ServerConfig};
//! use rmpv::Value;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let methods = MethodTable::builder()
//!         .register("echo", |mut params| Ok(params.pop().unwrap_or(Value::Nil)))
//!         .build();
//!
//!     let server = RpcServer::bind("127.0.0.1:6000", methods, ServerConfig::default()).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use mprpc_common::protocol::error::{MprpcError, Result};
use mprpc_common::protocol::Message;
use mprpc_common::transport::{self, MsgpackCodec, StreamDecoder};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::Semaphore;

use crate::dispatcher::MethodTable;

/// Pause after a failed accept, e.g. when the process is out of file
/// descriptors, before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Server settings.
#[derive(Clone, Debug, Default)]
pub struct ServerConfig {
    /// Connections served at once. Further connections are accepted but
    /// wait for a slot before their first read. `None` is unbounded.
    pub max_connections: Option<usize>,
}

impl ServerConfig {
    /// Creates the default config: no connection limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the connections served at once. Zero is raised to one.
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = Some(max_connections.max(1));
        self
    }
}

/// MessagePack-RPC server bound to a TCP address.
pub struct RpcServer {
    listener: TcpListener,
    methods: Arc<MethodTable>,
    config: ServerConfig,
}

impl RpcServer {
    /// Binds the listening socket. Use port 0 for an ephemeral port and
    /// read it back with [`local_addr`](Self::local_addr).
    pub async fn bind(
        addr: impl ToSocketAddrs,
        methods: MethodTable,
        config: ServerConfig,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| MprpcError::Connection(format!("Failed to bind: {}", e)))?;

        Ok(Self {
            listener,
            methods: Arc::new(methods),
            config,
        })
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| MprpcError::Connection(format!("Failed to get local address: {}", e)))
    }

    /// Returns the method table shared with every connection task.
    pub fn methods(&self) -> &Arc<MethodTable> {
        &self.methods
    }

    /// Accepts connections until the process exits.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accepts connections until `shutdown` resolves.
    ///
    /// Stops accepting only; connections already being served run until
    /// their peer disconnects.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = self.local_addr()?;
        let slots = self
            .config
            .max_connections
            .map(|max| Arc::new(Semaphore::new(max.max(1))));

        tracing::info!(
            %addr,
            methods = self.methods.len(),
            max_connections = ?self.config.max_connections,
            "mprpc server listening"
        );

        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!(%addr, "mprpc server shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept connection");
                    if pause_or_shutdown(shutdown.as_mut(), ACCEPT_RETRY_DELAY).await {
                        tracing::info!(%addr, "mprpc server shutting down");
                        return Ok(());
                    }
                    continue;
                }
            };

            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(%peer, error = %e, "Failed to set TCP_NODELAY");
            }
            tracing::info!(%peer, "Accepted connection");

            let methods = self.methods.clone();
            let slots = slots.clone();

            tokio::spawn(async move {
                let _slot = match slots {
                    Some(slots) => match slots.acquire_owned().await {
                        Ok(slot) => Some(slot),
                        Err(_) => return,
                    },
                    None => None,
                };

                match serve_connection(stream, methods).await {
                    Ok(()) => tracing::debug!(%peer, "Connection closed"),
                    Err(e) if e.is_protocol() => {
                        tracing::warn!(%peer, error = %e, "Protocol violation, closing connection")
                    }
                    Err(e) => tracing::debug!(%peer, error = %e, "Connection closed with error"),
                }
            });
        }
    }
}

/// Waits for `delay`, returning early with `true` if `shutdown` resolves.
async fn pause_or_shutdown<F>(shutdown: Pin<&mut F>, delay: Duration) -> bool
where
    F: Future<Output = ()>,
{
    tokio::select! {
        _ = shutdown => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

/// Serves MessagePack-RPC requests on `stream` until the peer disconnects.
///
/// Returns `Ok(())` on a clean end of stream. A malformed frame, or a
/// response frame sent to the server, ends the connection with a protocol
/// error; a failed read or write ends it with a transport error.
pub async fn serve_connection<S>(mut stream: S, methods: Arc<MethodTable>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut decoder = StreamDecoder::new();

    loop {
        while let Some(message) = decoder.next_message()? {
            let request = match message {
                Message::Request(request) => request,
                Message::Response(response) => {
                    return Err(MprpcError::Protocol(format!(
                        "unexpected response frame (msgid {}) on a server connection",
                        response.msgid
                    )))
                }
            };

            let response = methods.dispatch(request).await;
            let frame = MsgpackCodec::encode_message(&Message::Response(response))?;
            transport::write_frame(&mut stream, &frame).await?;
        }

        let n = decoder
            .read_from(&mut stream)
            .await
            .map_err(|e| MprpcError::from_io(e, "reading request", 0))?;
        if n == 0 {
            if decoder.buffered() > 0 {
                tracing::debug!(
                    buffered = decoder.buffered(),
                    "Peer closed with a partial frame buffered"
                );
            }
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mprpc_common::protocol::Response;
    use rmpv::Value;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn methods() -> Arc<MethodTable> {
        Arc::new(
            MethodTable::builder()
                .register("echo", |mut params| Ok(params.pop().unwrap_or(Value::Nil)))
                .build(),
        )
    }

    async fn read_response(stream: &mut DuplexStream, decoder: &mut StreamDecoder) -> Response {
        loop {
            if let Some(message) = decoder.next_message().unwrap() {
                match message {
                    Message::Response(response) => return response,
                    other => panic!("expected response, got {:?}", other),
                }
            }
            let n = decoder.read_from(stream).await.unwrap();
            assert!(n > 0, "server closed before responding");
        }
    }

    #[tokio::test]
    async fn test_serve_requests_in_order() {
        let (mut client, server) = duplex(64);
        let task = tokio::spawn(serve_connection(server, methods()));

        // two requests in one write, answered in order
        let mut frames = MsgpackCodec::encode_request(1, "echo", &[Value::from("a")]).unwrap();
        frames.extend(MsgpackCodec::encode_request(2, "missing", &[]).unwrap());
        client.write_all(&frames).await.unwrap();

        let mut decoder = StreamDecoder::new();
        let first = read_response(&mut client, &mut decoder).await;
        assert_eq!(first.msgid, 1);
        assert_eq!(first.result, Value::from("a"));

        let second = read_response(&mut client, &mut decoder).await;
        assert_eq!(second.msgid, 2);
        assert_eq!(second.error.as_str(), Some("Method not found: missing"));

        drop(client);
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_response_frame_closes_connection() {
        let (mut client, server) = duplex(64);
        let task = tokio::spawn(serve_connection(server, methods()));

        let frame = MsgpackCodec::encode_response(1, &Value::Nil, &Value::from(1)).unwrap();
        client.write_all(&frame).await.unwrap();

        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_protocol());
    }

    #[tokio::test]
    async fn test_malformed_frame_closes_connection() {
        let (mut client, server) = duplex(64);
        let task = tokio::spawn(serve_connection(server, methods()));

        // [0, 1, "echo"]: three elements
        client
            .write_all(&[0x93, 0x00, 0x01, 0xa4, b'e', b'c', b'h', b'o'])
            .await
            .unwrap();

        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_protocol());

        // server side is gone, so the read sees end of stream
        let mut buf = [0u8; 8];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_accept_retry_pauses() {
        let start = std::time::Instant::now();
        let shutdown = std::future::pending::<()>();
        tokio::pin!(shutdown);
        assert!(!pause_or_shutdown(shutdown.as_mut(), ACCEPT_RETRY_DELAY).await);
        assert!(start.elapsed() >= ACCEPT_RETRY_DELAY);

        let shutdown = std::future::ready(());
        tokio::pin!(shutdown);
        let start = std::time::Instant::now();
        assert!(pause_or_shutdown(shutdown.as_mut(), Duration::from_secs(10)).await);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_server_config() {
        assert!(ServerConfig::default().max_connections.is_none());
        assert_eq!(ServerConfig::new().with_max_connections(0).max_connections, Some(1));
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let methods = MethodTable::builder().build();
        let server = RpcServer::bind("127.0.0.1:0", methods, ServerConfig::default())
            .await
            .unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(server.run_until(async {
            let _ = rx.await;
        }));

        tx.send(()).unwrap();
        assert!(task.await.unwrap().is_ok());
    }
}
