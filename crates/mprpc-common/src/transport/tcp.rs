use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::protocol::error::{MprpcError, Result};

/// Ceiling on bytes taken from the socket per read (1 MiB).
pub const SOCKET_RECV_SIZE: usize = 1024 * 1024;

/// Largest partial frame a decoder will buffer (100 MB).
pub const MAX_BUFFER_SIZE: usize = 100 * 1024 * 1024;

/// Connects to `host:port`.
///
/// The host may resolve to several addresses; each is tried in turn until
/// one accepts. With `timeout` set, resolution and all connect attempts
/// together must finish within it.
///
/// # Errors
///
/// - [`MprpcError::Timeout`] if the deadline passes
/// - [`MprpcError::ConnectionRefused`] if the peer refused
/// - [`MprpcError::Connection`] if the host does not resolve
pub async fn connect(host: &str, port: u16, timeout: Option<Duration>) -> Result<TcpStream> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, connect_any(host, port))
            .await
            .map_err(|_| MprpcError::Timeout(limit.as_millis() as u64))?,
        None => connect_any(host, port).await,
    }
}

async fn connect_any(host: &str, port: u16) -> Result<TcpStream> {
    let addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| MprpcError::Connection(format!("Invalid address '{}:{}': {}", host, port, e)))?;

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                stream
                    .set_nodelay(true)
                    .map_err(|e| MprpcError::from_io(e, "setting TCP_NODELAY", 0))?;
                tracing::trace!(%addr, "TCP connection established");
                return Ok(stream);
            }
            Err(e) => {
                tracing::debug!(%addr, error = %e, "Connect attempt failed");
                last_err = Some(e);
            }
        }
    }

    match last_err {
        Some(e) => Err(MprpcError::from_io(
            e,
            &format!("connecting to {}:{}", host, port),
            0,
        )),
        None => Err(MprpcError::Connection(format!(
            "Failed to connect to {}:{}: no addresses resolved",
            host, port
        ))),
    }
}

/// Writes one encoded frame and flushes it.
///
/// # Arguments
///
/// * `writer` - The stream to write to
/// * `frame` - A complete encoded frame
///
/// # Errors
///
/// Returns the transport error classified by [`MprpcError::from_io`] if the
/// write or flush fails.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    tracing::trace!(len = frame.len(), "Writing frame");
    writer
        .write_all(frame)
        .await
        .map_err(|e| MprpcError::from_io(e, "writing frame", 0))?;
    writer
        .flush()
        .await
        .map_err(|e| MprpcError::from_io(e, "flushing stream", 0))?;
    Ok(())
}
