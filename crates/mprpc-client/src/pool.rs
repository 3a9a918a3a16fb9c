use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use mprpc_common::protocol::error::{MprpcError, Result};
use rmpv::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::client::{ClientConfig, RpcClient};

/// Connection pool configuration.
///
/// # Default Configuration
///
/// - `client`: [`ClientConfig::default`] (127.0.0.1:6000, no timeout)
/// - `initial_connections`: 0
/// - `max_connections`: 10
/// - `acquire_timeout`: `None` (wait until a connection frees up)
///
/// # Example
///
/// ```rust
/// use mprpc_client::PoolConfig;
/// use std::time::Duration;
///
/// let config = PoolConfig::new("127.0.0.1", 6000)
///     .with_initial_connections(20)
///     .with_max_connections(20)
///     .with_acquire_timeout(Duration::from_secs(30));
/// assert_eq!(config.max_connections, 20);
/// ```
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Settings used for every connection the pool opens
    pub client: ClientConfig,
    /// Connections opened eagerly by [`ConnectionPool::new`]
    pub initial_connections: usize,
    /// Upper bound on live connections, idle and borrowed together
    pub max_connections: usize,
    /// Maximum time [`ConnectionPool::acquire`] waits for capacity
    pub acquire_timeout: Option<Duration>,
}

impl PoolConfig {
    /// Creates a config for `host:port` with the default limits.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            client: ClientConfig::new(host, port),
            ..Self::default()
        }
    }

    /// Sets how many connections [`ConnectionPool::new`] opens up front.
    /// Capped at `max_connections`.
    pub fn with_initial_connections(mut self, initial_connections: usize) -> Self {
        self.initial_connections = initial_connections;
        self
    }

    /// Sets the cap on live connections. Zero is raised to one.
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Bounds how long [`ConnectionPool::acquire`] waits for capacity.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Sets the per-connection timeout (connect and each call).
    pub fn with_client_timeout(mut self, timeout: Duration) -> Self {
        self.client.timeout = Some(timeout);
        self
    }

    fn normalized(mut self) -> Self {
        self.max_connections = self.max_connections.max(1);
        self.initial_connections = self.initial_connections.min(self.max_connections);
        self
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            initial_connections: 0,
            max_connections: 10,
            acquire_timeout: None,
        }
    }
}

/// A client borrowed from a [`ConnectionPool`].
///
/// Derefs to [`RpcClient`]. Dropping it hands the connection back: a
/// connected client goes to the idle set, one that was closed (by the caller
/// or by a failed call) or left mid-call by a dropped future is discarded
/// and its slot freed for a fresh connection. Release therefore happens on every exit path, including `?`
/// returns and panics.
pub struct PooledClient {
    client: Option<RpcClient>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledClient {
    type Target = RpcClient;

    fn deref(&self) -> &RpcClient {
        // Only `Drop` takes the client out
        self.client.as_ref().unwrap_or_else(|| unreachable!("pooled client already released"))
    }
}

impl DerefMut for PooledClient {
    fn deref_mut(&mut self) -> &mut RpcClient {
        self.client.as_mut().unwrap_or_else(|| unreachable!("pooled client already released"))
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.pool.put_back(client);
        }
        // `_permit` is released after this, once the client is back in place
    }
}

/// Bounded pool of [`RpcClient`] connections to one server.
///
/// Each caller borrows a dedicated connection, makes its call and returns
/// it, so throughput comes from fanning calls out over connections rather
/// than pipelining on one.
///
/// # Architecture
///
/// - A semaphore with `max_connections` permits bounds borrowers; a caller
///   that finds the pool at capacity waits on it without spinning
/// - Idle connections are reused LIFO
/// - A new connection is opened only when a permit is held and nothing is
///   idle, so live connections never exceed `max_connections`
/// - A connection that fails while borrowed is discarded on release
///
/// # Example
///
/// ```rust,no_run
/// use mprpc_client::{ConnectionPool, PoolConfig};
/// use rmpv::Value;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = ConnectionPool::new(PoolConfig::new("127.0.0.1", 6000)).await?;
///
/// // Scoped borrow: released when `conn` goes out of scope
/// {
///     let mut conn = pool.acquire().await?;
///     conn.call("sum", vec![Value::from(1), Value::from(2)]).await?;
/// }
///
/// // Or let the pool do the scoping
/// let sum = pool.call("sum", vec![Value::from(1), Value::from(2)]).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    config: PoolConfig,
    idle: Mutex<Vec<RpcClient>>,
    permits: Arc<Semaphore>,
    live: AtomicUsize,
}

impl PoolInner {
    fn idle(&self) -> MutexGuard<'_, Vec<RpcClient>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn put_back(&self, mut client: RpcClient) {
        let mut idle = self.idle();
        if client.is_connected() && !self.permits.is_closed() {
            idle.push(client);
            return;
        }
        drop(idle);

        client.close();
        let live = self.live.fetch_sub(1, Ordering::SeqCst) - 1;
        tracing::debug!(
            addr = %self.config.client.addr(),
            live,
            "Discarded pooled connection"
        );
    }
}

impl ConnectionPool {
    /// Creates a pool and opens `initial_connections` connections up front.
    ///
    /// # Errors
    ///
    /// Returns the connect error if any of the initial connections fails.
    pub async fn new(config: PoolConfig) -> Result<Self> {
        let config = config.normalized();

        let mut idle = Vec::with_capacity(config.max_connections);
        for _ in 0..config.initial_connections {
            idle.push(RpcClient::connect_with(config.client.clone()).await?);
        }

        tracing::info!(
            addr = %config.client.addr(),
            initial = idle.len(),
            max = config.max_connections,
            "Connection pool ready"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                live: AtomicUsize::new(idle.len()),
                idle: Mutex::new(idle),
                permits: Arc::new(Semaphore::new(config.max_connections)),
                config,
            }),
        })
    }

    /// Returns the normalized configuration the pool runs with.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Borrows a connection, opening one if none is idle and the pool is
    /// under capacity, or waiting for a release otherwise.
    ///
    /// # Errors
    ///
    /// - [`MprpcError::PoolTimeout`] if `acquire_timeout` elapses first
    /// - [`MprpcError::PoolClosed`] after [`close`](Self::close)
    /// - the connect error if a new connection could not be opened; its
    ///   slot is freed again
    pub async fn acquire(&self) -> Result<PooledClient> {
        let permits = self.inner.permits.clone();
        let permit = match self.inner.config.acquire_timeout {
            Some(limit) => tokio::time::timeout(limit, permits.acquire_owned())
                .await
                .map_err(|_| MprpcError::PoolTimeout(limit.as_millis() as u64))?,
            None => permits.acquire_owned().await,
        }
        .map_err(|_| MprpcError::PoolClosed)?;

        let reused = self.inner.idle().pop();
        let client = match reused {
            Some(client) => client,
            None => {
                let client = RpcClient::connect_with(self.inner.config.client.clone()).await?;
                let live = self.inner.live.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::debug!(
                    addr = %self.inner.config.client.addr(),
                    live,
                    "Opened pooled connection"
                );
                client
            }
        };

        Ok(PooledClient {
            client: Some(client),
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    /// Returns a borrowed connection. Same as dropping it.
    pub fn release(&self, conn: PooledClient) {
        drop(conn);
    }

    /// Acquires a connection, makes one call and releases it.
    ///
    /// Dropping the returned future before it completes discards the
    /// connection, so a response still in flight never reaches the next
    /// borrower.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let mut conn = self.acquire().await?;
        conn.call(method, params).await
    }

    /// Typed variant of [`call`](Self::call); see [`RpcClient::call_typed`].
    pub async fn call_typed<A, R>(&self, method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut conn = self.acquire().await?;
        conn.call_typed(method, args).await
    }

    /// Open connections, idle and borrowed.
    pub fn live_connections(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Open connections waiting to be borrowed.
    pub fn idle_connections(&self) -> usize {
        self.inner.idle().len()
    }

    /// Closes idle connections and fails all later acquires.
    ///
    /// Borrowed connections are closed as they are released.
    pub fn close(&self) {
        self.inner.permits.close();
        let drained: Vec<RpcClient> = self.inner.idle().drain(..).collect();
        let count = drained.len();
        for mut client in drained {
            client.close();
        }
        self.inner.live.fetch_sub(count, Ordering::SeqCst);
        tracing::info!(addr = %self.inner.config.client.addr(), closed = count, "Connection pool closed");
    }
}
