//! Throughput runs for `mprpc bench`.
//!
//! Both modes call `sum(1, 2)` repeatedly. The single mode issues every call
//! on one connection in sequence; the pool mode fans the same number of
//! calls out over a pool from `concurrency` worker tasks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use mprpc_client::{ClientConfig, ConnectionPool, PoolConfig, RpcClient};
use rmpv::Value;

#[derive(Debug, Clone)]
pub struct BenchReport {
    pub mode: &'static str,
    pub calls: usize,
    pub elapsed: Duration,
}

impl BenchReport {
    /// Calls completed per second.
    pub fn qps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.calls as f64 / secs
        } else {
            f64::INFINITY
        }
    }
}

impl std::fmt::Display for BenchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {:.2} qps", self.mode, self.qps())
    }
}

fn sum_params() -> Vec<Value> {
    vec![Value::from(1), Value::from(2)]
}

/// `calls` sequential calls on a single client.
pub async fn bench_single(config: ClientConfig, calls: usize) -> Result<BenchReport> {
    let mut client = RpcClient::connect_with(config).await?;

    let start = Instant::now();
    for _ in 0..calls {
        client.call("sum", sum_params()).await?;
    }

    Ok(BenchReport {
        mode: "call",
        calls,
        elapsed: start.elapsed(),
    })
}

/// `calls` calls spread over `concurrency` tasks sharing a pool of
/// `concurrency` pre-opened connections.
pub async fn bench_pool(config: ClientConfig, calls: usize, concurrency: usize) -> Result<BenchReport> {
    let concurrency = concurrency.max(1);
    let pool = ConnectionPool::new(PoolConfig {
        client: config,
        initial_connections: concurrency,
        max_connections: concurrency,
        acquire_timeout: None,
    })
    .await?;

    let remaining = Arc::new(AtomicUsize::new(calls));
    let start = Instant::now();

    let workers: Vec<_> = (0..concurrency)
        .map(|_| {
            let pool = pool.clone();
            let remaining = remaining.clone();
            tokio::spawn(async move {
                while remaining
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
                {
                    pool.call("sum", sum_params()).await?;
                }
                Ok::<_, mprpc_common::protocol::MprpcError>(())
            })
        })
        .collect();

    for worker in workers {
        worker.await??;
    }

    let elapsed = start.elapsed();
    tracing::debug!(live = pool.live_connections(), "Pool benchmark finished");
    pool.close();

    Ok(BenchReport {
        mode: "call_using_connection_pool",
        calls,
        elapsed,
    })
}
