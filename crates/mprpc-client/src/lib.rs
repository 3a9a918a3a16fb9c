//! mprpc Client
//!
//! Single-connection [`RpcClient`] and a bounded [`ConnectionPool`] of them.

pub mod client;
pub mod pool;

pub use client::{ClientConfig, RpcClient};
pub use pool::{ConnectionPool, PoolConfig, PooledClient};
