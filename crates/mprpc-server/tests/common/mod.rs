//! Shared fixtures for the server integration tests.

use std::net::SocketAddr;
use std::time::Duration;

use mprpc_common::protocol::error::MprpcError;
use mprpc_server::{MethodTable, RpcServer, ServerConfig};
use rmpv::Value;

/// Installs a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// `echo`, `echo_delayed`, `raise_error` and `sum`.
pub fn test_methods() -> MethodTable {
    MethodTable::builder()
        .register("echo", |params| Ok(first(params)))
        .register_async("echo_delayed", |params| async move {
            let delay_ms = params.get(1).and_then(Value::as_u64).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok(first(params))
        })
        .register("raise_error", |_| {
            Err(MprpcError::Application("error msg".to_string()))
        })
        .register_typed("sum", |(a, b): (i64, i64)| Ok::<_, String>(a + b))
        .build()
}

fn first(params: Vec<Value>) -> Value {
    params.into_iter().next().unwrap_or(Value::Nil)
}

/// Binds a server with [`test_methods`] on an ephemeral port and runs it in
/// the background for the rest of the test.
pub async fn start_test_server() -> SocketAddr {
    init_tracing();

    let server = RpcServer::bind("127.0.0.1:0", test_methods(), ServerConfig::default())
        .await
        .expect("Failed to bind test server");
    let addr = server.local_addr().expect("Failed to read local address");

    tokio::spawn(server.run());
    addr
}
