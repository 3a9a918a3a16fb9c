//! RPC server exposing `sum(x, y)` on 127.0.0.1:6000.
//!
//! ```text
//! cargo run -p mprpc-server --example sum_server
//! mprpc call sum 1 2
//! ```

use mprpc_server::{MethodTable, RpcServer, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let methods = MethodTable::builder()
        .register_typed("sum", |(x, y): (i64, i64)| Ok::<_, String>(x + y))
        .build();

    RpcServer::bind("127.0.0.1:6000", methods, ServerConfig::default())
        .await?
        .run()
        .await?;
    Ok(())
}
