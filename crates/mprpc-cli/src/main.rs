//! # mprpc CLI Entry Point
//!
//! ## Usage
//!
//! ```bash
//! # Serve the demo methods (sum, echo)
//! mprpc serve -b 127.0.0.1:6000
//!
//! # Make one call; params are JSON, the result is printed as JSON
//! mprpc call sum 1 2
//! mprpc call --host 10.0.0.5 --port 7000 echo '{"a": [1, 2]}'
//!
//! # Compare single-connection and pooled throughput
//! mprpc bench --local
//! ```

use std::time::Duration;

use anyhow::Result;
use argh::FromArgs;
use mprpc_cli::{bench, demo, json};
use mprpc_client::{ClientConfig, RpcClient};
use mprpc_server::{RpcServer, ServerConfig};

#[derive(FromArgs)]
/// mprpc - MessagePack-RPC server, client and benchmark
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Serve(ServeArgs),
    Call(CallArgs),
    Bench(BenchArgs),
}

/// Arguments for running the demo server.
#[derive(FromArgs)]
#[argh(subcommand, name = "serve")]
/// serve the demo methods (sum, echo)
struct ServeArgs {
    /// address to listen on
    #[argh(option, short = 'b', default = "\"127.0.0.1:6000\".into()")]
    bind: String,

    /// maximum connections served at once (default: unbounded)
    #[argh(option, long = "max-connections")]
    max_connections: Option<usize>,
}

/// Arguments for making a single call.
///
/// The result is printed to stdout as compact JSON so it can be piped to
/// other tools. Errors go to stderr with a non-zero exit code.
#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
/// call a method and print the result as JSON
struct CallArgs {
    /// server host
    #[argh(option, default = "\"127.0.0.1\".into()")]
    host: String,

    /// server port
    #[argh(option, short = 'p', default = "6000")]
    port: u16,

    /// timeout in milliseconds for connect and call
    #[argh(option, long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// method name
    #[argh(positional)]
    method: String,

    /// positional params, one JSON value each
    #[argh(positional)]
    params: Vec<String>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "bench")]
/// benchmark sum(1, 2) over one connection and over a pool
struct BenchArgs {
    /// server host
    #[argh(option, default = "\"127.0.0.1\".into()")]
    host: String,

    /// server port
    #[argh(option, short = 'p', default = "6000")]
    port: u16,

    /// number of calls per mode
    #[argh(option, short = 'n', default = "10000")]
    calls: usize,

    /// pool size and number of concurrent callers
    #[argh(option, short = 'c', default = "20")]
    concurrency: usize,

    /// start the demo server in-process on an ephemeral port
    #[argh(switch)]
    local: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // call keeps stdout and stderr clean for scripting
    if !matches!(cli.command, Commands::Call(_)) {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Commands::Serve(args) => run_serve(args).await,
        Commands::Call(args) => run_call(args).await,
        Commands::Bench(args) => run_bench(args).await,
    }
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let mut config = ServerConfig::new();
    if let Some(max) = args.max_connections {
        config = config.with_max_connections(max);
    }

    let server = RpcServer::bind(args.bind.as_str(), demo::demo_methods(), config).await?;
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}

async fn run_call(args: CallArgs) -> Result<()> {
    let params = json::parse_params(&args.params)?;

    let mut config = ClientConfig::new(args.host, args.port);
    if let Some(ms) = args.timeout_ms {
        config = config.with_timeout(Duration::from_millis(ms));
    }

    let mut client = RpcClient::connect_with(config).await?;
    let result = client.call(&args.method, params).await;
    client.close();

    println!("{}", serde_json::to_string(&json::to_json(&result?))?);
    Ok(())
}

async fn run_bench(args: BenchArgs) -> Result<()> {
    let config = if args.local {
        let server =
            RpcServer::bind("127.0.0.1:0", demo::demo_methods(), ServerConfig::default()).await?;
        let addr = server.local_addr()?;
        tokio::spawn(server.run());
        ClientConfig::new(addr.ip().to_string(), addr.port())
    } else {
        ClientConfig::new(args.host, args.port)
    };

    tracing::info!(addr = %config.addr(), calls = args.calls, "Running benchmark");

    let single = bench::bench_single(config.clone(), args.calls).await?;
    println!("{}", single);

    let pooled = bench::bench_pool(config, args.calls, args.concurrency).await?;
    println!("{}", pooled);

    Ok(())
}
