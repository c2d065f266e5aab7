use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use portmux::handler;
use portmux::pool::{self, PoolConfig, WorkerPool};

/// Listens for incoming connections on a TCP port. All the data that is
/// received and sent from an accepted connection is mapped to one of the
/// supported handlers.
#[derive(Debug, Parser)]
#[command(
    name = "portmux",
    version,
    after_help = "HANDLERS:\n  \
        exec     maps the connection to the stdio of a locally executed command\n  \
        proxy    forwards the connection to a new TCP connection"
)]
struct Cli {
    /// Number of workers that accept connections
    #[arg(short, long, default_value_t = pool::DEFAULT_WORKERS)]
    workers: usize,

    /// TCP port to listen on
    port: u16,

    /// Handler that services accepted connections (exec or proxy)
    handler: String,

    /// Arguments passed through verbatim to the handler
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "portmux=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // The handler name is validated before any socket is bound and before
    // any worker starts.
    let handler = handler::lookup(&cli.handler).with_context(|| {
        format!(
            "'{}' is not a valid handler (expected 'exec' or 'proxy')",
            cli.handler
        )
    })?;

    let listener = TcpListener::bind(("0.0.0.0", cli.port))
        .await
        .with_context(|| format!("failed to bind port {}", cli.port))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve local address")?;
    tracing::info!(
        address = %local_addr,
        workers = cli.workers,
        handler = handler.name(),
        "listening"
    );

    let config = PoolConfig::new()
        .with_workers(cli.workers)
        .with_args(cli.args);
    let pool = WorkerPool::start(listener, handler, config)?;
    pool.supervise().await?;

    tracing::info!("shutdown complete");
    Ok(())
}
