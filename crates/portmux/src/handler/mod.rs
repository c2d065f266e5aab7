//! Handler modules and the fixed dispatch registry.
//!
//! A handler fully services one accepted connection: it opens its backend,
//! shuttles bytes through the traffic bridge so telemetry stays consistent
//! across modules, and returns without closing the connection (the worker
//! closes it).

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::event::RequestContext;

mod exec;
mod proxy;

pub use exec::ExecHandler;
pub use proxy::ProxyHandler;

#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Service one connection to completion. `args` is the argument list
    /// passed through verbatim from startup.
    async fn handle(
        &self,
        conn: &mut TcpStream,
        ctx: &RequestContext,
        args: &[String],
    ) -> Result<(), HandlerError>;
}

/// Exact-name lookup against the fixed registry. `None` for an unknown
/// name; callers treat that as a fatal startup error.
pub fn lookup(name: &str) -> Option<Arc<dyn Handler>> {
    match name {
        "exec" => Some(Arc::new(ExecHandler)),
        "proxy" => Some(Arc::new(ProxyHandler)),
        _ => None,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{0}")]
    Usage(&'static str),

    #[error("failed to spawn '{0}': {1}")]
    Spawn(String, #[source] io::Error),

    #[error("{0} of spawned command was not captured")]
    Stdio(&'static str),

    #[error("failed to connect to {0}: {1}")]
    Connect(String, #[source] io::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}
