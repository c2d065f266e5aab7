//! `proxy` handler: forwards a connection to a new TCP connection.

use async_trait::async_trait;
use tokio::net::TcpStream;

use super::{Handler, HandlerError};
use crate::bridge::bridge;
use crate::event::RequestContext;

pub struct ProxyHandler;

/// Destination from the pass-through arguments: either a single
/// `host:port`, or a `host port` pair.
fn destination(args: &[String]) -> Result<String, HandlerError> {
    match args {
        [dest] => Ok(dest.clone()),
        [host, port] => Ok(format!("{host}:{port}")),
        _ => Err(HandlerError::Usage(
            "proxy requires a destination: <host:port> or <host> <port>",
        )),
    }
}

#[async_trait]
impl Handler for ProxyHandler {
    fn name(&self) -> &'static str {
        "proxy"
    }

    async fn handle(
        &self,
        conn: &mut TcpStream,
        ctx: &RequestContext,
        args: &[String],
    ) -> Result<(), HandlerError> {
        let dest = destination(args)?;
        let mut backend = TcpStream::connect(&dest)
            .await
            .map_err(|e| HandlerError::Connect(dest.clone(), e))?;

        tracing::debug!(worker = %ctx.worker, request = %ctx.request, backend = %dest, "connected to backend");

        let (mut front_read, mut front_write) = conn.split();
        let (mut back_read, mut back_write) = backend.split();
        bridge(
            &mut front_read,
            &mut front_write,
            &mut back_read,
            &mut back_write,
            ctx,
        )
        .await?;
        Ok(())
    }
}
