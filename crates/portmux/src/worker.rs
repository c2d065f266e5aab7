//! Worker accept loop.
//!
//! Each worker loops forever: report readiness, accept on the shared
//! listener, report the accepted connection, dispatch to the handler,
//! close, repeat. The request counter is private to the worker and starts
//! at zero at worker birth. Accept failures are retried so an invalid
//! connection never reaches a handler.

use std::os::fd::AsRawFd;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::event::{Event, EventSender, RequestContext, RequestId, WorkerId};
use crate::handler::Handler;

pub(crate) async fn run(
    worker: WorkerId,
    listener: Arc<TcpListener>,
    handler: Arc<dyn Handler>,
    args: Arc<Vec<String>>,
    events: EventSender,
) {
    let mut requests: u64 = 0;

    loop {
        // Readiness is reported once per iteration: "about to wait for a
        // connection", not "worker finished initializing".
        if let Err(e) = events.send(Event::WorkerReady { worker }) {
            tracing::warn!(%worker, error = %e, "failed to report readiness");
        }

        let (mut conn, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(%worker, error = %e, "accept failed, retrying");
                continue;
            }
        };

        requests += 1;
        let request = RequestId::new(requests);
        let fd = conn.as_raw_fd();
        if let Err(e) = events.send(Event::ConnectionAccepted {
            worker,
            request,
            peer,
            fd,
        }) {
            tracing::warn!(%worker, error = %e, "failed to report accepted connection");
        }

        let ctx = RequestContext::new(worker, request, events.clone());
        if let Err(e) = handler.handle(&mut conn, &ctx, args.as_slice()).await {
            tracing::warn!(%worker, %request, error = %e, "handler failed");
        }

        // Dropping the stream closes the connection, whatever path the
        // handler took.
        drop(conn);
    }
}
