//! Bidirectional traffic bridge between an accepted connection and a
//! handler backend.
//!
//! Works over any AsyncRead/AsyncWrite halves (sockets, child stdio).
//! Emits one telemetry event per successful read: `RequestRead` for bytes
//! moved client-to-backend, `ResponseSent` for bytes moved back. EOF or an
//! I/O error on either side ends the bridge; descriptor lifecycle belongs
//! to the caller.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::sleep;

use crate::event::{Event, RequestContext};

/// Per-read transfer chunk size.
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Bounded wait per multiplex iteration. A tick with no readable side is
/// idleness, not an error; the loop simply goes around again.
pub const IDLE_TICK: Duration = Duration::from_secs(4);

/// Shuttle bytes between the front (client) and back (backend) streams
/// until either side closes or fails.
///
/// Returns `Ok(())` on a clean EOF from either side, or the first I/O
/// error encountered. Neither stream is closed or shut down here.
pub async fn bridge<FR, FW, BR, BW>(
    front_read: &mut FR,
    front_write: &mut FW,
    back_read: &mut BR,
    back_write: &mut BW,
    ctx: &RequestContext,
) -> io::Result<()>
where
    FR: AsyncRead + Unpin,
    FW: AsyncWrite + Unpin,
    BR: AsyncRead + Unpin,
    BW: AsyncWrite + Unpin,
{
    let mut front_buf = vec![0u8; CHUNK_SIZE];
    let mut back_buf = vec![0u8; CHUNK_SIZE];

    loop {
        tokio::select! {
            read = front_read.read(&mut front_buf) => {
                let n = read?;
                if n == 0 {
                    tracing::debug!(worker = %ctx.worker, request = %ctx.request, "client side closed");
                    return Ok(());
                }
                back_write.write_all(&front_buf[..n]).await?;
                back_write.flush().await?;
                ctx.emit(Event::RequestRead {
                    worker: ctx.worker,
                    request: ctx.request,
                    bytes: n,
                });
            }
            read = back_read.read(&mut back_buf) => {
                let n = read?;
                if n == 0 {
                    tracing::debug!(worker = %ctx.worker, request = %ctx.request, "backend side closed");
                    return Ok(());
                }
                front_write.write_all(&back_buf[..n]).await?;
                front_write.flush().await?;
                ctx.emit(Event::ResponseSent {
                    worker: ctx.worker,
                    request: ctx.request,
                    bytes: n,
                });
            }
            _ = sleep(IDLE_TICK) => {
                tracing::trace!(worker = %ctx.worker, request = %ctx.request, "bridge idle");
            }
        }
    }
}
