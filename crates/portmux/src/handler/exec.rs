//! `exec` handler: maps a connection to the stdio of a locally executed
//! command.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::process::Command;

use super::{Handler, HandlerError};
use crate::bridge::bridge;
use crate::event::RequestContext;

/// How long a command gets to exit after its stdin closes before it is
/// killed.
const EXIT_GRACE: Duration = Duration::from_secs(5);

pub struct ExecHandler;

#[async_trait]
impl Handler for ExecHandler {
    fn name(&self) -> &'static str {
        "exec"
    }

    async fn handle(
        &self,
        conn: &mut TcpStream,
        ctx: &RequestContext,
        args: &[String],
    ) -> Result<(), HandlerError> {
        let (command, rest) = args
            .split_first()
            .ok_or(HandlerError::Usage("exec requires a command to run"))?;

        let mut child = Command::new(command)
            .args(rest)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HandlerError::Spawn(command.clone(), e))?;

        let mut stdin = child.stdin.take().ok_or(HandlerError::Stdio("stdin"))?;
        let mut stdout = child.stdout.take().ok_or(HandlerError::Stdio("stdout"))?;

        tracing::debug!(worker = %ctx.worker, request = %ctx.request, %command, "command spawned");

        let (mut front_read, mut front_write) = conn.split();
        let result = bridge(&mut front_read, &mut front_write, &mut stdout, &mut stdin, ctx).await;

        // Closing the command's stdin lets well-behaved commands exit on
        // their own once the connection is done.
        drop(stdin);
        match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(worker = %ctx.worker, request = %ctx.request, %status, "command exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(worker = %ctx.worker, request = %ctx.request, error = %e, "failed to reap command");
            }
            Err(_) => {
                tracing::warn!(worker = %ctx.worker, request = %ctx.request, %command, "command did not exit, killing");
                let _ = child.kill().await;
            }
        }

        result?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{self, Event, RequestId, WorkerId};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (accepted, connected) = tokio::join!(listener.accept(), TcpStream::connect(addr));
        (accepted.unwrap().0, connected.unwrap())
    }

    #[tokio::test]
    async fn cat_echoes_the_connection() {
        let (mut server, mut client) = tcp_pair().await;
        let (tx, mut events) = event::channel();
        let ctx = RequestContext::new(WorkerId::new(0), RequestId::new(1), tx);

        let task = tokio::spawn(async move {
            ExecHandler
                .handle(&mut server, &ctx, &["cat".to_string()])
                .await
        });

        client.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        drop(client);
        task.await.unwrap().unwrap();

        let first = events.recv().await.unwrap();
        assert!(matches!(first, Event::RequestRead { bytes: 5, .. }));
        let second = events.recv().await.unwrap();
        assert!(matches!(second, Event::ResponseSent { bytes: 5, .. }));
    }

    #[tokio::test]
    async fn missing_command_is_a_usage_error() {
        let (mut server, _client) = tcp_pair().await;
        let (tx, _events) = event::channel();
        let ctx = RequestContext::new(WorkerId::new(0), RequestId::new(1), tx);

        let result = ExecHandler.handle(&mut server, &ctx, &[]).await;
        assert!(matches!(result, Err(HandlerError::Usage(_))));
    }

    #[tokio::test]
    async fn unspawnable_command_is_a_spawn_error() {
        let (mut server, _client) = tcp_pair().await;
        let (tx, _events) = event::channel();
        let ctx = RequestContext::new(WorkerId::new(0), RequestId::new(1), tx);

        let result = ExecHandler
            .handle(&mut server, &ctx, &["portmux-no-such-command".to_string()])
            .await;
        assert!(matches!(result, Err(HandlerError::Spawn(_, _))));
    }
}
