//! Worker pool and supervisor receive loop.
//!
//! Flow:
//! 1. Create the event channel (before any worker, so every worker starts
//!    with a valid sender)
//! 2. Spawn one worker task per id against the shared listener
//! 3. Drain the event channel, logging one line per event
//! 4. Reap terminated workers without replacing them
//!
//! A worker that panics or exits is never respawned: pool capacity is
//! monotonically non-increasing over the process lifetime. Worker faults
//! stay inside their task; the supervisor and the other workers keep
//! running.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::{Id as TaskId, JoinError, JoinSet};

use crate::event::{self, Event, EventReceiver, WorkerId};
use crate::handler::Handler;
use crate::worker;

pub const DEFAULT_WORKERS: usize = 2;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers: usize,
    /// Argument list passed through verbatim to the handler.
    pub args: Vec<String>,
}

impl PoolConfig {
    pub fn new() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            args: Vec::new(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("pool must have at least one worker")]
    NoWorkers,

    #[error("event channel closed: no live workers remain")]
    ChannelClosed,

    #[error("all workers terminated")]
    AllWorkersExited,
}

pub struct WorkerPool {
    events: EventReceiver,
    tasks: JoinSet<()>,
    workers: HashMap<TaskId, WorkerId>,
}

impl WorkerPool {
    /// Spawn every worker against the shared listener.
    pub fn start(
        listener: TcpListener,
        handler: Arc<dyn Handler>,
        config: PoolConfig,
    ) -> Result<Self, PoolError> {
        if config.workers == 0 {
            return Err(PoolError::NoWorkers);
        }

        let (tx, rx) = event::channel();
        let listener = Arc::new(listener);
        let args = Arc::new(config.args);

        let mut tasks = JoinSet::new();
        let mut workers = HashMap::with_capacity(config.workers);
        for i in 0..config.workers {
            let id = WorkerId::new(i as u32);
            let handle = tasks.spawn(worker::run(
                id,
                Arc::clone(&listener),
                Arc::clone(&handler),
                Arc::clone(&args),
                tx.clone(),
            ));
            workers.insert(handle.id(), id);
            tracing::debug!(worker = %id, "worker started");
        }

        // Only the workers hold senders now; the receiver closes exactly
        // when the last worker is gone.
        drop(tx);

        Ok(Self {
            events: rx,
            tasks,
            workers,
        })
    }

    /// Receive the next event from the pool's telemetry stream. `None`
    /// means every worker is gone.
    pub async fn next_event(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    pub fn live_workers(&self) -> usize {
        self.tasks.len()
    }

    /// Run the supervisor: log each received event, reap terminated
    /// workers, return `Ok(())` on ctrl-c. Any other exit is an error.
    pub async fn supervise(mut self) -> Result<(), PoolError> {
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                event = self.events.recv() => {
                    match event {
                        Some(event) => log_event(&event),
                        None => return Err(PoolError::ChannelClosed),
                    }
                }
                Some(finished) = self.tasks.join_next_with_id() => {
                    self.reap(finished);
                    if self.tasks.is_empty() {
                        return Err(PoolError::AllWorkersExited);
                    }
                }
                _ = &mut ctrl_c => {
                    tracing::info!("shutdown requested");
                    return Ok(());
                }
            }
        }
    }

    fn reap(&mut self, finished: Result<(TaskId, ()), JoinError>) {
        match finished {
            Ok((task, ())) => {
                let label = self.remove_label(task);
                // Workers loop forever; a clean return is unexpected.
                tracing::warn!(worker = %label, "worker exited");
            }
            Err(err) => {
                let label = self.remove_label(err.id());
                if err.is_panic() {
                    tracing::error!(worker = %label, "worker panicked; pool capacity reduced");
                } else {
                    tracing::warn!(worker = %label, "worker aborted");
                }
            }
        }
    }

    fn remove_label(&mut self, task: TaskId) -> String {
        self.workers
            .remove(&task)
            .map(|id| id.to_string())
            .unwrap_or_else(|| "worker-?".to_string())
    }
}

/// One stable log line per event kind, on the supervisor's side.
fn log_event(event: &Event) {
    match event {
        Event::WorkerReady { worker } => {
            tracing::info!(target: "portmux::events", "{worker} waiting for a connection");
        }
        Event::ConnectionAccepted {
            worker,
            request,
            peer,
            fd,
        } => {
            tracing::info!(
                target: "portmux::events",
                "{worker} accepted connection from {peer} (request {request}, fd {fd})"
            );
        }
        Event::RequestRead {
            worker,
            request,
            bytes,
        } => {
            tracing::info!(
                target: "portmux::events",
                "{worker} request {request}: read {bytes} bytes from client"
            );
        }
        Event::ResponseSent {
            worker,
            request,
            bytes,
        } => {
            tracing::info!(
                target: "portmux::events",
                "{worker} request {request}: sent {bytes} bytes to client"
            );
        }
    }
}
