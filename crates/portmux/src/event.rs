//! Telemetry events and the worker-to-supervisor channel.
//!
//! One channel for the whole pool: many writers (the workers), exactly one
//! reader (the supervisor). Order is preserved per writer; events from
//! different workers interleave in arrival order only, with no causal
//! guarantee across workers.

use std::net::SocketAddr;
use std::os::fd::RawFd;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Stable identity of a worker, assigned before the worker starts and
/// immutable for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(u32);

impl WorkerId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Per-worker connection counter. Starts at zero at worker birth and is
/// incremented once per accepted connection, so the first connection a
/// worker serves is request 1. Scoped to the worker - NOT globally unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle and traffic events reported by workers.
///
/// The serialized form carries the tag plus the variant's own payload,
/// never the union of all variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// The worker is about to wait for a connection. Reported once per
    /// accept-loop iteration, not once at startup.
    WorkerReady { worker: WorkerId },

    /// A connection was accepted and is about to be dispatched.
    ConnectionAccepted {
        worker: WorkerId,
        request: RequestId,
        peer: SocketAddr,
        fd: RawFd,
    },

    /// A chunk was read from the client and written to the backend.
    RequestRead {
        worker: WorkerId,
        request: RequestId,
        bytes: usize,
    },

    /// A chunk was read from the backend and written to the client.
    ResponseSent {
        worker: WorkerId,
        request: RequestId,
        bytes: usize,
    },
}

impl Event {
    pub fn worker(&self) -> WorkerId {
        match self {
            Self::WorkerReady { worker }
            | Self::ConnectionAccepted { worker, .. }
            | Self::RequestRead { worker, .. }
            | Self::ResponseSent { worker, .. } => *worker,
        }
    }

    /// The request this event belongs to, absent on `WorkerReady`.
    pub fn request(&self) -> Option<RequestId> {
        match self {
            Self::WorkerReady { .. } => None,
            Self::ConnectionAccepted { request, .. }
            | Self::RequestRead { request, .. }
            | Self::ResponseSent { request, .. } => Some(*request),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The supervisor side of the channel is gone.
    #[error("event channel closed")]
    Closed,
}

/// Create the pool-wide event channel.
pub fn channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, EventReceiver { rx })
}

/// Writing half of the event channel. Cloned into every worker.
///
/// Sends are atomic: a whole event is delivered, or the send fails.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSender {
    pub fn send(&self, event: Event) -> Result<(), SendError> {
        self.tx.send(event).map_err(|_| SendError::Closed)
    }
}

/// Reading half of the event channel. Held by the supervisor only.
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventReceiver {
    /// Wait for the next event, unboundedly. `None` means every sender is
    /// gone, which can only happen once no worker remains.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

/// Per-connection context threaded through handler dispatch and the
/// traffic bridge: the worker identity, the current request identity, and
/// the event sink.
#[derive(Clone)]
pub struct RequestContext {
    pub worker: WorkerId,
    pub request: RequestId,
    events: EventSender,
}

impl RequestContext {
    pub fn new(worker: WorkerId, request: RequestId, events: EventSender) -> Self {
        Self {
            worker,
            request,
            events,
        }
    }

    /// Best-effort emit: telemetry failure is logged and never blocks
    /// connection handling.
    pub fn emit(&self, event: Event) {
        if let Err(e) = self.events.send(event) {
            tracing::warn!(worker = %self.worker, request = %self.request, error = %e, "failed to send event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn worker_ready_serializes_with_own_payload_only() {
        let event = Event::WorkerReady {
            worker: WorkerId::new(3),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value, json!({"type": "worker_ready", "worker": 3}));
        assert_eq!(value.as_object().unwrap().len(), 2);
    }

    #[test]
    fn connection_accepted_serializes() {
        let event = Event::ConnectionAccepted {
            worker: WorkerId::new(0),
            request: RequestId::new(1),
            peer: "127.0.0.1:9000".parse().unwrap(),
            fd: 7,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "connection_accepted",
                "worker": 0,
                "request": 1,
                "peer": "127.0.0.1:9000",
                "fd": 7,
            })
        );
    }

    #[test]
    fn traffic_events_serialize() {
        let event = Event::RequestRead {
            worker: WorkerId::new(1),
            request: RequestId::new(4),
            bytes: 16,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "request_read", "worker": 1, "request": 4, "bytes": 16})
        );

        let event = Event::ResponseSent {
            worker: WorkerId::new(1),
            request: RequestId::new(4),
            bytes: 16,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "response_sent", "worker": 1, "request": 4, "bytes": 16})
        );
    }

    #[test]
    fn unknown_event_kind_is_rejected_not_crashed() {
        let result: Result<Event, _> =
            serde_json::from_value(json!({"type": "mystery", "worker": 0}));
        assert!(result.is_err());
    }

    #[test]
    fn worker_id_display_is_the_log_label() {
        assert_eq!(WorkerId::new(2).to_string(), "worker-2");
    }

    #[tokio::test]
    async fn per_sender_order_is_preserved() {
        let (tx, mut rx) = channel();
        let a = tx.clone();
        let b = tx;

        for i in 0..3 {
            a.send(Event::WorkerReady {
                worker: WorkerId::new(0),
            })
            .unwrap();
            b.send(Event::RequestRead {
                worker: WorkerId::new(1),
                request: RequestId::new(1),
                bytes: i,
            })
            .unwrap();
        }

        let mut a_bytes = Vec::new();
        let mut b_bytes = Vec::new();
        while let Ok(Some(event)) =
            tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv()).await
        {
            match event {
                Event::WorkerReady { .. } => a_bytes.push(()),
                Event::RequestRead { bytes, .. } => b_bytes.push(bytes),
                _ => unreachable!(),
            }
            if a_bytes.len() + b_bytes.len() == 6 {
                break;
            }
        }
        assert_eq!(a_bytes.len(), 3);
        assert_eq!(b_bytes, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn send_after_reader_drop_fails() {
        let (tx, rx) = channel();
        drop(rx);
        let result = tx.send(Event::WorkerReady {
            worker: WorkerId::new(0),
        });
        assert!(matches!(result, Err(SendError::Closed)));
    }

    #[tokio::test]
    async fn recv_returns_none_once_all_senders_are_gone() {
        let (tx, mut rx) = channel();
        tx.send(Event::WorkerReady {
            worker: WorkerId::new(0),
        })
        .unwrap();
        drop(tx);

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }
}
