//! portmux: generic TCP connection dispatcher with pluggable handlers.

pub mod bridge;
pub mod event;
pub mod handler;
pub mod pool;

mod worker;

pub use event::{
    Event, EventReceiver, EventSender, RequestContext, RequestId, SendError, WorkerId,
};
pub use handler::{ExecHandler, Handler, HandlerError, ProxyHandler};
pub use pool::{PoolConfig, PoolError, WorkerPool};
