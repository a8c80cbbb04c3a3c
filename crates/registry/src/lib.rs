//! Job Registry, WebSocket Hub, and Rate Policy: the in-process
//! coordination layer sitting between the HTTP/WS surface and the
//! durable job state in `bg-store`.

pub mod cancel;
pub mod handler;
pub mod rate;
pub mod registry;
pub mod ws;

pub use cancel::{CancelEvent, CancelMap};
pub use handler::{HandlerContext, HandlerResult, JobHandler, ProgressReporter};
pub use rate::{ConcurrencyTracker, RateLimitDenial};
pub use registry::{CancelError, CancelOutcome, JobRegistry, SubmitDenial};
pub use ws::WsHub;
