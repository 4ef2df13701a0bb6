//! docbridge server: answers document-database commands published on a
//! publish/subscribe bus.
//!
//! A request topic `<base>/<database>[/<collection>]/<operation>[/...]` is
//! classified into a command, executed on the backend through the tower
//! pipeline, shaped per the operation's result category and published to the
//! caller's reply topics.

pub mod backend;
pub mod bridge;
pub mod bus;
pub mod config;
pub mod service;
pub mod shutdown;
pub mod traits;

pub use backend::{BackendError, MemoryBackend, Outcome, WriteAck};
pub use bridge::Bridge;
pub use bus::{BusError, MemoryBus, RequestMessage, StdioBus};
pub use service::{DispatchOutcome, Dispatcher, DropReason, ExecutionError, PipelineConfig};
pub use shutdown::{HealthState, ShutdownController};
pub use traits::{Backend, BusTransport, Cursor};

