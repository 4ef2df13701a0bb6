//! Command pipeline and dispatch.
//!
//! 1. **Classification** (`classify`): topic + body -> `Command`
//! 2. **Middleware** (`middleware`): Tower layers (metrics, admission control)
//! 3. **Execution** (`executor`): catalog validation and the backend call
//! 4. **Shaping** (`strategy`): raw outcome -> publishable value
//! 5. **Dispatch** (`dispatcher`): reply-topic filtering and fan-out publishing

pub mod classify;
pub mod config;
pub mod dispatcher;
pub mod executor;
pub mod middleware;
pub mod operation;
pub mod strategy;

pub use classify::CommandService;
pub use config::PipelineConfig;
pub use dispatcher::{DispatchOutcome, Dispatcher, DropReason};
pub use executor::ExecuteService;
pub use operation::{Command, CommandContext, CommandResponse, ExecutionError};
pub use strategy::ResultStrategy;
