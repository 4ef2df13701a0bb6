//! Tower middleware layers for the command pipeline.
//!
//! - [`admission`]: permit pool plus per-command deadline
//! - [`metrics`]: command timing and outcome via `tracing` spans
//! - [`pipeline`]: composes the layers around the executor

pub mod admission;
pub mod metrics;
pub mod pipeline;

pub use admission::AdmissionLayer;
pub use metrics::MetricsLayer;
pub use pipeline::{build_command_pipeline, CommandPipeline};
