use std::time::Duration;

use crate::backend::RetryPolicy;

/// Runtime configuration for the command pipeline.
///
/// Controls execution timeouts, concurrency limits and the shutdown drain window.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Timeout applied to every backend execution, in milliseconds.
    pub operation_timeout_ms: u64,
    /// Maximum number of concurrent executions before load shedding.
    pub max_concurrent_operations: u32,
    /// How long shutdown waits for in-flight dispatch cycles.
    pub drain_timeout: Duration,
    /// Startup connection retry.
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: 30_000,
            max_concurrent_operations: 1000,
            drain_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}
