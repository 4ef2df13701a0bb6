//! Pipeline composition: wraps the executor in the middleware stack.

use tower::util::BoxCloneService;
use tower::ServiceBuilder;

use super::admission::AdmissionLayer;
use super::metrics::MetricsLayer;
use crate::service::config::PipelineConfig;
use crate::service::executor::ExecuteService;
use crate::service::operation::{Command, CommandResponse, ExecutionError};

/// Type-erased, cloneable command pipeline. Clones share the admission permits.
pub type CommandPipeline = BoxCloneService<Command, CommandResponse, ExecutionError>;

/// Build the command pipeline around `executor`.
///
/// `MetricsLayer` sits outside `AdmissionLayer` so shed and timed-out
/// commands are recorded with their outcome.
#[must_use]
pub fn build_command_pipeline(
    executor: ExecuteService,
    config: &PipelineConfig,
) -> CommandPipeline {
    BoxCloneService::new(
        ServiceBuilder::new()
            .layer(MetricsLayer)
            .layer(AdmissionLayer::new(config.max_concurrent_operations))
            .service(executor),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use docbridge_core::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::backend::MemoryBackend;
    use crate::service::middleware::testing::make_cmd;

    #[tokio::test]
    async fn pipeline_runs_through_all_layers() {
        let executor = ExecuteService::new(Arc::new(MemoryBackend::new()));
        let config = PipelineConfig {
            max_concurrent_operations: 4,
            ..PipelineConfig::default()
        };

        let svc = build_command_pipeline(executor, &config);
        let resp = svc.clone().oneshot(make_cmd(1, 5000)).await.unwrap();
        assert_eq!(resp, Some(Value::Array(Vec::new())));
        assert!(svc.oneshot(make_cmd(2, 5000)).await.is_ok());
    }
}
