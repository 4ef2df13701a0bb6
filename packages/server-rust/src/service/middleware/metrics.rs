//! Metrics middleware for commands.
//!
//! Records execution duration and outcome on `tracing` spans; there is no
//! metrics exporter.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::operation::{Command, CommandResponse, ExecutionError};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Wraps each execution in a `command` span carrying `duration_ms` and `outcome`.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<Command> for MetricsService<S>
where
    S: Service<Command, Response = CommandResponse, Error = ExecutionError> + Send,
    S::Future: Send + 'static,
{
    type Response = CommandResponse;
    type Error = ExecutionError;
    type Future = Pin<Box<dyn Future<Output = Result<CommandResponse, ExecutionError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, cmd: Command) -> Self::Future {
        let call_id = cmd.ctx().call_id;
        let operation = cmd.invocation.operation.name().to_string();

        let span = info_span!(
            "command",
            call_id = call_id,
            database = %cmd.invocation.database,
            collection = cmd.invocation.collection.as_deref(),
            operation = %operation,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(cmd);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;

                let outcome = match &result {
                    Ok(Some(_)) => "ok",
                    Ok(None) => "empty",
                    Err(ExecutionError::Timeout { .. }) => "timeout",
                    Err(ExecutionError::Overloaded) => "shed",
                    Err(_) => "error",
                };

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = start.elapsed().as_millis() as u64;
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                tracing::info!(
                    call_id,
                    operation = %operation,
                    duration_ms,
                    outcome,
                    "command complete"
                );

                result
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use docbridge_core::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::service::middleware::testing::{make_cmd, SlowService};

    #[tokio::test]
    async fn metrics_layer_passes_through_response() {
        let svc = MetricsLayer.layer(SlowService { delay_ms: 0 });
        let resp = svc.oneshot(make_cmd(42, 5000)).await.unwrap();
        assert_eq!(resp, Some(Value::Int(42)));
    }
}
