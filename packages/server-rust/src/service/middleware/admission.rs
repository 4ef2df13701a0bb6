//! Admission control for commands.
//!
//! A command is admitted only while a permit is free; it then keeps the
//! permit until the backend answers or its `call_timeout_ms` elapses,
//! whichever comes first. A timed-out backend call is abandoned, which
//! returns the permit; nothing is cancelled server-side.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::Semaphore;
use tower::{Layer, Service};
use tracing::warn;

use crate::service::operation::{Command, CommandResponse, ExecutionError};

/// Shares one permit pool across every service it wraps.
#[derive(Debug, Clone)]
pub struct AdmissionLayer {
    permits: Arc<Semaphore>,
}

impl AdmissionLayer {
    #[must_use]
    pub fn new(max_concurrent: u32) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent as usize)),
        }
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService {
            inner,
            permits: Arc::clone(&self.permits),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdmissionService<S> {
    inner: S,
    permits: Arc<Semaphore>,
}

impl<S> Service<Command> for AdmissionService<S>
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
        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            warn!(
                call_id,
                operation = cmd.invocation.operation.name(),
                "all permits taken, shedding command"
            );
            return Box::pin(async { Err(ExecutionError::Overloaded) });
        };

        let timeout_ms = cmd.ctx().call_timeout_ms;
        let backend_call = self.inner.call(cmd);
        Box::pin(async move {
            let _permit = permit;
            tokio::time::timeout(Duration::from_millis(timeout_ms), backend_call)
                .await
                .unwrap_or_else(|_| {
                    warn!(call_id, timeout_ms, "command exceeded its deadline");
                    Err(ExecutionError::Timeout { timeout_ms })
                })
        })
    }
}
