//! Innermost pipeline service: validates a command against the catalog, runs
//! it on the backend and shapes the outcome.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use docbridge_core::{Operation, Scope};
use tower::Service;
use tracing::debug;

use super::operation::{Command, CommandResponse, ExecutionError};
use super::strategy::ResultStrategy;
use crate::traits::Backend;

/// Checks scope and required parameters of known operations before the
/// backend is touched.
///
/// # Errors
///
/// `ScopeMismatch` when a database operation was addressed at a collection,
/// `MissingParameter` when a required parameter is absent.
pub fn validate(cmd: &Command) -> Result<(), ExecutionError> {
    let Operation::Known(spec) = &cmd.invocation.operation else {
        return Ok(());
    };
    // A collection operation addressed at database level is left to the
    // backend; the reverse has no meaning.
    if spec.scope == Scope::Database && cmd.invocation.collection.is_some() {
        return Err(ExecutionError::ScopeMismatch {
            operation: spec.name,
            expected: "database",
        });
    }
    if let Some(name) = spec.missing_parameter(&cmd.params) {
        return Err(ExecutionError::MissingParameter {
            operation: spec.name,
            name,
        });
    }
    Ok(())
}

/// Executes commands against a shared backend handle.
#[derive(Clone)]
pub struct ExecuteService {
    backend: Arc<dyn Backend>,
}

impl ExecuteService {
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }
}

impl Service<Command> for ExecuteService {
    type Response = CommandResponse;
    type Error = ExecutionError;
    type Future = Pin<Box<dyn Future<Output = Result<CommandResponse, ExecutionError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, cmd: Command) -> Self::Future {
        let backend = Arc::clone(&self.backend);
        Box::pin(async move {
            validate(&cmd)?;
            let strategy = ResultStrategy::from(cmd.invocation.operation.shape());
            let Command { ctx, invocation, params } = cmd;
            let outcome = backend.execute(&invocation, params).await?;
            debug!(call_id = ctx.call_id, %invocation, ?strategy, "shaping outcome");
            Ok(strategy.apply(outcome).await?)
        })
    }
}

#[cfg(test)]
mod tests {
    use docbridge_core::{BaseTopic, CommandDescriptor, Document, Invocation, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::backend::{BackendError, MemoryBackend};
    use crate::service::operation::CommandContext;

    fn command(topic: &str, params: Document) -> Command {
        let base = BaseTopic::parse("mongodb/#").unwrap();
        Command {
            ctx: CommandContext::new(1, topic, 5000),
            invocation: Invocation::from(CommandDescriptor::parse(topic, &base).unwrap()),
            params,
        }
    }

    fn service() -> ExecuteService {
        ExecuteService::new(Arc::new(MemoryBackend::new()))
    }

    #[test]
    fn scope_is_checked() {
        assert!(validate(&command("mongodb/db/find", Document::new())).is_ok());

        let err = validate(&command("mongodb/db/coll/list_collection_names", Document::new()))
            .unwrap_err();
        assert!(matches!(err, ExecutionError::ScopeMismatch { expected: "database", .. }));
    }

    #[test]
    fn required_parameters_are_checked() {
        let err = validate(&command("mongodb/db/coll/insert_one", Document::new())).unwrap_err();
        assert!(matches!(err, ExecutionError::MissingParameter { name: "document", .. }));
    }

    #[test]
    fn passthrough_skips_validation() {
        assert!(validate(&command("mongodb/db/whatever", Document::new())).is_ok());
    }

    #[tokio::test]
    async fn write_is_flattened() {
        let mut params = Document::new();
        let mut doc = Document::new();
        doc.insert("_id".to_string(), Value::Int(5));
        params.insert("document".to_string(), Value::Document(doc));

        let resp = service()
            .oneshot(command("mongodb/db/coll/insert_one", params))
            .await
            .unwrap();
        let Some(Value::Document(fields)) = resp else {
            panic!("expected write fields");
        };
        assert_eq!(fields["inserted_id"], Value::Int(5));
        assert_eq!(fields["acknowledged"], Value::Bool(true));
    }

    #[tokio::test]
    async fn list_is_drained() {
        let resp = service()
            .oneshot(command("mongodb/db/coll/find", Document::new()))
            .await
            .unwrap();
        assert_eq!(resp, Some(Value::Array(Vec::new())));
    }

    #[tokio::test]
    async fn backend_errors_propagate() {
        let err = service()
            .oneshot(command("mongodb/db/coll/rename", Document::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Backend(BackendError::UnknownOperation { .. })));
    }
}
