//! Command types flowing through the pipeline, and their errors.

use docbridge_core::{Document, Invocation, Value};

use crate::backend::BackendError;

/// Context carried with every command through the pipeline.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub call_id: u64,
    /// Request topic the command was decoded from.
    pub topic: String,
    pub call_timeout_ms: u64,
}

impl CommandContext {
    #[must_use]
    pub fn new(call_id: u64, topic: impl Into<String>, call_timeout_ms: u64) -> Self {
        Self {
            call_id,
            topic: topic.into(),
            call_timeout_ms,
        }
    }
}

/// A classified request: resolved invocation plus its named parameters.
#[derive(Debug, Clone)]
pub struct Command {
    pub ctx: CommandContext,
    pub invocation: Invocation,
    pub params: Document,
}

impl Command {
    #[must_use]
    pub fn ctx(&self) -> &CommandContext {
        &self.ctx
    }
}

/// Shaped result of a command. `None` means there is nothing to publish.
pub type CommandResponse = Option<Value>;

/// Errors that end a dispatch cycle after classification.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("{operation} requires parameter {name:?}")]
    MissingParameter {
        operation: &'static str,
        name: &'static str,
    },
    #[error("{operation} is a {expected}-level operation")]
    ScopeMismatch {
        operation: &'static str,
        expected: &'static str,
    },
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("bridge overloaded, try again later")]
    Overloaded,
}
