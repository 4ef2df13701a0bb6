//! Message classification: turns an inbound topic and body into a typed `Command`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use docbridge_core::{
    BaseTopic, CodecError, CommandDescriptor, Document, Invocation, ParameterCodec, ParseError,
};
use tracing::{debug, warn};

use super::config::PipelineConfig;
use super::operation::{Command, CommandContext};

// ---------------------------------------------------------------------------
// CommandService
// ---------------------------------------------------------------------------

/// Classifies inbound requests into `Command` values.
///
/// Each call gets a unique call ID and the configured execution timeout.
pub struct CommandService {
    base: Arc<BaseTopic>,
    codec: Arc<dyn ParameterCodec>,
    config: Arc<PipelineConfig>,
    call_id_counter: AtomicU64,
}

impl CommandService {
    #[must_use]
    pub fn new(
        base: Arc<BaseTopic>,
        codec: Arc<dyn ParameterCodec>,
        config: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            base,
            codec,
            config,
            call_id_counter: AtomicU64::new(1),
        }
    }

    fn next_call_id(&self) -> u64 {
        self.call_id_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Decode a request body into named parameters.
    ///
    /// Never fails: an undecodable body becomes an empty parameter set so
    /// operations without arguments still run.
    #[must_use]
    pub fn decode_params(&self, topic: &str, payload: &[u8]) -> Document {
        match self.codec.decode(payload) {
            Ok(params) => params,
            Err(CodecError::Empty) => {
                debug!(topic, "empty body, using no parameters");
                Document::new()
            }
            Err(e) => {
                warn!(
                    topic,
                    codec = self.codec.name(),
                    error = %e,
                    "could not decode body, using no parameters"
                );
                Document::new()
            }
        }
    }

    /// Classify a request into a `Command`.
    ///
    /// # Errors
    ///
    /// Returns `ParseError` when the topic is outside the base topic or lacks
    /// a database or operation level. The body is only decoded once the
    /// topic parsed.
    pub fn classify(&self, topic: &str, payload: &[u8]) -> Result<Command, ParseError> {
        let descriptor = CommandDescriptor::parse(topic, &self.base)?;
        let invocation = Invocation::from(descriptor);
        let params = self.decode_params(topic, payload);
        let ctx = CommandContext::new(self.next_call_id(), topic, self.config.operation_timeout_ms);
        Ok(Command {
            ctx,
            invocation,
            params,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
