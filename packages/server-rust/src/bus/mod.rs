//! Bus collaborator: inbound request envelope, transport errors and the
//! in-process transports.

pub mod memory;
pub mod stdio;

use bytes::Bytes;

pub use memory::MemoryBus;
pub use stdio::StdioBus;

/// Largest payload a transport accepts, matching the MQTT maximum packet size.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 268_435_460;

/// Depth of each subscription's delivery channel.
pub const SUBSCRIPTION_BUFFER: usize = 1024;

/// Inbound message as delivered by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMessage {
    pub topic: String,
    pub payload: Bytes,
    /// Reply destinations declared by the sender; `None` when the transport
    /// carried no reply metadata at all.
    pub response_topics: Option<Vec<String>>,
}

impl RequestMessage {
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            response_topics: None,
        }
    }

    #[must_use]
    pub fn with_response_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.response_topics = Some(topics.into_iter().map(Into::into).collect());
        self
    }
}

/// Errors raised by a bus transport.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("transport is disconnected")]
    Closed,
    #[error("payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },
    #[error("invalid topic filter {pattern:?}")]
    InvalidFilter { pattern: String },
    #[error("transport I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed frame: {0}")]
    Frame(#[from] serde_json::Error),
}

pub(crate) fn check_payload_size(payload: &Bytes, max: usize) -> Result<(), BusError> {
    if payload.len() > max {
        return Err(BusError::PayloadTooLarge {
            size: payload.len(),
            max,
        });
    }
    Ok(())
}

pub(crate) fn validate_filter(pattern: &str) -> Result<(), BusError> {
    let levels: Vec<&str> = pattern.split('/').collect();
    let misplaced = levels.iter().enumerate().any(|(i, level)| {
        (level.contains('#') && (*level != "#" || i + 1 != levels.len()))
            || (level.contains('+') && *level != "+")
    });
    if pattern.is_empty() || misplaced {
        return Err(BusError::InvalidFilter {
            pattern: pattern.to_string(),
        });
    }
    Ok(())
}
