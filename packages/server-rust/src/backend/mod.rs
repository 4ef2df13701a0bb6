//! Backend collaborator: execution outcomes, write acknowledgments, cursors,
//! and connection bootstrap.

pub mod memory;
mod query;

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use docbridge_core::{Document, Value};
use tracing::{info, warn};

pub use memory::MemoryBackend;

use crate::traits::{Backend, Cursor};

/// Errors raised while resolving or running an operation on the backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("unknown database: {name}")]
    UnknownDatabase { name: String },
    #[error("unknown operation: {name}")]
    UnknownOperation { name: String },
    #[error("operation {operation} needs a collection")]
    MissingCollection { operation: String },
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },
    #[error("duplicate key: {key}")]
    DuplicateKey { key: String },
    #[error("collection already exists: {name}")]
    CollectionExists { name: String },
    #[error("backend is closed")]
    Closed,
    #[error("backend fault: {0}")]
    Fault(#[from] anyhow::Error),
}

impl BackendError {
    pub(crate) fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Raw result of an executed operation, before shaping.
pub enum Outcome {
    Value(Value),
    Cursor(Box<dyn Cursor>),
    Write(WriteAck),
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Cursor(_) => f.write_str("Cursor(..)"),
            Self::Write(ack) => f.debug_tuple("Write").field(ack).finish(),
        }
    }
}

/// Acknowledgment of a write.
///
/// `raw_result` is the server's internal reply and is never published by the
/// write-result strategy; see [`WriteAck::public_fields`].
#[derive(Debug, Clone, PartialEq)]
pub enum WriteAck {
    InsertOne {
        acknowledged: bool,
        inserted_id: Value,
    },
    InsertMany {
        acknowledged: bool,
        inserted_ids: Vec<Value>,
    },
    Update {
        acknowledged: bool,
        matched_count: u64,
        modified_count: u64,
        upserted_id: Option<Value>,
        raw_result: Document,
    },
    Delete {
        acknowledged: bool,
        deleted_count: u64,
        raw_result: Document,
    },
}

impl WriteAck {
    /// The documented result fields, flattened.
    #[must_use]
    pub fn public_fields(&self) -> Document {
        let mut doc = Document::new();
        let mut put = |k: &str, v: Value| {
            doc.insert(k.to_string(), v);
        };
        match self {
            Self::InsertOne {
                acknowledged,
                inserted_id,
            } => {
                put("acknowledged", Value::Bool(*acknowledged));
                put("inserted_id", inserted_id.clone());
            }
            Self::InsertMany {
                acknowledged,
                inserted_ids,
            } => {
                put("acknowledged", Value::Bool(*acknowledged));
                put("inserted_ids", Value::Array(inserted_ids.clone()));
            }
            Self::Update {
                acknowledged,
                matched_count,
                modified_count,
                upserted_id,
                ..
            } => {
                put("acknowledged", Value::Bool(*acknowledged));
                put("matched_count", Value::from(*matched_count));
                put("modified_count", Value::from(*modified_count));
                put("upserted_id", Value::from(upserted_id.clone()));
            }
            Self::Delete {
                acknowledged,
                deleted_count,
                ..
            } => {
                put("acknowledged", Value::Bool(*acknowledged));
                put("deleted_count", Value::from(*deleted_count));
            }
        }
        doc
    }

    /// Every field, including the internal `raw_result`.
    #[must_use]
    pub fn to_document(&self) -> Document {
        let mut doc = self.public_fields();
        if let Self::Update { raw_result, .. } | Self::Delete { raw_result, .. } = self {
            doc.insert("raw_result".to_string(), Value::Document(raw_result.clone()));
        }
        doc
    }
}

// ---------------------------------------------------------------------------
// VecCursor
// ---------------------------------------------------------------------------

/// Cursor over an already-materialized result set, handed out in batches.
pub struct VecCursor {
    items: VecDeque<Value>,
    batch_size: usize,
}

impl VecCursor {
    /// Default number of results per batch.
    pub const DEFAULT_BATCH_SIZE: usize = 101;

    #[must_use]
    pub fn new(items: Vec<Value>, batch_size: usize) -> Self {
        Self {
            items: items.into(),
            batch_size: batch_size.max(1),
        }
    }
}

#[async_trait]
impl Cursor for VecCursor {
    async fn next_batch(&mut self) -> Result<Option<Vec<Value>>, BackendError> {
        if self.items.is_empty() {
            return Ok(None);
        }
        let take = self.batch_size.min(self.items.len());
        Ok(Some(self.items.drain(..take).collect()))
    }
}

// ---------------------------------------------------------------------------
// Connection bootstrap
// ---------------------------------------------------------------------------

/// How often and how long to retry the startup ping.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_secs(1),
        }
    }
}

/// Pings the backend until it answers or the attempts run out.
///
/// # Errors
///
/// Returns the last ping error once `policy.max_attempts` pings have failed.
pub async fn ensure_connection(
    backend: &dyn Backend,
    policy: &RetryPolicy,
) -> Result<(), BackendError> {
    let mut attempt = 1;
    loop {
        match backend.ping().await {
            Ok(()) => {
                info!(attempt, "connected to backend");
                return Ok(());
            }
            Err(e) if attempt < policy.max_attempts => {
                warn!(attempt, error = %e, "backend ping failed, retrying");
                attempt += 1;
                tokio::time::sleep(policy.delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use docbridge_core::Invocation;

    use super::*;

    #[test]
    fn public_fields_hide_raw_result() {
        let mut raw = Document::new();
        raw.insert("n".to_string(), Value::Int(1));
        let ack = WriteAck::Update {
            acknowledged: true,
            matched_count: 1,
            modified_count: 1,
            upserted_id: None,
            raw_result: raw,
        };

        let public = ack.public_fields();
        assert_eq!(public["matched_count"], Value::Int(1));
        assert_eq!(public["upserted_id"], Value::Null);
        assert!(!public.contains_key("raw_result"));
        assert!(ack.to_document().contains_key("raw_result"));
    }

    #[tokio::test]
    async fn vec_cursor_batches() {
        let items = (0..5).map(Value::Int).collect();
        let mut cursor = VecCursor::new(items, 2);
        assert_eq!(cursor.next_batch().await.unwrap().unwrap().len(), 2);
        assert_eq!(cursor.next_batch().await.unwrap().unwrap().len(), 2);
        assert_eq!(cursor.next_batch().await.unwrap().unwrap(), vec![Value::Int(4)]);
        assert!(cursor.next_batch().await.unwrap().is_none());
    }

    /// Backend whose ping fails a fixed number of times.
    struct FlakyPing {
        failures_left: AtomicU32,
        pings: AtomicU32,
    }

    #[async_trait]
    impl Backend for FlakyPing {
        async fn ping(&self) -> Result<(), BackendError> {
            self.pings.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left == 0 {
                Ok(())
            } else {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                Err(BackendError::Closed)
            }
        }

        async fn execute(
            &self,
            _invocation: &Invocation,
            _params: Document,
        ) -> Result<Outcome, BackendError> {
            Err(BackendError::Closed)
        }

        async fn close(&self) -> Result<(), BackendError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn ensure_connection_retries_until_success() {
        let backend = FlakyPing {
            failures_left: AtomicU32::new(2),
            pings: AtomicU32::new(0),
        };
        let policy = RetryPolicy {
            max_attempts: 5,
            delay: Duration::from_millis(1),
        };
        ensure_connection(&backend, &policy).await.unwrap();
        assert_eq!(backend.pings.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn ensure_connection_gives_up() {
        let backend = FlakyPing {
            failures_left: AtomicU32::new(10),
            pings: AtomicU32::new(0),
        };
        let policy = RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(1),
        };
        assert!(ensure_connection(&backend, &policy).await.is_err());
        assert_eq!(backend.pings.load(Ordering::SeqCst), 3);
    }
}
