use async_trait::async_trait;
use bytes::Bytes;
use docbridge_core::{Document, Invocation, Value};
use tokio::sync::mpsc;

use crate::backend::{BackendError, Outcome};
use crate::bus::{BusError, RequestMessage};

/// Document database client the bridge executes commands against.
/// Implementations: in-memory (`MemoryBackend`); drivers plug in here.
///
/// Shared by every concurrent dispatch cycle, so implementations must be
/// safe for concurrent use without external locking.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Cheap round trip used to confirm the connection at startup.
    async fn ping(&self) -> Result<(), BackendError>;

    /// Resolve `database -> [collection] -> operation` and invoke it with
    /// `params` as named arguments.
    async fn execute(
        &self,
        invocation: &Invocation,
        params: Document,
    ) -> Result<Outcome, BackendError>;

    /// Release connections. Called once, after all dispatch cycles finished.
    async fn close(&self) -> Result<(), BackendError>;
}

/// Batched iteration over a query result.
#[async_trait]
pub trait Cursor: Send {
    /// Next batch of results, or `None` once exhausted.
    async fn next_batch(&mut self) -> Result<Option<Vec<Value>>, BackendError>;
}

/// Publish/subscribe transport the bridge listens on and replies through.
#[async_trait]
pub trait BusTransport: Send + Sync {
    /// Subscribe to a topic filter. Matching inbound messages arrive on the
    /// returned channel until the transport disconnects.
    async fn subscribe(&self, pattern: &str) -> Result<mpsc::Receiver<RequestMessage>, BusError>;

    /// Fire-and-forget publish; no acknowledgment is awaited.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BusError>;

    /// Close the transport. Open subscriptions end.
    async fn disconnect(&self) -> Result<(), BusError>;
}
