//! Line-delimited JSON transport over stdin/stdout.
//!
//! Inbound frame: `{"topic": "...", "payload": <json>, "response_topics": ["..."]}`.
//! Outbound frame: `{"topic": "...", "payload": <json>}`. A string payload is
//! carried verbatim; any other JSON value is re-serialized as the body bytes.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{check_payload_size, BusError, MemoryBus, RequestMessage, DEFAULT_MAX_PAYLOAD_BYTES};
use crate::traits::BusTransport;

type Reader = Box<dyn AsyncBufRead + Send + Unpin>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Deserialize)]
struct InboundFrame {
    topic: String,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default)]
    response_topics: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct OutboundFrame<'a> {
    topic: &'a str,
    payload: serde_json::Value,
}

impl InboundFrame {
    fn into_message(self) -> Result<RequestMessage, BusError> {
        let payload = match self.payload {
            serde_json::Value::Null => Bytes::new(),
            serde_json::Value::String(s) => Bytes::from(s),
            other => Bytes::from(serde_json::to_vec(&other)?),
        };
        Ok(RequestMessage {
            topic: self.topic,
            payload,
            response_topics: self.response_topics,
        })
    }
}

/// Transport reading requests from one stream and writing publishes to another.
pub struct StdioBus {
    router: Arc<MemoryBus>,
    reader: parking_lot::Mutex<Option<Reader>>,
    reader_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    writer: Mutex<Writer>,
    max_payload: usize,
}

impl StdioBus {
    /// Transport bound to the process's stdin and stdout.
    #[must_use]
    pub fn new(max_payload: usize) -> Self {
        Self::from_io(BufReader::new(tokio::io::stdin()), tokio::io::stdout(), max_payload)
    }

    #[must_use]
    pub fn from_io<R, W>(reader: R, writer: W, max_payload: usize) -> Self
    where
        R: AsyncBufRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            router: Arc::new(MemoryBus::with_max_payload(max_payload)),
            reader: parking_lot::Mutex::new(Some(Box::new(reader))),
            reader_task: parking_lot::Mutex::new(None),
            writer: Mutex::new(Box::new(writer)),
            max_payload,
        }
    }

    fn start_reader(&self) {
        let Some(reader) = self.reader.lock().take() else {
            return;
        };
        let router = Arc::clone(&self.router);
        let handle = tokio::spawn(async move {
            let mut lines = reader.lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => {
                        let routed = serde_json::from_str::<InboundFrame>(&line)
                            .map_err(BusError::from)
                            .and_then(InboundFrame::into_message)
                            .and_then(|msg| router.send(msg));
                        if let Err(e) = routed {
                            warn!(error = %e, "discarding inbound frame");
                        }
                    }
                    Ok(None) => {
                        info!("input closed");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "input read failed");
                        break;
                    }
                }
            }
            // Input is exhausted: end every subscription so the dispatcher can wind down.
            let _ = router.disconnect().await;
        });
        *self.reader_task.lock() = Some(handle);
    }
}

impl Default for StdioBus {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD_BYTES)
    }
}

#[async_trait]
impl BusTransport for StdioBus {
    async fn subscribe(&self, pattern: &str) -> Result<mpsc::Receiver<RequestMessage>, BusError> {
        let rx = self.router.subscribe(pattern).await?;
        self.start_reader();
        Ok(rx)
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BusError> {
        check_payload_size(&payload, self.max_payload)?;
        let payload = serde_json::from_slice(&payload).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(&payload).into_owned())
        });
        let mut line = serde_json::to_vec(&OutboundFrame { topic, payload })?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        debug!(topic, "published");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        if let Some(handle) = self.reader_task.lock().take() {
            handle.abort();
        }
        self.router.disconnect().await?;
        self.writer.lock().await.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{duplex, AsyncReadExt};

    use super::*;

    #[tokio::test]
    async fn reads_frames_and_writes_publishes() {
        let input = concat!(
            r#"{"topic":"mongodb/db/find","payload":{"a":1},"response_topics":["app/r"]}"#,
            "\n\n"
        )
        .as_bytes();
        let (writer, mut out) = duplex(1024);
        let bus = StdioBus::from_io(BufReader::new(&input[..]), writer, DEFAULT_MAX_PAYLOAD_BYTES);

        let mut rx = bus.subscribe("mongodb/#").await.unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.topic, "mongodb/db/find");
        assert_eq!(msg.payload, Bytes::from_static(b"{\"a\":1}"));
        assert_eq!(msg.response_topics, Some(vec!["app/r".to_string()]));
        // Input exhausted: subscription ends.
        assert!(rx.recv().await.is_none());

        bus.publish("app/r", Bytes::from_static(b"[1,2]")).await.unwrap();
        drop(bus);
        let mut written = String::new();
        out.read_to_string(&mut written).await.unwrap();
        assert_eq!(written, "{\"topic\":\"app/r\",\"payload\":[1,2]}\n");
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let input = b"not json\n{\"topic\":\"mongodb/db/find\"}\n";
        let bus = StdioBus::from_io(BufReader::new(&input[..]), tokio::io::sink(), 1024);
        let mut rx = bus.subscribe("mongodb/#").await.unwrap();
        let msg = rx.recv().await.unwrap();
        assert!(msg.payload.is_empty());
        assert!(msg.response_topics.is_none());
    }
}
