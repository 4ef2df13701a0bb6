//! Command-line and environment configuration for the `docbridge` binary.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, ValueEnum};
use docbridge_core::{BaseTopic, ExtendedJsonCodec, MsgPackCodec, ParameterCodec};

use crate::backend::{MemoryBackend, RetryPolicy};
use crate::bus::{MemoryBus, StdioBus, DEFAULT_MAX_PAYLOAD_BYTES};
use crate::service::PipelineConfig;
use crate::traits::{Backend, BusTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CodecKind {
    /// Relaxed extended JSON.
    Json,
    Msgpack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportKind {
    /// Line-delimited JSON frames on stdin/stdout.
    Stdio,
    /// In-process broker with no external clients.
    Memory,
}

/// docbridge - answers database commands published on a message bus.
#[derive(Parser, Debug, Clone)]
#[command(name = "docbridge", version)]
#[command(about = "Bridges publish/subscribe topics to document database operations")]
pub struct BridgeConfig {
    /// Log filter directive (e.g. `info`, `docbridge_server=debug`).
    #[arg(long, default_value = "debug", env = "LOG_LEVEL")]
    pub log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, env = "LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Subscription root; a trailing `/#` is added when missing.
    #[arg(long, default_value = "mongodb/#", env = "BASE_TOPIC")]
    pub base_topic: String,

    /// Backend URI. `memory://` or `memory://?databases=a,b`.
    #[arg(long, default_value = "memory://", env = "DATABASE_URI")]
    pub database_uri: String,

    #[arg(long, value_enum, default_value_t = TransportKind::Stdio, env = "TRANSPORT")]
    pub transport: TransportKind,

    #[arg(long, value_enum, default_value_t = CodecKind::Json, env = "CODEC")]
    pub codec: CodecKind,

    #[arg(long, default_value_t = 30_000, env = "OPERATION_TIMEOUT_MS")]
    pub operation_timeout_ms: u64,

    #[arg(long, default_value_t = 1000, env = "MAX_CONCURRENT_OPERATIONS")]
    pub max_concurrent_operations: u32,

    #[arg(long, default_value_t = 30, env = "DRAIN_TIMEOUT_SECS")]
    pub drain_timeout_secs: u64,

    #[arg(long, default_value_t = DEFAULT_MAX_PAYLOAD_BYTES, env = "MAX_PAYLOAD_BYTES")]
    pub max_payload_bytes: usize,

    /// Startup ping attempts before giving up.
    #[arg(long, default_value_t = 10, env = "CONNECT_ATTEMPTS")]
    pub connect_attempts: u32,

    #[arg(long, default_value_t = 1000, env = "CONNECT_RETRY_DELAY_MS")]
    pub connect_retry_delay_ms: u64,
}

impl BridgeConfig {
    /// Validated base topic.
    ///
    /// # Errors
    ///
    /// Fails when `BASE_TOPIC` violates the wildcard rules.
    pub fn base_topic(&self) -> anyhow::Result<BaseTopic> {
        BaseTopic::parse(&self.base_topic)
            .with_context(|| format!("invalid BASE_TOPIC {:?}", self.base_topic))
    }

    #[must_use]
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            operation_timeout_ms: self.operation_timeout_ms,
            max_concurrent_operations: self.max_concurrent_operations,
            drain_timeout: Duration::from_secs(self.drain_timeout_secs),
            retry: RetryPolicy {
                max_attempts: self.connect_attempts.max(1),
                delay: Duration::from_millis(self.connect_retry_delay_ms),
            },
        }
    }

    #[must_use]
    pub fn codec(&self) -> Arc<dyn ParameterCodec> {
        match self.codec {
            CodecKind::Json => Arc::new(ExtendedJsonCodec),
            CodecKind::Msgpack => Arc::new(MsgPackCodec),
        }
    }

    #[must_use]
    pub fn transport(&self) -> Arc<dyn BusTransport> {
        match self.transport {
            TransportKind::Stdio => Arc::new(StdioBus::new(self.max_payload_bytes)),
            TransportKind::Memory => Arc::new(MemoryBus::with_max_payload(self.max_payload_bytes)),
        }
    }

    /// # Errors
    ///
    /// Fails for URIs no built-in backend understands.
    pub fn backend(&self) -> anyhow::Result<Arc<dyn Backend>> {
        let backend = MemoryBackend::from_uri(&self.database_uri)?;
        Ok(Arc::new(backend))
    }
}
