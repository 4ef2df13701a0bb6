//! Bridge lifecycle with deferred startup.
//!
//! `new()` wires the collaborators, `start()` confirms the backend and
//! subscribes under the base topic, `serve()` dispatches until the shutdown
//! signal fires or the subscription ends, then drains and tears down.

use std::future::Future;
use std::sync::Arc;

use anyhow::Context as _;
use docbridge_core::{BaseTopic, ParameterCodec};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::backend::ensure_connection;
use crate::bus::RequestMessage;
use crate::service::{Dispatcher, PipelineConfig};
use crate::shutdown::ShutdownController;
use crate::traits::{Backend, BusTransport};

pub struct Bridge {
    base: Arc<BaseTopic>,
    codec: Arc<dyn ParameterCodec>,
    config: Arc<PipelineConfig>,
    backend: Arc<dyn Backend>,
    bus: Arc<dyn BusTransport>,
    shutdown: Arc<ShutdownController>,
    requests: Option<mpsc::Receiver<RequestMessage>>,
}

impl Bridge {
    #[must_use]
    pub fn new(
        base: BaseTopic,
        codec: Arc<dyn ParameterCodec>,
        config: PipelineConfig,
        backend: Arc<dyn Backend>,
        bus: Arc<dyn BusTransport>,
    ) -> Self {
        Self {
            base: Arc::new(base),
            codec,
            config: Arc::new(config),
            backend,
            bus,
            shutdown: Arc::new(ShutdownController::new()),
            requests: None,
        }
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Pings the backend (with retry) and subscribes to the base topic.
    ///
    /// # Errors
    ///
    /// Fails when the backend never answers or the subscription is refused.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        ensure_connection(self.backend.as_ref(), &self.config.retry)
            .await
            .context("backend unreachable")?;

        let subscription = self.base.subscription();
        let requests = self
            .bus
            .subscribe(&subscription)
            .await
            .with_context(|| format!("subscribing to {subscription}"))?;
        info!(subscription = %subscription, "subscribed");

        self.requests = Some(requests);
        Ok(())
    }

    /// Dispatches requests until `signal` resolves or the bus stops
    /// delivering.
    ///
    /// Shutdown stops receiving, waits up to the drain timeout for in-flight
    /// dispatch cycles, then disconnects the bus and closes the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first.
    pub async fn serve(self, signal: impl Future<Output = ()> + Send) -> anyhow::Result<()> {
        let Some(requests) = self.requests else {
            anyhow::bail!("start() must be called before serve()");
        };

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&self.base),
            Arc::clone(&self.codec),
            Arc::clone(&self.config),
            Arc::clone(&self.backend),
            Arc::clone(&self.bus),
            Arc::clone(&self.shutdown),
        ));
        let mut runner = tokio::spawn(dispatcher.run(requests));
        self.shutdown.set_ready();
        info!(base = %self.base, codec = self.codec.name(), "bridge ready");

        tokio::pin!(signal);
        let runner_finished = tokio::select! {
            () = &mut signal => {
                info!("shutdown signal received");
                false
            }
            joined = &mut runner => {
                if let Err(e) = joined {
                    error!(error = %e, "dispatcher task failed");
                }
                true
            }
        };

        self.shutdown.trigger_shutdown();
        if !runner_finished {
            if let Err(e) = runner.await {
                error!(error = %e, "dispatcher task failed");
            }
        }

        if self.shutdown.wait_for_drain(self.config.drain_timeout).await {
            info!("all dispatch cycles finished");
        } else {
            warn!(
                in_flight = self.shutdown.in_flight_count(),
                "drain timeout expired, abandoning in-flight dispatch cycles"
            );
        }

        if let Err(e) = self.bus.disconnect().await {
            warn!(error = %e, "bus disconnect failed");
        }
        if let Err(e) = self.backend.close().await {
            warn!(error = %e, "backend close failed");
        }
        info!(state = %self.shutdown.health_state(), "bridge stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use docbridge_core::ExtendedJsonCodec;

    use super::*;
    use crate::backend::{MemoryBackend, RetryPolicy};
    use crate::bus::MemoryBus;
    use crate::shutdown::HealthState;

    fn bridge(bus: &Arc<MemoryBus>, backend: Arc<dyn Backend>) -> Bridge {
        Bridge::new(
            BaseTopic::parse("mongodb").unwrap(),
            Arc::new(ExtendedJsonCodec),
            PipelineConfig {
                retry: RetryPolicy {
                    max_attempts: 2,
                    delay: Duration::from_millis(1),
                },
                drain_timeout: Duration::from_secs(1),
                ..PipelineConfig::default()
            },
            backend,
            Arc::clone(bus) as Arc<dyn BusTransport>,
        )
    }

    #[tokio::test]
    async fn serve_requires_start() {
        let bus = Arc::new(MemoryBus::new());
        let b = bridge(&bus, Arc::new(MemoryBackend::new()));
        assert!(b.serve(async {}).await.is_err());
    }

    #[tokio::test]
    async fn start_fails_when_backend_is_down() {
        let backend = Arc::new(MemoryBackend::new());
        backend.close().await.unwrap();
        let bus = Arc::new(MemoryBus::new());
        let mut b = bridge(&bus, backend);
        assert!(b.start().await.is_err());
    }

    #[tokio::test]
    async fn serves_until_signal_then_tears_down() {
        let bus = Arc::new(MemoryBus::new());
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        let mut b = bridge(&bus, Arc::clone(&backend));
        b.start().await.unwrap();
        let controller = b.shutdown_controller();

        let mut replies = bus.subscribe("app/#").await.unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let serving = tokio::spawn(b.serve(async {
            let _ = stop_rx.await;
        }));

        bus.send(
            RequestMessage::new("mongodb/db/list_collection_names", "")
                .with_response_topics(["app/names"]),
        )
        .unwrap();
        let reply = replies.recv().await.unwrap();
        assert_eq!(reply.payload, Bytes::from_static(b"[]"));
        assert_eq!(controller.health_state(), HealthState::Ready);

        stop_tx.send(()).unwrap();
        serving.await.unwrap().unwrap();
        assert_eq!(controller.health_state(), HealthState::Stopped);
        assert!(backend.ping().await.is_err());
        assert!(bus.publish("app/x", Bytes::new()).await.is_err());
    }
}
