//! Dispatcher: runs one dispatch cycle per inbound request.
//!
//! Received -> Parsed -> Executed -> Shaped -> Filtered -> Published, where
//! any step may end the cycle as Dropped. Dropped cycles are logged and
//! otherwise silent: the requester gets no reply.

use std::sync::Arc;

use bytes::Bytes;
use docbridge_core::{filter_response_topics, BaseTopic, ParameterCodec};
use futures_util::future::join_all;
use tokio::sync::mpsc;
use tower::ServiceExt;
use tracing::{debug, debug_span, error, info, warn, Instrument};

use super::classify::CommandService;
use super::config::PipelineConfig;
use super::executor::ExecuteService;
use super::middleware::{build_command_pipeline, CommandPipeline};
use crate::bus::RequestMessage;
use crate::shutdown::ShutdownController;
use crate::traits::{Backend, BusTransport};

/// Why a dispatch cycle ended without publishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Topic did not parse into a command.
    Parse,
    /// Validation, backend or pipeline failure.
    Execution,
    /// The operation produced no result.
    NoResult,
    /// No reply topic survived filtering.
    NoRecipients,
    /// The result could not be encoded.
    Encode,
}

/// Terminal state of one dispatch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Result was handed to the bus for every surviving reply topic;
    /// `failed` counts publishes the transport rejected.
    Published { delivered: usize, failed: usize },
    Dropped(DropReason),
}

pub struct Dispatcher {
    base: Arc<BaseTopic>,
    classifier: CommandService,
    pipeline: parking_lot::Mutex<CommandPipeline>,
    codec: Arc<dyn ParameterCodec>,
    bus: Arc<dyn BusTransport>,
    shutdown: Arc<ShutdownController>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        base: Arc<BaseTopic>,
        codec: Arc<dyn ParameterCodec>,
        config: Arc<PipelineConfig>,
        backend: Arc<dyn Backend>,
        bus: Arc<dyn BusTransport>,
        shutdown: Arc<ShutdownController>,
    ) -> Self {
        let pipeline = build_command_pipeline(ExecuteService::new(backend), &config);
        Self {
            classifier: CommandService::new(Arc::clone(&base), Arc::clone(&codec), config),
            base,
            pipeline: parking_lot::Mutex::new(pipeline),
            codec,
            bus,
            shutdown,
        }
    }

    /// Runs one full dispatch cycle for `msg`.
    pub async fn dispatch(&self, msg: RequestMessage) -> DispatchOutcome {
        let span = debug_span!("dispatch", topic = %msg.topic);
        self.dispatch_cycle(msg).instrument(span).await
    }

    async fn dispatch_cycle(&self, msg: RequestMessage) -> DispatchOutcome {
        let RequestMessage {
            topic,
            payload,
            response_topics,
        } = msg;

        // Received -> Parsed
        let cmd = match self.classifier.classify(&topic, &payload) {
            Ok(cmd) => cmd,
            Err(e) => {
                warn!(error = %e, "dropping request with unparseable topic");
                return DispatchOutcome::Dropped(DropReason::Parse);
            }
        };
        let call_id = cmd.ctx.call_id;
        debug!(call_id, invocation = %cmd.invocation, "classified");

        // Parsed -> Executed -> Shaped
        let pipeline = self.pipeline.lock().clone();
        let shaped = match pipeline.oneshot(cmd).await {
            Ok(shaped) => shaped,
            Err(e) => {
                error!(call_id, error = %e, "command failed, no reply sent");
                return DispatchOutcome::Dropped(DropReason::Execution);
            }
        };

        // Shaped -> Filtered
        let recipients = filter_response_topics(response_topics.as_deref(), &self.base);

        let Some(result) = shaped else {
            warn!(call_id, "operation returned no result, nothing to publish");
            return DispatchOutcome::Dropped(DropReason::NoResult);
        };
        if recipients.is_empty() {
            warn!(call_id, "no valid response topics, result discarded");
            return DispatchOutcome::Dropped(DropReason::NoRecipients);
        }

        // Filtered -> Published
        let payload = match self.codec.encode(&result) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                error!(call_id, error = %e, "could not encode result");
                return DispatchOutcome::Dropped(DropReason::Encode);
            }
        };

        let publishes = recipients.iter().map(|reply| {
            let payload = payload.clone();
            async move { (reply, self.bus.publish(reply.as_str(), payload).await) }
        });
        let mut delivered = 0;
        let mut failed = 0;
        for (reply, result) in join_all(publishes).await {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    failed += 1;
                    warn!(call_id, topic = %reply, error = %e, "publish failed");
                }
            }
        }
        debug!(call_id, delivered, failed, bytes = payload.len(), "published");
        DispatchOutcome::Published { delivered, failed }
    }

    /// Receives requests until the subscription ends or shutdown is
    /// triggered, spawning an independent dispatch cycle for each.
    ///
    /// Spawned cycles hold an in-flight guard so shutdown can wait for them.
    pub async fn run(self: Arc<Self>, mut requests: mpsc::Receiver<RequestMessage>) {
        let mut shutdown = self.shutdown.shutdown_receiver();
        if *shutdown.borrow_and_update() {
            return;
        }

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    info!("shutdown requested, no longer receiving");
                    break;
                }
                msg = requests.recv() => {
                    let Some(msg) = msg else {
                        info!("subscription closed");
                        break;
                    };
                    let guard = self.shutdown.in_flight_guard();
                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        let _guard = guard;
                        this.dispatch(msg).await;
                    });
                }
            }
        }
    }
}
