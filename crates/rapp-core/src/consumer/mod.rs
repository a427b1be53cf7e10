// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Background event-stream consumer.
//!
//! The consumer subscribes once, then loops on a bounded-timeout receive.
//! Every transport call runs on the blocking pool and is awaited to
//! completion, so a cancellation request is honoured at the next loop check:
//! termination lags the request by at most one receive timeout.
//!
//! Unexpected iteration errors (a failed receive, a processor error, a panic
//! in the transport) are logged and followed by a cooldown, after which the
//! loop resumes. A processor error does not cut its batch short: the
//! remaining records are still counted and processed before the cooldown.
//! Cancellation during cooldown ends the wait immediately.

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod state;
pub mod transport;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::credentials::TokenRefresher;
use crate::metrics::{Counter, MetricsRegistry};
pub use state::ConsumerState;
use state::StateCell;
pub use transport::{
    ReceivedRecord, StreamRecord, StreamTransport, SubscriptionSettings, TransportConnector,
    TransportError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerSettings {
    /// Records requested per receive.
    pub max_records: usize,
    pub receive_timeout: Duration,
    pub cooldown: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            max_records: 1,
            receive_timeout: Duration::from_secs(1),
            cooldown: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error(transparent)]
    Subscribe(TransportError),

    #[error("consumer task panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, thiserror::Error)]
enum IterationError {
    #[error(transparent)]
    Receive(#[from] TransportError),

    #[error("transport panicked: {0}")]
    Panicked(String),

    #[error("payload processing failed: {0}")]
    Processor(#[source] anyhow::Error),
}

/// Business logic applied to every received record.
#[async_trait]
pub trait PayloadProcessor: Send + Sync {
    async fn process(&self, record: StreamRecord) -> anyhow::Result<()>;
}

/// Processor used until business logic is plugged in: logs payload sizes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SizeLoggingProcessor;

#[async_trait]
impl PayloadProcessor for SizeLoggingProcessor {
    async fn process(&self, record: StreamRecord) -> anyhow::Result<()> {
        debug!("Received message of size {} bytes.", record.payload.len());
        Ok(())
    }
}

type SharedTransport = Arc<Mutex<Box<dyn StreamTransport>>>;

pub struct EventConsumer {
    connector: Arc<dyn TransportConnector>,
    subscription: SubscriptionSettings,
    settings: ConsumerSettings,
    refresher: Arc<dyn TokenRefresher>,
    processor: Arc<dyn PayloadProcessor>,
    metrics: Arc<MetricsRegistry>,
}

/// Handle to a spawned [`EventConsumer`].
pub struct ConsumerHandle {
    state: watch::Receiver<ConsumerState>,
    cancel: CancellationToken,
    task: JoinHandle<Result<(), ConsumerError>>,
}

impl EventConsumer {
    #[must_use]
    pub fn new(
        connector: Arc<dyn TransportConnector>,
        subscription: SubscriptionSettings,
        settings: ConsumerSettings,
        refresher: Arc<dyn TokenRefresher>,
        processor: Arc<dyn PayloadProcessor>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            connector,
            subscription,
            settings,
            refresher,
            processor,
            metrics,
        }
    }

    /// Starts the consumer task. Cancelling `cancel` begins draining.
    #[must_use]
    pub fn spawn(self, cancel: CancellationToken) -> ConsumerHandle {
        let (state, rx) = StateCell::new();
        let task = tokio::spawn(self.run(state, cancel.clone()));
        ConsumerHandle {
            state: rx,
            cancel,
            task,
        }
    }

    async fn run(self, state: StateCell, cancel: CancellationToken) -> Result<(), ConsumerError> {
        let transport = match self.subscribe().await {
            Ok(transport) => transport,
            Err(e) => {
                error!("Failed to initialize or subscribe consumer: {e}");
                state.advance(ConsumerState::Stopped);
                return Err(ConsumerError::Subscribe(e));
            }
        };
        info!(
            "Successfully subscribed to topic: {}",
            self.subscription.topic
        );
        let transport: SharedTransport = Arc::new(Mutex::new(transport));
        state.advance(ConsumerState::Running);

        info!("Starting message consumption loop...");
        while !cancel.is_cancelled() {
            let Err(e) = self.poll_once(&transport).await else {
                continue;
            };
            error!("An error occurred in the consumption loop: {e}");
            self.metrics.increment(Counter::StreamConsumerCooldowns);
            state.advance(ConsumerState::Cooldown);
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.settings.cooldown) => {}
            }
            state.advance(ConsumerState::Running);
        }

        info!("Message consumption cancelled. Shutting down consumer.");
        state.advance(ConsumerState::Draining);
        self.close(transport).await;
        state.advance(ConsumerState::Stopped);
        Ok(())
    }

    async fn subscribe(&self) -> Result<Box<dyn StreamTransport>, TransportError> {
        let connector = Arc::clone(&self.connector);
        let subscription = self.subscription.clone();
        let refresher = Arc::clone(&self.refresher);
        tokio::task::spawn_blocking(move || connector.subscribe(&subscription, refresher))
            .await
            .map_err(|e| TransportError::Subscribe(format!("subscribe task failed: {e}")))?
    }

    async fn poll_once(&self, transport: &SharedTransport) -> Result<(), IterationError> {
        let shared = Arc::clone(transport);
        let max_records = self.settings.max_records;
        let timeout = self.settings.receive_timeout;
        let batch = tokio::task::spawn_blocking(move || {
            let mut transport = shared.lock().unwrap_or_else(PoisonError::into_inner);
            transport.receive(max_records, timeout)
        })
        .await
        .map_err(|e| IterationError::Panicked(e.to_string()))??;

        let batch_counter = match batch.len() {
            0 => Counter::EmptyBatchOfMessagesConsumed,
            n if n >= max_records => Counter::CompleteBatchOfMessagesConsumed,
            _ => Counter::PartialBatchOfMessagesConsumed,
        };
        self.metrics.increment(batch_counter);

        // The whole batch is processed; the first processor error is
        // reported once it is done.
        let mut first_failure = None;
        for received in batch {
            match received {
                Ok(record) => {
                    self.metrics.increment(Counter::MessagesConsumed);
                    if let Err(e) = self.processor.process(record).await {
                        if first_failure.is_none() {
                            first_failure = Some(e);
                        } else {
                            error!("Payload processing failed: {e}");
                        }
                    }
                }
                Err(e) => {
                    self.metrics.increment(Counter::StreamTransportErrors);
                    error!("Stream consumer error: {e}");
                }
            }
        }
        first_failure.map_or(Ok(()), |e| Err(IterationError::Processor(e)))
    }

    async fn close(&self, transport: SharedTransport) {
        let closed = tokio::task::spawn_blocking(move || {
            let mut transport = transport.lock().unwrap_or_else(PoisonError::into_inner);
            transport.close()
        })
        .await;
        match closed {
            Ok(Ok(())) => info!("Stream subscription released"),
            Ok(Err(e)) => error!("{e}"),
            Err(e) => error!("Stream close task failed: {e}"),
        }
    }
}

impl ConsumerHandle {
    #[must_use]
    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Receiver observing every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.clone()
    }

    /// Waits until the consumer has left `Starting` and returns the state
    /// it moved to.
    pub async fn wait_until_started(&self) -> ConsumerState {
        let mut rx = self.state.clone();
        let waited = rx
            .wait_for(|state| *state != ConsumerState::Starting)
            .await
            .map(|state| *state);
        match waited {
            Ok(state) => state,
            // The task is gone; whatever it published last is final.
            Err(_) => *rx.borrow(),
        }
    }

    /// Requests draining. Returns immediately.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the task to finish.
    pub async fn join(self) -> Result<(), ConsumerError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(ConsumerError::Panicked(e.to_string())),
        }
    }
}
