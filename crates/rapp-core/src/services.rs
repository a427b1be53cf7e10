// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process lifecycle: builds every component in dependency order and tears
//! them down again.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::consumer::{
    ConsumerError, ConsumerHandle, ConsumerSettings, ConsumerState, EventConsumer,
    PayloadProcessor, SizeLoggingProcessor, SubscriptionSettings, TransportConnector,
    TransportError,
};
use crate::credentials::{
    ClientCredentialsProvider, CredentialBroker, IdentityProvider, TokenRefresher,
};
use crate::error::ServicesError;
use crate::http::{build_client, TlsMaterial};
use crate::logs::{LogSender, LogShipper, CONSOLE_TARGET};
use crate::metrics::MetricsRegistry;
use crate::server::ServerState;
use crate::upstream::{NetworkConfigurationClient, TopologyClient, UpstreamClient};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
const LOG_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Pieces created before the coordinator starts.
///
/// The log shipper has to exist before the tracing subscriber is installed,
/// so it is built here and handed to the subscriber by the caller.
pub struct Components {
    pub metrics: Arc<MetricsRegistry>,
    pub shipper: LogShipper,
    pub log_sender: Option<LogSender>,
    /// Overrides the client-credentials provider built from configuration.
    pub identity_provider: Option<Arc<dyn IdentityProvider>>,
    pub connector: Arc<dyn TransportConnector>,
    pub processor: Arc<dyn PayloadProcessor>,
}

impl Components {
    #[must_use]
    pub fn new(config: &AppConfig, connector: Arc<dyn TransportConnector>) -> Self {
        let metrics = Arc::new(MetricsRegistry::new(&config.container_name));
        let (shipper, log_sender) = LogShipper::from_config(config, Arc::clone(&metrics));
        Self {
            metrics,
            shipper,
            log_sender,
            identity_provider: None,
            connector,
            processor: Arc::new(SizeLoggingProcessor),
        }
    }

    #[must_use]
    pub fn with_identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.identity_provider = Some(provider);
        self
    }

    #[must_use]
    pub fn with_processor(mut self, processor: Arc<dyn PayloadProcessor>) -> Self {
        self.processor = processor;
        self
    }
}

/// Lifecycle coordinator.
pub struct Services {
    config: AppConfig,
    components: Components,
}

/// Log sender task and the token that stops it.
struct LogTask {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl LogTask {
    fn spawn(sender: Option<LogSender>) -> Self {
        let cancel = CancellationToken::new();
        let task = sender.map(|sender| tokio::spawn(sender.run(cancel.clone())));
        Self { cancel, task }
    }

    /// Stops the sender after it drains. Returns false if it overran `timeout`.
    async fn stop(self, timeout: Duration) -> bool {
        self.cancel.cancel();
        let Some(mut task) = self.task else {
            return true;
        };
        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(target: CONSOLE_TARGET, "Log sender task failed: {e}");
                true
            }
            Err(_) => {
                task.abort();
                error!(target: CONSOLE_TARGET, "Log sender did not drain within {timeout:?}");
                false
            }
        }
    }
}

impl Services {
    #[must_use]
    pub fn new(config: AppConfig, components: Components) -> Self {
        Self { config, components }
    }

    /// Starts every component.
    ///
    /// Fails when no initial credential can be obtained or the event stream
    /// subscription fails; anything already started is stopped first.
    pub async fn start(self) -> Result<ServicesHandle, ServicesError> {
        let Self {
            config,
            mut components,
        } = self;
        let subscription = config.subscription()?;

        if let Some(reason) = components.shipper.disabled_reason() {
            warn!(target: CONSOLE_TARGET, "{reason}");
        }
        let log_task = LogTask::spawn(components.log_sender.take());

        match start_components(&config, subscription, components).await {
            Ok(running) => {
                info!("Services started");
                Ok(ServicesHandle {
                    running,
                    log_task,
                    consumer_settings: config.consumer_settings(),
                })
            }
            Err(e) => {
                log_task.stop(LOG_DRAIN_TIMEOUT).await;
                Err(e)
            }
        }
    }
}

struct Running {
    metrics: Arc<MetricsRegistry>,
    broker: Arc<CredentialBroker>,
    upstream: Arc<UpstreamClient>,
    topology: TopologyClient,
    network_configuration: NetworkConfigurationClient,
    consumer: ConsumerHandle,
}

async fn start_components(
    config: &AppConfig,
    subscription: SubscriptionSettings,
    components: Components,
) -> Result<Running, ServicesError> {
    let Components {
        metrics,
        identity_provider,
        connector,
        processor,
        ..
    } = components;
    let client = build_client(
        &TlsMaterial::server_only(config.ca_bundle_path()),
        config.request_timeout,
    )?;

    let provider: Arc<dyn IdentityProvider> = match identity_provider {
        Some(provider) => provider,
        None => Arc::new(ClientCredentialsProvider::new(
            client.clone(),
            config.token_url(),
            config.iam_client_id.clone(),
            config.iam_client_secret.clone(),
        )),
    };
    let broker = Arc::new(CredentialBroker::new(provider, config.token_refresh_leeway));
    broker.get_token().await?;
    debug!("Initial access token obtained");

    let upstream = Arc::new(UpstreamClient::new(
        client,
        config.iam_base_url.clone(),
        Arc::clone(&broker),
        Arc::clone(&metrics),
        config.retry_policy(),
    ));
    let topology = TopologyClient::new(Arc::clone(&upstream));
    let network_configuration = NetworkConfigurationClient::new(Arc::clone(&upstream));

    let refresher: Arc<dyn TokenRefresher> = broker.clone();
    let consumer = EventConsumer::new(
        connector,
        subscription,
        config.consumer_settings(),
        refresher,
        processor,
        Arc::clone(&metrics),
    )
    .spawn(CancellationToken::new());

    if consumer.wait_until_started().await == ConsumerState::Stopped {
        let error = match consumer.join().await {
            Err(e) => e,
            Ok(()) => ConsumerError::Subscribe(TransportError::Subscribe(
                "consumer stopped before subscribing".to_string(),
            )),
        };
        return Err(error.into());
    }

    Ok(Running {
        metrics,
        broker,
        upstream,
        topology,
        network_configuration,
        consumer,
    })
}

/// Running services. Dropping it without [`shutdown`](Self::shutdown)
/// leaves the background tasks running.
pub struct ServicesHandle {
    running: Running,
    log_task: LogTask,
    consumer_settings: ConsumerSettings,
}

impl ServicesHandle {
    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.running.metrics
    }

    #[must_use]
    pub fn broker(&self) -> &Arc<CredentialBroker> {
        &self.running.broker
    }

    #[must_use]
    pub fn upstream(&self) -> &Arc<UpstreamClient> {
        &self.running.upstream
    }

    #[must_use]
    pub fn topology(&self) -> &TopologyClient {
        &self.running.topology
    }

    #[must_use]
    pub fn network_configuration(&self) -> &NetworkConfigurationClient {
        &self.running.network_configuration
    }

    #[must_use]
    pub fn consumer_state(&self) -> ConsumerState {
        self.running.consumer.state()
    }

    #[must_use]
    pub fn watch_consumer_state(&self) -> watch::Receiver<ConsumerState> {
        self.running.consumer.watch_state()
    }

    /// State shared with the exposition server.
    #[must_use]
    pub fn server_state(&self) -> ServerState {
        ServerState {
            metrics: Arc::clone(&self.running.metrics),
            consumer_state: self.watch_consumer_state(),
        }
    }

    /// Cancels the consumer and waits for it to release its subscription,
    /// then drains and stops the log sender.
    pub async fn shutdown(self) -> Result<(), ServicesError> {
        info!("Shutting down services");
        let Self {
            running,
            log_task,
            consumer_settings,
        } = self;

        running.consumer.cancel();
        let budget =
            consumer_settings.receive_timeout + consumer_settings.cooldown + SHUTDOWN_GRACE;
        let consumer_stopped = match tokio::time::timeout(budget, running.consumer.join()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!("Event consumer ended with error: {e}");
                true
            }
            Err(_) => {
                error!("Event consumer did not stop within {budget:?}");
                false
            }
        };

        let logs_drained = log_task.stop(LOG_DRAIN_TIMEOUT).await;

        if consumer_stopped && logs_drained {
            info!("Services stopped");
            Ok(())
        } else {
            Err(ServicesError::ShutdownTimeout)
        }
    }
}
