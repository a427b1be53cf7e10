// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Kafka transport over `SASL_SSL` with `OAUTHBEARER` negotiation.

use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rdkafka::client::{ClientContext, OAuthToken};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer, ConsumerContext};
use rdkafka::message::Message;
use tracing::debug;

use super::transport::{
    ReceivedRecord, StreamRecord, StreamTransport, SubscriptionSettings, TransportConnector,
    TransportError,
};
use crate::credentials::TokenRefresher;

/// librdkafka context that sources bearer tokens from the broker.
pub struct TokenContext {
    refresher: Arc<dyn TokenRefresher>,
}

impl ClientContext for TokenContext {
    const ENABLE_REFRESH_OAUTH_TOKEN: bool = true;

    fn generate_oauth_token(
        &self,
        _oauthbearer_config: Option<&str>,
    ) -> Result<OAuthToken, Box<dyn Error>> {
        debug!("Refreshing stream consumer token.");
        let token = self.refresher.refresh_token()?;
        Ok(OAuthToken {
            lifetime_ms: token.expires_at_millis(),
            token: token.token,
            principal_name: String::new(),
        })
    }
}

impl ConsumerContext for TokenContext {}

#[derive(Debug, Default, Clone, Copy)]
pub struct KafkaConnector;

impl TransportConnector for KafkaConnector {
    fn subscribe(
        &self,
        settings: &SubscriptionSettings,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Result<Box<dyn StreamTransport>, TransportError> {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &settings.bootstrap_servers)
            .set("group.id", &settings.group_id)
            .set("auto.offset.reset", "latest")
            .set("security.protocol", "SASL_SSL")
            .set("sasl.mechanisms", "OAUTHBEARER");
        if let Some(ca_path) = &settings.ca_cert_path {
            config.set("ssl.ca.location", ca_path.to_string_lossy());
        }

        let consumer: BaseConsumer<TokenContext> = config
            .create_with_context(TokenContext { refresher })
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;
        consumer
            .subscribe(&[settings.topic.as_str()])
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;

        Ok(Box::new(KafkaTransport { consumer }))
    }
}

struct KafkaTransport {
    consumer: BaseConsumer<TokenContext>,
}

impl StreamTransport for KafkaTransport {
    fn receive(
        &mut self,
        max_records: usize,
        timeout: Duration,
    ) -> Result<Vec<ReceivedRecord>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut batch = Vec::with_capacity(max_records);
        while batch.len() < max_records {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.consumer.poll(remaining) {
                None => break,
                Some(Ok(message)) => batch.push(Ok(StreamRecord {
                    key: message.key().map(<[u8]>::to_vec),
                    payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                    partition: message.partition(),
                    offset: message.offset(),
                })),
                Some(Err(e)) => batch.push(Err(TransportError::Record(e.to_string()))),
            }
        }
        Ok(batch)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.consumer.unsubscribe();
        Ok(())
    }
}
