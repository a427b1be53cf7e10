// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Blocking event-stream transport seam.
//!
//! Both traits are synchronous: the consumer always calls them from
//! `tokio::task::spawn_blocking`, never from an async task.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::credentials::TokenRefresher;

/// Where and as whom to subscribe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSettings {
    pub bootstrap_servers: String,
    pub topic: String,
    pub group_id: String,
    pub ca_cert_path: Option<PathBuf>,
}

/// One record received from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    pub partition: i32,
    pub offset: i64,
}

impl StreamRecord {
    #[must_use]
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            key: None,
            payload: payload.into(),
            partition: 0,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("failed to subscribe: {0}")]
    Subscribe(String),

    #[error("receive failed: {0}")]
    Receive(String),

    /// Error attached to a single record; the batch stays usable.
    #[error("record error: {0}")]
    Record(String),

    #[error("failed to release subscription: {0}")]
    Close(String),
}

/// Per-record outcome inside one batch.
pub type ReceivedRecord = Result<StreamRecord, TransportError>;

/// An established subscription.
pub trait StreamTransport: Send {
    /// Blocks for at most `timeout`, returning up to `max_records` entries.
    /// An empty batch means the timeout elapsed.
    fn receive(
        &mut self,
        max_records: usize,
        timeout: Duration,
    ) -> Result<Vec<ReceivedRecord>, TransportError>;

    /// Releases the subscription. Called exactly once.
    fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens subscriptions.
///
/// `refresher` is handed to the transport for bearer-token negotiation and
/// is invoked on the transport's own thread.
pub trait TransportConnector: Send + Sync {
    fn subscribe(
        &self,
        settings: &SubscriptionSettings,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Result<Box<dyn StreamTransport>, TransportError>;
}
