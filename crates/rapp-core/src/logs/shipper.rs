// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded, never-blocking log shipping to the remote collector.
//!
//! ```text
//!   tracing events ──> ShipperLayer ──> LogShipper::enqueue
//!                                            │ try_send (drop on full)
//!                                            v
//!                                     ┌─────────────┐
//!                                     │   Channel   │ (mpsc, bounded)
//!                                     └──────┬──────┘
//!                                            v
//!                                       LogSender ──> POST https://<log_endpoint>
//! ```
//!
//! Diagnostics about shipping itself go to [`CONSOLE_TARGET`], which the
//! layer never forwards.

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::record::{LogRecord, Severity};
use crate::config::AppConfig;
use crate::http::{build_client, TlsMaterial};
use crate::metrics::{Counter, MetricsRegistry};

/// Target for console-only events.
pub const CONSOLE_TARGET: &str = "rapp_core::console";

/// Producer side of the log queue.
///
/// Cloning is cheap; every clone feeds the same queue.
#[derive(Clone)]
pub enum LogShipper {
    /// Certificate material was missing at startup; console only.
    Disabled { reason: Arc<str> },
    Enabled {
        queue: mpsc::Sender<LogRecord>,
        service_id: Arc<str>,
        min_severity: Severity,
        metrics: Arc<MetricsRegistry>,
    },
}

impl LogShipper {
    /// Creates an enabled shipper and the receiving end of its queue.
    #[must_use]
    pub fn new(
        service_id: &str,
        min_severity: Severity,
        capacity: usize,
        metrics: Arc<MetricsRegistry>,
    ) -> (Self, mpsc::Receiver<LogRecord>) {
        let (queue, rx) = mpsc::channel(capacity.max(1));
        let shipper = Self::Enabled {
            queue,
            service_id: Arc::from(service_id),
            min_severity,
            metrics,
        };
        (shipper, rx)
    }

    #[must_use]
    pub fn disabled(reason: impl Into<String>) -> Self {
        Self::Disabled {
            reason: Arc::from(reason.into()),
        }
    }

    /// Decides once whether remote shipping is possible.
    ///
    /// Returns the shipper and, when enabled, the sender task that must be
    /// spawned to drain it.
    pub fn from_config(
        config: &AppConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> (Self, Option<LogSender>) {
        let settings = match config.log_collector() {
            Ok(settings) => settings,
            Err(e) => {
                return (
                    Self::disabled(format!(
                        "mTLS logging certificates not fully configured ({e}). Logs will only be sent to console."
                    )),
                    None,
                )
            }
        };
        let client = match build_client(&TlsMaterial::mutual(&settings), config.request_timeout) {
            Ok(client) => client,
            Err(e) => {
                return (
                    Self::disabled(format!(
                        "mTLS logging client could not be built ({e}). Logs will only be sent to console."
                    )),
                    None,
                )
            }
        };

        let (shipper, rx) = Self::new(
            &config.container_name,
            config.log_ship_min_severity,
            config.log_queue_capacity,
            Arc::clone(&metrics),
        );
        let sender = LogSender::new(rx, client, settings.url, metrics);
        (shipper, Some(sender))
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled { .. })
    }

    #[must_use]
    pub fn disabled_reason(&self) -> Option<&str> {
        match self {
            Self::Disabled { reason } => Some(reason.as_ref()),
            Self::Enabled { .. } => None,
        }
    }

    /// Whether a record of `severity` would be shipped remotely.
    #[must_use]
    pub fn accepts(&self, severity: Severity) -> bool {
        match self {
            Self::Disabled { .. } => false,
            Self::Enabled { min_severity, .. } => severity >= *min_severity,
        }
    }

    /// Builds a record for `message` and enqueues it if `severity` qualifies.
    pub fn ship(&self, severity: Severity, message: impl Into<String>) {
        if let Self::Enabled { service_id, .. } = self {
            if self.accepts(severity) {
                self.enqueue(LogRecord::new(severity, service_id.as_ref(), message));
            }
        }
    }

    /// Appends `record` without waiting. Returns whether it was queued.
    ///
    /// A full queue drops the record with a console warning; the caller
    /// never sees an error.
    pub fn enqueue(&self, record: LogRecord) -> bool {
        let Self::Enabled { queue, metrics, .. } = self else {
            return false;
        };
        match queue.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                metrics.increment(Counter::LogRecordsDropped);
                warn!(target: CONSOLE_TARGET, "mTLS log queue is full. Log message dropped.");
                false
            }
            Err(TrySendError::Closed(_)) => {
                metrics.increment(Counter::LogRecordsDropped);
                warn!(target: CONSOLE_TARGET, "mTLS log sender has stopped. Log message dropped.");
                false
            }
        }
    }
}

impl std::fmt::Debug for LogShipper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled { reason } => f.debug_struct("Disabled").field("reason", reason).finish(),
            Self::Enabled {
                service_id,
                min_severity,
                ..
            } => f
                .debug_struct("Enabled")
                .field("service_id", service_id)
                .field("min_severity", min_severity)
                .finish_non_exhaustive(),
        }
    }
}

/// Background task delivering queued records one by one.
pub struct LogSender {
    rx: mpsc::Receiver<LogRecord>,
    client: reqwest::Client,
    url: String,
    metrics: Arc<MetricsRegistry>,
}

impl LogSender {
    #[must_use]
    pub fn new(
        rx: mpsc::Receiver<LogRecord>,
        client: reqwest::Client,
        url: impl Into<String>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            rx,
            client,
            url: url.into(),
            metrics,
        }
    }

    /// Delivers records until `cancel` fires, then drains what is already
    /// queued and returns. Also returns once every producer is gone.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                record = self.rx.recv() => match record {
                    Some(record) => self.deliver(&record).await,
                    None => {
                        debug!(target: CONSOLE_TARGET, "Log queue closed, sender exiting");
                        return;
                    }
                },
                () = cancel.cancelled() => {
                    debug!(target: CONSOLE_TARGET, "Log sender received shutdown signal, draining remaining records");
                    while let Ok(record) = self.rx.try_recv() {
                        self.deliver(&record).await;
                    }
                    return;
                }
            }
        }
    }

    async fn deliver(&self, record: &LogRecord) {
        let outcome = self.client.post(&self.url).json(record).send().await;
        let failure = match outcome {
            Ok(response) if response.status().is_success() => return,
            Ok(response) => format!("collector responded with status {}", response.status()),
            Err(e) => e.to_string(),
        };
        self.metrics.increment(Counter::LogDeliveryFailures);
        error!(target: CONSOLE_TARGET, "Failed to send log via mTLS: {failure}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use tracing_test::traced_test;

    fn record(message: &str) -> LogRecord {
        LogRecord::new(Severity::Info, "svc", message)
    }

    #[test]
    #[traced_test]
    fn overflow_keeps_first_records_and_drops_the_rest() {
        let metrics = Arc::new(MetricsRegistry::new("svc"));
        let (shipper, mut rx) = LogShipper::new("svc", Severity::Info, 3, Arc::clone(&metrics));

        // Sender never started: nothing drains the queue.
        let queued: Vec<bool> = (0..5).map(|i| shipper.enqueue(record(&format!("m{i}")))).collect();
        assert_eq!(queued, vec![true, true, true, false, false]);

        let mut retained = Vec::new();
        while let Ok(record) = rx.try_recv() {
            retained.push(record.message);
        }
        assert_eq!(retained, vec!["m0", "m1", "m2"]);
        assert_eq!(metrics.get(Counter::LogRecordsDropped), 2);
        logs_assert(|lines: &[&str]| {
            let drops = lines
                .iter()
                .filter(|line| line.contains("mTLS log queue is full. Log message dropped."))
                .count();
            if drops == 2 {
                Ok(())
            } else {
                Err(format!("expected 2 drop warnings, saw {drops}"))
            }
        });
    }

    #[test]
    fn disabled_shipper_ignores_records() {
        let shipper = LogShipper::disabled("no certificates");
        assert!(!shipper.is_enabled());
        assert!(!shipper.accepts(Severity::Critical));
        assert!(!shipper.enqueue(record("dropped")));
        assert_eq!(shipper.disabled_reason(), Some("no certificates"));
    }

    #[test]
    fn records_below_minimum_severity_stay_local() {
        let metrics = Arc::new(MetricsRegistry::new("svc"));
        let (shipper, mut rx) = LogShipper::new("svc", Severity::Warning, 10, metrics);

        shipper.ship(Severity::Info, "local only");
        shipper.ship(Severity::Error, "shipped");

        let shipped = rx.try_recv().expect("one record");
        assert_eq!(shipped.message, "shipped");
        assert_eq!(shipped.severity, Severity::Error);
        assert_eq!(shipped.service_id, "svc");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn missing_material_disables_shipper() {
        let config = AppConfig::from_env_iter(vec![
            ("container_name", "svc"),
            ("iam_base_url", "https://iam"),
            ("iam_client_id", "id"),
            ("iam_client_secret", "secret"),
        ])
        .expect("config");
        let (shipper, sender) =
            LogShipper::from_config(&config, Arc::new(MetricsRegistry::new("svc")));
        assert!(!shipper.is_enabled());
        assert!(sender.is_none());
        assert!(shipper
            .disabled_reason()
            .is_some_and(|reason| reason.contains("log_endpoint")));
    }

    #[tokio::test]
    async fn sender_posts_records_as_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/logs")
            .match_header("content-type", "application/json")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "severity": "info",
                "service_id": "svc",
                "message": "hello",
                "version": "1.0.0",
            })))
            .with_status(202)
            .expect(1)
            .create_async()
            .await;

        let metrics = Arc::new(MetricsRegistry::new("svc"));
        let (shipper, rx) = LogShipper::new("svc", Severity::Info, 10, Arc::clone(&metrics));
        let sender = LogSender::new(
            rx,
            reqwest::Client::new(),
            format!("{}/v1/logs", server.url()),
            Arc::clone(&metrics),
        );
        shipper.ship(Severity::Info, "hello");
        drop(shipper);

        // Queue closes once the only producer is dropped.
        sender.run(CancellationToken::new()).await;
        mock.assert_async().await;
        assert_eq!(metrics.get(Counter::LogDeliveryFailures), 0);
    }

    #[tokio::test]
    async fn delivery_failures_are_counted_and_skipped() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/logs")
            .with_status(500)
            .expect(2)
            .create_async()
            .await;

        let metrics = Arc::new(MetricsRegistry::new("svc"));
        let (shipper, rx) = LogShipper::new("svc", Severity::Info, 10, Arc::clone(&metrics));
        let sender = LogSender::new(
            rx,
            reqwest::Client::new(),
            format!("{}/v1/logs", server.url()),
            Arc::clone(&metrics),
        );
        shipper.ship(Severity::Error, "first");
        shipper.ship(Severity::Error, "second");
        drop(shipper);

        sender.run(CancellationToken::new()).await;
        mock.assert_async().await;
        assert_eq!(metrics.get(Counter::LogDeliveryFailures), 2);
    }

    #[tokio::test]
    async fn cancellation_drains_queued_records() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/logs")
            .with_status(200)
            .expect(3)
            .create_async()
            .await;

        let metrics = Arc::new(MetricsRegistry::new("svc"));
        let (shipper, rx) = LogShipper::new("svc", Severity::Info, 10, Arc::clone(&metrics));
        let sender = LogSender::new(
            rx,
            reqwest::Client::new(),
            format!("{}/v1/logs", server.url()),
            metrics,
        );
        for i in 0..3 {
            shipper.ship(Severity::Info, format!("m{i}"));
        }

        let cancel = CancellationToken::new();
        cancel.cancel();
        // The producer is still alive; only cancellation ends the loop.
        sender.run(cancel).await;
        mock.assert_async().await;
        drop(shipper);
    }
}
