// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use mockito::Matcher;
use rapp_core::logs::{LogSender, LogShipper, Severity, ShipperLayer, CONSOLE_TARGET};
use rapp_core::metrics::{Counter, MetricsRegistry};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;

#[tokio::test]
async fn tracing_events_reach_the_collector() {
    let mut server = mockito::Server::new_async().await;
    let shipped = server
        .mock("POST", "/logs")
        .match_body(Matcher::PartialJson(json!({
            "severity": "warning",
            "service_id": "network-data-template-app",
            "message": "Cell list is empty cells=0",
            "version": "1.0.0",
        })))
        .with_status(202)
        .expect(1)
        .create_async()
        .await;

    let metrics = Arc::new(MetricsRegistry::new("network-data-template-app"));
    let (shipper, rx) = LogShipper::new(
        "network-data-template-app",
        Severity::Info,
        16,
        Arc::clone(&metrics),
    );
    let subscriber = tracing_subscriber::registry().with(ShipperLayer::new(shipper));
    {
        let _guard = tracing::subscriber::set_default(subscriber);
        tracing::debug!("below the shipping threshold");
        tracing::info!(target: CONSOLE_TARGET, "console only");
        tracing::warn!(cells = 0, "Cell list is empty");
    }

    let cancel = CancellationToken::new();
    cancel.cancel();
    LogSender::new(
        rx,
        reqwest::Client::new(),
        format!("{}/logs", server.url()),
        Arc::clone(&metrics),
    )
    .run(cancel)
    .await;

    shipped.assert_async().await;
    assert_eq!(metrics.get(Counter::LogDeliveryFailures), 0);
    assert_eq!(metrics.get(Counter::LogRecordsDropped), 0);
}

#[tokio::test]
async fn collector_errors_are_counted_and_skipped() {
    let mut server = mockito::Server::new_async().await;
    let collector = server
        .mock("POST", "/logs")
        .with_status(500)
        .expect(2)
        .create_async()
        .await;

    let metrics = Arc::new(MetricsRegistry::new("app"));
    let (shipper, rx) = LogShipper::new("app", Severity::Debug, 4, Arc::clone(&metrics));
    shipper.ship(Severity::Error, "first");
    shipper.ship(Severity::Critical, "second");
    drop(shipper);

    LogSender::new(
        rx,
        reqwest::Client::new(),
        format!("{}/logs", server.url()),
        Arc::clone(&metrics),
    )
    .run(CancellationToken::new())
    .await;

    collector.assert_async().await;
    assert_eq!(metrics.get(Counter::LogDeliveryFailures), 2);
}

#[test]
fn disabled_shipper_accepts_nothing() {
    let shipper = LogShipper::disabled("no certificates");
    assert!(!shipper.is_enabled());
    assert!(!shipper.accepts(Severity::Critical));
    assert_eq!(shipper.disabled_reason(), Some("no certificates"));
}
