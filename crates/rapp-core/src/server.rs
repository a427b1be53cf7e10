// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Metrics and health endpoints, all under `/<service>/`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::consumer::ConsumerState;
use crate::metrics::MetricsRegistry;

const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Clone)]
pub struct ServerState {
    pub metrics: Arc<MetricsRegistry>,
    pub consumer_state: watch::Receiver<ConsumerState>,
}

#[derive(Debug, Serialize)]
struct HealthReport {
    healthy: bool,
    checks: Vec<CheckResult>,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: &'static str,
    passed: bool,
    details: Option<String>,
}

impl HealthReport {
    fn single(passed: bool, details: Option<String>) -> Self {
        Self {
            healthy: passed,
            checks: vec![CheckResult {
                name: "server",
                passed,
                details,
            }],
        }
    }
}

/// Builds the router for `service` (usually the container name).
pub fn router(service: &str, state: ServerState) -> Router {
    Router::new()
        .route(&format!("/{service}/metrics"), get(metrics))
        .route(&format!("/{service}/health/liveness"), get(liveness))
        .route(&format!("/{service}/health/readiness"), get(readiness))
        .with_state(state)
}

/// Serves `router` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        debug!("Exposition server listening on {addr}");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn metrics(State(state): State<ServerState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)],
        state.metrics.snapshot(),
    )
}

async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthReport::single(true, None)))
}

async fn readiness(State(state): State<ServerState>) -> impl IntoResponse {
    let consumer = *state.consumer_state.borrow();
    if consumer.is_ready() {
        (StatusCode::OK, Json(HealthReport::single(true, None)))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthReport::single(
                false,
                Some(format!("event consumer is {consumer}")),
            )),
        )
    }
}
