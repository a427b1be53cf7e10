// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use rapp_core::consumer::kafka::KafkaConnector;
use rapp_core::{server, AppConfig, Components, Formatter, LogShipper, Services, ShipperLayer};

const AGENT_HOST: &str = "0.0.0.0";

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_os_env().context("could not load configuration")?;
    let components = Components::new(&config, Arc::new(KafkaConnector));
    init_logging(&config, components.shipper.clone())?;
    debug!("Logging subsystem enabled");

    let handle = match Services::new(config.clone(), components).start().await {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to start services: {e}");
            return Err(e.into());
        }
    };

    let listener = TcpListener::bind((AGENT_HOST, config.server_port))
        .await
        .with_context(|| format!("could not bind port {}", config.server_port))?;
    info!("Serving metrics and health on port {}", config.server_port);
    let router = server::router(&config.container_name, handle.server_state());
    let server_cancel = CancellationToken::new();
    let server_task = tokio::spawn(server::serve(listener, router, server_cancel.clone()));

    wait_for_shutdown_signal().await;

    server_cancel.cancel();
    let shutdown = handle.shutdown().await;
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Exposition server failed: {e}"),
        Err(e) => error!("Exposition server task failed: {e}"),
    }
    shutdown.map_err(Into::into)
}

fn init_logging(config: &AppConfig, shipper: LogShipper) -> anyhow::Result<()> {
    let env_filter = format!(
        "h2=off,hyper=off,rustls=off,reqwest=off,{}",
        config.log_level
    );
    let filter = EnvFilter::try_new(env_filter).context("could not parse log level")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .event_format(Formatter::new(config.container_name.clone())),
        )
        .with(ShipperLayer::new(shipper))
        .try_init()
        .context("setting default subscriber failed")
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(terminate) => terminate,
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                wait_for_ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            () = wait_for_ctrl_c() => {}
            _ = terminate.recv() => info!("Received SIGTERM, initiating shutdown"),
        }
    }
    #[cfg(not(unix))]
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating shutdown"),
        Err(e) => error!("Failed to listen for Ctrl+C: {e}"),
    }
}
