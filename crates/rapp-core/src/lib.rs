// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Integration fabric for rApp services.
//!
//! One [`CredentialBroker`] is shared by the upstream HTTP client and the
//! event-stream transport. Outbound reads go through [`retry::fetch`], the
//! [`EventConsumer`] runs its blocking receive on the blocking pool, and the
//! [`LogShipper`] forwards `tracing` events to a remote collector through a
//! bounded queue. [`Services`] builds and tears all of it down.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod consumer;
pub mod credentials;
pub mod error;
pub mod http;
pub mod logs;
pub mod metrics;
pub mod retry;
pub mod server;
pub mod services;
pub mod upstream;

#[cfg(test)]
mod test_support;

pub use config::{AppConfig, ConfigError};
pub use consumer::{ConsumerHandle, ConsumerState, EventConsumer, PayloadProcessor};
pub use credentials::{CredentialBroker, TokenRefresher};
pub use error::ServicesError;
pub use logs::{Formatter, LogShipper, ShipperLayer};
pub use metrics::{Counter, MetricsRegistry};
pub use retry::{FetchError, RetryPolicy};
pub use services::{Components, Services, ServicesHandle};
