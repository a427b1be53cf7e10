// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::config::ConfigError;
use crate::consumer::ConsumerError;
use crate::credentials::AuthError;
use crate::http::HttpError;

/// Errors surfaced by the lifecycle coordinator.
#[derive(Debug, thiserror::Error)]
pub enum ServicesError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] HttpError),

    #[error("Failed to obtain initial credential: {0}")]
    Credential(#[from] AuthError),

    #[error("Failed to start event consumer: {0}")]
    ConsumerStart(#[from] ConsumerError),

    #[error("Shutdown timeout exceeded")]
    ShutdownTimeout,
}
