// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Authenticated JSON reads against upstream data services.

pub mod network_configuration;
pub mod topology;

use std::fmt;
use std::sync::Arc;

use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::credentials::CredentialBroker;
use crate::metrics::{Counter, MetricsRegistry};
use crate::retry::{fetch, FetchError, RetryPolicy};

pub use network_configuration::{
    NetworkConfigurationClient, NetworkConfigurationError, SourceAttribute, ALLOWED_ATTRIBUTES,
};
pub use topology::{source_ids_from_cells, TopologyClient};

/// Upstream service a request is accounted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Upstream {
    Topology,
    NetworkConfiguration,
    SchemaRegistry,
}

impl Upstream {
    #[must_use]
    pub fn success_counter(self) -> Counter {
        match self {
            Upstream::Topology => Counter::TopologySuccessfulRequests,
            Upstream::NetworkConfiguration => Counter::NetworkConfigurationSuccessfulRequests,
            Upstream::SchemaRegistry => Counter::SchemaRegistrySuccessfulRequests,
        }
    }

    #[must_use]
    pub fn failure_counter(self) -> Counter {
        match self {
            Upstream::Topology => Counter::TopologyFailedRequests,
            Upstream::NetworkConfiguration => Counter::NetworkConfigurationFailedRequests,
            Upstream::SchemaRegistry => Counter::SchemaRegistryFailedRequests,
        }
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Upstream::Topology => "Topology & Inventory",
            Upstream::NetworkConfiguration => "Network Configuration",
            Upstream::SchemaRegistry => "Schema Registry",
        })
    }
}

/// HTTP client for upstream services behind the IAM gateway.
///
/// Every attempt carries the broker's current credential. A 401 replaces
/// the rejected credential before the retry loop tries again.
pub struct UpstreamClient {
    client: reqwest::Client,
    base_url: String,
    broker: Arc<CredentialBroker>,
    metrics: Arc<MetricsRegistry>,
    policy: RetryPolicy,
}

impl UpstreamClient {
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        broker: Arc<CredentialBroker>,
        metrics: Arc<MetricsRegistry>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            broker,
            metrics,
            policy,
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// GETs `path` (relative to the base URL) and decodes the JSON body.
    pub async fn get_json<T>(&self, path: &str, upstream: Upstream) -> Result<T, FetchError>
    where
        T: DeserializeOwned,
    {
        const NO_QUERY: &[(&str, &str)] = &[];
        self.get_json_with_query(path, NO_QUERY, upstream).await
    }

    /// Like [`UpstreamClient::get_json`], with `query` form-encoded onto the URL.
    pub async fn get_json_with_query<T, Q>(
        &self,
        path: &str,
        query: &Q,
        upstream: Upstream,
    ) -> Result<T, FetchError>
    where
        T: DeserializeOwned,
        Q: Serialize + Sync + ?Sized,
    {
        let url = format!("{}{}", self.base_url, path);
        let url = url.as_str();
        debug!("Getting {upstream} data from {url}");
        fetch(&self.metrics, upstream, &self.policy, move |_| {
            self.attempt_get::<T, Q>(url, query)
        })
        .await
    }

    async fn attempt_get<T, Q>(&self, url: &str, query: &Q) -> Result<T, FetchError>
    where
        T: DeserializeOwned,
        Q: Serialize + Sync + ?Sized,
    {
        let credential = self.broker.get_token().await?;
        let response = self
            .client
            .get(url)
            .query(query)
            .header(AUTHORIZATION, credential.authorization())
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::UNAUTHORIZED {
                warn!("Credential rejected by {url}, refreshing");
                self.broker.refresh_after(&credential).await?;
            }
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }
}
