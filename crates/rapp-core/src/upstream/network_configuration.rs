// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Network Configuration (NCMP) attribute reads.
//!
//! A source id such as
//! `urn:3gpp:dn:SubNetwork=Europe,MeContext=A,ManagedElement=A,GNBDUFunction=1,NRCellDU=A-1`
//! is read from the passthrough-operational datastore of CM handle `A`, with
//! resource identifier `/ManagedElement[@id=A]/GNBDUFunction[@id=1]/NRCellDU[@id=A-1]`.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info};

use super::{Upstream, UpstreamClient};
use crate::retry::FetchError;

const NCMP_PATH: &str = "/ncmp/v1/ch";
const DATASTORE: &str = "ncmp-datastore:passthrough-operational";
const SOURCE_ID_PREFIX: &str = "urn:3gpp:dn:";
const ME_CONTEXT: &str = "MeContext";
const MANAGED_ELEMENT: &str = "ManagedElement";

/// Attributes that may be read.
pub const ALLOWED_ATTRIBUTES: [&str; 2] = ["administrativeState", "operationalState"];

#[derive(Debug, Error)]
pub enum NetworkConfigurationError {
    #[error("Invalid attribute: {attribute}. Allowed attributes are {}", allowed_attributes())]
    InvalidAttribute { attribute: String },
    #[error("Invalid source ID: {source_id}")]
    InvalidSourceId { source_id: String },
    #[error("Network Configuration request failed: {0}")]
    Fetch(#[from] FetchError),
}

fn allowed_attributes() -> String {
    let quoted: Vec<String> = ALLOWED_ATTRIBUTES.iter().map(|a| format!("'{a}'")).collect();
    format!("[{}]", quoted.join(", "))
}

fn check_attribute(attribute: &str) -> Result<(), NetworkConfigurationError> {
    if ALLOWED_ATTRIBUTES.contains(&attribute) {
        Ok(())
    } else {
        Err(NetworkConfigurationError::InvalidAttribute {
            attribute: attribute.to_string(),
        })
    }
}

/// Where a source id lives in NCMP.
#[derive(Debug, PartialEq, Eq)]
struct NcmpResource {
    cm_handle: String,
    resource_identifier: String,
}

impl NcmpResource {
    fn from_source_id(source_id: &str) -> Result<Self, NetworkConfigurationError> {
        let invalid = || NetworkConfigurationError::InvalidSourceId {
            source_id: source_id.to_string(),
        };

        let fdn = source_id.strip_prefix(SOURCE_ID_PREFIX).unwrap_or(source_id);
        let rdns = fdn
            .split(',')
            .map(|rdn| rdn.split_once('=').filter(|(kind, id)| !kind.is_empty() && !id.is_empty()))
            .collect::<Option<Vec<(&str, &str)>>>()
            .ok_or_else(invalid)?;

        let cm_handle = rdns
            .iter()
            .find(|(kind, _)| *kind == ME_CONTEXT)
            .or_else(|| rdns.iter().find(|(kind, _)| *kind == MANAGED_ELEMENT))
            .map(|(_, id)| *id)
            .filter(|id| {
                id.chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            })
            .ok_or_else(invalid)?;

        let start = rdns
            .iter()
            .position(|(kind, _)| *kind == MANAGED_ELEMENT)
            .ok_or_else(invalid)?;
        let resource_identifier = rdns[start..]
            .iter()
            .map(|(kind, id)| format!("/{kind}[@id={id}]"))
            .collect();

        Ok(Self {
            cm_handle: cm_handle.to_string(),
            resource_identifier,
        })
    }

    fn path(&self) -> String {
        format!("{NCMP_PATH}/{}/data/ds/{DATASTORE}", self.cm_handle)
    }
}

/// One source id's reading from a multi-cell read.
#[derive(Debug)]
pub struct SourceAttribute {
    pub source_id: String,
    pub reading: Result<Value, NetworkConfigurationError>,
}

/// Network Configuration reads.
#[derive(Clone)]
pub struct NetworkConfigurationClient {
    upstream: Arc<UpstreamClient>,
}

impl NetworkConfigurationClient {
    #[must_use]
    pub fn new(upstream: Arc<UpstreamClient>) -> Self {
        Self { upstream }
    }

    /// Reads `attribute` of the element named by `source_id`.
    ///
    /// An attribute outside [`ALLOWED_ATTRIBUTES`] is rejected without a request.
    pub async fn attribute(
        &self,
        source_id: &str,
        attribute: &str,
    ) -> Result<Value, NetworkConfigurationError> {
        check_attribute(attribute)?;
        self.read(source_id, attribute).await
    }

    /// Reads `attribute` for every source id in turn.
    ///
    /// A failed cell does not stop the others; each request is counted on its own.
    pub async fn attributes(
        &self,
        source_ids: &[String],
        attribute: &str,
    ) -> Result<Vec<SourceAttribute>, NetworkConfigurationError> {
        check_attribute(attribute)?;
        let mut readings = Vec::with_capacity(source_ids.len());
        for source_id in source_ids {
            let reading = self.read(source_id, attribute).await;
            readings.push(SourceAttribute {
                source_id: source_id.clone(),
                reading,
            });
        }
        Ok(readings)
    }

    async fn read(&self, source_id: &str, attribute: &str) -> Result<Value, NetworkConfigurationError> {
        info!("Reading attribute '{attribute}' for source ID '{source_id}'");
        let resource = NcmpResource::from_source_id(source_id)?;
        let options = format!("(fields=attributes/{attribute})");
        let query = [
            ("resourceIdentifier", resource.resource_identifier.as_str()),
            ("options", options.as_str()),
        ];

        match self
            .upstream
            .get_json_with_query(&resource.path(), &query, Upstream::NetworkConfiguration)
            .await
        {
            Ok(value) => {
                debug!("Successfully retrieved attribute for {source_id}");
                Ok(value)
            }
            Err(e) => {
                error!("Failed to get attribute for '{source_id}': {e}");
                Err(e.into())
            }
        }
    }
}
