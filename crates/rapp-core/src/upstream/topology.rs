// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{Upstream, UpstreamClient};
use crate::retry::FetchError;

const TOPOLOGY_PATH: &str = "/topology-inventory/v1alpha11";
const NR_CELL_DU_KEY: &str = "o-ran-smo-teiv-ran:NRCellDU";
const SOURCE_ID_PREFIX: &str = "urn:3gpp:dn:";

#[derive(Deserialize)]
struct EntityPage {
    #[serde(default)]
    items: Vec<Value>,
}

/// Topology & Inventory reads.
#[derive(Clone)]
pub struct TopologyClient {
    upstream: Arc<UpstreamClient>,
}

impl TopologyClient {
    #[must_use]
    pub fn new(upstream: Arc<UpstreamClient>) -> Self {
        Self { upstream }
    }

    /// NRCellDU entities with their source ids, at most `limit` of them.
    pub async fn nr_cell_dus(&self, limit: usize) -> Result<Vec<Value>, FetchError> {
        let path = format!(
            "{TOPOLOGY_PATH}/domains/RAN/entity-types/NRCellDU/entities?targetFilter=/sourceIds&limit={limit}"
        );
        let page: EntityPage = self.upstream.get_json(&path, Upstream::Topology).await?;
        debug!("Retrieved {} items from Topology & Inventory", page.items.len());
        Ok(page.items)
    }
}

/// First `urn:3gpp:dn:` source id of every cell that has one.
#[must_use]
pub fn source_ids_from_cells(cells: &[Value]) -> Vec<String> {
    let source_ids: Vec<String> = cells
        .iter()
        .filter_map(|cell| {
            let found = cell
                .get(NR_CELL_DU_KEY)
                .and_then(|entries| entries.get(0))
                .and_then(|entry| entry.get("sourceIds"))
                .and_then(Value::as_array)
                .and_then(|ids| {
                    ids.iter()
                        .filter_map(Value::as_str)
                        .find(|id| id.starts_with(SOURCE_ID_PREFIX))
                })
                .map(str::to_string);
            if found.is_none() {
                debug!("No source ID obtained from cell: {cell}");
            }
            found
        })
        .collect();
    debug!("Obtained {} source IDs", source_ids.len());
    source_ids
}
