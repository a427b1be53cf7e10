// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process-wide monotonic counters.
//!
//! Every counter is registered when the [`MetricsRegistry`] is built, so the
//! exposition lists all of them (zero-valued included) from the first scrape.
//! Counters are plain relaxed atomics: incrementing never blocks and never
//! fails, which makes the registry safe to share with every component.

use std::fmt::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};

/// Names of every counter known to the registry.
///
/// The order of [`Counter::ALL`] is the order of the text exposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    NetworkConfigurationSuccessfulRequests,
    NetworkConfigurationFailedRequests,
    TopologySuccessfulRequests,
    TopologyFailedRequests,
    MessagesConsumed,
    FilteredMessagesByMotype,
    FilteredMessagesByFdn,
    CompleteBatchOfMessagesConsumed,
    PartialBatchOfMessagesConsumed,
    EmptyBatchOfMessagesConsumed,
    SchemaRegistrySuccessfulRequests,
    SchemaRegistryFailedRequests,
    StreamTransportErrors,
    StreamConsumerCooldowns,
    LogRecordsDropped,
    LogDeliveryFailures,
}

impl Counter {
    pub const ALL: [Counter; 16] = [
        Counter::NetworkConfigurationSuccessfulRequests,
        Counter::NetworkConfigurationFailedRequests,
        Counter::TopologySuccessfulRequests,
        Counter::TopologyFailedRequests,
        Counter::MessagesConsumed,
        Counter::FilteredMessagesByMotype,
        Counter::FilteredMessagesByFdn,
        Counter::CompleteBatchOfMessagesConsumed,
        Counter::PartialBatchOfMessagesConsumed,
        Counter::EmptyBatchOfMessagesConsumed,
        Counter::SchemaRegistrySuccessfulRequests,
        Counter::SchemaRegistryFailedRequests,
        Counter::StreamTransportErrors,
        Counter::StreamConsumerCooldowns,
        Counter::LogRecordsDropped,
        Counter::LogDeliveryFailures,
    ];

    /// Metric name without prefix or `_total` suffix.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Counter::NetworkConfigurationSuccessfulRequests => {
                "network_configuration_successful_requests"
            }
            Counter::NetworkConfigurationFailedRequests => "network_configuration_failed_requests",
            Counter::TopologySuccessfulRequests => "topology_successful_requests",
            Counter::TopologyFailedRequests => "topology_failed_requests",
            Counter::MessagesConsumed => "messages_consumed",
            Counter::FilteredMessagesByMotype => "filtered_messages_by_motype",
            Counter::FilteredMessagesByFdn => "filtered_messages_by_fdn",
            Counter::CompleteBatchOfMessagesConsumed => "complete_batch_of_messages_consumed",
            Counter::PartialBatchOfMessagesConsumed => "partial_batch_of_messages_consumed",
            Counter::EmptyBatchOfMessagesConsumed => "empty_batch_of_messages_consumed",
            Counter::SchemaRegistrySuccessfulRequests => "schema_registry_successful_requests",
            Counter::SchemaRegistryFailedRequests => "schema_registry_failed_requests",
            Counter::StreamTransportErrors => "stream_transport_errors",
            Counter::StreamConsumerCooldowns => "stream_consumer_cooldowns",
            Counter::LogRecordsDropped => "log_records_dropped",
            Counter::LogDeliveryFailures => "log_delivery_failures",
        }
    }

    /// Help text rendered on the `# HELP` line.
    #[must_use]
    pub fn documentation(self) -> &'static str {
        match self {
            Counter::NetworkConfigurationSuccessfulRequests => {
                "Total number of successful Network Configuration requests"
            }
            Counter::NetworkConfigurationFailedRequests => {
                "Total number of failed Network Configuration requests"
            }
            Counter::TopologySuccessfulRequests => {
                "Total number of successful Topology & Inventory requests"
            }
            Counter::TopologyFailedRequests => "Total number of failed Topology & Inventory requests",
            Counter::MessagesConsumed => "Total number of messages consumed from Message Bus",
            Counter::FilteredMessagesByMotype => {
                "Number of messages that have been filtered by MO Type"
            }
            Counter::FilteredMessagesByFdn => {
                "Number of messages that are relevant to the cells collected at startup"
            }
            Counter::CompleteBatchOfMessagesConsumed => "Total number of complete batches consumed",
            Counter::PartialBatchOfMessagesConsumed => {
                "Total number of batches which have reached timeout that are partially filled"
            }
            Counter::EmptyBatchOfMessagesConsumed => {
                "Total number of batches which have reached timeout with zero messages"
            }
            Counter::SchemaRegistrySuccessfulRequests => {
                "Total number of successful requests made to Schema Registry"
            }
            Counter::SchemaRegistryFailedRequests => {
                "Total number of failed requests made to Schema Registry"
            }
            Counter::StreamTransportErrors => {
                "Total number of per-record errors reported by the stream transport"
            }
            Counter::StreamConsumerCooldowns => {
                "Total number of consumer iterations that failed and entered cooldown"
            }
            Counter::LogRecordsDropped => "Total number of log records dropped on a full queue",
            Counter::LogDeliveryFailures => {
                "Total number of log records the collector failed to accept"
            }
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Registry holding one atomic cell per [`Counter`].
#[derive(Debug)]
pub struct MetricsRegistry {
    prefix: String,
    counters: [AtomicU64; Counter::ALL.len()],
}

impl MetricsRegistry {
    /// Builds the registry with every counter at zero.
    ///
    /// `service_name` becomes the exposition prefix with dashes replaced by
    /// underscores (`network-data-app` -> `network_data_app`).
    #[must_use]
    pub fn new(service_name: &str) -> Self {
        Self {
            prefix: service_name.replace('-', "_"),
            counters: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn increment(&self, counter: Counter) {
        self.counters[counter.index()].fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter.index()].load(Ordering::Relaxed)
    }

    /// Renders the text exposition of every registered counter.
    ///
    /// Output is stable: two calls without intervening increments return the
    /// same string.
    #[must_use]
    pub fn snapshot(&self) -> String {
        let mut out = String::new();
        for counter in Counter::ALL {
            let series = format!("{}_{}_total", self.prefix, counter.name());
            // Writing into a String cannot fail.
            let _ = writeln!(out, "# HELP {series} {}", counter.documentation());
            let _ = writeln!(out, "# TYPE {series} counter");
            let _ = writeln!(out, "{series} {:.1}", self.get(counter) as f64);
        }
        out
    }
}
