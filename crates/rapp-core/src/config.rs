// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Flat key/value configuration for the integration fabric.
//!
//! Values come from the process environment in production and from plain
//! iterators in tests. Keys are matched case-insensitively, so
//! `IAM_BASE_URL` and `iam_base_url` name the same setting.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::consumer::ConsumerSettings;
use crate::consumer::transport::SubscriptionSettings;
use crate::logs::record::Severity;
use crate::retry::RetryPolicy;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_LOG_QUEUE_CAPACITY: usize = 1000;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY_SECS: f64 = 1.0;
const DEFAULT_RETRY_MULTIPLIER: f64 = 2.0;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_TOKEN_REFRESH_LEEWAY_SECS: u64 = 10;
const DEFAULT_CONSUMER_MAX_RECORDS: usize = 1;
const DEFAULT_CONSUMER_RECEIVE_TIMEOUT_MS: u64 = 1000;
const DEFAULT_CONSUMER_COOLDOWN_SECS: u64 = 5;
const DEFAULT_SERVER_PORT: u16 = 8050;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required configuration key '{0}'")]
    Missing(&'static str),

    #[error("invalid value for '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("certificate material incomplete, missing: {}", .0.join(", "))]
    Incomplete(Vec<&'static str>),
}

/// Paths and endpoint used by the mutual-TLS log collector client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogCollectorSettings {
    pub url: String,
    pub ca_cert: PathBuf,
    pub app_cert: PathBuf,
    pub app_key: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Service identity; also the metrics prefix and the log `service_id`.
    pub container_name: String,
    pub iam_base_url: String,
    pub iam_client_id: String,
    pub iam_client_secret: String,

    pub ca_cert_file_path: Option<String>,
    pub ca_cert_file_name: Option<String>,
    pub app_cert_file_path: Option<String>,
    pub app_cert: Option<String>,
    pub app_key: Option<String>,

    pub log_endpoint: Option<String>,
    /// Console filter directive (`info`, `debug`, ...).
    pub log_level: String,
    /// Records below this severity are written to console only.
    pub log_ship_min_severity: Severity,
    pub log_queue_capacity: usize,

    pub max_retries: u32,
    pub retry_delay: Duration,
    pub retry_multiplier: f64,
    pub request_timeout: Duration,
    pub token_refresh_leeway: Duration,

    pub kafka_bootstrap_servers: Option<String>,
    pub kafka_topic: Option<String>,
    pub kafka_group_id_prefix: Option<String>,
    pub kafka_ca_cert_path: Option<String>,

    pub consumer_max_records: usize,
    pub consumer_receive_timeout: Duration,
    pub consumer_cooldown: Duration,

    pub server_port: u16,
}

impl AppConfig {
    /// Reads the configuration from the process environment.
    pub fn from_os_env() -> Result<Self, ConfigError> {
        Self::from_env_iter(env::vars())
    }

    /// Builds the configuration from an iterator of key/value pairs.
    pub fn from_env_iter<I, K, V>(iter: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = iter
            .into_iter()
            .map(|(k, v)| (k.into().to_ascii_lowercase(), v.into()))
            .collect();
        let source = Source { map };

        let config = Self {
            container_name: source.required("container_name")?,
            iam_base_url: source
                .required("iam_base_url")?
                .trim_end_matches('/')
                .to_string(),
            iam_client_id: source.required("iam_client_id")?,
            iam_client_secret: source.required("iam_client_secret")?,
            ca_cert_file_path: source.optional("ca_cert_file_path"),
            ca_cert_file_name: source.optional("ca_cert_file_name"),
            app_cert_file_path: source.optional("app_cert_file_path"),
            app_cert: source.optional("app_cert"),
            app_key: source.optional("app_key"),
            log_endpoint: source.optional("log_endpoint"),
            log_level: source
                .optional("log_level")
                .map(|level| level.to_ascii_lowercase())
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            log_ship_min_severity: source.parsed("log_ship_min_severity", Severity::Info)?,
            log_queue_capacity: source
                .parsed("log_queue_capacity", DEFAULT_LOG_QUEUE_CAPACITY)?,
            max_retries: source.parsed("max_retries", DEFAULT_MAX_RETRIES)?,
            retry_delay: source.seconds_f64("retry_delay", DEFAULT_RETRY_DELAY_SECS)?,
            retry_multiplier: source.parsed("retry_multiplier", DEFAULT_RETRY_MULTIPLIER)?,
            request_timeout: Duration::from_secs(
                source.parsed("request_timeout_secs", DEFAULT_REQUEST_TIMEOUT_SECS)?,
            ),
            token_refresh_leeway: Duration::from_secs(source.parsed(
                "token_refresh_leeway_secs",
                DEFAULT_TOKEN_REFRESH_LEEWAY_SECS,
            )?),
            kafka_bootstrap_servers: source.optional("kafka_bootstrap_servers"),
            kafka_topic: source.optional("kafka_topic"),
            kafka_group_id_prefix: source.optional("kafka_group_id_prefix"),
            kafka_ca_cert_path: source.optional("kafka_ca_cert_path"),
            consumer_max_records: source
                .parsed("consumer_max_records", DEFAULT_CONSUMER_MAX_RECORDS)?,
            consumer_receive_timeout: Duration::from_millis(source.parsed(
                "consumer_receive_timeout_ms",
                DEFAULT_CONSUMER_RECEIVE_TIMEOUT_MS,
            )?),
            consumer_cooldown: Duration::from_secs(
                source.parsed("consumer_cooldown_secs", DEFAULT_CONSUMER_COOLDOWN_SECS)?,
            ),
            server_port: source.parsed("server_port", DEFAULT_SERVER_PORT)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Rejects values that parse but cannot be used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_queue_capacity == 0 {
            return Err(invalid("log_queue_capacity", "must be greater than 0"));
        }
        if self.consumer_max_records == 0 {
            return Err(invalid("consumer_max_records", "must be greater than 0"));
        }
        if !self.retry_multiplier.is_finite() || self.retry_multiplier < 1.0 {
            return Err(invalid("retry_multiplier", "must be a finite number >= 1"));
        }
        if self.request_timeout.is_zero() {
            return Err(invalid("request_timeout_secs", "must be greater than 0"));
        }
        if self.consumer_receive_timeout.is_zero() {
            return Err(invalid("consumer_receive_timeout_ms", "must be greater than 0"));
        }
        Ok(())
    }

    /// Identity provider token endpoint.
    #[must_use]
    pub fn token_url(&self) -> String {
        format!(
            "{}/auth/realms/master/protocol/openid-connect/token",
            self.iam_base_url
        )
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_delay, self.retry_multiplier)
    }

    /// CA bundle used to verify the identity provider and upstream services.
    #[must_use]
    pub fn ca_bundle_path(&self) -> Option<PathBuf> {
        match (&self.ca_cert_file_path, &self.ca_cert_file_name) {
            (Some(dir), Some(name)) => Some(PathBuf::from(dir).join(name)),
            _ => None,
        }
    }

    /// Resolves the log collector settings, or lists what is missing.
    pub fn log_collector(&self) -> Result<LogCollectorSettings, ConfigError> {
        let fields = [
            ("log_endpoint", &self.log_endpoint),
            ("ca_cert_file_path", &self.ca_cert_file_path),
            ("ca_cert_file_name", &self.ca_cert_file_name),
            ("app_cert_file_path", &self.app_cert_file_path),
            ("app_cert", &self.app_cert),
            ("app_key", &self.app_key),
        ];
        let missing: Vec<&'static str> = fields
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(key, _)| *key)
            .collect();

        match (
            &self.log_endpoint,
            self.ca_bundle_path(),
            &self.app_cert_file_path,
            &self.app_cert,
            &self.app_key,
        ) {
            (Some(endpoint), Some(ca_cert), Some(cert_dir), Some(cert), Some(key))
                if missing.is_empty() =>
            {
                let cert_dir = PathBuf::from(cert_dir);
                Ok(LogCollectorSettings {
                    url: format!("https://{endpoint}"),
                    ca_cert,
                    app_cert: cert_dir.join(cert),
                    app_key: cert_dir.join(key),
                })
            }
            _ => Err(ConfigError::Incomplete(missing)),
        }
    }

    /// Event-stream subscription settings.
    ///
    /// The consumer group is `<kafka_group_id_prefix>-<iam_client_id>` so
    /// every replica of the same client shares one group.
    pub fn subscription(&self) -> Result<SubscriptionSettings, ConfigError> {
        let bootstrap_servers = self
            .kafka_bootstrap_servers
            .clone()
            .ok_or(ConfigError::Missing("kafka_bootstrap_servers"))?;
        let topic = self
            .kafka_topic
            .clone()
            .ok_or(ConfigError::Missing("kafka_topic"))?;
        let prefix = self
            .kafka_group_id_prefix
            .as_deref()
            .ok_or(ConfigError::Missing("kafka_group_id_prefix"))?;

        Ok(SubscriptionSettings {
            bootstrap_servers,
            topic,
            group_id: format!("{prefix}-{}", self.iam_client_id),
            ca_cert_path: self
                .kafka_ca_cert_path
                .as_ref()
                .map(PathBuf::from)
                .or_else(|| self.ca_bundle_path()),
        })
    }

    #[must_use]
    pub fn consumer_settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            max_records: self.consumer_max_records,
            receive_timeout: self.consumer_receive_timeout,
            cooldown: self.consumer_cooldown,
        }
    }
}

struct Source {
    map: HashMap<String, String>,
}

impl Source {
    fn optional(&self, key: &str) -> Option<String> {
        self.map.get(key).and_then(|value| sanitize_non_empty(value))
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.optional(key).ok_or(ConfigError::Missing(key))
    }

    fn parsed<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            Some(raw) => raw
                .parse::<T>()
                .map_err(|e| invalid(key, format!("'{raw}': {e}"))),
            None => Ok(default),
        }
    }

    fn seconds_f64(&self, key: &'static str, default: f64) -> Result<Duration, ConfigError> {
        let secs: f64 = self.parsed(key, default)?;
        Duration::try_from_secs_f64(secs).map_err(|e| invalid(key, e.to_string()))
    }
}

fn sanitize_non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.into(),
    }
}
