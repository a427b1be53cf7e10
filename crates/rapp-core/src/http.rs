// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Outbound HTTP client construction.
//!
//! Every client verifies servers against the configured CA bundle when one is
//! present. The log collector client additionally presents the application
//! certificate (mutual TLS).

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::{Certificate, ClientBuilder, Identity};
use tracing::debug;

use crate::config::LogCollectorSettings;

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("failed to read {path}: {source}")]
    ReadPem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TLS material in {path}: {source}")]
    InvalidPem {
        path: PathBuf,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Certificate material for one client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsMaterial {
    /// Extra root used to verify the server.
    pub ca_cert: Option<PathBuf>,
    /// Client certificate and private key, both PEM.
    pub identity: Option<(PathBuf, PathBuf)>,
}

impl TlsMaterial {
    #[must_use]
    pub fn server_only(ca_cert: Option<PathBuf>) -> Self {
        Self {
            ca_cert,
            identity: None,
        }
    }

    #[must_use]
    pub fn mutual(settings: &LogCollectorSettings) -> Self {
        Self {
            ca_cert: Some(settings.ca_cert.clone()),
            identity: Some((settings.app_cert.clone(), settings.app_key.clone())),
        }
    }
}

/// Default rustls builder shared by every client.
fn create_reqwest_client_builder() -> ClientBuilder {
    reqwest::Client::builder().use_rustls_tls()
}

/// Builds a client verifying against `tls` with a per-request `timeout`.
pub fn build_client(tls: &TlsMaterial, timeout: Duration) -> Result<reqwest::Client, HttpError> {
    let mut builder = create_reqwest_client_builder()
        .timeout(timeout)
        .pool_idle_timeout(Duration::from_secs(270))
        .tcp_keepalive(Duration::from_secs(120));

    if let Some(ca_path) = &tls.ca_cert {
        let pem = read_pem(ca_path)?;
        let certificate = Certificate::from_pem(&pem).map_err(|source| HttpError::InvalidPem {
            path: ca_path.clone(),
            source,
        })?;
        builder = builder.add_root_certificate(certificate);
        debug!("HTTP client trusts CA bundle {}", ca_path.display());
    }

    if let Some((cert_path, key_path)) = &tls.identity {
        // reqwest expects certificate chain and key in a single PEM buffer.
        let mut pem = read_pem(cert_path)?;
        pem.push(b'\n');
        pem.extend_from_slice(&read_pem(key_path)?);
        let identity = Identity::from_pem(&pem).map_err(|source| HttpError::InvalidPem {
            path: cert_path.clone(),
            source,
        })?;
        builder = builder.identity(identity);
        debug!("HTTP client presents certificate {}", cert_path.display());
    }

    Ok(builder.build()?)
}

fn read_pem(path: &Path) -> Result<Vec<u8>, HttpError> {
    std::fs::read(path).map_err(|source| HttpError::ReadPem {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_without_material_builds() {
        let client = build_client(&TlsMaterial::default(), Duration::from_secs(5));
        assert!(client.is_ok());
    }

    #[test]
    fn missing_ca_bundle_is_reported_with_path() {
        let tls = TlsMaterial::server_only(Some(PathBuf::from("/nonexistent/ca.pem")));
        match build_client(&tls, Duration::from_secs(5)) {
            Err(HttpError::ReadPem { path, .. }) => {
                assert_eq!(path, PathBuf::from("/nonexistent/ca.pem"));
            }
            other => panic!("expected ReadPem error, got {other:?}"),
        }
    }

    #[test]
    fn mutual_material_uses_collector_paths() {
        let settings = LogCollectorSettings {
            url: "https://logs".to_string(),
            ca_cert: PathBuf::from("/ca/ca.pem"),
            app_cert: PathBuf::from("/app/tls.crt"),
            app_key: PathBuf::from("/app/tls.key"),
        };
        let tls = TlsMaterial::mutual(&settings);
        assert_eq!(tls.ca_cert, Some(PathBuf::from("/ca/ca.pem")));
        assert_eq!(
            tls.identity,
            Some((PathBuf::from("/app/tls.crt"), PathBuf::from("/app/tls.key")))
        );
    }
}
