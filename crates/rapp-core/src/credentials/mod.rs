// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Machine-identity credential shared by every outbound channel.
//!
//! [`CredentialBroker`] owns the single cached [`Credential`]. Async callers
//! use [`CredentialBroker::get_token`]; the stream transport, which negotiates
//! on its own blocking thread, goes through the [`TokenRefresher`] capability.
//! Both paths share one single-flight refresh: concurrent requests wait on
//! the refresh lock and reuse the outcome of the round trip that completed
//! while they were waiting.

pub mod provider;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::runtime::Handle;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

pub use provider::{ClientCredentialsProvider, IdentityProvider};

/// Identity provider failures. Never retried inside the broker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("identity provider unreachable: {0}")]
    Unreachable(String),

    #[error("identity provider rejected the request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    #[error("token acquisition unavailable: {0}")]
    Runtime(String),
}

/// Bearer token with its absolute expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: SystemTime,
}

impl Credential {
    /// True when the token expires within `leeway` of `now`.
    #[must_use]
    pub fn is_stale_at(&self, now: SystemTime, leeway: Duration) -> bool {
        now.checked_add(leeway)
            .map_or(true, |deadline| deadline >= self.expires_at)
    }

    /// Value for the `Authorization` header.
    #[must_use]
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// What the stream transport needs to negotiate a bearer session.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken {
    pub token: String,
    pub expires_at: SystemTime,
}

impl BearerToken {
    /// Expiry as milliseconds since the unix epoch.
    #[must_use]
    pub fn expires_at_millis(&self) -> i64 {
        self.expires_at
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0)
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Synchronous token hook handed to blocking transports.
///
/// Called from the transport's own thread, never from an async task.
pub trait TokenRefresher: Send + Sync {
    fn refresh_token(&self) -> Result<BearerToken, AuthError>;
}

pub struct CredentialBroker {
    provider: Arc<dyn IdentityProvider>,
    leeway: Duration,
    cached: RwLock<Option<Arc<Credential>>>,
    /// Completed round trips, successful or not.
    generation: AtomicU64,
    /// Serializes round trips; holds the error of the last one, if it failed.
    refresh_lock: Mutex<Option<AuthError>>,
    runtime: Option<Handle>,
}

impl CredentialBroker {
    /// Creates an empty broker. The first [`get_token`](Self::get_token)
    /// performs the initial grant.
    ///
    /// When called inside a tokio runtime, the runtime handle is captured for
    /// the blocking [`TokenRefresher`] path.
    pub fn new(provider: Arc<dyn IdentityProvider>, leeway: Duration) -> Self {
        Self {
            provider,
            leeway,
            cached: RwLock::new(None),
            generation: AtomicU64::new(0),
            refresh_lock: Mutex::new(None),
            runtime: Handle::try_current().ok(),
        }
    }

    /// Returns a valid credential, refreshing when the cached one is absent
    /// or stale.
    pub async fn get_token(&self) -> Result<Arc<Credential>, AuthError> {
        let observed = self.generation.load(Ordering::Acquire);
        if let Some(credential) = self.cached().await {
            if !self.is_stale(&credential) {
                return Ok(credential);
            }
            debug!("Cached credential is stale, refreshing");
        }
        self.single_flight(observed, |credential| !self.is_stale(credential))
            .await
    }

    /// Forces a round trip and replaces the shared credential.
    ///
    /// Callers that arrive while another refresh is in flight receive that
    /// refresh's outcome instead of starting a second one.
    pub async fn refresh(&self) -> Result<Arc<Credential>, AuthError> {
        let observed = self.generation.load(Ordering::Acquire);
        self.single_flight(observed, |_| false).await
    }

    /// Refreshes after an upstream rejected `rejected`.
    ///
    /// If the shared credential was already replaced, the newer one is
    /// returned without a round trip.
    pub async fn refresh_after(
        &self,
        rejected: &Arc<Credential>,
    ) -> Result<Arc<Credential>, AuthError> {
        let observed = self.generation.load(Ordering::Acquire);
        self.single_flight(observed, |credential| {
            !Arc::ptr_eq(credential, rejected) && !self.is_stale(credential)
        })
        .await
    }

    /// Current credential without refreshing.
    pub async fn cached(&self) -> Option<Arc<Credential>> {
        self.cached.read().await.clone()
    }

    fn is_stale(&self, credential: &Credential) -> bool {
        credential.is_stale_at(SystemTime::now(), self.leeway)
    }

    async fn single_flight<F>(&self, observed: u64, reusable: F) -> Result<Arc<Credential>, AuthError>
    where
        F: Fn(&Arc<Credential>) -> bool,
    {
        let mut last_error = self.refresh_lock.lock().await;
        let current = self.cached().await;

        if self.generation.load(Ordering::Acquire) != observed {
            // A round trip finished while this caller waited for the lock.
            if let Some(err) = last_error.as_ref() {
                return Err(err.clone());
            }
            if let Some(credential) = current {
                return Ok(credential);
            }
        }
        if let Some(credential) = current.filter(|c| reusable(c)) {
            return Ok(credential);
        }

        let outcome = self.provider.fetch_token().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        match outcome {
            Ok(credential) => {
                let credential = Arc::new(credential);
                *self.cached.write().await = Some(Arc::clone(&credential));
                *last_error = None;
                info!("Machine-identity credential refreshed");
                Ok(credential)
            }
            Err(err) => {
                warn!("Credential refresh failed: {err}");
                *last_error = Some(err.clone());
                Err(err)
            }
        }
    }
}

impl TokenRefresher for CredentialBroker {
    fn refresh_token(&self) -> Result<BearerToken, AuthError> {
        let runtime = self.runtime.as_ref().ok_or_else(|| {
            AuthError::Runtime("broker was created outside a tokio runtime".to_string())
        })?;
        let credential = runtime.block_on(self.get_token())?;
        Ok(BearerToken {
            token: credential.access_token.clone(),
            expires_at: credential.expires_at,
        })
    }
}

impl fmt::Debug for CredentialBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBroker")
            .field("leeway", &self.leeway)
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
