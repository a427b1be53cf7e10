// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared fakes for unit tests: an identity provider that counts round
//! trips and a scripted stream transport.

#![cfg(test)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use crate::consumer::transport::{
    ReceivedRecord, StreamTransport, SubscriptionSettings, TransportConnector, TransportError,
};
use crate::credentials::{AuthError, BearerToken, Credential, IdentityProvider, TokenRefresher};

/// Identity provider issuing `token-<n>` on the n-th call.
pub(crate) struct CountingProvider {
    calls: AtomicUsize,
    lifetime: Duration,
    latency: Duration,
    failure: Option<AuthError>,
}

impl CountingProvider {
    pub(crate) fn with_lifetime(lifetime: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            lifetime,
            latency: Duration::ZERO,
            failure: None,
        }
    }

    pub(crate) fn failing(error: AuthError) -> Self {
        Self {
            failure: Some(error),
            ..Self::with_lifetime(Duration::from_secs(60))
        }
    }

    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for CountingProvider {
    async fn fetch_token(&self) -> Result<Credential, AuthError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        Ok(Credential {
            access_token: format!("token-{call}"),
            token_type: "Bearer".to_string(),
            expires_at: SystemTime::now() + self.lifetime,
        })
    }
}

/// Refresher handing out a fixed token.
pub(crate) struct StaticRefresher {
    token: String,
}

impl StaticRefresher {
    pub(crate) fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
        }
    }
}

impl TokenRefresher for StaticRefresher {
    fn refresh_token(&self) -> Result<BearerToken, AuthError> {
        Ok(BearerToken {
            token: self.token.clone(),
            expires_at: SystemTime::now() + Duration::from_secs(60),
        })
    }
}

/// What the scripted transport does on one receive.
pub(crate) enum Step {
    Batch(Vec<ReceivedRecord>),
    Fail(TransportError),
    Panic,
}

#[derive(Default)]
struct Script {
    steps: Mutex<VecDeque<Step>>,
    receives: AtomicUsize,
    exhausted: AtomicBool,
    closes: AtomicUsize,
}

/// Connector whose transport replays `steps`, then behaves like an idle
/// stream: every receive blocks for the full timeout and returns nothing.
pub(crate) struct ScriptedConnector {
    script: Arc<Script>,
    subscribe_error: Option<String>,
}

impl ScriptedConnector {
    pub(crate) fn new(steps: Vec<Step>) -> Self {
        let script = Script {
            steps: Mutex::new(steps.into()),
            ..Script::default()
        };
        Self {
            script: Arc::new(script),
            subscribe_error: None,
        }
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self {
            subscribe_error: Some(message.to_string()),
            ..Self::new(Vec::new())
        }
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.script.closes.load(Ordering::SeqCst)
    }

    pub(crate) async fn wait_for_receives(&self, count: usize) {
        while self.script.receives.load(Ordering::SeqCst) < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Resolves once every scripted step has been consumed and processed.
    pub(crate) async fn wait_until_exhausted(&self) {
        while !self.script.exhausted.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl TransportConnector for ScriptedConnector {
    fn subscribe(
        &self,
        _settings: &SubscriptionSettings,
        _refresher: Arc<dyn TokenRefresher>,
    ) -> Result<Box<dyn StreamTransport>, TransportError> {
        if let Some(message) = &self.subscribe_error {
            return Err(TransportError::Subscribe(message.clone()));
        }
        Ok(Box::new(ScriptedTransport {
            script: Arc::clone(&self.script),
        }))
    }
}

struct ScriptedTransport {
    script: Arc<Script>,
}

impl StreamTransport for ScriptedTransport {
    fn receive(
        &mut self,
        _max_records: usize,
        timeout: Duration,
    ) -> Result<Vec<ReceivedRecord>, TransportError> {
        self.script.receives.fetch_add(1, Ordering::SeqCst);
        let next = self.script.steps.lock().expect("script lock").pop_front();
        match next {
            Some(Step::Batch(batch)) => Ok(batch),
            Some(Step::Fail(error)) => Err(error),
            Some(Step::Panic) => panic!("scripted transport panic"),
            None => {
                self.script.exhausted.store(true, Ordering::SeqCst);
                std::thread::sleep(timeout);
                Ok(Vec::new())
            }
        }
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.script.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
