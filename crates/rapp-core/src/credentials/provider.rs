// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{AuthError, Credential};

/// One round trip to the identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn fetch_token(&self) -> Result<Credential, AuthError>;
}

/// OAuth2 client-credentials grant against the IAM token endpoint.
pub struct ClientCredentialsProvider {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_at: Option<u64>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    token_type: Option<String>,
}

impl ClientCredentialsProvider {
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

#[async_trait]
impl IdentityProvider for ClientCredentialsProvider {
    async fn fetch_token(&self) -> Result<Credential, AuthError> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", "openid"),
        ];
        debug!("Requesting client-credentials token from {}", self.token_url);

        let response = self
            .client
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        let received_at = SystemTime::now();
        let expires_at = match (body.expires_at, body.expires_in) {
            (Some(at), _) => UNIX_EPOCH.checked_add(Duration::from_secs(at)),
            (None, Some(lifetime)) => received_at.checked_add(Duration::from_secs(lifetime)),
            (None, None) => {
                return Err(AuthError::InvalidResponse(
                    "token response carries neither expires_at nor expires_in".to_string(),
                ))
            }
        }
        .ok_or_else(|| AuthError::InvalidResponse("token expiry out of range".to_string()))?;

        Ok(Credential {
            access_token: body.access_token,
            token_type: body.token_type.unwrap_or_else(|| "Bearer".to_string()),
            expires_at,
        })
    }
}
