//! Client-credentials grant against the identity service.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::instrument;

use scribe_core::CorrelationId;

use crate::config::{IdentityConfig, Secret};
use crate::credentials::{AuthError, CredentialProvider, IssuedToken};

use super::{error_message, CLIENT_REQUEST_ID};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Clone)]
pub struct AzureAdCredentialProvider {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: Secret,
    scope: String,
}

impl AzureAdCredentialProvider {
    pub fn new(http: reqwest::Client, config: &IdentityConfig) -> Self {
        Self {
            http,
            token_url: format!(
                "{}/{}/oauth2/v2.0/token",
                config.authority_url.trim_end_matches('/'),
                config.tenant_id
            ),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scope: config.scope.clone(),
        }
    }
}

#[async_trait]
impl CredentialProvider for AzureAdCredentialProvider {
    #[instrument(skip(self), err)]
    async fn issue(&self, correlation_id: CorrelationId) -> Result<IssuedToken, AuthError> {
        let response = self
            .http
            .post(&self.token_url)
            .header(CLIENT_REQUEST_ID, correlation_id.to_string())
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose()),
                ("scope", self.scope.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Malformed(e.to_string()))?;
        if token.access_token.is_empty() {
            return Err(AuthError::Malformed("empty access_token".to_string()));
        }

        Ok(IssuedToken {
            access_token: token.access_token,
            expires_in: Duration::from_secs(token.expires_in),
        })
    }
}
