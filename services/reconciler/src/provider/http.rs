//! HTTP credential provider
//!
//! JSON REST adapter for a remote credential service. Transport failures and
//! 5xx answers map to `ProviderError::Unavailable` so the engine can report
//! them as retryable.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::CredentialProvider;
use crate::error::ProviderError;
use crate::types::{
    AuthenticationOutcome, CredentialIdentity, IdentityFilter, RegistrationOutcome, Secret,
};

/// Credential provider reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpCredentialProvider {
    base_url: String,
    provider: String,
    http_client: Client,
}

#[derive(Debug, Serialize)]
struct SecretBody<'a> {
    secret: &'a str,
}

#[derive(Debug, Serialize)]
struct EntitySecretBody<'a> {
    entity_id: &'a str,
    secret: &'a str,
}

#[derive(Debug, Serialize)]
struct DeleteBody<'a> {
    ids: &'a [String],
}

#[derive(Debug, Serialize)]
struct LinkBody<'a> {
    linked_user_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl HttpCredentialProvider {
    /// Create a client for `provider` rooted at `base_url`
    pub fn new(base_url: &str, provider: &str, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        info!(
            "HttpCredentialProvider initialized (base: {}, provider: {})",
            base_url, provider
        );

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            provider: provider.to_string(),
            http_client,
        })
    }

    fn provider_url(&self, suffix: &str) -> String {
        format!(
            "{}/providers/{}/{}",
            self.base_url,
            urlencoding::encode(&self.provider),
            suffix
        )
    }

    /// Turn a non-success status into the matching `ProviderError`
    async fn check(response: Response) -> Result<Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = error_message(response).await;
        if status.is_server_error() {
            Err(ProviderError::Unavailable(format!("{}: {}", status, message)))
        } else {
            Err(ProviderError::Rejected(format!("{}: {}", status, message)))
        }
    }
}

async fn error_message(response: Response) -> String {
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) => parsed.message.or(parsed.error).unwrap_or(body),
        Err(_) => body,
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    fn provider_name(&self) -> &str {
        &self.provider
    }

    async fn update_credential(
        &self,
        entity_id: &str,
        secret: &Secret,
    ) -> Result<(), ProviderError> {
        let url = self.provider_url(&format!(
            "identities/{}/secret",
            urlencoding::encode(entity_id)
        ));
        debug!("Updating credential via {}", url);

        let response = self
            .http_client
            .put(&url)
            .json(&SecretBody {
                secret: secret.expose(),
            })
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }

    async fn authenticate(
        &self,
        entity_id: &str,
        secret: &Secret,
    ) -> Result<AuthenticationOutcome, ProviderError> {
        let url = self.provider_url("authenticate");

        let response = self
            .http_client
            .post(&url)
            .json(&EntitySecretBody {
                entity_id,
                secret: secret.expose(),
            })
            .send()
            .await?;

        // Some providers answer a bad secret with 401 instead of success=false
        if response.status() == StatusCode::UNAUTHORIZED {
            return Ok(AuthenticationOutcome::rejected());
        }

        let outcome = Self::check(response)
            .await?
            .json::<AuthenticationOutcome>()
            .await?;
        Ok(outcome)
    }

    async fn register_credential(
        &self,
        entity_id: &str,
        secret: &Secret,
    ) -> Result<RegistrationOutcome, ProviderError> {
        let url = self.provider_url("identities");

        let response = self
            .http_client
            .post(&url)
            .json(&EntitySecretBody {
                entity_id,
                secret: secret.expose(),
            })
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            let message = error_message(response).await;
            return Ok(RegistrationOutcome::refused(message));
        }

        let outcome = Self::check(response)
            .await?
            .json::<RegistrationOutcome>()
            .await?;
        Ok(outcome)
    }

    async fn list_identities(
        &self,
        filter: &IdentityFilter,
    ) -> Result<Vec<CredentialIdentity>, ProviderError> {
        let url = format!("{}/identities", self.base_url);

        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("provider", filter.provider.as_str()),
                ("entity_id", filter.entity_id.as_str()),
            ])
            .send()
            .await?;

        let identities = Self::check(response)
            .await?
            .json::<Vec<CredentialIdentity>>()
            .await?;
        Ok(identities)
    }

    async fn delete_identities(&self, ids: &[String]) -> Result<(), ProviderError> {
        let url = format!("{}/identities/delete", self.base_url);

        let response = self
            .http_client
            .post(&url)
            .json(&DeleteBody { ids })
            .send()
            .await?;

        Self::check(response).await?;
        info!("Deleted {} credential identities", ids.len());
        Ok(())
    }

    async fn update_link(
        &self,
        identity_id: &str,
        linked_user_id: &str,
    ) -> Result<(), ProviderError> {
        let url = format!(
            "{}/identities/{}/link",
            self.base_url,
            urlencoding::encode(identity_id)
        );

        let response = self
            .http_client
            .patch(&url)
            .json(&LinkBody { linked_user_id })
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }
}
