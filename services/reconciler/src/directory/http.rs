//! HTTP user directory client

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::info;

use super::{RoleWriter, UserDirectory};
use crate::error::DirectoryError;
use crate::types::User;

#[derive(Debug, Clone)]
pub struct HttpUserDirectory {
    base_url: String,
    http_client: Client,
}

#[derive(Debug, Serialize)]
struct RoleBody<'a> {
    role: &'a str,
}

impl HttpUserDirectory {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        info!("HttpUserDirectory initialized (base: {})", base_url);

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    fn user_url(&self, user_id: &str) -> String {
        format!("{}/users/{}", self.base_url, urlencoding::encode(user_id))
    }

    async fn read_user(user_id: &str, response: Response) -> Result<User, DirectoryError> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(DirectoryError::NotFound(user_id.to_string()));
        }
        if status.is_server_error() {
            return Err(DirectoryError::Unavailable(format!(
                "directory returned {}",
                status
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DirectoryError::Rejected(format!("{}: {}", status, body)));
        }

        response
            .json::<User>()
            .await
            .map_err(|e| DirectoryError::Rejected(format!("invalid user payload: {}", e)))
    }
}

#[async_trait]
impl UserDirectory for HttpUserDirectory {
    async fn retrieve_user(&self, user_id: &str) -> Result<User, DirectoryError> {
        let response = self.http_client.get(self.user_url(user_id)).send().await?;
        Self::read_user(user_id, response).await
    }
}

#[async_trait]
impl RoleWriter for HttpUserDirectory {
    async fn update_role(&self, user_id: &str, role: &str) -> Result<User, DirectoryError> {
        let response = self
            .http_client
            .patch(self.user_url(user_id))
            .json(&RoleBody { role })
            .send()
            .await?;
        Self::read_user(user_id, response).await
    }
}
