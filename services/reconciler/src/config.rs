//! Backend configuration
//!
//! Shared CLI/env arguments for both binaries. Backends are resolved once at
//! startup into trait objects, so a misconfigured provider fails the process
//! instead of an individual reset.

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::directory::{HttpUserDirectory, MemoryUserDirectory, RoleWriter, UserDirectory};
use crate::engine::ReconciliationEngine;
use crate::provider::{
    CredentialProvider, HttpCredentialProvider, MemoryCredentialProvider, DEFAULT_PROVIDER,
};
use crate::types::User;

/// Which backend family serves the directory and the credential provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Process-local stores, for drills and local development
    Memory,
    /// Remote JSON services
    Http,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Memory => write!(f, "memory"),
            BackendKind::Http => write!(f, "http"),
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct BackendArgs {
    /// Backend family
    #[arg(long, env = "CREDENTIAL_BACKEND", value_enum, default_value = "http")]
    pub backend: BackendKind,

    /// Credential provider base URL (http backend)
    #[arg(long, env = "CREDENTIAL_PROVIDER_URL")]
    pub provider_url: Option<String>,

    /// User directory base URL (http backend)
    #[arg(long, env = "USER_DIRECTORY_URL")]
    pub directory_url: Option<String>,

    /// Credential provider name
    #[arg(long, env = "CREDENTIAL_PROVIDER_NAME", default_value = DEFAULT_PROVIDER)]
    pub provider_name: String,

    /// Per-request HTTP timeout in seconds
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value_t = 30)]
    pub http_timeout_secs: u64,

    /// Overall reconciliation deadline in seconds (0 disables)
    #[arg(long, env = "RECONCILE_DEADLINE_SECS", default_value_t = 60)]
    pub deadline_secs: u64,

    /// Seed user for the memory backend (id=email, can be repeated)
    #[arg(long = "seed-user", value_parser = parse_seed_user)]
    pub seed_users: Vec<User>,
}

/// Resolved backends
#[derive(Clone)]
pub struct Backends {
    pub directory: Arc<dyn UserDirectory>,
    pub roles: Arc<dyn RoleWriter>,
    pub provider: Arc<dyn CredentialProvider>,
}

/// Parse `id=email` into a user
pub fn parse_seed_user(raw: &str) -> Result<User, String> {
    match raw.split_once('=') {
        Some((id, email)) if !id.trim().is_empty() && email.contains('@') => {
            Ok(User::new(id.trim(), email.trim()))
        }
        _ => Err(format!("expected <id>=<email>, got '{}'", raw)),
    }
}

impl BackendArgs {
    /// Build the directory and provider clients
    pub fn connect(&self) -> Result<Backends> {
        let timeout = Duration::from_secs(self.http_timeout_secs);

        let backends = match self.backend {
            BackendKind::Memory => {
                let directory = Arc::new(MemoryUserDirectory::with_users(
                    self.seed_users.iter().cloned(),
                ));
                Backends {
                    directory: directory.clone(),
                    roles: directory,
                    provider: Arc::new(MemoryCredentialProvider::new(&self.provider_name)),
                }
            }
            BackendKind::Http => {
                if !self.seed_users.is_empty() {
                    bail!("--seed-user is only supported with the memory backend");
                }
                let provider_url = self
                    .provider_url
                    .as_deref()
                    .context("CREDENTIAL_PROVIDER_URL must be set for the http backend")?;
                let directory_url = self
                    .directory_url
                    .as_deref()
                    .context("USER_DIRECTORY_URL must be set for the http backend")?;

                let directory = Arc::new(HttpUserDirectory::new(directory_url, timeout)?);
                Backends {
                    directory: directory.clone(),
                    roles: directory,
                    provider: Arc::new(HttpCredentialProvider::new(
                        provider_url,
                        &self.provider_name,
                        timeout,
                    )?),
                }
            }
        };

        info!(
            backend = %self.backend,
            provider = %self.provider_name,
            "Backends initialized"
        );
        Ok(backends)
    }

    /// Build an engine over already-resolved backends
    pub fn engine(&self, backends: &Backends) -> ReconciliationEngine {
        let engine =
            ReconciliationEngine::new(backends.directory.clone(), backends.provider.clone());
        if self.deadline_secs == 0 {
            engine
        } else {
            engine.with_deadline(Duration::from_secs(self.deadline_secs))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        backend: BackendArgs,
    }

    #[test]
    fn test_parse_seed_user() {
        let user = parse_seed_user("user_1=A@Test.com").unwrap();
        assert_eq!(user.id, "user_1");
        assert_eq!(user.entity_id(), "a@test.com");

        assert!(parse_seed_user("user_1").is_err());
        assert!(parse_seed_user("=a@test.com").is_err());
        assert!(parse_seed_user("user_1=not-an-email").is_err());
    }

    #[test]
    fn test_http_backend_requires_urls() {
        let cli = TestCli::parse_from([
            "test",
            "--backend",
            "http",
            "--directory-url",
            "http://users.local",
        ]);
        if std::env::var("CREDENTIAL_PROVIDER_URL").is_ok() {
            return;
        }

        let err = cli.backend.connect().err().unwrap();
        assert!(err.to_string().contains("CREDENTIAL_PROVIDER_URL"));
    }

    #[tokio::test]
    async fn test_memory_backend_with_seeded_users() {
        let cli = TestCli::parse_from([
            "test",
            "--backend",
            "memory",
            "--seed-user",
            "user_1=a@test.com",
            "--deadline-secs",
            "0",
        ]);

        let backends = cli.backend.connect().unwrap();
        let user = backends.directory.retrieve_user("user_1").await.unwrap();
        assert_eq!(user.email, "a@test.com");
        assert_eq!(backends.provider.provider_name(), DEFAULT_PROVIDER);
    }
}
