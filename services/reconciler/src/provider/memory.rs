//! In-memory credential provider
//!
//! Holds identities in process, keeps a journal of every call it receives and
//! can be told to misbehave. Used for local drills and by the test suite.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use super::CredentialProvider;
use crate::error::ProviderError;
use crate::types::{
    normalize_entity_id, AuthenticationOutcome, CredentialIdentity, IdentityFilter,
    RegistrationOutcome, Secret,
};

/// A call received by the in-memory provider, with arguments as passed in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    UpdateCredential { entity_id: String },
    Authenticate { entity_id: String },
    RegisterCredential { entity_id: String },
    ListIdentities { provider: String, entity_id: String },
    DeleteIdentities { ids: Vec<String> },
    UpdateLink { identity_id: String, linked_user_id: String },
}

impl ProviderCall {
    /// The entity id this call addressed, if it is entity-addressed
    pub fn entity_id(&self) -> Option<&str> {
        match self {
            ProviderCall::UpdateCredential { entity_id }
            | ProviderCall::Authenticate { entity_id }
            | ProviderCall::RegisterCredential { entity_id }
            | ProviderCall::ListIdentities { entity_id, .. } => Some(entity_id),
            ProviderCall::DeleteIdentities { .. } | ProviderCall::UpdateLink { .. } => None,
        }
    }
}

/// Failure modes the in-memory provider can be switched into
#[derive(Debug, Clone, Default)]
pub struct ProviderFaults {
    /// `update_credential` reports success without touching anything
    pub silent_update: bool,
    /// `register_credential` always answers `success = false`
    pub refuse_registration: bool,
    /// `register_credential` stores an identity that never authenticates
    pub register_unverifiable: bool,
    /// `authenticate` answers with an error instead of an outcome
    pub reject_authenticate: bool,
    /// `delete_identities` is rejected
    pub reject_delete: bool,
    /// `update_link` is rejected
    pub reject_link: bool,
    /// Every call fails with a transport error
    pub unavailable: bool,
    /// Delay applied before every call
    pub latency: Option<Duration>,
    /// Extra delay inside `register_credential`, before anything is stored
    pub register_latency: Option<Duration>,
}

#[derive(Debug, Clone)]
struct StoredIdentity {
    identity: CredentialIdentity,
    digest: String,
}

/// Calls kept in the journal before the oldest are dropped
const DEFAULT_JOURNAL_LIMIT: usize = 4096;

#[derive(Debug, Default)]
struct ProviderState {
    identities: Vec<StoredIdentity>,
    calls: VecDeque<ProviderCall>,
    faults: ProviderFaults,
}

/// Credential provider backed by process memory
#[derive(Debug)]
pub struct MemoryCredentialProvider {
    name: String,
    journal_limit: usize,
    state: RwLock<ProviderState>,
}

/// Salted digest of a secret; the identity id doubles as the salt
fn digest_secret(salt: &str, secret: &Secret) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(secret.expose().as_bytes());
    hex::encode(hasher.finalize())
}

impl MemoryCredentialProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            journal_limit: DEFAULT_JOURNAL_LIMIT,
            state: RwLock::new(ProviderState::default()),
        }
    }

    /// Keep at most `limit` calls in the journal
    pub fn with_journal_limit(mut self, limit: usize) -> Self {
        self.journal_limit = limit;
        self
    }

    pub fn with_faults(self, faults: ProviderFaults) -> Self {
        Self {
            name: self.name,
            journal_limit: self.journal_limit,
            state: RwLock::new(ProviderState {
                faults,
                ..self.state.into_inner()
            }),
        }
    }

    pub async fn set_faults(&self, faults: ProviderFaults) {
        self.state.write().await.faults = faults;
    }

    /// Insert an identity directly, bypassing uniqueness checks.
    ///
    /// Lets tests and drills recreate drift such as duplicates or stale links.
    pub async fn seed_identity(
        &self,
        entity_id: &str,
        secret: &Secret,
        linked_user_id: Option<&str>,
    ) -> CredentialIdentity {
        let identity = CredentialIdentity {
            id: format!("credid_{}", uuid::Uuid::new_v4().simple()),
            provider: self.name.clone(),
            entity_id: normalize_entity_id(entity_id),
            linked_user_id: linked_user_id.map(|s| s.to_string()),
        };
        let digest = digest_secret(&identity.id, secret);

        self.state.write().await.identities.push(StoredIdentity {
            identity: identity.clone(),
            digest,
        });
        identity
    }

    /// Current identities for an entity id
    pub async fn identities_for(&self, entity_id: &str) -> Vec<CredentialIdentity> {
        let entity_id = normalize_entity_id(entity_id);
        self.state
            .read()
            .await
            .identities
            .iter()
            .filter(|s| s.identity.entity_id == entity_id)
            .map(|s| s.identity.clone())
            .collect()
    }

    /// Journal of the most recent calls, oldest first
    pub async fn calls(&self) -> Vec<ProviderCall> {
        self.state.read().await.calls.iter().cloned().collect()
    }

    pub async fn clear_calls(&self) {
        self.state.write().await.calls.clear();
    }

    /// Record the call, apply latency and report the active faults
    async fn enter(&self, call: ProviderCall) -> Result<ProviderFaults, ProviderError> {
        let faults = {
            let mut state = self.state.write().await;
            debug!(provider = %self.name, call = ?call, "In-memory provider call");
            if self.journal_limit > 0 {
                while state.calls.len() >= self.journal_limit {
                    state.calls.pop_front();
                }
                state.calls.push_back(call);
            }
            state.faults.clone()
        };

        if let Some(latency) = faults.latency {
            tokio::time::sleep(latency).await;
        }
        if faults.unavailable {
            return Err(ProviderError::Unavailable(
                "in-memory provider switched offline".to_string(),
            ));
        }
        Ok(faults)
    }
}

#[async_trait]
impl CredentialProvider for MemoryCredentialProvider {
    fn provider_name(&self) -> &str {
        &self.name
    }

    async fn update_credential(
        &self,
        entity_id: &str,
        secret: &Secret,
    ) -> Result<(), ProviderError> {
        let faults = self
            .enter(ProviderCall::UpdateCredential {
                entity_id: entity_id.to_string(),
            })
            .await?;
        if faults.silent_update {
            return Ok(());
        }

        let entity_id = normalize_entity_id(entity_id);
        let mut state = self.state.write().await;
        let mut updated = 0;
        for stored in state
            .identities
            .iter_mut()
            .filter(|s| s.identity.entity_id == entity_id)
        {
            stored.digest = digest_secret(&stored.identity.id, secret);
            updated += 1;
        }

        if updated == 0 {
            return Err(ProviderError::Rejected(format!(
                "no identity for {}",
                entity_id
            )));
        }
        Ok(())
    }

    async fn authenticate(
        &self,
        entity_id: &str,
        secret: &Secret,
    ) -> Result<AuthenticationOutcome, ProviderError> {
        let faults = self
            .enter(ProviderCall::Authenticate {
                entity_id: entity_id.to_string(),
            })
            .await?;
        if faults.reject_authenticate {
            return Err(ProviderError::Rejected("429 Too Many Requests".to_string()));
        }

        let entity_id = normalize_entity_id(entity_id);
        let state = self.state.read().await;
        let matched = state.identities.iter().find(|s| {
            s.identity.entity_id == entity_id && s.digest == digest_secret(&s.identity.id, secret)
        });

        Ok(match matched {
            Some(stored) => AuthenticationOutcome::authenticated(stored.identity.clone()),
            None => AuthenticationOutcome::rejected(),
        })
    }

    async fn register_credential(
        &self,
        entity_id: &str,
        secret: &Secret,
    ) -> Result<RegistrationOutcome, ProviderError> {
        let faults = self
            .enter(ProviderCall::RegisterCredential {
                entity_id: entity_id.to_string(),
            })
            .await?;
        if let Some(latency) = faults.register_latency {
            tokio::time::sleep(latency).await;
        }
        if faults.refuse_registration {
            return Ok(RegistrationOutcome::refused("registration disabled"));
        }

        let entity_id = normalize_entity_id(entity_id);
        let mut state = self.state.write().await;
        if state
            .identities
            .iter()
            .any(|s| s.identity.entity_id == entity_id)
        {
            return Ok(RegistrationOutcome::refused(format!(
                "identity already exists for {}",
                entity_id
            )));
        }

        let identity = CredentialIdentity {
            id: format!("credid_{}", uuid::Uuid::new_v4().simple()),
            provider: self.name.clone(),
            entity_id,
            linked_user_id: None,
        };
        let digest = if faults.register_unverifiable {
            String::new()
        } else {
            digest_secret(&identity.id, secret)
        };
        state.identities.push(StoredIdentity { identity, digest });

        Ok(RegistrationOutcome::registered())
    }

    async fn list_identities(
        &self,
        filter: &IdentityFilter,
    ) -> Result<Vec<CredentialIdentity>, ProviderError> {
        self.enter(ProviderCall::ListIdentities {
            provider: filter.provider.clone(),
            entity_id: filter.entity_id.clone(),
        })
        .await?;

        let entity_id = normalize_entity_id(&filter.entity_id);
        let state = self.state.read().await;
        Ok(state
            .identities
            .iter()
            .filter(|s| s.identity.provider == filter.provider && s.identity.entity_id == entity_id)
            .map(|s| s.identity.clone())
            .collect())
    }

    async fn delete_identities(&self, ids: &[String]) -> Result<(), ProviderError> {
        let faults = self
            .enter(ProviderCall::DeleteIdentities { ids: ids.to_vec() })
            .await?;
        if faults.reject_delete {
            return Err(ProviderError::Rejected("delete not permitted".to_string()));
        }

        let mut state = self.state.write().await;
        state.identities.retain(|s| !ids.contains(&s.identity.id));
        Ok(())
    }

    async fn update_link(
        &self,
        identity_id: &str,
        linked_user_id: &str,
    ) -> Result<(), ProviderError> {
        let faults = self
            .enter(ProviderCall::UpdateLink {
                identity_id: identity_id.to_string(),
                linked_user_id: linked_user_id.to_string(),
            })
            .await?;
        if faults.reject_link {
            return Err(ProviderError::Rejected("link update not permitted".to_string()));
        }

        let mut state = self.state.write().await;
        let stored = state
            .identities
            .iter_mut()
            .find(|s| s.identity.id == identity_id)
            .ok_or_else(|| ProviderError::Rejected(format!("identity {} not found", identity_id)))?;
        stored.identity.linked_user_id = Some(linked_user_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_update_never_creates_identity() {
        let provider = MemoryCredentialProvider::new("emailpass");
        let result = provider
            .update_credential("a@test.com", &Secret::new("pw"))
            .await;

        assert!(matches!(result, Err(ProviderError::Rejected(_))));
        assert!(provider.identities_for("a@test.com").await.is_empty());
    }

    #[tokio::test]
    async fn test_register_refuses_duplicates() {
        let provider = MemoryCredentialProvider::new("emailpass");
        let secret = Secret::new("pw");

        assert!(provider.register_credential("a@test.com", &secret).await.unwrap().success);
        let second = provider.register_credential("A@test.com", &secret).await.unwrap();
        assert!(!second.success);
        assert!(second.error.unwrap().contains("already exists"));
        assert_eq!(provider.identities_for("a@test.com").await.len(), 1);
    }

    #[tokio::test]
    async fn test_authenticate_checks_secret() {
        let provider = MemoryCredentialProvider::new("emailpass");
        let seeded = provider
            .seed_identity("a@test.com", &Secret::new("old"), Some("user_1"))
            .await;

        let wrong = provider.authenticate("a@test.com", &Secret::new("new")).await.unwrap();
        assert!(!wrong.success);

        provider
            .update_credential("a@test.com", &Secret::new("new"))
            .await
            .unwrap();
        let right = provider.authenticate("a@test.com", &Secret::new("new")).await.unwrap();
        assert_eq!(right.into_verified(), Some(seeded));
    }

    #[tokio::test]
    async fn test_journal_keeps_most_recent_calls() {
        let provider = MemoryCredentialProvider::new("emailpass").with_journal_limit(2);
        let secret = Secret::new("pw");

        let _ = provider.update_credential("a@test.com", &secret).await;
        let _ = provider.authenticate("b@test.com", &secret).await;
        let _ = provider.authenticate("c@test.com", &secret).await;

        let calls = provider.calls().await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].entity_id(), Some("b@test.com"));
        assert_eq!(calls[1].entity_id(), Some("c@test.com"));
    }

    #[tokio::test]
    async fn test_unavailable_fault_is_transport_error() {
        let provider = MemoryCredentialProvider::new("emailpass").with_faults(ProviderFaults {
            unavailable: true,
            ..Default::default()
        });

        let err = provider
            .authenticate("a@test.com", &Secret::new("pw"))
            .await
            .unwrap_err();
        assert!(err.is_transport());
        assert_eq!(provider.calls().await.len(), 1);
    }
}
