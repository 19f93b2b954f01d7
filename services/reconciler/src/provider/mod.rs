//! Credential Provider Clients
//!
//! Trait-based abstraction over the store that owns password material and
//! the identity → user link. The reconciliation engine only ever talks to
//! this trait, never to a concrete backend.

mod http;
mod memory;

pub use http::HttpCredentialProvider;
pub use memory::{MemoryCredentialProvider, ProviderCall, ProviderFaults};

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::types::{
    AuthenticationOutcome, CredentialIdentity, IdentityFilter, RegistrationOutcome, Secret,
};

/// Name of the built-in email/password provider
pub const DEFAULT_PROVIDER: &str = "emailpass";

/// The six primitives a credential backend must expose.
///
/// Entity ids passed in are already normalized by the caller. Backends should
/// still normalize on their side when they store or compare them.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Provider name this client is bound to (e.g., "emailpass")
    fn provider_name(&self) -> &str;

    /// Set the secret on an existing identity.
    ///
    /// Must never create an identity. `Ok` does not prove one exists.
    async fn update_credential(&self, entity_id: &str, secret: &Secret)
        -> Result<(), ProviderError>;

    /// Verify a secret against whatever identity currently exists
    async fn authenticate(
        &self,
        entity_id: &str,
        secret: &Secret,
    ) -> Result<AuthenticationOutcome, ProviderError>;

    /// Create a brand-new identity; refused if one already exists
    async fn register_credential(
        &self,
        entity_id: &str,
        secret: &Secret,
    ) -> Result<RegistrationOutcome, ProviderError>;

    async fn list_identities(
        &self,
        filter: &IdentityFilter,
    ) -> Result<Vec<CredentialIdentity>, ProviderError>;

    async fn delete_identities(&self, ids: &[String]) -> Result<(), ProviderError>;

    /// Point an identity at a user
    async fn update_link(&self, identity_id: &str, linked_user_id: &str)
        -> Result<(), ProviderError>;
}
