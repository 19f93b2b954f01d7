//! Reconciliation Types
//!
//! Records owned by the user directory and the credential provider, plus the
//! wire-level outcomes of provider calls.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Normalize an email into the provider's lookup key.
///
/// Entity ids are compared and stored lower-cased. Surrounding whitespace is
/// dropped as well since directory emails are not normalized at rest.
pub fn normalize_entity_id(email: &str) -> String {
    email.trim().to_lowercase()
}

/// A user record as held by the user directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    /// Human-facing handle; not guaranteed to be case-normalized
    pub email: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl User {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            role: None,
            metadata: HashMap::new(),
        }
    }

    /// The credential provider key derived from this user's email
    pub fn entity_id(&self) -> String {
        normalize_entity_id(&self.email)
    }
}

/// A provider-owned record binding an entity id to a secret and a user.
///
/// Secret material never leaves the provider, so it is not modelled here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialIdentity {
    pub id: String,
    /// Provider name (e.g., "emailpass")
    pub provider: String,
    pub entity_id: String,
    /// User id this credential belongs to, if linked at all
    #[serde(default)]
    pub linked_user_id: Option<String>,
}

impl CredentialIdentity {
    /// Whether this identity points back at the given user
    pub fn is_linked_to(&self, user_id: &str) -> bool {
        self.linked_user_id.as_deref() == Some(user_id)
    }
}

/// Filter for `list_identities`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityFilter {
    pub provider: String,
    pub entity_id: String,
}

/// Result of an `authenticate` call.
///
/// A missing identity is reported as `success = false`, never as an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationOutcome {
    pub success: bool,
    #[serde(default)]
    pub identity: Option<CredentialIdentity>,
}

impl AuthenticationOutcome {
    pub fn authenticated(identity: CredentialIdentity) -> Self {
        Self {
            success: true,
            identity: Some(identity),
        }
    }

    pub fn rejected() -> Self {
        Self::default()
    }

    /// The verified identity, only when the provider reported success
    pub fn into_verified(self) -> Option<CredentialIdentity> {
        if self.success {
            self.identity
        } else {
            None
        }
    }
}

/// Result of a `register_credential` call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationOutcome {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl RegistrationOutcome {
    pub fn registered() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn refused(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(reason.into()),
        }
    }
}

/// A new password on its way to the credential provider.
///
/// Debug and Display are redacted so the value cannot leak into logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the raw value; only provider adapters should call this
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret([redacted])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[redacted]")
    }
}
