//! Error types for the credential reconciler
//!
//! Backend errors stay close to their transport. `ReconcileError` is the
//! typed terminal failure of the protocol, one variant per fatal state.

use thiserror::Error;

use crate::engine::ReconcileState;

/// Errors returned by a credential provider backend
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network or transport failure (connection refused, timeout, 5xx)
    #[error("Credential provider unavailable: {0}")]
    Unavailable(String),

    /// The provider understood the request and refused it
    #[error("Credential provider rejected request: {0}")]
    Rejected(String),

    /// The provider answered with a body we could not decode
    #[error("Invalid credential provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    pub fn is_transport(&self) -> bool {
        matches!(self, ProviderError::Unavailable(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::InvalidResponse(err.to_string())
        } else {
            ProviderError::Unavailable(err.to_string())
        }
    }
}

/// Errors returned by a user directory backend
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("User not found: {0}")]
    NotFound(String),

    #[error("User directory unavailable: {0}")]
    Unavailable(String),

    #[error("User directory rejected request: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for DirectoryError {
    fn from(err: reqwest::Error) -> Self {
        DirectoryError::Unavailable(err.to_string())
    }
}

/// Terminal failure of a password reconciliation.
///
/// Every variant corresponds to a fatal abort. The expected Verify-1 miss that
/// leads into cleanup is a branch of the state machine and never shows up here.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("User not found: {user_id}")]
    UserNotFound { user_id: String },

    #[error("User directory unavailable while loading {user_id}: {source}")]
    DirectoryUnavailable {
        user_id: String,
        #[source]
        source: DirectoryError,
    },

    #[error("User directory refused to load {user_id}: {source}")]
    DirectoryRejected {
        user_id: String,
        #[source]
        source: DirectoryError,
    },

    #[error("Credential provider unavailable during {state}: {source}")]
    ProviderUnavailable {
        state: ReconcileState,
        #[source]
        source: ProviderError,
    },

    /// The provider answered with an error instead of an authentication outcome
    #[error("Credential provider refused {state}: {source}")]
    ProviderRejected {
        state: ReconcileState,
        #[source]
        source: ProviderError,
    },

    #[error("Failed to clear existing credentials for {entity_id}: {source}")]
    CleanupFailed {
        entity_id: String,
        #[source]
        source: ProviderError,
    },

    #[error("Credential registration failed for {entity_id}: {reason}")]
    RegistrationFailed { entity_id: String, reason: String },

    #[error("Registered credential for {entity_id} did not authenticate")]
    FinalVerificationFailed { entity_id: String },

    #[error("Failed to link credential {identity_id} to user {user_id}: {source}")]
    LinkRepairFailed {
        identity_id: String,
        user_id: String,
        #[source]
        source: ProviderError,
    },

    #[error("Reconciliation deadline exceeded during {state}")]
    DeadlineExceeded { state: ReconcileState },
}

impl ReconcileError {
    /// The state machine state the protocol aborted in
    pub fn failed_state(&self) -> ReconcileState {
        match self {
            ReconcileError::UserNotFound { .. }
            | ReconcileError::DirectoryUnavailable { .. }
            | ReconcileError::DirectoryRejected { .. } => ReconcileState::Start,
            ReconcileError::ProviderUnavailable { state, .. }
            | ReconcileError::ProviderRejected { state, .. }
            | ReconcileError::DeadlineExceeded { state } => *state,
            ReconcileError::CleanupFailed { .. } => ReconcileState::Cleanup,
            ReconcileError::RegistrationFailed { .. } => ReconcileState::Register,
            ReconcileError::FinalVerificationFailed { .. } => ReconcileState::VerifyFinal,
            ReconcileError::LinkRepairFailed { .. } => ReconcileState::LinkCheck,
        }
    }

    /// Whether the caller may simply run the reset again later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReconcileError::ProviderUnavailable { .. }
                | ReconcileError::DirectoryUnavailable { .. }
                | ReconcileError::DeadlineExceeded { .. }
        )
    }

    /// Message safe to show an administrator
    pub fn public_message(&self) -> &'static str {
        match self {
            ReconcileError::UserNotFound { .. } => "No such user",
            ReconcileError::DirectoryUnavailable { .. } => {
                "User directory is temporarily unavailable, please retry"
            }
            ReconcileError::DirectoryRejected { .. } => "User directory refused the lookup",
            ReconcileError::ProviderUnavailable { .. } => {
                "Credential provider is temporarily unavailable, please retry"
            }
            ReconcileError::ProviderRejected { .. } => {
                "Credential provider refused to verify the password"
            }
            ReconcileError::CleanupFailed { .. } => "Could not clear existing credential",
            ReconcileError::RegistrationFailed { .. } => "Could not set password",
            ReconcileError::FinalVerificationFailed { .. } => "Password was not set correctly",
            ReconcileError::LinkRepairFailed { .. } => {
                "Password was set but the credential could not be linked to the user"
            }
            ReconcileError::DeadlineExceeded { .. } => {
                "Password reset timed out, please retry"
            }
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ReconcileError::UserNotFound { .. } => "user_not_found",
            ReconcileError::DirectoryUnavailable { .. } => "directory_unavailable",
            ReconcileError::DirectoryRejected { .. } => "directory_rejected",
            ReconcileError::ProviderUnavailable { .. } => "provider_unavailable",
            ReconcileError::ProviderRejected { .. } => "provider_rejected",
            ReconcileError::CleanupFailed { .. } => "cleanup_failed",
            ReconcileError::RegistrationFailed { .. } => "registration_failed",
            ReconcileError::FinalVerificationFailed { .. } => "final_verification_failed",
            ReconcileError::LinkRepairFailed { .. } => "link_repair_failed",
            ReconcileError::DeadlineExceeded { .. } => "deadline_exceeded",
        }
    }
}
