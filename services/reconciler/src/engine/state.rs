//! Reconciliation state machine types

use serde::{Deserialize, Serialize};

use crate::types::CredentialIdentity;

/// States of the reconciliation protocol, in the order they can be visited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileState {
    /// Load the user and derive the entity id
    Start,
    /// Best-effort in-place secret update
    UpdateAttempted,
    /// First authentication; decides between happy path and fallback
    VerifyInitial,
    /// Remove every identity for the entity id
    Cleanup,
    /// Register a fresh identity
    Register,
    /// Authenticate the fresh identity
    VerifyFinal,
    /// Make sure the identity points at the user
    LinkCheck,
    Done,
}

impl std::fmt::Display for ReconcileState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileState::Start => write!(f, "start"),
            ReconcileState::UpdateAttempted => write!(f, "update_attempted"),
            ReconcileState::VerifyInitial => write!(f, "verify_initial"),
            ReconcileState::Cleanup => write!(f, "cleanup"),
            ReconcileState::Register => write!(f, "register"),
            ReconcileState::VerifyFinal => write!(f, "verify_final"),
            ReconcileState::LinkCheck => write!(f, "link_check"),
            ReconcileState::Done => write!(f, "done"),
        }
    }
}

/// Which branch of the protocol produced the final identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilePath {
    /// The existing identity accepted the new secret
    AlreadyConsistent,
    /// Stale identities were cleared and a new one registered
    Reregistered,
}

impl std::fmt::Display for ReconcilePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcilePath::AlreadyConsistent => write!(f, "already_consistent"),
            ReconcilePath::Reregistered => write!(f, "reregistered"),
        }
    }
}

/// Summary of a successful reconciliation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub user_id: String,
    pub entity_id: String,
    pub provider: String,
    /// Final identity, already carrying the corrected link
    pub identity: CredentialIdentity,
    pub path: ReconcilePath,
    /// Identities removed during cleanup
    pub removed_identities: usize,
    pub link_repaired: bool,
    /// States visited, in order, ending with `Done`
    pub states: Vec<ReconcileState>,
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

impl ReconciliationReport {
    pub fn visited(&self, state: ReconcileState) -> bool {
        self.states.contains(&state)
    }

    /// Format the report for display
    pub fn display(&self) -> String {
        format!(
            "Password reconciled:\n  User: {}\n  Entity: {}\n  Provider: {}\n  Identity: {}\n  Path: {}\n  Removed identities: {}\n  Link repaired: {}",
            self.user_id,
            self.entity_id,
            self.provider,
            self.identity.id,
            self.path,
            self.removed_identities,
            self.link_repaired
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display_matches_serde() {
        let json = serde_json::to_string(&ReconcileState::VerifyFinal).unwrap();
        assert_eq!(json, format!("\"{}\"", ReconcileState::VerifyFinal));
        assert_eq!(ReconcilePath::Reregistered.to_string(), "reregistered");
    }
}
