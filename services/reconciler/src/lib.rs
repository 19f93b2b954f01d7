//! Credential Reconciler
//!
//! Keeps a user's credential in the credential provider consistent with the
//! user directory when an administrator resets a password.
//!
//! ## Layout
//!
//! - `engine`: the reconciliation state machine and per-entity locking
//! - `provider`: credential provider trait plus memory and HTTP backends
//! - `directory`: user directory traits plus memory and HTTP backends
//! - `admin`: axum router for the admin reset action
//! - `config`: CLI/env backend selection shared by the binaries

pub mod admin;
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod provider;
pub mod types;

pub use engine::{
    EntityLocks, ReconcilePath, ReconcileState, ReconciliationEngine, ReconciliationReport,
};
pub use error::{DirectoryError, ProviderError, ReconcileError};
pub use types::{CredentialIdentity, Secret, User};
