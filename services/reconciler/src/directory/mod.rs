//! User Directory Clients
//!
//! The engine reads users to learn the canonical id and email it must
//! converge on. Role writes live on a separate trait because they belong to
//! the admin action, not to reconciliation.

mod http;
mod memory;

pub use http::HttpUserDirectory;
pub use memory::MemoryUserDirectory;

use async_trait::async_trait;

use crate::error::DirectoryError;
use crate::types::User;

/// Read access to user records
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Fetch a user by id; `DirectoryError::NotFound` if it does not exist
    async fn retrieve_user(&self, user_id: &str) -> Result<User, DirectoryError>;
}

/// Role writes, composed by the admin action independently of reconciliation
#[async_trait]
pub trait RoleWriter: Send + Sync {
    async fn update_role(&self, user_id: &str, role: &str) -> Result<User, DirectoryError>;
}
