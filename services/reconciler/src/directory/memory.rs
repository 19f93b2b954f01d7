//! In-memory user directory

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use super::{RoleWriter, UserDirectory};
use crate::error::DirectoryError;
use crate::types::User;

#[derive(Debug, Default)]
pub struct MemoryUserDirectory {
    users: RwLock<HashMap<String, User>>,
    offline: AtomicBool,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        Self {
            users: RwLock::new(users.into_iter().map(|u| (u.id.clone(), u)).collect()),
            offline: AtomicBool::new(false),
        }
    }

    /// Make every call fail with `DirectoryError::Unavailable`
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<(), DirectoryError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(DirectoryError::Unavailable(
                "in-memory directory switched offline".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn retrieve_user(&self, user_id: &str) -> Result<User, DirectoryError> {
        self.ensure_online()?;
        self.users
            .read()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(user_id.to_string()))
    }
}

#[async_trait]
impl RoleWriter for MemoryUserDirectory {
    async fn update_role(&self, user_id: &str, role: &str) -> Result<User, DirectoryError> {
        self.ensure_online()?;
        let mut users = self.users.write().await;
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| DirectoryError::NotFound(user_id.to_string()))?;
        user.role = Some(role.to_string());
        Ok(user.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_retrieve_and_update_role() {
        let directory = MemoryUserDirectory::with_users([User::new("user_1", "A@Test.com")]);

        let user = directory.retrieve_user("user_1").await.unwrap();
        assert_eq!(user.entity_id(), "a@test.com");

        let updated = directory.update_role("user_1", "admin").await.unwrap();
        assert_eq!(updated.role.as_deref(), Some("admin"));
        assert!(matches!(
            directory.retrieve_user("ghost").await,
            Err(DirectoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_offline_directory() {
        let directory = MemoryUserDirectory::new();
        directory.set_offline(true);
        assert!(matches!(
            directory.retrieve_user("user_1").await,
            Err(DirectoryError::Unavailable(_))
        ));
    }
}
