//! Read-only user directory.
//!
//! The identity store itself lives outside the core; this service only holds
//! the lookup table the permission, notification and mention paths read from.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::security::Role;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
}

impl DirectoryUser {
    pub fn new(name: impl Into<String>, email: impl Into<String>, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            email: email.into(),
            role,
            is_active: true,
        }
    }

    fn email_local_part(&self) -> &str {
        self.email.split('@').next().unwrap_or("")
    }
}

#[derive(Clone)]
pub struct UserDirectory {
    users: Arc<RwLock<Vec<DirectoryUser>>>,
}

impl UserDirectory {
    pub fn new(users: Vec<DirectoryUser>) -> Self {
        Self {
            users: Arc::new(RwLock::new(users)),
        }
    }

    pub async fn get(&self, id: Uuid) -> Option<DirectoryUser> {
        self.users.read().await.iter().find(|u| u.id == id).cloned()
    }

    /// Case-insensitive exact match on display name.
    pub async fn find_by_name(&self, name: &str) -> Option<DirectoryUser> {
        self.users
            .read()
            .await
            .iter()
            .find(|u| u.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Resolve one `@token` from free text. Matches, case-insensitively, the
    /// full display name, its first word, or the local part of the email
    /// address. Inactive users never resolve.
    pub async fn resolve_mention(&self, token: &str) -> Option<DirectoryUser> {
        self.users
            .read()
            .await
            .iter()
            .filter(|u| u.is_active)
            .find(|u| {
                u.name.eq_ignore_ascii_case(token)
                    || u.name
                        .split_whitespace()
                        .next()
                        .is_some_and(|first| first.eq_ignore_ascii_case(token))
                    || u.email_local_part().eq_ignore_ascii_case(token)
            })
            .cloned()
    }

    pub async fn all(&self) -> Vec<DirectoryUser> {
        self.users.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> UserDirectory {
        UserDirectory::new(vec![
            DirectoryUser::new("Alice Sales", "alice@example.com", Role::SalesRep),
            DirectoryUser::new("Bob Mgr", "robert.m@example.com", Role::Manager),
        ])
    }

    #[tokio::test]
    async fn mention_resolves_by_first_name() {
        let dir = directory();
        let hit = dir.resolve_mention("alice").await.unwrap();
        assert_eq!(hit.name, "Alice Sales");
    }

    #[tokio::test]
    async fn mention_resolves_by_email_local_part() {
        let dir = directory();
        let hit = dir.resolve_mention("robert.m").await.unwrap();
        assert_eq!(hit.name, "Bob Mgr");
    }

    #[tokio::test]
    async fn unknown_and_inactive_tokens_do_not_resolve() {
        let dir = directory();
        assert!(dir.resolve_mention("nobody").await.is_none());

        let mut users = dir.all().await;
        users[0].is_active = false;
        let dir = UserDirectory::new(users);
        assert!(dir.resolve_mention("alice").await.is_none());
    }
}
