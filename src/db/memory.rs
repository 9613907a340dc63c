use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::users::UserStore;
use crate::{
    error::ApiError,
    models::user::{NewUser, User},
};

/// In-process user store. Counts reads so callers can assert how often the
/// store was consulted.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
    reads: AtomicUsize,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of lookups served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub async fn remove(&self, id: Uuid) -> Option<User> {
        self.users.write().await.remove(&id)
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, ApiError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_login(&self, identifier: &str) -> Result<Option<User>, ApiError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let identifier = identifier.to_lowercase();
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.username == identifier || u.email == identifier)
            .cloned())
    }

    async fn exists(&self, username: &str, email: &str) -> Result<bool, ApiError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let username = username.to_lowercase();
        let email = email.to_lowercase();
        Ok(self
            .users
            .read()
            .await
            .values()
            .any(|u| u.username == username || u.email == email))
    }

    async fn create(&self, user: NewUser) -> Result<User, ApiError> {
        let mut users = self.users.write().await;
        let email = user.email.to_lowercase();
        if users.values().any(|u| u.username == user.username || u.email == email) {
            return Err(ApiError::Conflict("Resource already exists".to_string()));
        }
        let now = Utc::now();
        let created = User {
            id: Uuid::new_v4(),
            username: user.username,
            email,
            password_hash: user.password_hash,
            profile_picture_url: user.profile_picture_url,
            bio: user.bio,
            refresh_token_hash: None,
            created_at: now,
            updated_at: now,
        };
        users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn set_refresh_token_hash(&self, id: Uuid, hash: Option<String>) -> Result<(), ApiError> {
        if let Some(user) = self.users.write().await.get_mut(&id) {
            user.refresh_token_hash = hash;
            user.updated_at = Utc::now();
        }
        Ok(())
    }
}
