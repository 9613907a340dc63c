use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::ApiError,
    models::user::{NewUser, User},
};

/// Point lookups and single-row updates on user records.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, ApiError>;

    /// Lookup by username or email, both case-insensitive.
    async fn find_by_login(&self, identifier: &str) -> Result<Option<User>, ApiError>;

    async fn exists(&self, username: &str, email: &str) -> Result<bool, ApiError>;

    async fn create(&self, user: NewUser) -> Result<User, ApiError>;

    /// Overwrite (or clear) the stored refresh-token digest. Last writer wins.
    async fn set_refresh_token_hash(&self, id: Uuid, hash: Option<String>) -> Result<(), ApiError>;
}

const USER_COLS: &str = "id, username, email, password_hash, profile_picture_url, bio,
    refresh_token_hash, created_at, updated_at";

#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, ApiError> {
        let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn find_by_login(&self, identifier: &str) -> Result<Option<User>, ApiError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLS} FROM users WHERE username = lower($1) OR email = lower($1)"
        ))
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn exists(&self, username: &str, email: &str) -> Result<bool, ApiError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM users WHERE username = lower($1) OR email = lower($2))",
        )
        .bind(username)
        .bind(email)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn create(&self, user: NewUser) -> Result<User, ApiError> {
        let created = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (username, email, password_hash, profile_picture_url, bio)
             VALUES ($1, lower($2), $3, $4, $5)
             RETURNING {USER_COLS}"
        ))
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.profile_picture_url)
        .bind(&user.bio)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn set_refresh_token_hash(&self, id: Uuid, hash: Option<String>) -> Result<(), ApiError> {
        sqlx::query(
            "UPDATE users SET refresh_token_hash = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
