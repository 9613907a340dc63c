use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::ApiError,
    models::{
        auth::AuthenticatedUser,
        channel::{Channel, SubscribedChannel, Subscriber, DEFAULT_CHANNEL_DESCRIPTION},
    },
};

const MAX_NAME_LEN: usize = 50;

const CHANNEL_COLS: &str = "id, owner_id, name, description, banner_url, created_at, updated_at";

/// Only the channel's owner may modify it.
pub fn ensure_owner(owner_id: Uuid, user: &AuthenticatedUser) -> Result<(), ApiError> {
    if owner_id != user.user_id {
        return Err(ApiError::Forbidden(
            "You are not the owner of this channel".to_string(),
        ));
    }
    Ok(())
}

fn normalize_name(raw: &str) -> Result<String, ApiError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Channel name is required".to_string()));
    }
    if name.chars().count() > MAX_NAME_LEN || name.contains('/') {
        return Err(ApiError::BadRequest(format!(
            "Channel name must be at most {MAX_NAME_LEN} characters and contain no '/'"
        )));
    }
    Ok(name.to_string())
}

/// Insert-or-nothing and delete-or-nothing writes report zero rows when the
/// relation was already in the requested state.
pub(crate) fn expect_change(rows_affected: u64, unchanged: &str) -> Result<(), ApiError> {
    if rows_affected == 0 {
        return Err(ApiError::BadRequest(unchanged.to_string()));
    }
    Ok(())
}

pub struct ChannelService;

impl ChannelService {
    pub async fn create(
        pool: &PgPool,
        owner: &AuthenticatedUser,
        name: &str,
        description: Option<String>,
        banner_url: Option<String>,
    ) -> Result<Channel, ApiError> {
        let name = normalize_name(name)?;

        if Self::name_taken(pool, &name).await? {
            return Err(ApiError::Conflict(
                "Channel with this name already exists".to_string(),
            ));
        }
        let has_channel: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM channels WHERE owner_id = $1)")
                .bind(owner.user_id)
                .fetch_one(pool)
                .await?;
        if has_channel {
            return Err(ApiError::Conflict("You already have a channel".to_string()));
        }

        let description = description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| DEFAULT_CHANNEL_DESCRIPTION.to_string());

        let channel = sqlx::query_as::<_, Channel>(&format!(
            "INSERT INTO channels (owner_id, name, description, banner_url)
             VALUES ($1, $2, $3, $4)
             RETURNING {CHANNEL_COLS}"
        ))
        .bind(owner.user_id)
        .bind(&name)
        .bind(&description)
        .bind(&banner_url)
        .fetch_one(pool)
        .await?;

        tracing::info!(channel_id = %channel.id, owner = %owner.user_id, "channel created");
        Ok(channel)
    }

    pub async fn find_by_name(pool: &PgPool, name: &str) -> Result<Channel, ApiError> {
        sqlx::query_as::<_, Channel>(&format!(
            "SELECT {CHANNEL_COLS} FROM channels WHERE name = $1"
        ))
        .bind(name)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::NotFound("Channel not found".to_string()))
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Channel, ApiError> {
        sqlx::query_as::<_, Channel>(&format!("SELECT {CHANNEL_COLS} FROM channels WHERE id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| ApiError::NotFound("Channel not found".to_string()))
    }

    pub async fn update_banner(
        pool: &PgPool,
        user: &AuthenticatedUser,
        name: &str,
        banner_url: &str,
    ) -> Result<Channel, ApiError> {
        let channel = Self::find_by_name(pool, name).await?;
        ensure_owner(channel.owner_id, user)?;

        let updated = sqlx::query_as::<_, Channel>(&format!(
            "UPDATE channels SET banner_url = $2, updated_at = NOW()
             WHERE id = $1
             RETURNING {CHANNEL_COLS}"
        ))
        .bind(channel.id)
        .bind(banner_url)
        .fetch_one(pool)
        .await?;
        Ok(updated)
    }

    pub async fn rename(
        pool: &PgPool,
        user: &AuthenticatedUser,
        name: &str,
        new_name: &str,
    ) -> Result<Channel, ApiError> {
        let new_name = normalize_name(new_name)?;
        let channel = Self::find_by_name(pool, name).await?;
        ensure_owner(channel.owner_id, user)?;

        if channel.name == new_name {
            return Ok(channel);
        }
        if Self::name_taken(pool, &new_name).await? {
            return Err(ApiError::Conflict(
                "Channel with this name already exists".to_string(),
            ));
        }

        let renamed = sqlx::query_as::<_, Channel>(&format!(
            "UPDATE channels SET name = $2, updated_at = NOW()
             WHERE id = $1
             RETURNING {CHANNEL_COLS}"
        ))
        .bind(channel.id)
        .bind(&new_name)
        .fetch_one(pool)
        .await?;

        tracing::info!(channel_id = %renamed.id, from = %name, to = %renamed.name, "channel renamed");
        Ok(renamed)
    }

    pub async fn subscribe(
        pool: &PgPool,
        user: &AuthenticatedUser,
        name: &str,
    ) -> Result<SubscribedChannel, ApiError> {
        let channel = Self::find_by_name(pool, name).await?;
        let inserted = sqlx::query(
            "INSERT INTO channel_subscriptions (channel_id, subscriber_id)
             VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
        )
        .bind(channel.id)
        .bind(user.user_id)
        .execute(pool)
        .await?;
        expect_change(inserted.rows_affected(), "You are already subscribed to this channel")?;

        tracing::info!(channel_id = %channel.id, subscriber = %user.user_id, "subscribed");
        Self::with_count(pool, channel).await
    }

    pub async fn unsubscribe(
        pool: &PgPool,
        user: &AuthenticatedUser,
        name: &str,
    ) -> Result<SubscribedChannel, ApiError> {
        let channel = Self::find_by_name(pool, name).await?;
        let removed = sqlx::query(
            "DELETE FROM channel_subscriptions WHERE channel_id = $1 AND subscriber_id = $2",
        )
        .bind(channel.id)
        .bind(user.user_id)
        .execute(pool)
        .await?;
        expect_change(removed.rows_affected(), "You are not subscribed to this channel")?;

        tracing::info!(channel_id = %channel.id, subscriber = %user.user_id, "unsubscribed");
        Self::with_count(pool, channel).await
    }

    /// Oldest subscription first.
    pub async fn list_subscribers(pool: &PgPool, name: &str) -> Result<Vec<Subscriber>, ApiError> {
        let channel = Self::find_by_name(pool, name).await?;
        let subscribers = sqlx::query_as::<_, Subscriber>(
            "SELECT u.id, u.username, s.created_at AS subscribed_at
             FROM channel_subscriptions s JOIN users u ON u.id = s.subscriber_id
             WHERE s.channel_id = $1
             ORDER BY s.created_at, u.username",
        )
        .bind(channel.id)
        .fetch_all(pool)
        .await?;
        Ok(subscribers)
    }

    pub async fn subscriber_count(pool: &PgPool, name: &str) -> Result<i64, ApiError> {
        let channel = Self::find_by_name(pool, name).await?;
        Self::count_subscribers(pool, channel.id).await
    }

    async fn count_subscribers(pool: &PgPool, channel_id: Uuid) -> Result<i64, ApiError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM channel_subscriptions WHERE channel_id = $1")
                .bind(channel_id)
                .fetch_one(pool)
                .await?;
        Ok(count)
    }

    async fn with_count(pool: &PgPool, channel: Channel) -> Result<SubscribedChannel, ApiError> {
        let subscribers_count = Self::count_subscribers(pool, channel.id).await?;
        Ok(SubscribedChannel {
            channel,
            subscribers_count,
        })
    }

    async fn name_taken(pool: &PgPool, name: &str) -> Result<bool, ApiError> {
        let taken: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM channels WHERE name = $1)")
            .bind(name)
            .fetch_one(pool)
            .await?;
        Ok(taken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: Uuid) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: id,
            username: "owner".into(),
            email: "owner@example.com".into(),
        }
    }

    #[test]
    fn only_the_owner_passes() {
        let owner = Uuid::new_v4();
        assert!(ensure_owner(owner, &user(owner)).is_ok());
        assert!(matches!(
            ensure_owner(owner, &user(Uuid::new_v4())),
            Err(ApiError::Forbidden(_))
        ));
    }

    #[test]
    fn names_are_trimmed_and_bounded() {
        assert_eq!(normalize_name("  cooking ").unwrap(), "cooking");
        assert!(normalize_name("   ").is_err());
        assert!(normalize_name("a/b").is_err());
        assert!(normalize_name(&"x".repeat(51)).is_err());
    }

    #[test]
    fn unchanged_relation_is_bad_request() {
        assert!(expect_change(1, "already").is_ok());
        assert!(matches!(
            expect_change(0, "You are already subscribed to this channel"),
            Err(ApiError::BadRequest(ref m)) if m == "You are already subscribed to this channel"
        ));
    }
}
