use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::ApiError,
    models::{auth::AuthenticatedUser, video::Like},
    services::{channels::expect_change, videos::VideoService},
};

/// Likes are only accepted on videos the user can see.
pub struct LikeService;

impl LikeService {
    pub async fn like(
        pool: &PgPool,
        user: &AuthenticatedUser,
        video_id: Uuid,
    ) -> Result<Like, ApiError> {
        VideoService::get(pool, video_id, Some(user)).await?;
        let like = sqlx::query_as::<_, Like>(
            "INSERT INTO video_likes (video_id, user_id)
             VALUES ($1, $2)
             ON CONFLICT DO NOTHING
             RETURNING video_id, user_id, created_at",
        )
        .bind(video_id)
        .bind(user.user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::BadRequest("You have already liked this video".to_string()))?;

        tracing::debug!(video_id = %video_id, user_id = %user.user_id, "video liked");
        Ok(like)
    }

    pub async fn unlike(
        pool: &PgPool,
        user: &AuthenticatedUser,
        video_id: Uuid,
    ) -> Result<(), ApiError> {
        let removed = sqlx::query("DELETE FROM video_likes WHERE video_id = $1 AND user_id = $2")
            .bind(video_id)
            .bind(user.user_id)
            .execute(pool)
            .await?;
        expect_change(removed.rows_affected(), "You have not liked this video")?;
        tracing::debug!(video_id = %video_id, user_id = %user.user_id, "video unliked");
        Ok(())
    }

    pub async fn count(
        pool: &PgPool,
        video_id: Uuid,
        viewer: Option<&AuthenticatedUser>,
    ) -> Result<i64, ApiError> {
        VideoService::get(pool, video_id, viewer).await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM video_likes WHERE video_id = $1")
            .bind(video_id)
            .fetch_one(pool)
            .await?;
        Ok(count)
    }
}
