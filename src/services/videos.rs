use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::ApiError,
    models::{
        auth::AuthenticatedUser,
        upload::UploadResult,
        video::{NewVideo, Video, MAX_DESCRIPTION_LEN, MAX_TITLE_LEN},
    },
    services::channels::{ensure_owner, ChannelService},
};

/// Videos joined with the owning channel's owner.
const VIDEO_SELECT: &str = "SELECT v.id, v.channel_id, c.owner_id, v.title, v.description,
        v.video_url, v.thumbnail_url, v.is_public, v.views, v.created_at, v.updated_at,
        v.video_public_id, v.thumbnail_public_id
    FROM videos v JOIN channels c ON c.id = v.channel_id";

const VIDEO_RETURNING: &str = "RETURNING v.id, v.channel_id, c.owner_id, v.title, v.description,
        v.video_url, v.thumbnail_url, v.is_public, v.views, v.created_at, v.updated_at,
        v.video_public_id, v.thumbnail_public_id";

/// Trimmed title and description within their length limits.
pub fn validate_details(title: &str, description: Option<&str>) -> Result<(String, String), ApiError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ApiError::BadRequest("title is required".to_string()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(ApiError::BadRequest(format!(
            "title must be at most {MAX_TITLE_LEN} characters"
        )));
    }
    let description = description.map(str::trim).unwrap_or_default();
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(ApiError::BadRequest(format!(
            "description must be at most {MAX_DESCRIPTION_LEN} characters"
        )));
    }
    Ok((title.to_string(), description.to_string()))
}

fn can_see(video: &Video, viewer: Option<&AuthenticatedUser>) -> bool {
    video.is_public || viewer.is_some_and(|u| u.user_id == video.owner_id)
}

fn not_found() -> ApiError {
    ApiError::NotFound("Video not found".to_string())
}

pub struct VideoService;

impl VideoService {
    pub async fn create(
        pool: &PgPool,
        user: &AuthenticatedUser,
        video: NewVideo,
    ) -> Result<Video, ApiError> {
        let channel = ChannelService::find_by_id(pool, video.channel_id).await?;
        ensure_owner(channel.owner_id, user)?;
        let (title, description) = validate_details(&video.title, Some(&video.description))?;

        let id: Uuid = sqlx::query_scalar(
            "INSERT INTO videos (channel_id, title, description, video_url, thumbnail_url, is_public,
                                 video_public_id, thumbnail_public_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING id",
        )
        .bind(video.channel_id)
        .bind(&title)
        .bind(&description)
        .bind(&video.video.secure_url)
        .bind(&video.thumbnail.secure_url)
        .bind(video.is_public)
        .bind(&video.video.public_id)
        .bind(&video.thumbnail.public_id)
        .fetch_one(pool)
        .await?;

        tracing::info!(video_id = %id, channel_id = %video.channel_id, "video posted");
        Self::find(pool, id).await?.ok_or_else(not_found)
    }

    async fn find(pool: &PgPool, id: Uuid) -> Result<Option<Video>, ApiError> {
        let video = sqlx::query_as::<_, Video>(&format!("{VIDEO_SELECT} WHERE v.id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(video)
    }

    /// Private videos are visible to their owner only.
    pub async fn get(
        pool: &PgPool,
        id: Uuid,
        viewer: Option<&AuthenticatedUser>,
    ) -> Result<Video, ApiError> {
        let video = Self::find(pool, id).await?.ok_or_else(not_found)?;
        if !can_see(&video, viewer) {
            return Err(ApiError::Forbidden("This video is private".to_string()));
        }
        Ok(video)
    }

    async fn get_owned(pool: &PgPool, id: Uuid, user: &AuthenticatedUser) -> Result<Video, ApiError> {
        let video = Self::find(pool, id).await?.ok_or_else(not_found)?;
        ensure_owner(video.owner_id, user)?;
        Ok(video)
    }

    pub async fn list_public(pool: &PgPool, limit: i64, offset: i64) -> Result<Vec<Video>, ApiError> {
        let videos = sqlx::query_as::<_, Video>(&format!(
            "{VIDEO_SELECT} WHERE v.is_public ORDER BY v.created_at DESC LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;
        Ok(videos)
    }

    /// The channel owner also sees their private videos.
    pub async fn list_by_channel(
        pool: &PgPool,
        channel_id: Uuid,
        viewer: Option<&AuthenticatedUser>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Video>, ApiError> {
        let channel = ChannelService::find_by_id(pool, channel_id).await?;
        let include_private = viewer.is_some_and(|u| u.user_id == channel.owner_id);

        let videos = sqlx::query_as::<_, Video>(&format!(
            "{VIDEO_SELECT} WHERE v.channel_id = $1 AND (v.is_public OR $2)
             ORDER BY v.created_at DESC LIMIT $3 OFFSET $4"
        ))
        .bind(channel_id)
        .bind(include_private)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;
        Ok(videos)
    }

    /// Returns the deleted row. Its `stored_objects` are no longer referenced.
    pub async fn delete(pool: &PgPool, user: &AuthenticatedUser, id: Uuid) -> Result<Video, ApiError> {
        let video = Self::get_owned(pool, id, user).await?;
        sqlx::query("DELETE FROM videos WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        tracing::info!(video_id = %id, "video deleted");
        Ok(video)
    }

    /// Returns the updated row and the thumbnail it replaced.
    pub async fn update_thumbnail(
        pool: &PgPool,
        user: &AuthenticatedUser,
        id: Uuid,
        thumbnail: &UploadResult,
    ) -> Result<(Video, Option<UploadResult>), ApiError> {
        let previous = Self::get_owned(pool, id, user).await?;
        let video = sqlx::query_as::<_, Video>(&format!(
            "UPDATE videos v SET thumbnail_url = $2, thumbnail_public_id = $3, updated_at = NOW()
             FROM channels c
             WHERE v.id = $1 AND c.id = v.channel_id
             {VIDEO_RETURNING}"
        ))
        .bind(id)
        .bind(&thumbnail.secure_url)
        .bind(&thumbnail.public_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(not_found)?;
        Ok((video, previous.thumbnail_object()))
    }

    pub async fn set_visibility(
        pool: &PgPool,
        user: &AuthenticatedUser,
        id: Uuid,
        is_public: bool,
    ) -> Result<Video, ApiError> {
        Self::get_owned(pool, id, user).await?;
        let video = sqlx::query_as::<_, Video>(&format!(
            "UPDATE videos v SET is_public = $2, updated_at = NOW()
             FROM channels c
             WHERE v.id = $1 AND c.id = v.channel_id
             {VIDEO_RETURNING}"
        ))
        .bind(id)
        .bind(is_public)
        .fetch_optional(pool)
        .await?;
        video.ok_or_else(not_found)
    }

    /// Count a view and return the playable video.
    pub async fn record_view(
        pool: &PgPool,
        id: Uuid,
        viewer: Option<&AuthenticatedUser>,
    ) -> Result<Video, ApiError> {
        Self::get(pool, id, viewer).await?;
        let video = sqlx::query_as::<_, Video>(&format!(
            "UPDATE videos v SET views = v.views + 1
             FROM channels c
             WHERE v.id = $1 AND c.id = v.channel_id
             {VIDEO_RETURNING}"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;
        video.ok_or_else(not_found)
    }
}
