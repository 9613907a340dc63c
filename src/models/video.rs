use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::upload::{ResourceType, UploadResult};

pub const MAX_TITLE_LEN: usize = 100;
pub const MAX_DESCRIPTION_LEN: usize = 500;

/// Video row joined with its channel's owner, so ownership checks need no
/// second query. `owner_id` is not part of the public payload.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Video {
    pub id: Uuid,
    pub channel_id: Uuid,
    #[serde(skip_serializing)]
    pub owner_id: Uuid,
    pub title: String,
    pub description: String,
    pub video_url: String,
    pub thumbnail_url: Option<String>,
    pub is_public: bool,
    pub views: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub video_public_id: Option<String>,
    #[serde(skip_serializing)]
    pub thumbnail_public_id: Option<String>,
}

impl Video {
    /// Storage handle of the current thumbnail, if its key was recorded.
    pub fn thumbnail_object(&self) -> Option<UploadResult> {
        let public_id = self.thumbnail_public_id.as_ref()?;
        let url = self.thumbnail_url.as_ref()?;
        Some(stored_object(public_id, url, ResourceType::Image))
    }

    /// Every stored object the row references: the video file, then the thumbnail.
    pub fn stored_objects(&self) -> Vec<UploadResult> {
        let video = self
            .video_public_id
            .as_ref()
            .map(|id| stored_object(id, &self.video_url, ResourceType::Video));
        video.into_iter().chain(self.thumbnail_object()).collect()
    }
}

fn stored_object(public_id: &str, url: &str, resource_type: ResourceType) -> UploadResult {
    UploadResult {
        secure_url: url.to_string(),
        public_id: public_id.to_string(),
        resource_type,
        bytes: 0,
        format: None,
        original_filename: None,
        content_type: None,
    }
}

/// Listing/detail shape: the playable URL is only handed out by the view endpoint.
#[derive(Debug, Serialize)]
pub struct VideoSummary {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub title: String,
    pub description: String,
    pub thumbnail_url: Option<String>,
    pub views: i64,
    pub created_at: DateTime<Utc>,
}

impl From<Video> for VideoSummary {
    fn from(v: Video) -> Self {
        Self {
            id: v.id,
            channel_id: v.channel_id,
            title: v.title,
            description: v.description,
            thumbnail_url: v.thumbnail_url,
            views: v.views,
            created_at: v.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewVideo {
    pub channel_id: Uuid,
    pub title: String,
    pub description: String,
    pub is_public: bool,
    pub video: UploadResult,
    pub thumbnail: UploadResult,
}

#[derive(Debug, Deserialize)]
pub struct VisibilityRequest {
    pub is_public: bool,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Like {
    pub video_id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct LikeCount {
    pub count: i64,
}

#[derive(Debug, Deserialize)]
pub struct VideoQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl VideoQuery {
    /// (limit, offset) with page >= 1 and 1 <= per_page <= 100.
    pub fn limit_offset(&self) -> (i64, i64) {
        let per_page = self.per_page.unwrap_or(20).clamp(1, 100);
        let page = self.page.unwrap_or(1).max(1);
        (per_page, (page - 1).saturating_mul(per_page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_is_clamped() {
        let q = VideoQuery { page: Some(0), per_page: Some(1000) };
        assert_eq!(q.limit_offset(), (100, 0));
        let q = VideoQuery { page: Some(3), per_page: None };
        assert_eq!(q.limit_offset(), (20, 40));
        let q = VideoQuery { page: Some(i64::MAX), per_page: Some(100) };
        assert_eq!(q.limit_offset(), (100, i64::MAX));
        let q = VideoQuery { page: Some(i64::MIN), per_page: Some(-5) };
        assert_eq!(q.limit_offset(), (1, 0));
    }

    fn row(video_public_id: Option<&str>, thumbnail_public_id: Option<&str>) -> Video {
        Video {
            id: Uuid::new_v4(),
            channel_id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            title: "t".into(),
            description: String::new(),
            video_url: "https://cdn/v.mp4".into(),
            thumbnail_url: Some("https://cdn/t.png".into()),
            is_public: true,
            views: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            video_public_id: video_public_id.map(Into::into),
            thumbnail_public_id: thumbnail_public_id.map(Into::into),
        }
    }

    #[test]
    fn stored_objects_follow_recorded_keys() {
        let objects = row(Some("videos/v"), Some("thumbnails/t")).stored_objects();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].public_id, "videos/v");
        assert_eq!(objects[0].resource_type, ResourceType::Video);
        assert_eq!(objects[1].public_id, "thumbnails/t");
        assert_eq!(objects[1].secure_url, "https://cdn/t.png");

        let legacy = row(None, None);
        assert!(legacy.stored_objects().is_empty());
        assert!(legacy.thumbnail_object().is_none());
    }

    #[test]
    fn storage_keys_stay_out_of_payloads() {
        let json = serde_json::to_value(row(Some("videos/v"), Some("thumbnails/t"))).unwrap();
        assert!(json.get("video_public_id").is_none());
        assert!(json.get("owner_id").is_none());
        assert_eq!(json["video_url"], "https://cdn/v.mp4");
    }
}
