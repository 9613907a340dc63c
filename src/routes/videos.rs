use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResponse, ApiResult},
    middleware::upload::UploadedForm,
    models::{
        auth::AuthenticatedUser,
        video::{Like, LikeCount, NewVideo, Video, VideoQuery, VideoSummary, VisibilityRequest},
    },
    services::{likes::LikeService, videos::VideoService},
    AppState,
};

pub async fn post_video(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    form: UploadedForm,
) -> ApiResult<Video> {
    let result = create_video(&state, &user, &form).await;
    if result.is_err() {
        state.uploads.discard(&form.uploads).await;
    }
    Ok(ApiResponse::created("Video uploaded successfully", result?))
}

async fn create_video(
    state: &AppState,
    user: &AuthenticatedUser,
    form: &UploadedForm,
) -> Result<Video, ApiError> {
    let channel_id: Uuid = form
        .fields
        .require("channel_id")?
        .parse()
        .map_err(|_| ApiError::BadRequest("channel_id must be a valid id".to_string()))?;

    let new_video = NewVideo {
        channel_id,
        title: form.fields.require("title")?,
        description: form.fields.text("description").unwrap_or_default(),
        is_public: form.fields.flag("is_public")?.unwrap_or(true),
        video: form.uploads.require("video")?.clone(),
        thumbnail: form.uploads.require("thumbnail")?.clone(),
    };
    VideoService::create(&state.db, user, new_video).await
}

pub async fn list_videos(
    State(state): State<AppState>,
    Query(query): Query<VideoQuery>,
) -> ApiResult<Vec<VideoSummary>> {
    let (limit, offset) = query.limit_offset();
    let videos = VideoService::list_public(&state.db, limit, offset).await?;
    Ok(ApiResponse::ok(
        "Videos retrieved successfully",
        videos.into_iter().map(VideoSummary::from).collect(),
    ))
}

pub async fn list_channel_videos(
    State(state): State<AppState>,
    viewer: Option<AuthenticatedUser>,
    Path(channel_id): Path<Uuid>,
    Query(query): Query<VideoQuery>,
) -> ApiResult<Vec<VideoSummary>> {
    let (limit, offset) = query.limit_offset();
    let videos =
        VideoService::list_by_channel(&state.db, channel_id, viewer.as_ref(), limit, offset).await?;
    Ok(ApiResponse::ok(
        "Videos retrieved successfully",
        videos.into_iter().map(VideoSummary::from).collect(),
    ))
}

pub async fn get_video(
    State(state): State<AppState>,
    viewer: Option<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<VideoSummary> {
    let video = VideoService::get(&state.db, id, viewer.as_ref()).await?;
    Ok(ApiResponse::ok("Video retrieved successfully", VideoSummary::from(video)))
}

pub async fn delete_video(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    let video = VideoService::delete(&state.db, &user, id).await?;
    state.uploads.release(video.stored_objects()).await;
    Ok(ApiResponse::ok("Video deleted successfully", ()))
}

pub async fn update_thumbnail(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    form: UploadedForm,
) -> ApiResult<Video> {
    let result = match form.uploads.require("thumbnail") {
        Ok(thumbnail) => VideoService::update_thumbnail(&state.db, &user, id, thumbnail).await,
        Err(e) => Err(e),
    };
    let (video, replaced) = match result {
        Ok(updated) => updated,
        Err(e) => {
            state.uploads.discard(&form.uploads).await;
            return Err(e);
        }
    };
    state.uploads.release(replaced.into_iter().collect()).await;
    Ok(ApiResponse::ok("Thumbnail updated successfully", video))
}

pub async fn set_visibility(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(body): Json<VisibilityRequest>,
) -> ApiResult<Video> {
    let video = VideoService::set_visibility(&state.db, &user, id, body.is_public).await?;
    Ok(ApiResponse::ok("Video visibility updated successfully", video))
}

pub async fn view_video(
    State(state): State<AppState>,
    viewer: Option<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Video> {
    let video = VideoService::record_view(&state.db, id, viewer.as_ref()).await?;
    Ok(ApiResponse::ok("Video viewed successfully", video))
}

pub async fn like_video(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Like> {
    let like = LikeService::like(&state.db, &user, id).await?;
    Ok(ApiResponse::created("Video liked successfully", like))
}

pub async fn unlike_video(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    LikeService::unlike(&state.db, &user, id).await?;
    Ok(ApiResponse::ok("Video unliked successfully", ()))
}

pub async fn like_count(
    State(state): State<AppState>,
    viewer: Option<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<LikeCount> {
    let count = LikeService::count(&state.db, id, viewer.as_ref()).await?;
    Ok(ApiResponse::ok("Likes count retrieved successfully", LikeCount { count }))
}
