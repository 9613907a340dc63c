use axum::{
    extract::{Path, State},
    Json,
};

use crate::{
    error::{ApiError, ApiResponse, ApiResult},
    middleware::upload::UploadedForm,
    models::{
        auth::AuthenticatedUser,
        channel::{Channel, RenameChannelRequest, SubscribedChannel, Subscriber, SubscriberCount},
    },
    services::channels::ChannelService,
    AppState,
};

pub async fn create_channel(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    form: UploadedForm,
) -> ApiResult<Channel> {
    let banner_url = form.uploads.first("banner").map(|b| b.secure_url.clone());
    let result = match form.fields.require("name") {
        Ok(name) => {
            ChannelService::create(&state.db, &user, &name, form.fields.text("description"), banner_url)
                .await
        }
        Err(e) => Err(e),
    };
    if result.is_err() {
        state.uploads.discard(&form.uploads).await;
    }
    Ok(ApiResponse::created("Channel created successfully", result?))
}

pub async fn get_channel(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<Channel> {
    let channel = ChannelService::find_by_name(&state.db, &name).await?;
    Ok(ApiResponse::ok("Channel retrieved successfully", channel))
}

pub async fn update_banner(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(name): Path<String>,
    form: UploadedForm,
) -> ApiResult<Channel> {
    let result = match form.uploads.require_url("banner") {
        Ok(url) => ChannelService::update_banner(&state.db, &user, &name, &url).await,
        Err(e) => Err(e),
    };
    if result.is_err() {
        state.uploads.discard(&form.uploads).await;
    }
    Ok(ApiResponse::ok("Banner updated successfully", result?))
}

pub async fn rename_channel(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(name): Path<String>,
    Json(body): Json<RenameChannelRequest>,
) -> ApiResult<Channel> {
    if body.new_name.trim().is_empty() {
        return Err(ApiError::BadRequest("newName is required".to_string()));
    }
    let channel = ChannelService::rename(&state.db, &user, &name, &body.new_name).await?;
    Ok(ApiResponse::ok("Channel name updated successfully", channel))
}

pub async fn subscribe(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(name): Path<String>,
) -> ApiResult<SubscribedChannel> {
    let channel = ChannelService::subscribe(&state.db, &user, &name).await?;
    Ok(ApiResponse::ok("Subscribed to channel successfully", channel))
}

pub async fn unsubscribe(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(name): Path<String>,
) -> ApiResult<SubscribedChannel> {
    let channel = ChannelService::unsubscribe(&state.db, &user, &name).await?;
    Ok(ApiResponse::ok("Unsubscribed from channel successfully", channel))
}

pub async fn list_subscribers(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Vec<Subscriber>> {
    let subscribers = ChannelService::list_subscribers(&state.db, &name).await?;
    let message = if subscribers.is_empty() {
        "No subscribers found for this channel"
    } else {
        "Subscribers retrieved successfully"
    };
    Ok(ApiResponse::ok(message, subscribers))
}

pub async fn subscriber_count(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<SubscriberCount> {
    let subscribers_count = ChannelService::subscriber_count(&state.db, &name).await?;
    Ok(ApiResponse::ok(
        "Subscribers count retrieved successfully",
        SubscriberCount { subscribers_count },
    ))
}
