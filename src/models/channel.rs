use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const DEFAULT_CHANNEL_DESCRIPTION: &str = "Welcome to my channel!";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Channel {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: String,
    pub banner_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameChannelRequest {
    pub new_name: String,
}

/// A channel together with its current subscriber count.
#[derive(Debug, Serialize)]
pub struct SubscribedChannel {
    #[serde(flatten)]
    pub channel: Channel,
    pub subscribers_count: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Subscriber {
    pub id: Uuid,
    pub username: String,
    pub subscribed_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberCount {
    pub subscribers_count: i64,
}
