pub mod auth;
pub mod channels;
pub mod credentials;
pub mod likes;
pub mod multipart;
pub mod storage;
pub mod uploads;
pub mod videos;
