pub mod auth;
pub mod channel;
pub mod upload;
pub mod user;
pub mod video;
