pub mod channels;
pub mod health;
pub mod media;
pub mod users;
pub mod videos;
