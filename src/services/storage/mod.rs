//! Object storage backends that uploads are streamed into.

pub mod cloudinary;
pub mod local;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;

use crate::{
    config::{Config, StorageBackend},
    models::upload::{Destination, ObjectInfo, UploadResult},
};

pub use cloudinary::CloudinaryStorage;
pub use local::LocalStorage;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("delete failed: {0}")]
    DeleteFailed(String),

    #[error("transfer timed out after {0}s")]
    Timeout(u64),

    #[error("source stream failed: {0}")]
    Source(String),

    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Bytes of one file part, delivered in order as the request body arrives.
/// An `Err` item means the request body broke off.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send + Sync>>;

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Consume `body` and store it under `destination`.
    async fn create_object(
        &self,
        destination: &Destination,
        info: &ObjectInfo,
        body: ByteStream,
    ) -> StorageResult<UploadResult>;

    /// Remove an object previously returned by `create_object`.
    async fn delete_object(&self, object: &UploadResult) -> StorageResult<()>;

    fn backend_name(&self) -> &'static str;
}

pub async fn create_storage(config: &Config) -> anyhow::Result<Arc<dyn ObjectStorage>> {
    match config.storage_backend {
        StorageBackend::Local => {
            let storage = LocalStorage::new(&config.media_dir, &config.media_base_url).await?;
            Ok(Arc::new(storage))
        }
        StorageBackend::Cloudinary => {
            let settings = config
                .cloudinary
                .clone()
                .ok_or_else(|| anyhow::anyhow!("Cloudinary credentials are not configured"))?;
            Ok(Arc::new(CloudinaryStorage::new(settings)?))
        }
    }
}
