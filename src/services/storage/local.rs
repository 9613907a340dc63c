use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::{ByteStream, ObjectStorage, StorageError, StorageResult};
use crate::models::upload::{Destination, ObjectInfo, ResourceType, UploadResult};

/// Stores objects under a directory on local disk, served back by
/// `GET /media/files/{*path}`.
#[derive(Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
    base_url: String,
}

impl LocalStorage {
    pub async fn new(base_path: impl Into<PathBuf>, base_url: &str) -> StorageResult<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await?;
        Ok(Self {
            base_path,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Keys are relative paths without `..` or a leading `/`.
    fn key_to_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() || key.contains("..") || key.starts_with('/') || key.contains('\\') {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.base_path.join(key))
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }

    async fn write_stream(path: &Path, mut body: ByteStream) -> StorageResult<u64> {
        let mut file = fs::File::create(path).await?;
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let bytes = chunk.map_err(|e| StorageError::Source(e.to_string()))?;
            file.write_all(&bytes).await?;
            written += bytes.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

/// Extension for the stored file: the client's, if it is short and plain,
/// otherwise one derived from the declared media type.
pub(crate) fn file_extension(info: &ObjectInfo) -> String {
    let from_name = info
        .file_name
        .as_deref()
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| ext.to_ascii_lowercase());

    from_name
        .or_else(|| {
            let mime: mime::Mime = info.content_type.as_deref()?.parse().ok()?;
            mime_guess::get_mime_extensions_str(mime.essence_str())?
                .first()
                .map(|ext| ext.to_string())
        })
        .unwrap_or_else(|| "bin".to_string())
}

/// Resource type to report for an object; `auto` resolves from the declared media type.
pub(crate) fn resolve_resource_type(requested: ResourceType, content_type: Option<&str>) -> ResourceType {
    match (requested, content_type) {
        (ResourceType::Auto, Some(ct)) if ct.starts_with("image/") => ResourceType::Image,
        (ResourceType::Auto, Some(ct)) if ct.starts_with("video/") => ResourceType::Video,
        (requested, _) => requested,
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    async fn create_object(
        &self,
        destination: &Destination,
        info: &ObjectInfo,
        body: ByteStream,
    ) -> StorageResult<UploadResult> {
        let ext = file_extension(info);
        let key = format!("{}/{}.{}", destination.folder, Uuid::new_v4(), ext);
        let path = self.key_to_path(&key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let bytes = match Self::write_stream(&path, body).await {
            Ok(n) => n,
            Err(e) => {
                let _ = fs::remove_file(&path).await;
                return Err(e);
            }
        };

        tracing::debug!(key = %key, bytes, "stored object on local disk");

        Ok(UploadResult {
            secure_url: self.url_for(&key),
            public_id: key,
            resource_type: resolve_resource_type(destination.resource_type, info.content_type.as_deref()),
            bytes,
            format: Some(ext),
            original_filename: info.file_name.clone(),
            content_type: info.content_type.clone(),
        })
    }

    async fn delete_object(&self, object: &UploadResult) -> StorageResult<()> {
        let path = self.key_to_path(&object.public_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteFailed(e.to_string())),
        }
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}
