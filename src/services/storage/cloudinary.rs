use async_trait::async_trait;
use chrono::Utc;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use super::{ByteStream, ObjectStorage, StorageError, StorageResult};
use crate::{
    config::CloudinaryConfig,
    models::upload::{Destination, ObjectInfo, ResourceType, UploadResult},
};

const API_BASE: &str = "https://api.cloudinary.com/v1_1";

/// Streams uploads to Cloudinary's signed upload API.
pub struct CloudinaryStorage {
    client: reqwest::Client,
    settings: CloudinaryConfig,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: String,
    public_id: String,
    resource_type: String,
    bytes: u64,
    format: Option<String>,
    original_filename: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

#[derive(Debug, Deserialize)]
struct DestroyResponse {
    result: String,
}

impl CloudinaryStorage {
    pub fn new(settings: CloudinaryConfig) -> StorageResult<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            settings,
            api_base: API_BASE.to_string(),
        })
    }

    /// Signature over the sorted `key=value` pairs followed by the API secret.
    fn sign(&self, params: &[(&str, &str)]) -> String {
        sign_params(params, &self.settings.api_secret)
    }

    fn endpoint(&self, resource_type: ResourceType, action: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.api_base, self.settings.cloud_name, resource_type, action
        )
    }
}

fn sign_params(params: &[(&str, &str)], secret: &str) -> String {
    let mut sorted: Vec<_> = params.iter().filter(|(_, v)| !v.is_empty()).collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    let joined = sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    hex::encode(Sha256::digest(format!("{joined}{secret}").as_bytes()))
}

fn parse_resource_type(s: &str) -> ResourceType {
    match s {
        "image" => ResourceType::Image,
        "video" => ResourceType::Video,
        _ => ResourceType::Auto,
    }
}

async fn error_message(resp: reqwest::Response) -> String {
    let status = resp.status();
    match resp.json::<ErrorResponse>().await {
        Ok(body) => format!("{status}: {}", body.error.message),
        Err(_) => status.to_string(),
    }
}

#[async_trait]
impl ObjectStorage for CloudinaryStorage {
    async fn create_object(
        &self,
        destination: &Destination,
        info: &ObjectInfo,
        body: ByteStream,
    ) -> StorageResult<UploadResult> {
        let timestamp = Utc::now().timestamp().to_string();
        let signature = self.sign(&[
            ("folder", destination.folder.as_str()),
            ("timestamp", timestamp.as_str()),
        ]);

        let mut file = Part::stream(reqwest::Body::wrap_stream(body))
            .file_name(info.file_name.clone().unwrap_or_else(|| "upload".to_string()));
        if let Some(ct) = info.content_type.as_deref() {
            file = file.mime_str(ct)?;
        }

        let form = Form::new()
            .text("api_key", self.settings.api_key.clone())
            .text("timestamp", timestamp)
            .text("folder", destination.folder.clone())
            .text("signature", signature)
            .text("signature_algorithm", "sha256")
            .part("file", file);

        let resp = self
            .client
            .post(self.endpoint(destination.resource_type, "upload"))
            .multipart(form)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(StorageError::UploadFailed(error_message(resp).await));
        }

        let uploaded: UploadResponse = resp.json().await?;
        tracing::debug!(public_id = %uploaded.public_id, bytes = uploaded.bytes, "uploaded to cloudinary");

        Ok(UploadResult {
            secure_url: uploaded.secure_url,
            public_id: uploaded.public_id,
            resource_type: parse_resource_type(&uploaded.resource_type),
            bytes: uploaded.bytes,
            format: uploaded.format,
            original_filename: uploaded.original_filename.or_else(|| info.file_name.clone()),
            content_type: info.content_type.clone(),
        })
    }

    async fn delete_object(&self, object: &UploadResult) -> StorageResult<()> {
        let timestamp = Utc::now().timestamp().to_string();
        let signature = self.sign(&[
            ("public_id", object.public_id.as_str()),
            ("timestamp", timestamp.as_str()),
        ]);
        let resource_type = match object.resource_type {
            ResourceType::Auto => ResourceType::Image,
            other => other,
        };

        let resp = self
            .client
            .post(self.endpoint(resource_type, "destroy"))
            .form(&[
                ("public_id", object.public_id.as_str()),
                ("timestamp", timestamp.as_str()),
                ("api_key", self.settings.api_key.as_str()),
                ("signature", signature.as_str()),
                ("signature_algorithm", "sha256"),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(StorageError::DeleteFailed(error_message(resp).await));
        }
        let outcome: DestroyResponse = resp.json().await?;
        match outcome.result.as_str() {
            "ok" | "not found" => Ok(()),
            other => Err(StorageError::DeleteFailed(other.to_string())),
        }
    }

    fn backend_name(&self) -> &'static str {
        "cloudinary"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_sorts_params_and_appends_secret() {
        let sig = sign_params(
            &[("timestamp", "1700000000"), ("folder", "vidtube/videos")],
            "shh",
        );
        assert_eq!(
            sig,
            "aeaa410ba954151d2db326b42bdc4c8ccf41aebe9bbbf1f8e20406f4d2365483"
        );
    }

    #[test]
    fn empty_params_are_not_signed() {
        let with_empty = sign_params(&[("folder", "a"), ("public_id", ""), ("timestamp", "1")], "s");
        let without = sign_params(&[("folder", "a"), ("timestamp", "1")], "s");
        assert_eq!(with_empty, without);
    }

    #[test]
    fn endpoint_uses_resource_type() {
        let storage = CloudinaryStorage::new(CloudinaryConfig {
            cloud_name: "demo".into(),
            api_key: "key".into(),
            api_secret: "secret".into(),
        })
        .unwrap();
        assert_eq!(
            storage.endpoint(ResourceType::Video, "upload"),
            "https://api.cloudinary.com/v1_1/demo/video/upload"
        );
        assert_eq!(
            storage.endpoint(ResourceType::Auto, "upload"),
            "https://api.cloudinary.com/v1_1/demo/auto/upload"
        );
    }
}
