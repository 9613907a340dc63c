use std::env;
use std::time::Duration;

use crate::services::{credentials::TokenSettings, uploads::UploadSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Local,
    Cloudinary,
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(StorageBackend::Local),
            "cloudinary" => Ok(StorageBackend::Cloudinary),
            _ => Err(anyhow::anyhow!("Unknown storage backend: {s}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub access_token_secret: String,
    pub refresh_token_secret: String,
    pub access_token_expiry_seconds: u64,
    pub refresh_token_expiry_days: u64,
    pub bcrypt_cost: u32,
    pub host: String,
    pub port: u16,
    pub cors_origin: Option<String>,
    /// `APP_ENV=production` marks cookies `Secure`.
    pub secure_cookies: bool,
    pub storage_backend: StorageBackend,
    pub storage_folder: String,
    pub media_dir: String,
    pub media_base_url: String,
    pub cloudinary: Option<CloudinaryConfig>,
    pub upload_timeout_seconds: u64,
    pub max_body_bytes: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let storage_backend: StorageBackend = env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "local".into())
            .parse()?;

        let cloudinary = match storage_backend {
            StorageBackend::Cloudinary => Some(CloudinaryConfig {
                cloud_name: required("CLOUDINARY_CLOUD_NAME")?,
                api_key: required("CLOUDINARY_API_KEY")?,
                api_secret: required("CLOUDINARY_API_SECRET")?,
            }),
            StorageBackend::Local => None,
        };

        let port: u16 = env::var("PORT").unwrap_or_else(|_| "8000".into()).parse()?;

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            access_token_secret: required("ACCESS_TOKEN_SECRET")?,
            refresh_token_secret: required("REFRESH_TOKEN_SECRET")?,
            access_token_expiry_seconds: env::var("ACCESS_TOKEN_EXPIRY_SECONDS")
                .unwrap_or_else(|_| "900".into())
                .parse()?,
            refresh_token_expiry_days: env::var("REFRESH_TOKEN_EXPIRY_DAYS")
                .unwrap_or_else(|_| "10".into())
                .parse()?,
            bcrypt_cost: env::var("BCRYPT_COST")
                .unwrap_or_else(|_| bcrypt::DEFAULT_COST.to_string())
                .parse()?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port,
            cors_origin: env::var("CORS_ORIGIN").ok().filter(|s| !s.is_empty()),
            secure_cookies: env::var("APP_ENV")
                .map(|v| v.eq_ignore_ascii_case("production"))
                .unwrap_or(false),
            storage_backend,
            storage_folder: env::var("STORAGE_FOLDER").unwrap_or_else(|_| "vidtube".into()),
            media_dir: env::var("MEDIA_DIR").unwrap_or_else(|_| "./data/media".into()),
            media_base_url: env::var("MEDIA_BASE_URL")
                .unwrap_or_else(|_| format!("http://localhost:{port}/media/files")),
            cloudinary,
            upload_timeout_seconds: env::var("UPLOAD_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "600".into())
                .parse()?,
            max_body_bytes: env::var("MAX_BODY_BYTES")
                .unwrap_or_else(|_| (100 * 1024 * 1024).to_string())
                .parse()?,
        })
    }

    pub fn token_settings(&self) -> TokenSettings {
        TokenSettings {
            access_secret: self.access_token_secret.clone(),
            refresh_secret: self.refresh_token_secret.clone(),
            access_ttl: Duration::from_secs(self.access_token_expiry_seconds),
            refresh_ttl: Duration::from_secs(self.refresh_token_expiry_days * 86_400),
            bcrypt_cost: self.bcrypt_cost,
        }
    }

    pub fn upload_settings(&self) -> UploadSettings {
        UploadSettings {
            root_folder: self.storage_folder.clone(),
            transfer_timeout: (self.upload_timeout_seconds > 0)
                .then(|| Duration::from_secs(self.upload_timeout_seconds)),
            ..UploadSettings::default()
        }
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| anyhow::anyhow!("Missing required env var: {}", key))
}
