use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Where blobs are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Local,
    S3,
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" | "fs" => Ok(StorageBackend::Local),
            "s3" | "minio" => Ok(StorageBackend::S3),
            _ => Err(anyhow::anyhow!("Invalid storage backend: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub local_root: PathBuf,
    pub s3: S3Config,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    /// Static credentials; the default AWS chain is used when unset
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub path_style: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            local_root: PathBuf::from("./storage/blobs"),
            s3: S3Config {
                endpoint: None,
                region: "us-east-1".to_string(),
                bucket: "datasync".to_string(),
                access_key: None,
                secret_key: None,
                path_style: false,
            },
        }
    }
}

impl StorageConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            backend: match env::var("STORAGE_BACKEND") {
                Ok(value) => value.parse()?,
                Err(_) => defaults.backend,
            },
            local_root: env::var("STORAGE_LOCAL_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.local_root),
            s3: S3Config {
                endpoint: env::var("S3_ENDPOINT").ok(),
                region: env::var("S3_REGION").unwrap_or(defaults.s3.region),
                bucket: env::var("S3_BUCKET").unwrap_or(defaults.s3.bucket),
                access_key: env::var("S3_ACCESS_KEY")
                    .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                    .ok(),
                secret_key: env::var("S3_SECRET_KEY")
                    .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                    .ok(),
                path_style: env::var("S3_PATH_STYLE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(false),
            },
        })
    }

    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            backend: StorageBackend::S3,
            s3: S3Config {
                endpoint: Some(endpoint.into()),
                region: "us-east-1".to_string(),
                bucket: bucket.into(),
                access_key: Some("minioadmin".to_string()),
                secret_key: Some("minioadmin".to_string()),
                path_style: true,
            },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.backend == StorageBackend::S3 {
            if self.s3.bucket.is_empty() {
                anyhow::bail!("S3 bucket cannot be empty");
            }
            if self.s3.access_key.is_some() != self.s3.secret_key.is_some() {
                anyhow::bail!("S3 access key and secret key must be set together");
            }
        }
        Ok(())
    }
}
