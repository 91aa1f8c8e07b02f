//! Storage configuration.

use std::path::PathBuf;

#[cfg(feature = "config")]
use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};

/// Which backend holds originals and derivatives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Amazon S3 or any S3-compatible service, one bucket per image bucket.
    #[default]
    S3,
    /// A directory on the local filesystem.
    Local,
    /// Process memory; contents vanish on exit.
    Memory,
}

/// S3 connection settings shared by every per-bucket client.
///
/// Unset fields fall back to the standard `AWS_*` environment variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
pub struct S3Config {
    /// AWS region.
    #[cfg_attr(
        feature = "config",
        arg(long = "s3-region", env = "VIP_S3_REGION", default_value = "us-east-1")
    )]
    #[serde(default = "default_region")]
    pub region: String,

    /// Endpoint URL for S3-compatible services such as MinIO.
    #[cfg_attr(feature = "config", arg(long = "s3-endpoint", env = "VIP_S3_ENDPOINT"))]
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Access key id for static credentials.
    #[cfg_attr(
        feature = "config",
        arg(long = "s3-access-key-id", env = "VIP_S3_ACCESS_KEY_ID")
    )]
    #[serde(default)]
    pub access_key_id: Option<String>,

    /// Secret access key for static credentials.
    #[cfg_attr(
        feature = "config",
        arg(long = "s3-secret-access-key", env = "VIP_S3_SECRET_ACCESS_KEY")
    )]
    #[serde(default, skip_serializing)]
    pub secret_access_key: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_owned()
}

/// Complete storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
pub struct StorageConfig {
    /// Storage backend.
    #[cfg_attr(
        feature = "config",
        arg(long = "storage", env = "VIP_STORAGE", value_enum, default_value = "s3")
    )]
    #[serde(default)]
    pub backend: StorageBackend,

    /// Root directory for the local backend.
    #[cfg_attr(
        feature = "config",
        arg(long = "storage-root", env = "VIP_STORAGE_ROOT", default_value = "./data")
    )]
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// S3 settings.
    #[cfg_attr(feature = "config", command(flatten))]
    #[serde(default)]
    pub s3: S3Config,
}

fn default_root() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            root: default_root(),
            s3: S3Config {
                region: default_region(),
                ..S3Config::default()
            },
        }
    }
}

impl StorageConfig {
    /// In-memory storage, mostly useful for tests and local runs.
    pub fn memory() -> Self {
        Self {
            backend: StorageBackend::Memory,
            ..Self::default()
        }
    }
}
