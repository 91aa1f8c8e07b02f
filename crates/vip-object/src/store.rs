//! The [`ImageStore`] contract and its `object_store` implementation.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use tokio::sync::RwLock;

use crate::client::ObjectStoreClient;
use crate::{Error, Result, S3Config, StorageBackend, StorageConfig, TRACING_TARGET};

/// Bucket-scoped access to originals and derivatives.
#[async_trait]
pub trait ImageStore: Send + Sync + 'static {
    /// Reads the full object, or [`Error::NotFound`].
    async fn read(&self, bucket: &str, key: &str) -> Result<Bytes>;

    /// Stores `data` under `key`, replacing any previous object.
    async fn write(&self, bucket: &str, key: &str, data: Bytes, content_type: &str) -> Result<()>;

    /// Returns the recorded content type, if the backend keeps one.
    async fn probe(&self, bucket: &str, key: &str) -> Result<Option<String>>;
}

enum Backend {
    /// One store for all buckets; each key is a single part under `{bucket}`.
    Shared {
        client: ObjectStoreClient,
        records_content_type: bool,
    },
    /// One S3 client per bucket, built on first use.
    PerBucket {
        config: S3Config,
        clients: RwLock<HashMap<String, ObjectStoreClient>>,
    },
}

/// [`ImageStore`] backed by [`object_store`].
pub struct ObjectImageStore {
    backend: Backend,
}

impl ObjectImageStore {
    /// Builds the store described by `config`.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        match config.backend {
            StorageBackend::S3 => Ok(Self::s3(config.s3.clone())),
            StorageBackend::Local => Self::local(&config.root),
            StorageBackend::Memory => Ok(Self::in_memory()),
        }
    }

    /// A store kept in process memory.
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Shared {
                client: ObjectStoreClient::new(InMemory::new()),
                records_content_type: true,
            },
        }
    }

    /// A store rooted at `root`, which is created if missing.
    pub fn local(root: &std::path::Path) -> Result<Self> {
        std::fs::create_dir_all(root).map_err(|err| {
            Error::storage_with_source(format!("cannot create '{}'", root.display()), err)
        })?;
        let fs = LocalFileSystem::new_with_prefix(root)
            .map_err(|err| Error::storage_with_source("cannot open local storage", err))?;

        Ok(Self {
            backend: Backend::Shared {
                client: ObjectStoreClient::new(fs),
                records_content_type: false,
            },
        })
    }

    /// A store that maps each image bucket to an S3 bucket of the same name.
    pub fn s3(config: S3Config) -> Self {
        Self {
            backend: Backend::PerBucket {
                config,
                clients: RwLock::new(HashMap::new()),
            },
        }
    }

    async fn locate(&self, bucket: &str, key: &str) -> Result<(ObjectStoreClient, Path)> {
        match &self.backend {
            // A derivative key extends its original's key, so nesting on
            // `/` would need `abc` to be both a file and a directory.
            Backend::Shared { client, .. } => Ok((client.clone(), Path::from_iter([bucket, key]))),
            Backend::PerBucket { config, clients } => {
                if let Some(client) = clients.read().await.get(bucket) {
                    return Ok((client.clone(), Path::from(key)));
                }

                let mut clients = clients.write().await;
                let client = match clients.get(bucket) {
                    Some(client) => client.clone(),
                    None => {
                        let client = connect_s3(config, bucket)?;
                        tracing::info!(target: TRACING_TARGET, bucket, "connected s3 bucket");
                        clients.insert(bucket.to_owned(), client.clone());
                        client
                    }
                };
                Ok((client, Path::from(key)))
            }
        }
    }

    fn records_content_type(&self) -> bool {
        match &self.backend {
            Backend::Shared {
                records_content_type,
                ..
            } => *records_content_type,
            Backend::PerBucket { .. } => true,
        }
    }
}

impl fmt::Debug for ObjectImageStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.backend {
            Backend::Shared { client, .. } => client.0.to_string(),
            Backend::PerBucket { config, .. } => format!("s3({})", config.region),
        };
        f.debug_struct("ObjectImageStore")
            .field("backend", &kind)
            .finish()
    }
}

fn connect_s3(config: &S3Config, bucket: &str) -> Result<ObjectStoreClient> {
    let mut builder = AmazonS3Builder::from_env()
        .with_bucket_name(bucket)
        .with_region(&config.region);

    if let Some(endpoint) = &config.endpoint {
        builder = builder.with_endpoint(endpoint);
        if endpoint.starts_with("http://") {
            builder = builder.with_allow_http(true);
        }
    }
    if let Some(access_key) = &config.access_key_id {
        builder = builder.with_access_key_id(access_key);
    }
    if let Some(secret_key) = &config.secret_access_key {
        builder = builder.with_secret_access_key(secret_key);
    }

    let store = builder.build().map_err(|err| {
        Error::storage_with_source(format!("cannot connect s3 bucket '{bucket}'"), err)
    })?;
    Ok(ObjectStoreClient::new(store))
}

#[async_trait]
impl ImageStore for ObjectImageStore {
    async fn read(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let (client, path) = self.locate(bucket, key).await?;
        let output = client
            .get(&path)
            .await
            .map_err(|err| Error::from_object_store(err, bucket, key))?;
        Ok(output.data)
    }

    async fn write(&self, bucket: &str, key: &str, data: Bytes, content_type: &str) -> Result<()> {
        let (client, path) = self.locate(bucket, key).await?;
        let content_type = self.records_content_type().then_some(content_type);
        client
            .put(&path, data, content_type)
            .await
            .map_err(|err| Error::from_object_store(err, bucket, key))
    }

    async fn probe(&self, bucket: &str, key: &str) -> Result<Option<String>> {
        if !self.records_content_type() {
            return Ok(None);
        }
        let (client, path) = self.locate(bucket, key).await?;
        client
            .content_type(&path)
            .await
            .map_err(|err| Error::from_object_store(err, bucket, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_round_trip_is_bucket_scoped() {
        let store = ObjectImageStore::in_memory();
        store
            .write("a", "img", Bytes::from_static(b"one"), "image/png")
            .await
            .unwrap();

        assert_eq!(store.read("a", "img").await.unwrap(), Bytes::from_static(b"one"));
        let err = store.read("b", "img").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(err, Error::NotFound { bucket, key } if bucket == "b" && key == "img"));
    }

    #[tokio::test]
    async fn probe_reports_content_type() {
        let store = ObjectImageStore::in_memory();
        store
            .write("a", "anim", Bytes::from_static(b"GIF89a"), "image/gif")
            .await
            .unwrap();

        assert_eq!(
            store.probe("a", "anim").await.unwrap().as_deref(),
            Some("image/gif")
        );
        assert!(store.probe("a", "missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn local_backend_stores_under_bucket_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectImageStore::local(dir.path()).unwrap();
        store
            .write("photos", "abc/s/250", Bytes::from_static(b"jpeg"), "image/jpeg")
            .await
            .unwrap();

        assert!(dir.path().join("photos").is_dir());
        assert_eq!(
            store.read("photos", "abc/s/250").await.unwrap(),
            Bytes::from_static(b"jpeg")
        );
        assert_eq!(store.probe("photos", "abc/s/250").await.unwrap(), None);
        assert!(store.read("photos", "abc").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn local_backend_keeps_derivatives_beside_their_original() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectImageStore::local(dir.path()).unwrap();
        store
            .write("photos", "abc", Bytes::from_static(b"original"), "image/jpeg")
            .await
            .unwrap();

        assert!(store.read("photos", "abc/s/250").await.unwrap_err().is_not_found());

        for (key, data) in [("abc/s/250", "resized"), ("abc/c/s/250", "cropped")] {
            store
                .write("photos", key, Bytes::from_static(data.as_bytes()), "image/jpeg")
                .await
                .unwrap();
        }

        assert_eq!(
            store.read("photos", "abc").await.unwrap(),
            Bytes::from_static(b"original")
        );
        assert_eq!(
            store.read("photos", "abc/s/250").await.unwrap(),
            Bytes::from_static(b"resized")
        );
        assert_eq!(
            store.read("photos", "abc/c/s/250").await.unwrap(),
            Bytes::from_static(b"cropped")
        );
    }

    #[tokio::test]
    async fn memory_backend_keeps_derivatives_beside_their_original() {
        let store = ObjectImageStore::in_memory();
        store
            .write("photos", "abc", Bytes::from_static(b"original"), "image/jpeg")
            .await
            .unwrap();
        store
            .write("photos", "abc/s/250", Bytes::from_static(b"resized"), "image/jpeg")
            .await
            .unwrap();

        assert_eq!(
            store.read("photos", "abc").await.unwrap(),
            Bytes::from_static(b"original")
        );
        assert_eq!(
            store.read("photos", "abc/s/250").await.unwrap(),
            Bytes::from_static(b"resized")
        );
    }

    #[tokio::test]
    async fn from_config_selects_backend() {
        let store = ObjectImageStore::from_config(&StorageConfig::memory()).unwrap();
        assert!(format!("{store:?}").contains("InMemory"));
    }
}
