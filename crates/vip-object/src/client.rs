//! Thin wrapper around [`object_store::ObjectStore`].
//!
//! [`ObjectStoreClient`] is cloneable and speaks in raw object paths. Error
//! translation into bucket-aware [`Error`](crate::Error)s happens one layer up
//! in [`ObjectImageStore`](crate::ObjectImageStore).

use std::sync::Arc;

use bytes::Bytes;
use object_store::path::Path;
use object_store::{Attribute, Attributes, GetOptions, ObjectStore, PutOptions, PutPayload};

/// Cloneable handle to any [`ObjectStore`] backend.
#[derive(Clone, Debug)]
pub struct ObjectStoreClient(pub Arc<dyn ObjectStore>);

/// Result of a successful [`ObjectStoreClient::get`] call.
#[derive(Debug)]
pub struct GetOutput {
    /// Raw bytes of the object.
    pub data: Bytes,
    /// MIME content type, if the backend recorded one.
    pub content_type: Option<String>,
}

impl ObjectStoreClient {
    /// Wrap a concrete [`ObjectStore`] implementation.
    pub fn new(store: impl ObjectStore) -> Self {
        Self(Arc::new(store))
    }

    /// Fetch the full object at `path`.
    #[tracing::instrument(name = "object.get", skip(self), fields(path = %path))]
    pub async fn get(&self, path: &Path) -> object_store::Result<GetOutput> {
        let result = self.0.get(path).await?;
        let content_type = content_type_of(&result.attributes);
        let data = result.bytes().await?;
        Ok(GetOutput { data, content_type })
    }

    /// Upload `data` to `path`, overwriting whatever is there.
    ///
    /// The content type is only recorded when `content_type` is given.
    #[tracing::instrument(
        name = "object.put",
        skip(self, data),
        fields(path = %path, size = data.len())
    )]
    pub async fn put(
        &self,
        path: &Path,
        data: Bytes,
        content_type: Option<&str>,
    ) -> object_store::Result<()> {
        let mut opts = PutOptions::default();
        if let Some(ct) = content_type {
            opts.attributes
                .insert(Attribute::ContentType, ct.to_owned().into());
        }
        self.0
            .put_opts(path, PutPayload::from(data), opts)
            .await?;
        Ok(())
    }

    /// Read the recorded content type without downloading the body.
    #[tracing::instrument(name = "object.content_type", skip(self), fields(path = %path))]
    pub async fn content_type(&self, path: &Path) -> object_store::Result<Option<String>> {
        let opts = GetOptions {
            head: true,
            ..Default::default()
        };
        let result = self.0.get_opts(path, opts).await?;
        Ok(content_type_of(&result.attributes))
    }
}

fn content_type_of(attributes: &Attributes) -> Option<String> {
    attributes
        .get(&Attribute::ContentType)
        .map(|value| value.to_string())
}
