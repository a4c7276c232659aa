//! Bucket-backed storage over a pluggable object client.
//!
//! # Design
//! - [`ObjectStorage`] owns scope and policy: key resolution, expiration,
//!   storage class, and ACL. The wire protocol stays behind [`ObjectClient`].
//! - [`MemoryObjectClient`] keeps objects in process for development and tests.
//! - Client failures map onto the shared error taxonomy; a missing object is
//!   always `NotFound`.

use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prism_core::{Blob, ImageError, ImageResult, Loader, RequestContext, Stat, Storage};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::debug;

use crate::resolver::{KeyResolver, SafeChars};

/// Stored object metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Last write time.
    pub last_modified: Option<DateTime<Utc>>,
    /// Entity tag assigned by the store.
    pub etag: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Content type recorded at write time.
    pub content_type: Option<String>,
}

/// Storage tier for written objects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageClass {
    /// Default tier.
    #[default]
    Standard,
    /// Reduced redundancy tier.
    ReducedRedundancy,
    /// Infrequent access tier.
    StandardIa,
    /// Single-zone infrequent access tier.
    OnezoneIa,
    /// Automatically tiered.
    IntelligentTiering,
    /// Archive tier.
    Glacier,
}

impl StorageClass {
    /// Parse a configuration token; unknown or empty values fall back to
    /// [`StorageClass::Standard`].
    #[must_use]
    pub fn parse_or_default(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "REDUCED_REDUNDANCY" => Self::ReducedRedundancy,
            "STANDARD_IA" => Self::StandardIa,
            "ONEZONE_IA" => Self::OnezoneIa,
            "INTELLIGENT_TIERING" => Self::IntelligentTiering,
            "GLACIER" => Self::Glacier,
            _ => Self::Standard,
        }
    }

    /// Wire token.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "STANDARD",
            Self::ReducedRedundancy => "REDUCED_REDUNDANCY",
            Self::StandardIa => "STANDARD_IA",
            Self::OnezoneIa => "ONEZONE_IA",
            Self::IntelligentTiering => "INTELLIGENT_TIERING",
            Self::Glacier => "GLACIER",
        }
    }
}

impl Display for StorageClass {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Write options forwarded to the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    /// Content type of the object.
    pub content_type: Option<String>,
    /// Storage tier.
    pub storage_class: StorageClass,
    /// Canned ACL such as `public-read`.
    pub acl: Option<String>,
}

/// Wire client for one object store.
#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// Fetch an object body and its metadata.
    async fn get_object(&self, bucket: &str, key: &str) -> ImageResult<(Arc<[u8]>, ObjectMeta)>;

    /// Fetch object metadata only.
    async fn head_object(&self, bucket: &str, key: &str) -> ImageResult<ObjectMeta>;

    /// Write an object.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Arc<[u8]>,
        options: &PutOptions,
    ) -> ImageResult<()>;

    /// Remove an object.
    async fn delete_object(&self, bucket: &str, key: &str) -> ImageResult<()>;
}

#[derive(Debug, Clone)]
struct StoredObject {
    body: Arc<[u8]>,
    meta: ObjectMeta,
    options: PutOptions,
}

/// In-process object store.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectClient {
    objects: Arc<RwLock<HashMap<(String, String), StoredObject>>>,
}

impl MemoryObjectClient {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Write options recorded for an object, if present.
    pub async fn options(&self, bucket: &str, key: &str) -> Option<PutOptions> {
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .map(|object| object.options.clone())
    }

    /// Keys stored in `bucket`, sorted.
    pub async fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .read()
            .await
            .keys()
            .filter(|(name, _)| name == bucket)
            .map(|(_, key)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Rewrite an object's modification time.
    pub async fn set_last_modified(&self, bucket: &str, key: &str, time: DateTime<Utc>) {
        if let Some(object) = self
            .objects
            .write()
            .await
            .get_mut(&(bucket.to_string(), key.to_string()))
        {
            object.meta.last_modified = Some(time);
        }
    }
}

#[async_trait]
impl ObjectClient for MemoryObjectClient {
    async fn get_object(&self, bucket: &str, key: &str) -> ImageResult<(Arc<[u8]>, ObjectMeta)> {
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .map(|object| (Arc::clone(&object.body), object.meta.clone()))
            .ok_or_else(|| ImageError::not_found(key))
    }

    async fn head_object(&self, bucket: &str, key: &str) -> ImageResult<ObjectMeta> {
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .map(|object| object.meta.clone())
            .ok_or_else(|| ImageError::not_found(key))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Arc<[u8]>,
        options: &PutOptions,
    ) -> ImageResult<()> {
        let meta = ObjectMeta {
            last_modified: Some(Utc::now()),
            etag: Some(format!("\"{:x}\"", Sha256::digest(&*body))),
            size: body.len() as u64,
            content_type: options.content_type.clone(),
        };
        self.objects.write().await.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                body,
                meta,
                options: options.clone(),
            },
        );
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> ImageResult<()> {
        self.objects
            .write()
            .await
            .remove(&(bucket.to_string(), key.to_string()))
            .map(|_| ())
            .ok_or_else(|| ImageError::not_found(key))
    }
}

/// Settings for [`ObjectStorage`].
#[derive(Debug, Clone, Default)]
pub struct ObjectStorageConfig {
    /// Bucket, optionally followed by an embedded sub-path.
    pub bucket: String,
    /// Base directory inside the bucket.
    pub base_dir: String,
    /// Required request path prefix.
    pub path_prefix: String,
    /// Characters exempted from key escaping.
    pub safe_chars: String,
    /// Entries older than this are reported as expired.
    pub expiration: Option<Duration>,
    /// Storage tier for writes.
    pub storage_class: StorageClass,
    /// Canned ACL for writes.
    pub acl: Option<String>,
}

/// Storage backed by an object store bucket.
#[derive(Clone)]
pub struct ObjectStorage {
    name: String,
    client: Arc<dyn ObjectClient>,
    resolver: KeyResolver,
    expiration: Option<Duration>,
    storage_class: StorageClass,
    acl: Option<String>,
}

impl fmt::Debug for ObjectStorage {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ObjectStorage")
            .field("name", &self.name)
            .field("resolver", &self.resolver)
            .field("expiration", &self.expiration)
            .field("storage_class", &self.storage_class)
            .field("acl", &self.acl)
            .finish_non_exhaustive()
    }
}

impl ObjectStorage {
    /// Build a storage over `client`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        client: Arc<dyn ObjectClient>,
        config: ObjectStorageConfig,
    ) -> Self {
        let resolver = KeyResolver::new(
            &config.bucket,
            &config.base_dir,
            &config.path_prefix,
            SafeChars::new(&config.safe_chars),
        );
        Self {
            name: name.into(),
            client,
            resolver,
            expiration: config.expiration,
            storage_class: config.storage_class,
            acl: config.acl.filter(|acl| !acl.is_empty()),
        }
    }

    /// Effective bucket name.
    #[must_use]
    pub fn bucket(&self) -> &str {
        self.resolver.bucket()
    }

    /// Key resolver for this scope.
    #[must_use]
    pub const fn resolver(&self) -> &KeyResolver {
        &self.resolver
    }

    /// Storage tier applied to writes.
    #[must_use]
    pub const fn storage_class(&self) -> StorageClass {
        self.storage_class
    }

    fn key(&self, image: &str) -> ImageResult<String> {
        self.resolver
            .resolve(image)
            .ok_or_else(|| ImageError::out_of_scope(image))
    }

    fn check_expiry(&self, image: &str, meta: &ObjectMeta) -> ImageResult<()> {
        let (Some(ttl), Some(modified)) = (self.expiration, meta.last_modified) else {
            return Ok(());
        };
        let age = Utc::now().signed_duration_since(modified);
        if age.to_std().is_ok_and(|age| age > ttl) {
            return Err(ImageError::Expired {
                path: image.to_string(),
            });
        }
        Ok(())
    }
}

fn stat_of(meta: &ObjectMeta) -> Stat {
    Stat {
        modified: meta.last_modified,
        etag: meta.etag.clone(),
        size: meta.size,
    }
}

fn missing_as(image: &str, err: ImageError) -> ImageError {
    match err {
        ImageError::NotFound { .. } => ImageError::not_found(image),
        other => other,
    }
}

#[async_trait]
impl Loader for ObjectStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, _ctx: &RequestContext, image: &str) -> ImageResult<Blob> {
        let key = self.key(image)?;
        let (body, meta) = self
            .client
            .get_object(self.bucket(), &key)
            .await
            .map_err(|err| missing_as(image, err))?;
        self.check_expiry(image, &meta)?;
        let mut blob = Blob::from_bytes(body).with_stat(stat_of(&meta));
        if let Some(content_type) = meta.content_type {
            blob = blob.with_content_type(content_type);
        }
        Ok(blob)
    }

    async fn stat(&self, _ctx: &RequestContext, image: &str) -> ImageResult<Stat> {
        let key = self.key(image)?;
        let meta = self
            .client
            .head_object(self.bucket(), &key)
            .await
            .map_err(|err| missing_as(image, err))?;
        self.check_expiry(image, &meta)?;
        Ok(stat_of(&meta))
    }

    fn path(&self, image: &str) -> Option<String> {
        self.resolver.resolve(image)
    }
}

#[async_trait]
impl Storage for ObjectStorage {
    async fn put(&self, _ctx: &RequestContext, image: &str, blob: &Blob) -> ImageResult<()> {
        let key = self.key(image)?;
        let content_type = blob.content_type().await?;
        let body = blob.read_all().await?;
        let options = PutOptions {
            content_type: Some(content_type),
            storage_class: self.storage_class,
            acl: self.acl.clone(),
        };
        self.client
            .put_object(self.bucket(), &key, body, &options)
            .await?;
        debug!(storage = %self.name, bucket = %self.bucket(), key = %key, "stored object");
        Ok(())
    }

    async fn delete(&self, _ctx: &RequestContext, image: &str) -> ImageResult<()> {
        let key = self.key(image)?;
        self.client
            .delete_object(self.bucket(), &key)
            .await
            .map_err(|err| missing_as(image, err))
    }
}
