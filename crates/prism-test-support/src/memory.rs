//! In-memory loader and storage with call counters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prism_core::{Blob, ImageError, ImageResult, Loader, RequestContext, Stat, Storage};
use tokio::time::Instant;

fn in_scope(scope: Option<&str>, image: &str) -> bool {
    !image.split('/').any(|segment| segment == "..")
        && scope.is_none_or(|prefix| image.starts_with(prefix))
}

async fn pause(latency: Option<Duration>) {
    if let Some(latency) = latency {
        tokio::time::sleep(latency).await;
    }
}

fn stat_for(bytes: &[u8], modified: DateTime<Utc>) -> Stat {
    Stat {
        modified: Some(modified),
        etag: Some(format!("\"{:x}\"", bytes.len())),
        size: bytes.len() as u64,
    }
}

/// Read-only loader serving a fixed set of images.
#[derive(Debug)]
pub struct MemoryLoader {
    name: String,
    entries: HashMap<String, Blob>,
    failure: Option<ImageError>,
    scope: Option<String>,
    latency: Option<Duration>,
    calls: AtomicUsize,
}

impl MemoryLoader {
    /// Empty loader; unknown images report `NotFound`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: HashMap::new(),
            failure: None,
            scope: None,
            latency: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Loader answering every request with `error`.
    #[must_use]
    pub fn failing(name: impl Into<String>, error: ImageError) -> Self {
        Self {
            failure: Some(error),
            ..Self::new(name)
        }
    }

    /// Add an image.
    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>, bytes: impl AsRef<[u8]>) -> Self {
        let bytes = bytes.as_ref();
        let blob = Blob::from_bytes(bytes.to_vec()).with_stat(stat_for(bytes, Utc::now()));
        self.entries.insert(image.into(), blob);
        self
    }

    /// Add an image with an explicit modification time.
    #[must_use]
    pub fn with_modified(
        mut self,
        image: impl Into<String>,
        bytes: impl AsRef<[u8]>,
        modified: DateTime<Utc>,
    ) -> Self {
        let bytes = bytes.as_ref();
        let blob = Blob::from_bytes(bytes.to_vec()).with_stat(stat_for(bytes, modified));
        self.entries.insert(image.into(), blob);
        self
    }

    /// Reject images outside `prefix` as scope violations.
    #[must_use]
    pub fn with_scope(mut self, prefix: impl Into<String>) -> Self {
        self.scope = Some(prefix.into());
        self
    }

    /// Delay every call by `latency`.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of `get` calls observed.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn lookup(&self, image: &str) -> ImageResult<Blob> {
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        if !in_scope(self.scope.as_deref(), image) {
            return Err(ImageError::out_of_scope(image));
        }
        self.entries
            .get(image)
            .cloned()
            .ok_or_else(|| ImageError::not_found(image))
    }
}

#[async_trait]
impl Loader for MemoryLoader {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, _ctx: &RequestContext, image: &str) -> ImageResult<Blob> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        pause(self.latency).await;
        self.lookup(image)
    }

    async fn stat(&self, _ctx: &RequestContext, image: &str) -> ImageResult<Stat> {
        let blob = self.lookup(image)?;
        Ok(blob.stat().cloned().unwrap_or_default())
    }

    fn path(&self, image: &str) -> Option<String> {
        in_scope(self.scope.as_deref(), image).then(|| image.to_string())
    }
}

#[derive(Debug, Clone)]
struct Entry {
    blob: Blob,
    stored_at: Instant,
}

/// Writable in-memory storage with optional expiration.
#[derive(Debug)]
pub struct MemoryStorage {
    name: String,
    entries: RwLock<HashMap<String, Entry>>,
    expiration: Option<Duration>,
    scope: Option<String>,
    latency: Option<Duration>,
    gets: AtomicUsize,
    puts: AtomicUsize,
}

impl MemoryStorage {
    /// Empty storage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(HashMap::new()),
            expiration: None,
            scope: None,
            latency: None,
            gets: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
        }
    }

    /// Entries older than `expiration` read as `Expired`.
    #[must_use]
    pub const fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// Reject images outside `prefix` as scope violations.
    #[must_use]
    pub fn with_scope(mut self, prefix: impl Into<String>) -> Self {
        self.scope = Some(prefix.into());
        self
    }

    /// Delay every call by `latency`.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Store `bytes` directly, bypassing counters.
    pub fn insert(&self, image: impl Into<String>, bytes: impl AsRef<[u8]>) {
        self.insert_modified(image, bytes, Utc::now());
    }

    /// Store `bytes` with an explicit modification time.
    pub fn insert_modified(
        &self,
        image: impl Into<String>,
        bytes: impl AsRef<[u8]>,
        modified: DateTime<Utc>,
    ) {
        let bytes = bytes.as_ref();
        let blob = Blob::from_bytes(bytes.to_vec()).with_stat(stat_for(bytes, modified));
        self.write().insert(
            image.into(),
            Entry {
                blob,
                stored_at: Instant::now(),
            },
        );
    }

    /// Whether anything is stored under `image`.
    #[must_use]
    pub fn contains(&self, image: &str) -> bool {
        self.read().contains_key(image)
    }

    /// Stored keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of `get` calls observed.
    #[must_use]
    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Number of `put` calls observed.
    #[must_use]
    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lookup(&self, image: &str) -> ImageResult<Blob> {
        if !in_scope(self.scope.as_deref(), image) {
            return Err(ImageError::out_of_scope(image));
        }
        let entry = self
            .read()
            .get(image)
            .cloned()
            .ok_or_else(|| ImageError::not_found(image))?;
        if self
            .expiration
            .is_some_and(|expiration| entry.stored_at.elapsed() > expiration)
        {
            return Err(ImageError::Expired {
                path: image.to_string(),
            });
        }
        Ok(entry.blob)
    }
}

#[async_trait]
impl Loader for MemoryStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, _ctx: &RequestContext, image: &str) -> ImageResult<Blob> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        pause(self.latency).await;
        self.lookup(image)
    }

    async fn stat(&self, _ctx: &RequestContext, image: &str) -> ImageResult<Stat> {
        let blob = self.lookup(image)?;
        Ok(blob.stat().cloned().unwrap_or_default())
    }

    fn path(&self, image: &str) -> Option<String> {
        in_scope(self.scope.as_deref(), image).then(|| image.to_string())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn put(&self, _ctx: &RequestContext, image: &str, blob: &Blob) -> ImageResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        pause(self.latency).await;
        if !in_scope(self.scope.as_deref(), image) {
            return Err(ImageError::out_of_scope(image));
        }
        let bytes = blob.read_all().await?;
        let stat = stat_for(&bytes, Utc::now());
        let mut stored = Blob::from_bytes(bytes).with_stat(stat);
        if let Some(content_type) = blob.declared_content_type() {
            stored = stored.with_content_type(content_type);
        }
        self.write().insert(
            image.to_string(),
            Entry {
                blob: stored,
                stored_at: Instant::now(),
            },
        );
        Ok(())
    }

    async fn delete(&self, _ctx: &RequestContext, image: &str) -> ImageResult<()> {
        if !in_scope(self.scope.as_deref(), image) {
            return Err(ImageError::out_of_scope(image));
        }
        self.write()
            .remove(image)
            .map(|_| ())
            .ok_or_else(|| ImageError::not_found(image))
    }
}
