//! Storage whose writes always fail.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use prism_core::{Blob, ImageError, ImageResult, Loader, RequestContext, Storage};

/// Storage that never holds anything and rejects every write.
#[derive(Debug)]
pub struct FailingStorage {
    name: String,
    puts: AtomicUsize,
}

impl FailingStorage {
    /// Build a failing storage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            puts: AtomicUsize::new(0),
        }
    }

    /// Number of `put` attempts observed.
    #[must_use]
    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Loader for FailingStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, _ctx: &RequestContext, image: &str) -> ImageResult<Blob> {
        Err(ImageError::not_found(image))
    }

    fn path(&self, image: &str) -> Option<String> {
        Some(image.to_string())
    }
}

#[async_trait]
impl Storage for FailingStorage {
    async fn put(&self, _ctx: &RequestContext, _image: &str, _blob: &Blob) -> ImageResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        Err(ImageError::backend(
            "storage.put",
            io::Error::other("disk full"),
        ))
    }

    async fn delete(&self, _ctx: &RequestContext, image: &str) -> ImageResult<()> {
        Err(ImageError::not_found(image))
    }
}
