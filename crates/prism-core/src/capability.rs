//! Capability traits implemented by backends and consumed by the engine.
//!
//! A `Storage` is also a `Loader`, so writable backends can serve originals.
//! `ResultStorage` is the role a `Storage` plays when it caches processed
//! results; every storage can fill it.

use async_trait::async_trait;

use crate::blob::{Blob, Stat};
use crate::context::RequestContext;
use crate::error::{ImageError, ImageResult};
use crate::params::Params;

/// Read-only source of original images.
#[async_trait]
pub trait Loader: Send + Sync {
    /// Identifier used in logs and metrics.
    fn name(&self) -> &str;

    /// Fetch the image stored under `image`.
    ///
    /// # Errors
    ///
    /// `Invalid` when the path is out of scope, `NotFound` when absent,
    /// `Expired` when past the backend's expiration, `Pass` to decline.
    async fn get(&self, ctx: &RequestContext, image: &str) -> ImageResult<Blob>;

    /// Metadata for `image` without reading its bytes.
    ///
    /// # Errors
    ///
    /// Same taxonomy as [`Loader::get`]; backends without metadata support
    /// return `Unsupported`.
    async fn stat(&self, ctx: &RequestContext, image: &str) -> ImageResult<Stat> {
        let _ = (ctx, image);
        Err(ImageError::Unsupported {
            operation: "stat",
            value: Some(self.name().to_string()),
        })
    }

    /// Backend key for `image`, or `None` when it is out of scope.
    fn path(&self, image: &str) -> Option<String>;
}

/// Writable backend.
#[async_trait]
pub trait Storage: Loader {
    /// Persist `blob` under `image`.
    ///
    /// # Errors
    ///
    /// `Invalid` when the path is out of scope, `Backend` on I/O failure.
    async fn put(&self, ctx: &RequestContext, image: &str, blob: &Blob) -> ImageResult<()>;

    /// Remove whatever is stored under `image`.
    ///
    /// # Errors
    ///
    /// `Invalid` when the path is out of scope, `NotFound` when absent.
    async fn delete(&self, ctx: &RequestContext, image: &str) -> ImageResult<()>;
}

/// Storage holding processed results under their result key.
pub trait ResultStorage: Storage {}

impl<T: Storage> ResultStorage for T {}

/// Transformation backend.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Identifier used in logs and metrics.
    fn name(&self) -> &str;

    /// Acquire process-wide resources.
    ///
    /// # Errors
    ///
    /// Implementations report initialisation failures as `Backend`.
    async fn startup(&self) -> ImageResult<()> {
        Ok(())
    }

    /// Transform `blob` according to `params`.
    ///
    /// # Errors
    ///
    /// `Pass` to defer to the next processor; any other error is terminal
    /// for this request.
    async fn process(
        &self,
        ctx: &RequestContext,
        blob: &Blob,
        params: &Params,
    ) -> ImageResult<Blob>;

    /// Release process-wide resources.
    ///
    /// # Errors
    ///
    /// Implementations report teardown failures as `Backend`.
    async fn shutdown(&self) -> ImageResult<()> {
        Ok(())
    }
}
