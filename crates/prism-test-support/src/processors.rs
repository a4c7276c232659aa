//! Scripted processor with call counters.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use prism_core::{Blob, ImageError, ImageResult, Params, Processor, RequestContext};

/// Processor that tags its input instead of transforming pixels.
///
/// Output bytes are `"{name}:{width}x{height}:"` followed by the input. Errors
/// queued with [`CountingProcessor::fail_next`] are returned first, one per
/// call.
#[derive(Debug)]
pub struct CountingProcessor {
    name: String,
    latency: Option<Duration>,
    passing: bool,
    queued: Mutex<VecDeque<ImageError>>,
    calls: AtomicUsize,
    startups: AtomicUsize,
    shutdowns: AtomicUsize,
}

impl CountingProcessor {
    /// Processor that handles every request.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            latency: None,
            passing: false,
            queued: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            startups: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
        }
    }

    /// Processor that declines every request with `Pass`.
    #[must_use]
    pub fn passing(name: impl Into<String>) -> Self {
        Self {
            passing: true,
            ..Self::new(name)
        }
    }

    /// Delay every call by `latency`.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queue `error` to be returned by an upcoming call.
    pub fn fail_next(&self, error: ImageError) {
        self.queued
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(error);
    }

    /// Number of `process` calls observed.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of `startup` calls observed.
    #[must_use]
    pub fn startups(&self) -> usize {
        self.startups.load(Ordering::SeqCst)
    }

    /// Number of `shutdown` calls observed.
    #[must_use]
    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Processor for CountingProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn startup(&self) -> ImageResult<()> {
        self.startups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn process(
        &self,
        _ctx: &RequestContext,
        blob: &Blob,
        params: &Params,
    ) -> ImageResult<Blob> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let queued = self
            .queued
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front();
        if let Some(error) = queued {
            return Err(error);
        }
        if self.passing {
            return Err(ImageError::Pass);
        }
        let mut output = format!("{}:{}x{}:", self.name, params.width, params.height).into_bytes();
        output.extend_from_slice(&blob.read_all().await?);
        Ok(Blob::from_bytes(output)
            .with_content_type("text/plain")
            .with_headers(blob.headers().to_vec()))
    }

    async fn shutdown(&self) -> ImageResult<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
