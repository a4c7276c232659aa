//! Request orchestration.
//!
//! # Design
//! - Path validation runs before single-flight, so a rejected path never
//!   creates a group.
//! - Cache lookup, loading, processing, and the result write for one result
//!   key run inside a single single-flight group on the leader's context.
//! - Storages are consulted before loaders; a loaded original is written back
//!   to every storage.
//! - Best-effort writes run on a detached context, log and count their
//!   failures, and never change the response.

use std::sync::Arc;
use std::time::Instant;

use prism_core::{
    Blob, ImageError, ImageResult, Loader, Params, Processor, RequestContext, ResultStorage, Stat,
    Storage,
};
use prism_path::PathCodec;
use prism_telemetry::{CacheOutcome, Metrics};
use tokio::sync::Semaphore;
use tracing::{Instrument, Span, debug, info, instrument, warn};

use crate::config::{EngineConfig, WriteMode};
use crate::singleflight::SingleFlight;

/// Assembles an [`Engine`] from its backends.
pub struct EngineBuilder {
    codec: PathCodec,
    config: EngineConfig,
    loaders: Vec<Arc<dyn Loader>>,
    storages: Vec<Arc<dyn Storage>>,
    result_storages: Vec<Arc<dyn ResultStorage>>,
    processors: Vec<Arc<dyn Processor>>,
    metrics: Option<Metrics>,
}

impl EngineBuilder {
    /// Start from `codec` with default configuration and no backends.
    #[must_use]
    pub fn new(codec: PathCodec) -> Self {
        Self {
            codec,
            config: EngineConfig::default(),
            loaders: Vec::new(),
            storages: Vec::new(),
            result_storages: Vec::new(),
            processors: Vec::new(),
            metrics: None,
        }
    }

    /// Replace the configuration.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Append a loader; loaders are tried in insertion order.
    #[must_use]
    pub fn loader(mut self, loader: Arc<dyn Loader>) -> Self {
        self.loaders.push(loader);
        self
    }

    /// Append a storage for originals.
    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storages.push(storage);
        self
    }

    /// Append a storage for processed results.
    #[must_use]
    pub fn result_storage(mut self, storage: Arc<dyn ResultStorage>) -> Self {
        self.result_storages.push(storage);
        self
    }

    /// Append a processor; processors are tried in insertion order.
    #[must_use]
    pub fn processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.processors.push(processor);
        self
    }

    /// Record engine metrics into `metrics`.
    #[must_use]
    pub fn metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Finish the engine.
    #[must_use]
    pub fn build(self) -> Engine {
        let permits = self
            .config
            .process_concurrency
            .filter(|limit| *limit > 0)
            .map(|limit| Arc::new(Semaphore::new(limit.min(Semaphore::MAX_PERMITS))));
        Engine {
            inner: Arc::new(Inner {
                codec: self.codec,
                config: self.config,
                loaders: self.loaders,
                storages: self.storages,
                result_storages: self.result_storages,
                processors: self.processors,
                metrics: self.metrics,
                permits,
                flight: SingleFlight::new(),
            }),
        }
    }
}

/// Image request engine; cheap to clone.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Engine")
            .field("loaders", &self.inner.loaders.len())
            .field("storages", &self.inner.storages.len())
            .field("result_storages", &self.inner.result_storages.len())
            .field("processors", &self.inner.processors.len())
            .field("in_flight", &self.inner.flight.in_flight())
            .finish_non_exhaustive()
    }
}

struct Inner {
    codec: PathCodec,
    config: EngineConfig,
    loaders: Vec<Arc<dyn Loader>>,
    storages: Vec<Arc<dyn Storage>>,
    result_storages: Vec<Arc<dyn ResultStorage>>,
    processors: Vec<Arc<dyn Processor>>,
    metrics: Option<Metrics>,
    permits: Option<Arc<Semaphore>>,
    flight: SingleFlight<Blob>,
}

impl Engine {
    /// Start building an engine around `codec`.
    #[must_use]
    pub fn builder(codec: PathCodec) -> EngineBuilder {
        EngineBuilder::new(codec)
    }

    /// Codec used to validate request paths.
    #[must_use]
    pub fn codec(&self) -> &PathCodec {
        &self.inner.codec
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Number of result keys with work in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.flight.in_flight()
    }

    /// Start every processor in order.
    ///
    /// # Errors
    ///
    /// The first processor startup failure.
    pub async fn startup(&self) -> ImageResult<()> {
        for processor in &self.inner.processors {
            processor.startup().await?;
            info!(processor = processor.name(), "processor started");
        }
        Ok(())
    }

    /// Shut every processor down, continuing past failures.
    ///
    /// # Errors
    ///
    /// The first processor shutdown failure.
    pub async fn shutdown(&self) -> ImageResult<()> {
        let mut first_failure = None;
        for processor in &self.inner.processors {
            if let Err(err) = processor.shutdown().await {
                warn!(processor = processor.name(), error = %err, "processor shutdown failed");
                first_failure.get_or_insert(err);
            }
        }
        first_failure.map_or(Ok(()), Err)
    }

    /// Serve a signed or `unsafe` request path.
    ///
    /// # Errors
    ///
    /// `Invalid` or `SignatureMismatch` for rejected paths, otherwise any
    /// terminal error from the pipeline.
    #[instrument(name = "engine.serve", skip(self, ctx))]
    pub async fn serve(&self, ctx: &RequestContext, path: &str) -> ImageResult<Blob> {
        let params = self
            .inner
            .codec
            .decode(path)
            .inspect_err(|err| debug!(error = %err, "request path rejected"))?;
        self.serve_params(ctx, params).await
    }

    /// Serve already validated params.
    ///
    /// # Errors
    ///
    /// `Timeout` when the request deadline elapses or the context is
    /// canceled, otherwise the shared pipeline result.
    #[instrument(name = "engine.serve_params", skip_all, fields(image = %params.image))]
    pub async fn serve_params(&self, ctx: &RequestContext, params: Params) -> ImageResult<Blob> {
        let ctx = self.inner.request_context(ctx);
        ctx.check("request")?;
        let key = self.inner.config.result_path_style.hash(&params);

        let inner = Arc::clone(&self.inner);
        let leader = ctx.clone();
        let group_key = key.clone();
        let compute = async move { inner.compute(&leader, &params, &group_key).await }
            .instrument(tracing::debug_span!(parent: Span::current(), "engine.compute", key = %key));
        let joined = self.inner.flight.join(&key, compute);
        if joined.is_shared() {
            self.inner.record(Metrics::inc_singleflight_shared);
            debug!(key = %key, "joined in-flight request");
        }
        ctx.run("request", None, joined.wait()).await
    }

    /// Run only the processing stage over a caller-supplied blob.
    ///
    /// # Errors
    ///
    /// Any processing failure.
    #[instrument(name = "engine.serve_blob", skip_all, fields(image = %params.image))]
    pub async fn serve_blob(
        &self,
        ctx: &RequestContext,
        blob: Blob,
        params: &Params,
    ) -> ImageResult<Blob> {
        let ctx = self.inner.request_context(ctx);
        self.inner.process(&ctx, &blob, params).await
    }
}

/// Rank used to pick the most specific loader failure.
const fn specificity(error: &ImageError) -> u8 {
    match error {
        ImageError::Invalid { .. } => 6,
        ImageError::Unauthorized { .. } | ImageError::SignatureMismatch => 5,
        ImageError::Timeout { .. } | ImageError::Canceled { .. } => 4,
        ImageError::Unsupported { .. } => 3,
        ImageError::Upstream { .. } | ImageError::Backend { .. } => 2,
        ImageError::NotFound { .. } | ImageError::Expired { .. } => 1,
        ImageError::Pass => 0,
    }
}

fn most_specific(current: Option<ImageError>, candidate: ImageError) -> Option<ImageError> {
    match current {
        Some(current) if specificity(&current) >= specificity(&candidate) => Some(current),
        _ => Some(candidate),
    }
}

impl Inner {
    fn request_context(&self, ctx: &RequestContext) -> RequestContext {
        self.config
            .request_timeout
            .map_or_else(|| ctx.clone(), |timeout| ctx.with_timeout(timeout))
    }

    fn record(&self, update: impl FnOnce(&Metrics)) {
        if let Some(metrics) = &self.metrics {
            update(metrics);
        }
    }

    async fn compute(&self, ctx: &RequestContext, params: &Params, key: &str) -> ImageResult<Blob> {
        if let Some(hit) = self.lookup_result(ctx, params, key).await? {
            return Ok(hit);
        }
        let source = self.load(ctx, params).await?;
        let result = self.process(ctx, &source, params).await?;
        if !params.meta {
            let targets = self
                .result_storages
                .iter()
                .map(|storage| Arc::clone(storage) as Arc<dyn Storage>)
                .collect();
            self.persist(ctx, "result_put", targets, key, &result).await;
        }
        Ok(result)
    }

    async fn lookup_result(
        &self,
        ctx: &RequestContext,
        params: &Params,
        key: &str,
    ) -> ImageResult<Option<Blob>> {
        if self.result_storages.is_empty() || params.meta {
            return Ok(None);
        }
        let mut outcome = CacheOutcome::Miss;
        for storage in &self.result_storages {
            match ctx
                .run("cache", self.config.load_timeout, storage.get(ctx, key))
                .await
            {
                Ok(blob) if blob.is_empty() => {}
                Ok(blob) => {
                    if self.config.modified_time_check
                        && self.source_is_newer(ctx, &params.image, blob.stat()).await
                    {
                        debug!(storage = storage.name(), key, "stored result older than source");
                        continue;
                    }
                    self.record(|metrics| metrics.inc_cache_lookup(CacheOutcome::Hit));
                    debug!(storage = storage.name(), key, "result storage hit");
                    return Ok(Some(blob));
                }
                Err(err) => {
                    ctx.check("cache")?;
                    match err {
                        ImageError::Expired { .. } => {
                            outcome = CacheOutcome::Expired;
                            debug!(storage = storage.name(), key, "stored result expired");
                        }
                        ImageError::NotFound { .. } | ImageError::Pass => {}
                        other => warn!(
                            storage = storage.name(),
                            key,
                            error = %other,
                            "result storage lookup failed"
                        ),
                    }
                }
            }
        }
        self.record(|metrics| metrics.inc_cache_lookup(outcome));
        Ok(None)
    }

    async fn source_is_newer(
        &self,
        ctx: &RequestContext,
        image: &str,
        cached: Option<&Stat>,
    ) -> bool {
        let Some(cached) = cached.and_then(|stat| stat.modified) else {
            return false;
        };
        self.source_stat(ctx, image)
            .await
            .and_then(|stat| stat.modified)
            .is_some_and(|source| source > cached)
    }

    async fn source_stat(&self, ctx: &RequestContext, image: &str) -> Option<Stat> {
        let storage_key = self.config.storage_path_style.hash(image);
        for storage in &self.storages {
            let stat = ctx.run("stat", self.config.load_timeout, storage.stat(ctx, &storage_key));
            if let Ok(stat) = stat.await {
                return Some(stat);
            }
        }
        for loader in &self.loaders {
            let stat = ctx.run("stat", self.config.load_timeout, loader.stat(ctx, image));
            if let Ok(stat) = stat.await {
                return Some(stat);
            }
        }
        None
    }

    async fn fetch(&self, ctx: &RequestContext, loader: &dyn Loader, key: &str) -> ImageResult<Blob> {
        let result = ctx
            .run("load", self.config.load_timeout, loader.get(ctx, key))
            .await
            .and_then(|blob| {
                if blob.is_empty() {
                    Err(ImageError::not_found(key))
                } else {
                    Ok(blob)
                }
            });
        let outcome = result.as_ref().map_or_else(|err| err.kind().as_str(), |_| "ok");
        self.record(|metrics| metrics.inc_loader_attempt(loader.name(), outcome));
        match &result {
            Ok(_) => debug!(loader = loader.name(), key, "loaded original"),
            Err(err) => debug!(loader = loader.name(), key, error = %err, "loader attempt failed"),
        }
        result
    }

    async fn load(&self, ctx: &RequestContext, params: &Params) -> ImageResult<Blob> {
        let image = params.image.as_str();
        let storage_key = self.config.storage_path_style.hash(image);
        let mut failure = None;

        for storage in &self.storages {
            match self.fetch(ctx, storage.as_ref(), &storage_key).await {
                Ok(blob) => return Ok(blob),
                Err(err) => {
                    ctx.check("load")?;
                    failure = most_specific(failure, err);
                }
            }
        }
        for loader in &self.loaders {
            match self.fetch(ctx, loader.as_ref(), image).await {
                Ok(blob) => {
                    self.persist(ctx, "storage_put", self.storages.clone(), &storage_key, &blob)
                        .await;
                    return Ok(blob);
                }
                Err(err) => {
                    ctx.check("load")?;
                    failure = most_specific(failure, err);
                }
            }
        }

        Err(match failure {
            Some(err) if specificity(&err) > 1 => err,
            _ => ImageError::not_found(image),
        })
    }

    async fn process(&self, ctx: &RequestContext, blob: &Blob, params: &Params) -> ImageResult<Blob> {
        if self.processors.is_empty() {
            return Ok(blob.clone());
        }
        let _permit = match &self.permits {
            Some(permits) => Some(
                ctx.run("process", None, async {
                    Arc::clone(permits)
                        .acquire_owned()
                        .await
                        .map_err(|err| ImageError::backend("process.permit", err))
                })
                .await?,
            ),
            None => None,
        };

        let started = Instant::now();
        let mut attempt = 0;
        let result = loop {
            match self.process_once(ctx, blob, params).await {
                Err(err)
                    if err.is_retryable()
                        && attempt < self.config.process_retry_limit
                        && !ctx.is_done() =>
                {
                    attempt += 1;
                    warn!(attempt, error = %err, "retrying processing");
                }
                other => break other,
            }
        };
        self.record(|metrics| metrics.observe_process_duration(started.elapsed()));
        result
    }

    async fn process_once(
        &self,
        ctx: &RequestContext,
        blob: &Blob,
        params: &Params,
    ) -> ImageResult<Blob> {
        for processor in &self.processors {
            let outcome = ctx
                .run(
                    "process",
                    self.config.process_timeout,
                    processor.process(ctx, blob, params),
                )
                .await;
            let label = outcome.as_ref().map_or_else(|err| err.kind().as_str(), |_| "ok");
            self.record(|metrics| metrics.inc_processor_attempt(label));
            match outcome {
                Err(ImageError::Pass) => {
                    debug!(processor = processor.name(), "processor declined");
                }
                other => return other,
            }
        }
        Err(ImageError::unsupported("process", params.image.clone()))
    }

    async fn persist(
        &self,
        ctx: &RequestContext,
        operation: &'static str,
        targets: Vec<Arc<dyn Storage>>,
        key: &str,
        blob: &Blob,
    ) {
        if targets.is_empty() {
            return;
        }
        let write_ctx = ctx.detached();
        let timeout = self.config.save_timeout;
        let metrics = self.metrics.clone();
        let key = key.to_string();
        let blob = blob.clone();
        let write = async move {
            for storage in targets {
                let put = storage.put(&write_ctx, &key, &blob);
                match write_ctx.run("save", timeout, put).await {
                    Ok(()) => debug!(storage = storage.name(), key = %key, operation, "stored"),
                    Err(err) => {
                        warn!(
                            storage = storage.name(),
                            key = %key,
                            operation,
                            error = %err,
                            "best-effort write failed"
                        );
                        if let Some(metrics) = &metrics {
                            metrics.inc_side_effect_failure(operation);
                        }
                    }
                }
            }
        };
        match self.config.result_write_mode {
            WriteMode::Sync => write.await,
            WriteMode::Background => {
                tokio::spawn(write.instrument(Span::current()));
            }
        }
    }
}
