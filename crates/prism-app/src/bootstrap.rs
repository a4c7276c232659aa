//! Assemble components from [`Settings`] and serve until interrupted.
//!
//! # Design
//! - Loader order: file, bucket, then HTTP as the catch-all fallback.
//! - Storages and result storages: file before bucket.
//! - Bucket backends share one in-process object client.

use std::sync::Arc;

use clap::Parser;
use prism_api::ApiServer;
use prism_config::{Cli, Settings};
use prism_core::{Loader, Storage};
use prism_engine::{Engine, EngineBuilder};
use prism_loader::HttpLoader;
use prism_processor::ImageProcessor;
use prism_storage::{FileStorage, MemoryObjectClient, ObjectClient, ObjectStorage};
use prism_telemetry::{GlobalContextGuard, Metrics};
use tracing::{info, warn};

use crate::error::{AppError, AppResult};

/// Entry point for the Prism boot sequence.
///
/// # Errors
///
/// Returns an error if flags fail validation or the server cannot start.
pub async fn run_app() -> AppResult<()> {
    let settings = Cli::parse()
        .into_settings()
        .map_err(|err| AppError::config("cli.into_settings", err))?;
    run_app_with(settings).await
}

/// Boot sequence over already validated settings.
///
/// # Errors
///
/// Returns an error if logging, assembly, startup hooks, or the listener
/// fail.
pub async fn run_app_with(settings: Settings) -> AppResult<()> {
    prism_telemetry::init_logging(&settings.logging.logging_config())
        .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    let _context = GlobalContextGuard::new("prism");
    info!("prism bootstrap starting");

    let metrics = Metrics::new().map_err(|err| AppError::telemetry("metrics.new", err))?;
    let engine = assemble(&settings, metrics.clone())?;
    engine
        .startup()
        .await
        .map_err(|err| AppError::engine("engine.startup", err))?;

    let forward_headers = settings.http_loader.as_ref().is_some_and(|loader| {
        loader.forward_client_headers || !loader.forward_headers.is_empty()
    });
    let addr = settings.server.addr;
    let api = ApiServer::new(engine.clone(), metrics, settings.server, forward_headers);
    let serve_result = api.serve(addr, shutdown_signal()).await;

    if let Err(err) = engine.shutdown().await {
        warn!(error = %err, "processor shutdown failed");
    }
    serve_result.map_err(|err| AppError::api_server("api_server.serve", err))?;
    info!("prism shutdown complete");
    Ok(())
}

/// Build the engine described by `settings`.
///
/// # Errors
///
/// Returns an error when a storage or loader rejects its configuration.
pub fn assemble(settings: &Settings, metrics: Metrics) -> AppResult<Engine> {
    let mut builder = Engine::builder(settings.security.codec())
        .config(settings.engine.clone())
        .metrics(metrics);
    builder = with_file_backends(builder, settings)?;
    builder = with_object_backends(builder, settings);
    if let Some(config) = settings.http_loader.clone() {
        let loader =
            HttpLoader::new(config).map_err(|err| AppError::loader("http_loader.new", err))?;
        builder = builder.loader(Arc::new(loader));
    }
    if let Some(config) = settings.processor.clone() {
        builder = builder.processor(Arc::new(ImageProcessor::new(config)));
    }
    let engine = builder.build();
    info!(
        unsafe_paths = engine.codec().allows_unsafe(),
        config = ?engine.config(),
        "engine assembled"
    );
    Ok(engine)
}

fn with_file_backends(mut builder: EngineBuilder, settings: &Settings) -> AppResult<EngineBuilder> {
    let file = &settings.file;
    if let Some(config) = file.loader.clone() {
        let loader = FileStorage::new("file-loader", config)
            .map_err(|err| AppError::storage("file_loader.new", err))?;
        builder = builder.loader(Arc::new(loader) as Arc<dyn Loader>);
    }
    if let Some(config) = file.storage.clone() {
        let storage = FileStorage::new("file-storage", config)
            .map_err(|err| AppError::storage("file_storage.new", err))?;
        builder = builder.storage(Arc::new(storage) as Arc<dyn Storage>);
    }
    if let Some(config) = file.result_storage.clone() {
        let storage = FileStorage::new("file-result-storage", config)
            .map_err(|err| AppError::storage("file_result_storage.new", err))?;
        builder = builder.result_storage(Arc::new(storage));
    }
    Ok(builder)
}

fn with_object_backends(mut builder: EngineBuilder, settings: &Settings) -> EngineBuilder {
    let object = &settings.object;
    if object.loader.is_none() && object.storage.is_none() && object.result_storage.is_none() {
        return builder;
    }
    warn!("bucket backends are held in process memory and are not persisted");
    let client: Arc<dyn ObjectClient> = Arc::new(MemoryObjectClient::new());
    if let Some(config) = object.loader.clone() {
        let loader = ObjectStorage::new("object-loader", Arc::clone(&client), config);
        builder = builder.loader(Arc::new(loader) as Arc<dyn Loader>);
    }
    if let Some(config) = object.storage.clone() {
        let storage = ObjectStorage::new("object-storage", Arc::clone(&client), config);
        builder = builder.storage(Arc::new(storage) as Arc<dyn Storage>);
    }
    if let Some(config) = object.result_storage.clone() {
        let storage = ObjectStorage::new("object-result-storage", client, config);
        builder = builder.result_storage(Arc::new(storage));
    }
    builder
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
