//! Validated settings built once at startup.
//!
//! # Design
//! - `Cli::into_settings` is the only constructor; every component takes its
//!   slice of [`Settings`] by reference or by value at assembly time.
//! - Component configuration types are produced directly so the app layer
//!   only wires them together.
//! - Backends are enabled by their root (directory or bucket); a disabled
//!   backend is `None`.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use prism_engine::{EngineConfig, WriteMode};
use prism_loader::{HttpLoaderConfig, NetworkPolicy};
use prism_path::{PathCodec, ResultPathStyle, Signer, SignerAlgorithm, StoragePathStyle};
use prism_processor::ProcessorConfig;
use prism_storage::{FileStorageConfig, ObjectStorageConfig, StorageClass};
use prism_telemetry::{LogFormat, LoggingConfig};

use crate::cli::{
    Cli, EngineArgs, FileArgs, HttpLoaderArgs, LoggingArgs, ObjectArgs, ProcessorArgs,
    SecurityArgs, ServerArgs,
};
use crate::error::{ConfigError, ConfigResult};
use crate::parse;

/// Complete runtime configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Listener and response headers.
    pub server: ServerSettings,
    /// Path signing.
    pub security: SecuritySettings,
    /// Engine timeouts, limits, and key layouts.
    pub engine: EngineConfig,
    /// HTTP(S) loader, `None` when disabled.
    pub http_loader: Option<HttpLoaderConfig>,
    /// Filesystem backends.
    pub file: Backends<FileStorageConfig>,
    /// Bucket backends.
    pub object: Backends<ObjectStorageConfig>,
    /// Processor, `None` when disabled.
    pub processor: Option<ProcessorConfig>,
    /// Logging.
    pub logging: LoggingSettings,
}

/// Listener and response header settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Socket to bind.
    pub addr: SocketAddr,
    /// Prefix stripped from request paths, `/`-delimited.
    pub path_prefix: String,
    /// Response caching headers.
    pub cache: CacheHeaders,
    /// Serve `/params`.
    pub params_endpoint: bool,
}

/// `Cache-Control` policy for responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheHeaders {
    /// `max-age` for successful responses.
    pub ttl: Duration,
    /// `stale-while-revalidate` window.
    pub swr: Duration,
    /// Always send `no-cache`.
    pub no_cache: bool,
}

impl Default for CacheHeaders {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(168 * 3_600),
            swr: Duration::from_secs(24 * 3_600),
            no_cache: false,
        }
    }
}

/// Path signing settings.
#[derive(Debug, Clone)]
pub struct SecuritySettings {
    /// Signer, `None` without a secret.
    pub signer: Option<Signer>,
    /// Accept unsigned `unsafe/` paths.
    pub allow_unsafe: bool,
}

impl SecuritySettings {
    /// Codec for these settings.
    #[must_use]
    pub fn codec(&self) -> PathCodec {
        PathCodec::new(self.signer.clone(), self.allow_unsafe)
    }
}

/// Loader, storage, and result storage of one backend family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backends<T> {
    /// Read-only source.
    pub loader: Option<T>,
    /// Original cache, also consulted as a source.
    pub storage: Option<T>,
    /// Processed result cache.
    pub result_storage: Option<T>,
}

impl<T> Default for Backends<T> {
    fn default() -> Self {
        Self {
            loader: None,
            storage: None,
            result_storage: None,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    /// Level used when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl LoggingSettings {
    /// Subscriber configuration for these settings.
    #[must_use]
    pub fn logging_config(&self) -> LoggingConfig<'_> {
        LoggingConfig {
            level: &self.level,
            format: self.format,
            ..LoggingConfig::default()
        }
    }
}

impl Cli {
    /// Validate the parsed flags into [`Settings`].
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidField` naming the first flag whose value
    /// cannot be used.
    pub fn into_settings(self) -> ConfigResult<Settings> {
        let engine = engine(&self.engine)?;
        Ok(Settings {
            server: server(&self.server)?,
            security: security(&self.security)?,
            http_loader: http_loader(&self.http_loader, engine.load_timeout)?,
            file: file(&self.file)?,
            object: object(&self.object)?,
            processor: processor(&self.processor),
            logging: logging(&self.logging),
            engine,
        })
    }
}

fn server(args: &ServerArgs) -> ConfigResult<ServerSettings> {
    let ip: IpAddr = args
        .bind
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid("bind", "expected an IP address", &args.bind))?;
    Ok(ServerSettings {
        addr: SocketAddr::new(ip, args.port),
        path_prefix: parse::dir(&args.path_prefix),
        cache: CacheHeaders {
            ttl: parse::duration("cache-header-ttl", &args.cache_header_ttl)?,
            swr: parse::duration("cache-header-swr", &args.cache_header_swr)?,
            no_cache: args.cache_header_no_cache,
        },
        params_endpoint: !args.disable_params_endpoint,
    })
}

fn security(args: &SecurityArgs) -> ConfigResult<SecuritySettings> {
    let algorithm = SignerAlgorithm::parse(&args.signer_type).ok_or_else(|| {
        ConfigError::invalid(
            "signer-type",
            "expected sha1, sha256, or sha512",
            &args.signer_type,
        )
    })?;
    let signer = parse::non_empty(args.secret.as_deref())
        .map(|secret| Signer::new(algorithm, secret, args.signer_truncate));
    Ok(SecuritySettings {
        signer,
        allow_unsafe: args.allow_unsafe,
    })
}

fn engine(args: &EngineArgs) -> ConfigResult<EngineConfig> {
    let result_write_mode = WriteMode::parse(&args.result_write_mode).ok_or_else(|| {
        ConfigError::invalid(
            "result-write-mode",
            "expected sync or background",
            &args.result_write_mode,
        )
    })?;
    let storage_path_style =
        StoragePathStyle::parse(&args.storage_path_style).ok_or_else(|| {
            ConfigError::invalid(
                "storage-path-style",
                "expected original or digest",
                &args.storage_path_style,
            )
        })?;
    let result_path_style =
        ResultPathStyle::parse(&args.result_storage_path_style).ok_or_else(|| {
            ConfigError::invalid(
                "result-storage-path-style",
                "expected original, digest, suffix, or size",
                &args.result_storage_path_style,
            )
        })?;
    Ok(EngineConfig {
        request_timeout: parse::timeout("request-timeout", &args.request_timeout)?,
        load_timeout: parse::timeout("load-timeout", &args.load_timeout)?,
        save_timeout: parse::timeout("save-timeout", &args.save_timeout)?,
        process_timeout: parse::timeout("process-timeout", &args.process_timeout)?,
        process_concurrency: Some(args.process_concurrency).filter(|limit| *limit > 0),
        process_retry_limit: args.process_retry_limit,
        result_write_mode,
        modified_time_check: args.modified_time_check,
        storage_path_style,
        result_path_style,
    })
}

fn http_loader(
    args: &HttpLoaderArgs,
    timeout: Option<Duration>,
) -> ConfigResult<Option<HttpLoaderConfig>> {
    if args.disable {
        return Ok(None);
    }
    Ok(Some(HttpLoaderConfig {
        forward_headers: parse::csv(args.forward_headers.as_deref()),
        override_response_headers: parse::csv(args.override_response_headers.as_deref()),
        forward_client_headers: args.forward_client_headers,
        allowed_sources: parse::csv(args.allowed_sources.as_deref()),
        allowed_source_regexps: parse::csv(args.allowed_source_regexp.as_deref()),
        max_allowed_size: args.max_allowed_size,
        insecure_skip_verify: args.insecure_skip_verify_transport,
        base_url: parse::non_empty(args.base_url.as_deref()),
        default_scheme: args.default_scheme.trim().to_string(),
        accept: args.accept.trim().to_string(),
        proxy_urls: parse::csv(args.proxy_urls.as_deref()),
        proxy_allowed_sources: parse::csv(args.proxy_allowed_sources.as_deref()),
        network_policy: NetworkPolicy {
            block_loopback: args.block_loopback_networks,
            block_private: args.block_private_networks,
            block_link_local: args.block_link_local_networks,
            blocked_networks: parse::networks(
                "http-loader-block-networks",
                args.block_networks.as_deref(),
            )?,
        },
        timeout,
        ..HttpLoaderConfig::default()
    }))
}

fn file_backend(
    root: Option<&str>,
    path_prefix: &str,
    safe_chars: &str,
) -> Option<FileStorageConfig> {
    parse::non_empty(root).map(|root| FileStorageConfig {
        path_prefix: parse::dir(path_prefix),
        safe_chars: safe_chars.to_string(),
        ..FileStorageConfig::new(PathBuf::from(root))
    })
}

fn file(args: &FileArgs) -> ConfigResult<Backends<FileStorageConfig>> {
    let loader = file_backend(
        args.loader_base_dir.as_deref(),
        &args.loader_path_prefix,
        &args.safe_chars,
    );
    let storage = file_backend(
        args.storage_base_dir.as_deref(),
        &args.storage_path_prefix,
        &args.safe_chars,
    )
    .map(|config| -> ConfigResult<FileStorageConfig> {
        Ok(FileStorageConfig {
            expiration: parse::expiration(
                "file-storage-expiration",
                args.storage_expiration.as_deref(),
            )?,
            dir_mode: parse::mode(
                "file-storage-mkdir-permission",
                &args.storage_mkdir_permission,
            )?,
            file_mode: parse::mode(
                "file-storage-write-permission",
                &args.storage_write_permission,
            )?,
            ..config
        })
    })
    .transpose()?;
    let result_storage = file_backend(
        args.result_storage_base_dir.as_deref(),
        &args.result_storage_path_prefix,
        &args.safe_chars,
    )
    .map(|config| -> ConfigResult<FileStorageConfig> {
        Ok(FileStorageConfig {
            expiration: parse::expiration(
                "file-result-storage-expiration",
                args.result_storage_expiration.as_deref(),
            )?,
            dir_mode: parse::mode(
                "file-result-storage-mkdir-permission",
                &args.result_storage_mkdir_permission,
            )?,
            file_mode: parse::mode(
                "file-result-storage-write-permission",
                &args.result_storage_write_permission,
            )?,
            ..config
        })
    })
    .transpose()?;
    Ok(Backends {
        loader,
        storage,
        result_storage,
    })
}

struct ObjectScope<'a> {
    bucket: Option<&'a str>,
    base_dir: &'a str,
    path_prefix: &'a str,
    expiration: (&'static str, Option<&'a str>),
}

fn object_backend(
    scope: &ObjectScope<'_>,
    args: &ObjectArgs,
) -> ConfigResult<Option<ObjectStorageConfig>> {
    let Some(bucket) = parse::non_empty(scope.bucket) else {
        return Ok(None);
    };
    let (field, expiration) = scope.expiration;
    Ok(Some(ObjectStorageConfig {
        bucket,
        base_dir: parse::dir(scope.base_dir),
        path_prefix: parse::dir(scope.path_prefix),
        safe_chars: args.safe_chars.clone(),
        expiration: parse::expiration(field, expiration)?,
        storage_class: StorageClass::parse_or_default(&args.storage_class),
        acl: parse::non_empty(args.storage_acl.as_deref()),
    }))
}

fn object(args: &ObjectArgs) -> ConfigResult<Backends<ObjectStorageConfig>> {
    Ok(Backends {
        loader: object_backend(
            &ObjectScope {
                bucket: args.loader_bucket.as_deref(),
                base_dir: &args.loader_base_dir,
                path_prefix: &args.loader_path_prefix,
                expiration: (
                    "object-loader-expiration",
                    args.loader_expiration.as_deref(),
                ),
            },
            args,
        )?,
        storage: object_backend(
            &ObjectScope {
                bucket: args.storage_bucket.as_deref(),
                base_dir: &args.storage_base_dir,
                path_prefix: &args.storage_path_prefix,
                expiration: (
                    "object-storage-expiration",
                    args.storage_expiration.as_deref(),
                ),
            },
            args,
        )?,
        result_storage: object_backend(
            &ObjectScope {
                bucket: args.result_storage_bucket.as_deref(),
                base_dir: &args.result_storage_base_dir,
                path_prefix: &args.result_storage_path_prefix,
                expiration: (
                    "object-result-storage-expiration",
                    args.result_storage_expiration.as_deref(),
                ),
            },
            args,
        )?,
    })
}

fn processor(args: &ProcessorArgs) -> Option<ProcessorConfig> {
    (!args.disable).then(|| ProcessorConfig {
        disabled_filters: parse::csv(args.disable_filters.as_deref()),
        max_width: args.max_width,
        max_height: args.max_height,
        max_resolution: args.max_resolution,
        ..ProcessorConfig::default()
    })
}

fn logging(args: &LoggingArgs) -> LoggingSettings {
    LoggingSettings {
        level: args.log_level.trim().to_string(),
        format: args
            .log_format
            .as_deref()
            .map_or_else(LogFormat::infer, LogFormat::parse),
    }
}
