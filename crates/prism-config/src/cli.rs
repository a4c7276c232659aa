//! Command-line flags. Every flag also reads a `PRISM_*` environment variable.

use clap::{Args, Parser};

/// Top-level parser for the `prism` binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "prism", version, about = "On-demand image processing server")]
pub struct Cli {
    /// Listener and response header options.
    #[command(flatten)]
    pub server: ServerArgs,
    /// Signing options.
    #[command(flatten)]
    pub security: SecurityArgs,
    /// Timeouts, limits, and key layouts.
    #[command(flatten)]
    pub engine: EngineArgs,
    /// HTTP(S) source loader.
    #[command(flatten)]
    pub http_loader: HttpLoaderArgs,
    /// Filesystem loader and storages.
    #[command(flatten)]
    pub file: FileArgs,
    /// Bucket loader and storages.
    ///
    /// Buckets are held by the in-process object client: contents live in
    /// memory and are lost when the process exits.
    #[command(flatten)]
    pub object: ObjectArgs,
    /// Image processor.
    #[command(flatten)]
    pub processor: ProcessorArgs,
    /// Logging.
    #[command(flatten)]
    pub logging: LoggingArgs,
}

/// Listener and response header options.
#[derive(Debug, Clone, Args)]
#[command(next_help_heading = "Server")]
pub struct ServerArgs {
    /// Address to bind.
    #[arg(long, env = "PRISM_BIND", default_value = "0.0.0.0")]
    pub bind: String,
    /// Port to listen on.
    #[arg(long, env = "PRISM_PORT", default_value_t = 8000)]
    pub port: u16,
    /// Prefix stripped from every request path.
    #[arg(long, env = "PRISM_PATH_PREFIX", default_value = "")]
    pub path_prefix: String,
    /// `Cache-Control` max-age for successful responses.
    #[arg(long, env = "PRISM_CACHE_HEADER_TTL", default_value = "168h")]
    pub cache_header_ttl: String,
    /// `stale-while-revalidate` window for successful responses.
    #[arg(long, env = "PRISM_CACHE_HEADER_SWR", default_value = "24h")]
    pub cache_header_swr: String,
    /// Send `no-cache` on every response.
    #[arg(long, env = "PRISM_CACHE_HEADER_NO_CACHE")]
    pub cache_header_no_cache: bool,
    /// Do not serve `/params`.
    #[arg(long, env = "PRISM_DISABLE_PARAMS_ENDPOINT")]
    pub disable_params_endpoint: bool,
}

/// Signing options.
#[derive(Debug, Clone, Args)]
#[command(next_help_heading = "Security")]
pub struct SecurityArgs {
    /// HMAC secret for signed paths.
    #[arg(long, env = "PRISM_SECRET", hide_env_values = true)]
    pub secret: Option<String>,
    /// Accept `unsafe/` paths without a signature.
    #[arg(long = "unsafe", env = "PRISM_UNSAFE")]
    pub allow_unsafe: bool,
    /// HMAC digest: `sha1`, `sha256`, or `sha512`.
    #[arg(long, env = "PRISM_SIGNER_TYPE", default_value = "sha1")]
    pub signer_type: String,
    /// Truncate signatures to this many characters, zero for none.
    #[arg(long, env = "PRISM_SIGNER_TRUNCATE", default_value_t = 0)]
    pub signer_truncate: usize,
}

/// Timeouts, limits, and key layouts.
#[derive(Debug, Clone, Args)]
#[command(next_help_heading = "Engine")]
pub struct EngineArgs {
    /// Deadline for a whole request, zero for none.
    #[arg(long, env = "PRISM_REQUEST_TIMEOUT", default_value = "30s")]
    pub request_timeout: String,
    /// Deadline for each load attempt.
    #[arg(long, env = "PRISM_LOAD_TIMEOUT", default_value = "20s")]
    pub load_timeout: String,
    /// Deadline for each storage write.
    #[arg(long, env = "PRISM_SAVE_TIMEOUT", default_value = "20s")]
    pub save_timeout: String,
    /// Deadline for each processing attempt.
    #[arg(long, env = "PRISM_PROCESS_TIMEOUT", default_value = "20s")]
    pub process_timeout: String,
    /// Concurrent processing limit, zero for unbounded.
    #[arg(long, env = "PRISM_PROCESS_CONCURRENCY", default_value_t = 0)]
    pub process_concurrency: usize,
    /// Extra attempts after a processing timeout.
    #[arg(long, env = "PRISM_PROCESS_RETRY_LIMIT", default_value_t = 1)]
    pub process_retry_limit: u32,
    /// `sync` or `background` result writes.
    #[arg(long, env = "PRISM_RESULT_WRITE_MODE", default_value = "sync")]
    pub result_write_mode: String,
    /// Treat results older than their source as misses.
    #[arg(long, env = "PRISM_MODIFIED_TIME_CHECK")]
    pub modified_time_check: bool,
    /// Original key layout: `original` or `digest`.
    #[arg(long, env = "PRISM_STORAGE_PATH_STYLE", default_value = "original")]
    pub storage_path_style: String,
    /// Result key layout: `original`, `digest`, `suffix`, or `size`.
    #[arg(
        long,
        env = "PRISM_RESULT_STORAGE_PATH_STYLE",
        default_value = "original"
    )]
    pub result_storage_path_style: String,
}

/// HTTP(S) source loader.
#[derive(Debug, Clone, Args)]
#[command(next_help_heading = "HTTP loader")]
pub struct HttpLoaderArgs {
    /// Client request headers to forward, csv.
    #[arg(
        long = "http-loader-forward-headers",
        env = "PRISM_HTTP_LOADER_FORWARD_HEADERS"
    )]
    pub forward_headers: Option<String>,
    /// Upstream response headers carried to the response, csv.
    #[arg(
        long = "http-loader-override-response-headers",
        env = "PRISM_HTTP_LOADER_OVERRIDE_RESPONSE_HEADERS"
    )]
    pub override_response_headers: Option<String>,
    /// Forward every client request header.
    #[arg(
        long = "http-loader-forward-client-headers",
        env = "PRISM_HTTP_LOADER_FORWARD_CLIENT_HEADERS"
    )]
    pub forward_client_headers: bool,
    /// Allowed source host globs, csv.
    #[arg(
        long = "http-loader-allowed-sources",
        env = "PRISM_HTTP_LOADER_ALLOWED_SOURCES"
    )]
    pub allowed_sources: Option<String>,
    /// Allowed source URL regexes, csv; combined with the globs as OR.
    #[arg(
        long = "http-loader-allowed-source-regexp",
        env = "PRISM_HTTP_LOADER_ALLOWED_SOURCE_REGEXP"
    )]
    pub allowed_source_regexp: Option<String>,
    /// Body size cap in bytes, zero for none.
    #[arg(
        long = "http-loader-max-allowed-size",
        env = "PRISM_HTTP_LOADER_MAX_ALLOWED_SIZE",
        default_value_t = 0
    )]
    pub max_allowed_size: u64,
    /// Skip TLS certificate verification.
    #[arg(
        long = "http-loader-insecure-skip-verify-transport",
        env = "PRISM_HTTP_LOADER_INSECURE_SKIP_VERIFY_TRANSPORT"
    )]
    pub insecure_skip_verify_transport: bool,
    /// URL prepended to every image path.
    #[arg(long = "http-loader-base-url", env = "PRISM_HTTP_LOADER_BASE_URL")]
    pub base_url: Option<String>,
    /// Scheme for paths without one; `nil` disables.
    #[arg(
        long = "http-loader-default-scheme",
        env = "PRISM_HTTP_LOADER_DEFAULT_SCHEME",
        default_value = "https"
    )]
    pub default_scheme: String,
    /// `Accept` header, also checked against the response content type.
    #[arg(
        long = "http-loader-accept",
        env = "PRISM_HTTP_LOADER_ACCEPT",
        default_value = "*/*"
    )]
    pub accept: String,
    /// Proxy URLs used in rotation, csv.
    #[arg(long = "http-loader-proxy-urls", env = "PRISM_HTTP_LOADER_PROXY_URLS")]
    pub proxy_urls: Option<String>,
    /// Host globs routed through the proxies, csv.
    #[arg(
        long = "http-loader-proxy-allowed-sources",
        env = "PRISM_HTTP_LOADER_PROXY_ALLOWED_SOURCES"
    )]
    pub proxy_allowed_sources: Option<String>,
    /// Refuse loopback destinations.
    #[arg(
        long = "http-loader-block-loopback-networks",
        env = "PRISM_HTTP_LOADER_BLOCK_LOOPBACK_NETWORKS"
    )]
    pub block_loopback_networks: bool,
    /// Refuse private destinations.
    #[arg(
        long = "http-loader-block-private-networks",
        env = "PRISM_HTTP_LOADER_BLOCK_PRIVATE_NETWORKS"
    )]
    pub block_private_networks: bool,
    /// Refuse link-local destinations.
    #[arg(
        long = "http-loader-block-link-local-networks",
        env = "PRISM_HTTP_LOADER_BLOCK_LINK_LOCAL_NETWORKS"
    )]
    pub block_link_local_networks: bool,
    /// Refused destination networks in CIDR notation, csv.
    #[arg(
        long = "http-loader-block-networks",
        env = "PRISM_HTTP_LOADER_BLOCK_NETWORKS"
    )]
    pub block_networks: Option<String>,
    /// Do not load from HTTP(S) sources.
    #[arg(
        id = "http_loader_disable",
        long = "http-loader-disable",
        env = "PRISM_HTTP_LOADER_DISABLE"
    )]
    pub disable: bool,
}

/// Filesystem loader and storages.
#[derive(Debug, Clone, Args)]
#[command(next_help_heading = "File backends")]
pub struct FileArgs {
    /// Characters exempted from key escaping.
    #[arg(
        id = "file_safe_chars",
        long = "file-safe-chars",
        env = "PRISM_FILE_SAFE_CHARS",
        default_value = ""
    )]
    pub safe_chars: String,
    /// Loader root directory; enables the file loader.
    #[arg(
        id = "file_loader_base_dir",
        long = "file-loader-base-dir",
        env = "PRISM_FILE_LOADER_BASE_DIR"
    )]
    pub loader_base_dir: Option<String>,
    /// Loader path prefix.
    #[arg(
        id = "file_loader_path_prefix",
        long = "file-loader-path-prefix",
        env = "PRISM_FILE_LOADER_PATH_PREFIX",
        default_value = ""
    )]
    pub loader_path_prefix: String,
    /// Storage root directory; enables the file storage.
    #[arg(
        id = "file_storage_base_dir",
        long = "file-storage-base-dir",
        env = "PRISM_FILE_STORAGE_BASE_DIR"
    )]
    pub storage_base_dir: Option<String>,
    /// Storage path prefix.
    #[arg(
        id = "file_storage_path_prefix",
        long = "file-storage-path-prefix",
        env = "PRISM_FILE_STORAGE_PATH_PREFIX",
        default_value = ""
    )]
    pub storage_path_prefix: String,
    /// Storage entry lifetime, unset for none.
    #[arg(
        id = "file_storage_expiration",
        long = "file-storage-expiration",
        env = "PRISM_FILE_STORAGE_EXPIRATION"
    )]
    pub storage_expiration: Option<String>,
    /// Storage directory permission.
    #[arg(
        long = "file-storage-mkdir-permission",
        env = "PRISM_FILE_STORAGE_MKDIR_PERMISSION",
        default_value = "0755"
    )]
    pub storage_mkdir_permission: String,
    /// Storage file permission.
    #[arg(
        long = "file-storage-write-permission",
        env = "PRISM_FILE_STORAGE_WRITE_PERMISSION",
        default_value = "0644"
    )]
    pub storage_write_permission: String,
    /// Result storage root directory; enables the file result storage.
    #[arg(
        id = "file_result_storage_base_dir",
        long = "file-result-storage-base-dir",
        env = "PRISM_FILE_RESULT_STORAGE_BASE_DIR"
    )]
    pub result_storage_base_dir: Option<String>,
    /// Result storage path prefix.
    #[arg(
        id = "file_result_storage_path_prefix",
        long = "file-result-storage-path-prefix",
        env = "PRISM_FILE_RESULT_STORAGE_PATH_PREFIX",
        default_value = ""
    )]
    pub result_storage_path_prefix: String,
    /// Result storage entry lifetime, unset for none.
    #[arg(
        id = "file_result_storage_expiration",
        long = "file-result-storage-expiration",
        env = "PRISM_FILE_RESULT_STORAGE_EXPIRATION"
    )]
    pub result_storage_expiration: Option<String>,
    /// Result storage directory permission.
    #[arg(
        long = "file-result-storage-mkdir-permission",
        env = "PRISM_FILE_RESULT_STORAGE_MKDIR_PERMISSION",
        default_value = "0755"
    )]
    pub result_storage_mkdir_permission: String,
    /// Result storage file permission.
    #[arg(
        long = "file-result-storage-write-permission",
        env = "PRISM_FILE_RESULT_STORAGE_WRITE_PERMISSION",
        default_value = "0644"
    )]
    pub result_storage_write_permission: String,
}

/// Bucket loader and storages.
///
/// Buckets are held by the in-process object client: contents live in
/// memory and are lost when the process exits.
#[derive(Debug, Clone, Args)]
#[command(next_help_heading = "Object backends (in-memory, not persisted)")]
pub struct ObjectArgs {
    /// Characters exempted from key escaping.
    #[arg(
        id = "object_safe_chars",
        long = "object-safe-chars",
        env = "PRISM_OBJECT_SAFE_CHARS",
        default_value = ""
    )]
    pub safe_chars: String,
    /// Loader bucket, optionally `bucket/sub/path`; enables the in-memory bucket loader.
    #[arg(long = "object-loader-bucket", env = "PRISM_OBJECT_LOADER_BUCKET")]
    pub loader_bucket: Option<String>,
    /// Loader base directory inside the bucket.
    #[arg(
        id = "object_loader_base_dir",
        long = "object-loader-base-dir",
        env = "PRISM_OBJECT_LOADER_BASE_DIR",
        default_value = ""
    )]
    pub loader_base_dir: String,
    /// Loader path prefix.
    #[arg(
        id = "object_loader_path_prefix",
        long = "object-loader-path-prefix",
        env = "PRISM_OBJECT_LOADER_PATH_PREFIX",
        default_value = ""
    )]
    pub loader_path_prefix: String,
    /// Loader entry lifetime, unset for none.
    #[arg(
        long = "object-loader-expiration",
        env = "PRISM_OBJECT_LOADER_EXPIRATION"
    )]
    pub loader_expiration: Option<String>,
    /// Storage bucket; enables the in-memory bucket storage, lost on restart.
    #[arg(long = "object-storage-bucket", env = "PRISM_OBJECT_STORAGE_BUCKET")]
    pub storage_bucket: Option<String>,
    /// Storage base directory inside the bucket.
    #[arg(
        id = "object_storage_base_dir",
        long = "object-storage-base-dir",
        env = "PRISM_OBJECT_STORAGE_BASE_DIR",
        default_value = ""
    )]
    pub storage_base_dir: String,
    /// Storage path prefix.
    #[arg(
        id = "object_storage_path_prefix",
        long = "object-storage-path-prefix",
        env = "PRISM_OBJECT_STORAGE_PATH_PREFIX",
        default_value = ""
    )]
    pub storage_path_prefix: String,
    /// Storage entry lifetime, unset for none.
    #[arg(
        id = "object_storage_expiration",
        long = "object-storage-expiration",
        env = "PRISM_OBJECT_STORAGE_EXPIRATION"
    )]
    pub storage_expiration: Option<String>,
    /// Result storage bucket; enables the in-memory bucket result storage, lost on restart.
    #[arg(
        long = "object-result-storage-bucket",
        env = "PRISM_OBJECT_RESULT_STORAGE_BUCKET"
    )]
    pub result_storage_bucket: Option<String>,
    /// Result storage base directory inside the bucket.
    #[arg(
        id = "object_result_storage_base_dir",
        long = "object-result-storage-base-dir",
        env = "PRISM_OBJECT_RESULT_STORAGE_BASE_DIR",
        default_value = ""
    )]
    pub result_storage_base_dir: String,
    /// Result storage path prefix.
    #[arg(
        id = "object_result_storage_path_prefix",
        long = "object-result-storage-path-prefix",
        env = "PRISM_OBJECT_RESULT_STORAGE_PATH_PREFIX",
        default_value = ""
    )]
    pub result_storage_path_prefix: String,
    /// Result storage entry lifetime, unset for none.
    #[arg(
        id = "object_result_storage_expiration",
        long = "object-result-storage-expiration",
        env = "PRISM_OBJECT_RESULT_STORAGE_EXPIRATION"
    )]
    pub result_storage_expiration: Option<String>,
    /// Storage tier for writes; unknown values fall back to `STANDARD`.
    #[arg(
        long = "object-storage-class",
        env = "PRISM_OBJECT_STORAGE_CLASS",
        default_value = "STANDARD"
    )]
    pub storage_class: String,
    /// Canned ACL for writes.
    #[arg(long = "object-storage-acl", env = "PRISM_OBJECT_STORAGE_ACL")]
    pub storage_acl: Option<String>,
}

/// Image processor.
#[derive(Debug, Clone, Args)]
#[command(next_help_heading = "Processor")]
pub struct ProcessorArgs {
    /// Filter names to ignore, csv.
    #[arg(
        long = "processor-disable-filters",
        env = "PRISM_PROCESSOR_DISABLE_FILTERS"
    )]
    pub disable_filters: Option<String>,
    /// Largest accepted width, zero for none.
    #[arg(
        long = "processor-max-width",
        env = "PRISM_PROCESSOR_MAX_WIDTH",
        default_value_t = 0
    )]
    pub max_width: u32,
    /// Largest accepted height, zero for none.
    #[arg(
        long = "processor-max-height",
        env = "PRISM_PROCESSOR_MAX_HEIGHT",
        default_value_t = 0
    )]
    pub max_height: u32,
    /// Largest accepted pixel count, zero for none.
    #[arg(
        long = "processor-max-resolution",
        env = "PRISM_PROCESSOR_MAX_RESOLUTION",
        default_value_t = 0
    )]
    pub max_resolution: u64,
    /// Serve originals untouched.
    #[arg(
        id = "processor_disable",
        long = "processor-disable",
        env = "PRISM_PROCESSOR_DISABLE"
    )]
    pub disable: bool,
}

/// Logging.
#[derive(Debug, Clone, Args)]
#[command(next_help_heading = "Logging")]
pub struct LoggingArgs {
    /// Level used when `RUST_LOG` is unset.
    #[arg(long, env = "PRISM_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
    /// `json` or `pretty`; inferred from the build profile when unset.
    #[arg(long, env = "PRISM_LOG_FORMAT")]
    pub log_format: Option<String>,
}
