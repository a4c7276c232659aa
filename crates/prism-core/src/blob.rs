//! Image content plus metadata exchanged between pipeline stages.
//!
//! # Design
//! - A `Blob` is cheap to clone: in-memory bytes sit behind `Arc<[u8]>` and
//!   file-backed blobs hold only a path. Every clone shares the same bytes.
//! - Readers are opened on demand and released when dropped, so a file
//!   descriptor never outlives the stage that opened it.
//! - Content type is either supplied by the producer or sniffed from magic
//!   bytes.

use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

use crate::error::{ImageError, ImageResult};

const SNIFF_LEN: usize = 512;

/// Object metadata reported by backends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stat {
    /// Last modification time, when the backend tracks one.
    pub modified: Option<DateTime<Utc>>,
    /// Entity tag, when the backend tracks one.
    pub etag: Option<String>,
    /// Size in bytes.
    pub size: u64,
}

/// Recognised content formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobType {
    /// No bytes at all.
    Empty,
    /// Bytes that match no known signature.
    Unknown,
    /// JSON document (metadata responses).
    Json,
    /// JPEG image.
    Jpeg,
    /// PNG image.
    Png,
    /// GIF image.
    Gif,
    /// `WebP` image.
    Webp,
    /// AVIF image.
    Avif,
    /// HEIF image.
    Heif,
    /// TIFF image.
    Tiff,
    /// BMP image.
    Bmp,
}

impl BlobType {
    /// Detect the format from leading magic bytes.
    #[must_use]
    pub fn detect(bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            return Self::Empty;
        }
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Self::Jpeg;
        }
        if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
            return Self::Png;
        }
        if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            return Self::Gif;
        }
        if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            return Self::Webp;
        }
        if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
            return match &bytes[8..12] {
                b"avif" | b"avis" => Self::Avif,
                b"heic" | b"heix" | b"mif1" | b"msf1" => Self::Heif,
                _ => Self::Unknown,
            };
        }
        if bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*") {
            return Self::Tiff;
        }
        if bytes.starts_with(b"BM") {
            return Self::Bmp;
        }
        let first = bytes.iter().find(|byte| !byte.is_ascii_whitespace());
        if matches!(first, Some(b'{' | b'[')) {
            return Self::Json;
        }
        Self::Unknown
    }

    /// Map a format token such as `jpg` or `webp` onto a type.
    #[must_use]
    pub fn from_format(format: &str) -> Option<Self> {
        match format.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "gif" => Some(Self::Gif),
            "webp" => Some(Self::Webp),
            "avif" => Some(Self::Avif),
            "heif" | "heic" => Some(Self::Heif),
            "tif" | "tiff" => Some(Self::Tiff),
            "bmp" => Some(Self::Bmp),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    /// MIME type served for this format.
    #[must_use]
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::Empty | Self::Unknown => "application/octet-stream",
            Self::Json => "application/json",
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Avif => "image/avif",
            Self::Heif => "image/heif",
            Self::Tiff => "image/tiff",
            Self::Bmp => "image/bmp",
        }
    }

    /// Whether the type is a raster image format.
    #[must_use]
    pub const fn is_image(self) -> bool {
        !matches!(self, Self::Empty | Self::Unknown | Self::Json)
    }
}

#[derive(Debug, Clone)]
enum BlobSource {
    Empty,
    Bytes(Arc<[u8]>),
    File(Arc<PathBuf>),
}

/// Content plus metadata.
#[derive(Debug, Clone)]
pub struct Blob {
    source: BlobSource,
    stat: Option<Stat>,
    content_type: Option<String>,
    headers: Arc<[(String, String)]>,
}

impl Default for Blob {
    fn default() -> Self {
        Self::empty()
    }
}

impl Blob {
    /// A blob with no content.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            source: BlobSource::Empty,
            stat: None,
            content_type: None,
            headers: Arc::from(Vec::new()),
        }
    }

    /// Wrap materialised bytes.
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        let bytes: Arc<[u8]> = bytes.into();
        if bytes.is_empty() {
            return Self::empty();
        }
        Self {
            source: BlobSource::Bytes(bytes),
            ..Self::empty()
        }
    }

    /// Reference a file that is opened lazily on each read.
    #[must_use]
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: BlobSource::File(Arc::new(path.into())),
            ..Self::empty()
        }
    }

    /// Attach backend metadata.
    #[must_use]
    pub fn with_stat(mut self, stat: Stat) -> Self {
        self.stat = Some(stat);
        self
    }

    /// Override the content type instead of sniffing it.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Attach response headers carried from the source.
    #[must_use]
    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = Arc::from(headers);
        self
    }

    /// Backend metadata, when known.
    #[must_use]
    pub const fn stat(&self) -> Option<&Stat> {
        self.stat.as_ref()
    }

    /// Headers carried from the source.
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Explicit content type, when one was supplied.
    #[must_use]
    pub fn declared_content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Whether the blob carries no content.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self.source, BlobSource::Empty)
    }

    /// Backing file, for file-backed blobs.
    #[must_use]
    pub fn file_path(&self) -> Option<&Path> {
        match &self.source {
            BlobSource::File(path) => Some(path.as_path()),
            BlobSource::Empty | BlobSource::Bytes(_) => None,
        }
    }

    /// Open an independent reader over the content.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when a backing file has vanished and `Backend` for
    /// other I/O failures.
    pub async fn open(&self) -> ImageResult<BlobReader> {
        match &self.source {
            BlobSource::Empty => Ok(BlobReader::Empty),
            BlobSource::Bytes(bytes) => Ok(BlobReader::Memory(Cursor::new(Arc::clone(bytes)))),
            BlobSource::File(path) => tokio::fs::File::open(path.as_path())
                .await
                .map(BlobReader::File)
                .map_err(|err| file_error("blob.open", path, err)),
        }
    }

    /// Read the full content.
    ///
    /// In-memory blobs return their shared buffer without copying.
    ///
    /// # Errors
    ///
    /// Propagates failures from [`Blob::open`] and from reading.
    pub async fn read_all(&self) -> ImageResult<Arc<[u8]>> {
        match &self.source {
            BlobSource::Empty => Ok(Arc::from(Vec::new())),
            BlobSource::Bytes(bytes) => Ok(Arc::clone(bytes)),
            BlobSource::File(path) => tokio::fs::read(path.as_path())
                .await
                .map(Arc::from)
                .map_err(|err| file_error("blob.read", path, err)),
        }
    }

    /// Convert into an in-memory blob, keeping metadata.
    ///
    /// # Errors
    ///
    /// Propagates failures from [`Blob::read_all`].
    pub async fn materialize(&self) -> ImageResult<Self> {
        if !matches!(self.source, BlobSource::File(_)) {
            return Ok(self.clone());
        }
        let bytes = self.read_all().await?;
        Ok(Self {
            source: if bytes.is_empty() {
                BlobSource::Empty
            } else {
                BlobSource::Bytes(bytes)
            },
            ..self.clone()
        })
    }

    /// Detect the content format from the leading bytes.
    ///
    /// # Errors
    ///
    /// Propagates failures from [`Blob::open`] and from reading.
    pub async fn sniff(&self) -> ImageResult<BlobType> {
        match &self.source {
            BlobSource::Empty => Ok(BlobType::Empty),
            BlobSource::Bytes(bytes) => Ok(BlobType::detect(bytes)),
            BlobSource::File(path) => {
                let mut reader = self.open().await?;
                let mut head = vec![0_u8; SNIFF_LEN];
                let mut filled = 0;
                while filled < SNIFF_LEN {
                    let read = reader
                        .read(&mut head[filled..])
                        .await
                        .map_err(|err| file_error("blob.sniff", path, err))?;
                    if read == 0 {
                        break;
                    }
                    filled += read;
                }
                Ok(BlobType::detect(&head[..filled]))
            }
        }
    }

    /// Content type to serve: declared, else sniffed.
    ///
    /// # Errors
    ///
    /// Propagates failures from [`Blob::sniff`].
    pub async fn content_type(&self) -> ImageResult<String> {
        if let Some(declared) = &self.content_type {
            return Ok(declared.clone());
        }
        Ok(self.sniff().await?.content_type().to_string())
    }
}

fn file_error(operation: &'static str, path: &Path, err: io::Error) -> ImageError {
    if err.kind() == io::ErrorKind::NotFound {
        ImageError::not_found(path.display().to_string())
    } else {
        ImageError::backend(operation, err)
    }
}

/// Read handle over a blob's content; dropping it releases the handle.
#[derive(Debug)]
pub enum BlobReader {
    /// Nothing to read.
    Empty,
    /// Shared in-memory buffer.
    Memory(Cursor<Arc<[u8]>>),
    /// Open file.
    File(tokio::fs::File),
}

impl AsyncRead for BlobReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Empty => Poll::Ready(Ok(())),
            Self::Memory(cursor) => Pin::new(cursor).poll_read(cx, buf),
            Self::File(file) => Pin::new(file).poll_read(cx, buf),
        }
    }
}
