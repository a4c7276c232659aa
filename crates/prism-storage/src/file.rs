//! Filesystem-backed storage.
//!
//! # Design
//! - Keys come from [`KeyResolver`] rooted at `/`, then join the configured
//!   root directory. Normalisation guarantees the join stays under the root.
//! - Dot-file segments are out of scope by default.
//! - Writes land in a temporary sibling file and are renamed into place, so
//!   readers never observe a partial image.
//! - Expiration compares the file's modification time against the configured
//!   TTL on every read.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prism_core::{Blob, ImageError, ImageResult, Loader, RequestContext, Stat, Storage};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::StorageResult;
use crate::resolver::{KeyResolver, SafeChars};

/// Default pattern rejecting any dot-file segment.
pub const DOTFILE_BLACKLIST: &str = r"/\.";

/// Settings for [`FileStorage`].
#[derive(Debug, Clone)]
pub struct FileStorageConfig {
    /// Root directory holding stored images.
    pub root: PathBuf,
    /// Required request path prefix, empty for none.
    pub path_prefix: String,
    /// Characters exempted from key escaping.
    pub safe_chars: String,
    /// Entries older than this are reported as expired.
    pub expiration: Option<Duration>,
    /// Mode for created directories.
    pub dir_mode: u32,
    /// Mode for written files.
    pub file_mode: u32,
    /// Extra blacklist patterns on top of the dot-file rule.
    pub blacklist: Vec<String>,
}

impl FileStorageConfig {
    /// Defaults for `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            path_prefix: String::new(),
            safe_chars: String::new(),
            expiration: None,
            dir_mode: 0o755,
            file_mode: 0o644,
            blacklist: Vec::new(),
        }
    }
}

/// Storage rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    name: String,
    root: PathBuf,
    resolver: KeyResolver,
    expiration: Option<Duration>,
    dir_mode: u32,
    file_mode: u32,
}

impl FileStorage {
    /// Build a storage from `config`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPattern` when a blacklist pattern fails to compile.
    pub fn new(name: impl Into<String>, config: FileStorageConfig) -> StorageResult<Self> {
        let resolver = KeyResolver::new(
            "",
            "",
            &config.path_prefix,
            SafeChars::new(&config.safe_chars),
        )
        .with_blacklist(std::iter::once(DOTFILE_BLACKLIST.to_string()).chain(config.blacklist))?;
        Ok(Self {
            name: name.into(),
            root: config.root,
            resolver,
            expiration: config.expiration,
            dir_mode: config.dir_mode,
            file_mode: config.file_mode,
        })
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_path(&self, image: &str) -> ImageResult<PathBuf> {
        self.resolver
            .resolve(image)
            .map(|key| self.root.join(key.trim_start_matches('/')))
            .ok_or_else(|| ImageError::out_of_scope(image))
    }

    async fn load_stat(&self, image: &str, path: &Path) -> ImageResult<Stat> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Err(ImageError::not_found(image)),
            Err(err) => return Err(io_error("file.stat", image, err)),
        };
        let modified = metadata.modified().ok();
        if let (Some(ttl), Some(modified)) = (self.expiration, modified)
            && is_expired(modified, ttl)
        {
            return Err(ImageError::Expired {
                path: image.to_string(),
            });
        }
        let modified = modified.map(DateTime::<Utc>::from);
        let etag = modified.map(|time| {
            format!(
                "\"{:x}-{:x}\"",
                metadata.len(),
                time.timestamp_nanos_opt().unwrap_or_default()
            )
        });
        Ok(Stat {
            modified,
            etag,
            size: metadata.len(),
        })
    }

    async fn create_parent(&self, path: &Path) -> ImageResult<()> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(self.dir_mode);
        builder
            .create(parent)
            .await
            .map_err(|err| ImageError::backend("file.create_dir", err))
    }

    async fn write_atomic(&self, path: &Path, blob: &Blob) -> ImageResult<()> {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));
        let written = self.write_temp(&temp, blob).await;
        let result = match written {
            Ok(()) => tokio::fs::rename(&temp, path)
                .await
                .map_err(|err| ImageError::backend("file.rename", err)),
            Err(err) => Err(err),
        };
        if result.is_err() {
            let _ = tokio::fs::remove_file(&temp).await;
        }
        result
    }

    async fn write_temp(&self, temp: &Path, blob: &Blob) -> ImageResult<()> {
        let mut file = tokio::fs::File::create(temp)
            .await
            .map_err(|err| ImageError::backend("file.create", err))?;
        let mut reader = blob.open().await?;
        tokio::io::copy(&mut reader, &mut file)
            .await
            .map_err(|err| ImageError::backend("file.write", err))?;
        file.flush()
            .await
            .map_err(|err| ImageError::backend("file.flush", err))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(temp, std::fs::Permissions::from_mode(self.file_mode))
                .await
                .map_err(|err| ImageError::backend("file.set_permissions", err))?;
        }
        Ok(())
    }
}

fn is_expired(modified: SystemTime, ttl: Duration) -> bool {
    modified.elapsed().is_ok_and(|age| age > ttl)
}

fn io_error(operation: &'static str, image: &str, err: io::Error) -> ImageError {
    if err.kind() == io::ErrorKind::NotFound {
        ImageError::not_found(image)
    } else {
        ImageError::backend(operation, err)
    }
}

#[async_trait]
impl Loader for FileStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, _ctx: &RequestContext, image: &str) -> ImageResult<Blob> {
        let path = self.file_path(image)?;
        let stat = self.load_stat(image, &path).await?;
        Ok(Blob::from_file(path).with_stat(stat))
    }

    async fn stat(&self, _ctx: &RequestContext, image: &str) -> ImageResult<Stat> {
        let path = self.file_path(image)?;
        self.load_stat(image, &path).await
    }

    fn path(&self, image: &str) -> Option<String> {
        self.file_path(image)
            .ok()
            .map(|path| path.display().to_string())
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn put(&self, _ctx: &RequestContext, image: &str, blob: &Blob) -> ImageResult<()> {
        let path = self.file_path(image)?;
        self.create_parent(&path).await?;
        self.write_atomic(&path, blob).await?;
        debug!(storage = %self.name, path = %path.display(), "stored image");
        Ok(())
    }

    async fn delete(&self, _ctx: &RequestContext, image: &str) -> ImageResult<()> {
        let path = self.file_path(image)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|err| io_error("file.delete", image, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::ErrorKind;
    use std::error::Error;

    fn storage(root: &Path, prefix: &str) -> Result<FileStorage, Box<dyn Error>> {
        let mut config = FileStorageConfig::new(root);
        config.path_prefix = prefix.to_string();
        Ok(FileStorage::new("file", config)?)
    }

    #[tokio::test]
    async fn crud_round_trip_under_prefix() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let storage = storage(dir.path(), "/foo")?;
        let ctx = RequestContext::background();

        let outside = storage.get(&ctx, "/bar/fooo/asdf").await.err();
        assert_eq!(outside.map(|err| err.kind()), Some(ErrorKind::Invalid));
        let outside = storage.stat(&ctx, "/bar/fooo/asdf").await.err();
        assert_eq!(outside.map(|err| err.kind()), Some(ErrorKind::Invalid));
        let outside = storage
            .put(&ctx, "/bar/fooo/asdf", &Blob::from_bytes(b"bar".to_vec()))
            .await
            .err();
        assert_eq!(outside.map(|err| err.kind()), Some(ErrorKind::Invalid));
        let outside = storage.delete(&ctx, "/bar/fooo/asdf").await.err();
        assert_eq!(outside.map(|err| err.kind()), Some(ErrorKind::Invalid));

        let missing = storage.get(&ctx, "/foo/fooo/asdf").await.err();
        assert_eq!(missing.map(|err| err.kind()), Some(ErrorKind::NotFound));

        storage
            .put(&ctx, "/foo/fooo/asdf", &Blob::from_bytes(b"bar".to_vec()))
            .await?;
        let stat = storage.stat(&ctx, "/foo/fooo/asdf").await?;
        assert_eq!(stat.size, 3);
        assert!(stat.etag.is_some());
        assert!(stat.modified.is_some_and(|time| time <= Utc::now()));

        let blob = storage.get(&ctx, "/foo/fooo/asdf").await?;
        assert_eq!(&*blob.read_all().await?, b"bar");
        assert_eq!(blob.stat(), Some(&stat));
        assert!(dir.path().join("fooo/asdf").is_file());

        storage.delete(&ctx, "/foo/fooo/asdf").await?;
        let gone = storage.get(&ctx, "/foo/fooo/asdf").await.err();
        assert_eq!(gone.map(|err| err.kind()), Some(ErrorKind::NotFound));
        let gone = storage.delete(&ctx, "/foo/fooo/asdf").await.err();
        assert_eq!(gone.map(|err| err.kind()), Some(ErrorKind::NotFound));
        Ok(())
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let mut config = FileStorageConfig::new(dir.path());
        config.expiration = Some(Duration::from_millis(50));
        let storage = FileStorage::new("file", config)?;
        let ctx = RequestContext::background();

        storage
            .put(&ctx, "/foo/bar/asdf", &Blob::from_bytes(b"bar".to_vec()))
            .await?;
        assert_eq!(
            &*storage.get(&ctx, "/foo/bar/asdf").await?.read_all().await?,
            b"bar"
        );
        tokio::time::sleep(Duration::from_millis(120)).await;
        let expired = storage.get(&ctx, "/foo/bar/asdf").await.err();
        assert_eq!(expired.map(|err| err.kind()), Some(ErrorKind::Expired));
        Ok(())
    }

    #[tokio::test]
    async fn dotfiles_and_traversal_stay_inside_root() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let storage = storage(dir.path(), "")?;
        assert!(storage.path("/a/.env").is_none());
        let escaped = storage.path("../../etc/passwd");
        let root = dir.path().display().to_string();
        assert!(escaped.is_some_and(|path| path.starts_with(&root)));
        Ok(())
    }

    #[tokio::test]
    async fn overwrite_replaces_content_without_leftovers() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let storage = storage(dir.path(), "")?;
        let ctx = RequestContext::background();
        storage.put(&ctx, "a/b.png", &Blob::from_bytes(b"one".to_vec())).await?;
        storage.put(&ctx, "a/b.png", &Blob::from_bytes(b"two".to_vec())).await?;
        assert_eq!(&*storage.get(&ctx, "a/b.png").await?.read_all().await?, b"two");
        let entries = std::fs::read_dir(dir.path().join("a"))?.count();
        assert_eq!(entries, 1);
        Ok(())
    }
}
