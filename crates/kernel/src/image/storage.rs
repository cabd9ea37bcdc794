//! Image storage backends.
//!
//! Provides trait and implementations for storing image bytes locally,
//! in memory, or in S3. Objects are addressed by their public id.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Image storage backend trait.
#[async_trait]
pub trait ImageStorage: Send + Sync {
    /// Write data under the given public id.
    async fn write(&self, public_id: &str, data: &[u8], mime_type: &str) -> Result<()>;

    /// Delete an object. Deleting a missing object is not an error.
    async fn delete(&self, public_id: &str) -> Result<()>;

    /// Check if an object exists.
    async fn exists(&self, public_id: &str) -> Result<bool>;

    /// Get the public URL for an object.
    fn public_url(&self, public_id: &str) -> String;

    /// Get the storage scheme (e.g., "local", "s3").
    fn scheme(&self) -> &'static str;
}

/// Local filesystem storage.
pub struct LocalImageStorage {
    /// Base path for image storage.
    base_path: PathBuf,
    /// Base URL for public access.
    base_url: String,
}

impl LocalImageStorage {
    /// Create a new local image storage.
    pub fn new(base_path: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            base_url: base_url.into(),
        }
    }

    /// Resolve a public id to a path under the base directory.
    ///
    /// Rejects ids containing `..` or absolute components.
    fn resolve(&self, public_id: &str) -> Result<PathBuf> {
        for component in std::path::Path::new(public_id).components() {
            match component {
                std::path::Component::Normal(_) => {}
                _ => anyhow::bail!("invalid path component in image public id"),
            }
        }
        Ok(self.base_path.join(public_id))
    }
}

#[async_trait]
impl ImageStorage for LocalImageStorage {
    async fn write(&self, public_id: &str, data: &[u8], _mime_type: &str) -> Result<()> {
        let path = self.resolve(public_id)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("failed to create directories")?;
        }

        let mut file = fs::File::create(&path)
            .await
            .context("failed to create image file")?;
        file.write_all(data)
            .await
            .context("failed to write image file")?;
        file.flush().await.context("failed to flush image file")?;

        debug!(public_id = %public_id, path = ?path, size = data.len(), "image written");
        Ok(())
    }

    async fn delete(&self, public_id: &str) -> Result<()> {
        let path = self.resolve(public_id)?;

        let present = fs::try_exists(&path)
            .await
            .context("failed to check image before deletion")?;
        if present {
            fs::remove_file(&path)
                .await
                .context("failed to delete image file")?;
            debug!(public_id = %public_id, "image deleted");
        } else {
            warn!(public_id = %public_id, "image not found for deletion");
        }

        Ok(())
    }

    async fn exists(&self, public_id: &str) -> Result<bool> {
        let path = self.resolve(public_id)?;
        fs::try_exists(&path)
            .await
            .context("failed to check image existence")
    }

    fn public_url(&self, public_id: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), public_id)
    }

    fn scheme(&self) -> &'static str {
        "local"
    }
}

impl std::fmt::Debug for LocalImageStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalImageStorage")
            .field("base_path", &self.base_path)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// In-process storage for tests and local runs.
#[derive(Debug)]
pub struct MemoryImageStorage {
    objects: DashMap<String, Vec<u8>>,
    base_url: String,
}

impl MemoryImageStorage {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            objects: DashMap::new(),
            base_url: base_url.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl Default for MemoryImageStorage {
    fn default() -> Self {
        Self::new("memory://images")
    }
}

#[async_trait]
impl ImageStorage for MemoryImageStorage {
    async fn write(&self, public_id: &str, data: &[u8], _mime_type: &str) -> Result<()> {
        self.objects.insert(public_id.to_string(), data.to_vec());
        Ok(())
    }

    async fn delete(&self, public_id: &str) -> Result<()> {
        self.objects.remove(public_id);
        Ok(())
    }

    async fn exists(&self, public_id: &str) -> Result<bool> {
        Ok(self.objects.contains_key(public_id))
    }

    fn public_url(&self, public_id: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), public_id)
    }

    fn scheme(&self) -> &'static str {
        "memory"
    }
}

/// S3-compatible object storage.
#[cfg(feature = "s3")]
pub struct S3ImageStorage {
    client: aws_sdk_s3::Client,
    bucket: String,
    /// Optional prefix for all keys.
    prefix: Option<String>,
    /// Base URL for public access (e.g., CloudFront distribution).
    base_url: String,
}

#[cfg(feature = "s3")]
impl S3ImageStorage {
    /// Create a new S3 image storage.
    ///
    /// Uses the default AWS credential chain (env vars, config file, instance profile).
    pub async fn new(
        bucket: impl Into<String>,
        prefix: Option<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let config = aws_config::load_from_env().await;
        Ok(Self {
            client: aws_sdk_s3::Client::new(&config),
            bucket: bucket.into(),
            prefix,
            base_url: base_url.into(),
        })
    }

    /// Create with a custom endpoint (for S3-compatible services like MinIO).
    pub async fn with_endpoint(
        endpoint_url: &str,
        bucket: impl Into<String>,
        prefix: Option<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let config = aws_config::from_env()
            .endpoint_url(endpoint_url)
            .load()
            .await;
        Ok(Self {
            client: aws_sdk_s3::Client::new(&config),
            bucket: bucket.into(),
            prefix,
            base_url: base_url.into(),
        })
    }

    fn object_key(&self, public_id: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), public_id),
            None => public_id.to_string(),
        }
    }
}

#[cfg(feature = "s3")]
#[async_trait]
impl ImageStorage for S3ImageStorage {
    async fn write(&self, public_id: &str, data: &[u8], mime_type: &str) -> Result<()> {
        let key = self.object_key(public_id);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(mime_type)
            .body(aws_sdk_s3::primitives::ByteStream::from(data.to_vec()))
            .send()
            .await
            .context("failed to upload image to S3")?;

        debug!(public_id = %public_id, key = %key, size = data.len(), "image written to S3");
        Ok(())
    }

    async fn delete(&self, public_id: &str) -> Result<()> {
        let key = self.object_key(public_id);

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .context("failed to delete image from S3")?;

        debug!(public_id = %public_id, "image deleted from S3");
        Ok(())
    }

    async fn exists(&self, public_id: &str) -> Result<bool> {
        let key = self.object_key(public_id);

        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                if let Some(service_err) = err.as_service_error() {
                    if service_err.is_not_found() {
                        return Ok(false);
                    }
                }
                Err(err).context("failed to check S3 object existence")
            }
        }
    }

    fn public_url(&self, public_id: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.object_key(public_id)
        )
    }

    fn scheme(&self) -> &'static str {
        "s3"
    }
}

#[cfg(feature = "s3")]
impl std::fmt::Debug for S3ImageStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ImageStorage")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn local_rejects_traversal() {
        let storage = LocalImageStorage::new("/tmp/uploads", "/files");
        assert!(storage.resolve("images/abc_cat.png").is_ok());
        assert!(storage.resolve("../etc/passwd").is_err());
        assert!(storage.resolve("/etc/passwd").is_err());
        assert!(storage.resolve("images/../../x").is_err());
    }

    #[test]
    fn public_url() {
        let storage = LocalImageStorage::new("/tmp/uploads", "https://example.com/files/");
        assert_eq!(
            storage.public_url("lectern-images/abc_cat.png"),
            "https://example.com/files/lectern-images/abc_cat.png"
        );
    }

    #[tokio::test]
    async fn local_write_exists_delete() {
        let dir = std::env::temp_dir().join(format!("lectern-test-{}", uuid::Uuid::now_v7()));
        let storage = LocalImageStorage::new(&dir, "/files");

        storage
            .write("folder/one.png", b"png-bytes", "image/png")
            .await
            .unwrap();
        assert!(storage.exists("folder/one.png").await.unwrap());

        storage.delete("folder/one.png").await.unwrap();
        assert!(!storage.exists("folder/one.png").await.unwrap());

        // Deleting a missing object is fine
        storage.delete("folder/one.png").await.unwrap();

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn local_delete_surfaces_io_errors() {
        let dir = std::env::temp_dir().join(format!("lectern-test-{}", uuid::Uuid::now_v7()));
        let storage = LocalImageStorage::new(&dir, "/files");
        storage.write("plain.png", b"png-bytes", "image/png").await.unwrap();

        // A regular file used as a directory is an error, not "already gone"
        assert!(storage.delete("plain.png/child.png").await.is_err());
        assert!(storage.exists("plain.png").await.unwrap());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn memory_write_exists_delete() {
        let storage = MemoryImageStorage::default();
        storage.write("a/b.gif", b"GIF89a", "image/gif").await.unwrap();
        assert!(storage.exists("a/b.gif").await.unwrap());
        assert_eq!(storage.public_url("a/b.gif"), "memory://images/a/b.gif");
        storage.delete("a/b.gif").await.unwrap();
        assert!(storage.is_empty());
    }
}
