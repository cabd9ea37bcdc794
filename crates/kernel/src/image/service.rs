//! Image asset service.
//!
//! Validates size and type, assigns a public id, and writes to the
//! configured storage backend.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use super::storage::ImageStorage;
use crate::error::ContentError;
use crate::models::ImageRef;

/// Maximum image size (5 MB).
pub const MAX_IMAGE_SIZE: usize = 5 * 1024 * 1024;

/// Allowed MIME types for upload.
pub const ALLOWED_IMAGE_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif"];

/// Default folder for uploaded images.
pub const DEFAULT_FOLDER: &str = "lectern-images";

/// An image as received from the client.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    /// Declared MIME type.
    pub mime_type: String,
    pub filename: String,
    pub folder: String,
}

/// A stored image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageAsset {
    pub public_id: String,
    pub url: String,
}

impl From<ImageAsset> for ImageRef {
    fn from(asset: ImageAsset) -> Self {
        ImageRef {
            public_id: asset.public_id,
            url: asset.url,
        }
    }
}

/// Object store holding images.
#[async_trait]
pub trait ImageRepository: Send + Sync {
    /// Validate and store an image.
    async fn upload(&self, upload: ImageUpload) -> Result<ImageAsset>;

    /// Delete an image by public id. Deleting a missing image is not an error.
    async fn delete(&self, public_id: &str) -> Result<()>;

    /// Whether an image with this public id exists.
    async fn exists(&self, public_id: &str) -> Result<bool>;
}

/// Check an image against the size limit and type allow-list.
///
/// Both the declared type and the type sniffed from the bytes must be
/// allowed, so a renamed executable is rejected even when declared as PNG.
pub fn validate_image(bytes: &[u8], declared_mime: &str) -> Result<(), ContentError> {
    if bytes.is_empty() {
        return Err(ContentError::validation("image is empty"));
    }

    if bytes.len() > MAX_IMAGE_SIZE {
        return Err(ContentError::validation(format!(
            "image too large: {} bytes (max {MAX_IMAGE_SIZE} bytes)",
            bytes.len()
        )));
    }

    let declared = declared_mime.trim().to_ascii_lowercase();
    if !ALLOWED_IMAGE_TYPES.contains(&declared.as_str()) {
        return Err(ContentError::validation(format!(
            "image type not allowed: {declared_mime}"
        )));
    }

    match infer::get(bytes).map(|kind| kind.mime_type()) {
        Some(sniffed) if ALLOWED_IMAGE_TYPES.contains(&sniffed) => Ok(()),
        Some(sniffed) => Err(ContentError::validation(format!(
            "image content is {sniffed}, not an allowed image type"
        ))),
        None => Err(ContentError::validation(
            "image content is not a recognised image type",
        )),
    }
}

/// Image service backed by a storage backend.
pub struct ImageService {
    storage: Arc<dyn ImageStorage>,
}

impl ImageService {
    /// Create a new image service.
    pub fn new(storage: Arc<dyn ImageStorage>) -> Self {
        Self { storage }
    }

    /// Get the storage backend.
    pub fn storage(&self) -> &Arc<dyn ImageStorage> {
        &self.storage
    }
}

#[async_trait]
impl ImageRepository for ImageService {
    async fn upload(&self, upload: ImageUpload) -> Result<ImageAsset> {
        validate_image(&upload.bytes, &upload.mime_type)?;

        let public_id = generate_public_id(&upload.folder, &upload.filename);
        self.storage
            .write(&public_id, &upload.bytes, &upload.mime_type)
            .await
            .context("failed to write image to storage")?;

        let url = self.storage.public_url(&public_id);
        debug!(
            public_id = %public_id,
            scheme = self.storage.scheme(),
            size = upload.bytes.len(),
            "image uploaded"
        );

        Ok(ImageAsset { public_id, url })
    }

    async fn delete(&self, public_id: &str) -> Result<()> {
        self.storage.delete(public_id).await
    }

    async fn exists(&self, public_id: &str) -> Result<bool> {
        self.storage.exists(public_id).await
    }
}

impl std::fmt::Debug for ImageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageService")
            .field("scheme", &self.storage.scheme())
            .finish()
    }
}

/// Build `<folder>/<uuid>_<sanitized filename>`. The folder may be nested.
fn generate_public_id(folder: &str, filename: &str) -> String {
    let folder = folder
        .split('/')
        .map(sanitize_segment)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    let folder = if folder.is_empty() {
        DEFAULT_FOLDER.to_string()
    } else {
        folder
    };
    let unique_id = Uuid::now_v7().simple().to_string();
    format!("{folder}/{unique_id}_{}", sanitize_filename(filename))
}

fn sanitize_segment(segment: &str) -> String {
    segment
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .take(64)
        .collect()
}

/// Sanitize a filename for safe storage.
pub(crate) fn sanitize_filename(filename: &str) -> String {
    use std::path::Path;

    let name = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(filename);

    let safe: String = name
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .take(200)
        .collect();

    if safe.trim_matches('.').is_empty() {
        "image".to_string()
    } else {
        safe
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::image::MemoryImageStorage;

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
    const GIF: &[u8] = b"GIF89a\x01\x00\x01\x00";
    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10, b'J', b'F', b'I', b'F'];

    #[test]
    fn accepts_allowed_types() {
        assert!(validate_image(PNG, "image/png").is_ok());
        assert!(validate_image(GIF, "image/gif").is_ok());
        assert!(validate_image(JPEG, "IMAGE/JPEG").is_ok());
    }

    #[test]
    fn rejects_forbidden_declared_type() {
        assert!(matches!(
            validate_image(PNG, "image/webp"),
            Err(ContentError::Validation(_))
        ));
    }

    #[test]
    fn rejects_content_that_is_not_an_image() {
        let pdf = b"%PDF-1.7 not an image";
        assert!(matches!(
            validate_image(pdf, "image/png"),
            Err(ContentError::Validation(_))
        ));
        assert!(validate_image(b"plain text", "image/png").is_err());
    }

    #[test]
    fn rejects_oversized_and_empty() {
        let mut big = PNG.to_vec();
        big.resize(MAX_IMAGE_SIZE + 1, 0);
        assert!(validate_image(&big, "image/png").is_err());

        let mut at_limit = PNG.to_vec();
        at_limit.resize(MAX_IMAGE_SIZE, 0);
        assert!(validate_image(&at_limit, "image/png").is_ok());

        assert!(validate_image(&[], "image/png").is_err());
    }

    #[test]
    fn sanitize() {
        assert_eq!(sanitize_filename("cat photo.png"), "cat_photo.png");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename(".."), "image");
    }

    #[test]
    fn public_ids_live_in_folder() {
        let id = generate_public_id("posts", "cat.png");
        assert!(id.starts_with("posts/"));
        assert!(id.ends_with("_cat.png"));

        let nested = generate_public_id("lectern-images/comments/", "cat.png");
        assert!(nested.starts_with("lectern-images/comments/"));
        assert_eq!(nested.matches('/').count(), 2);

        let fallback = generate_public_id("../", "cat.png");
        assert!(fallback.starts_with(&format!("{DEFAULT_FOLDER}/")));
    }

    #[tokio::test]
    async fn upload_and_delete() {
        let service = ImageService::new(Arc::new(MemoryImageStorage::default()));
        let asset = service
            .upload(ImageUpload {
                bytes: PNG.to_vec(),
                mime_type: "image/png".to_string(),
                filename: "diagram.png".to_string(),
                folder: DEFAULT_FOLDER.to_string(),
            })
            .await
            .unwrap();

        assert!(asset.url.ends_with(&asset.public_id));
        assert!(service.exists(&asset.public_id).await.unwrap());

        service.delete(&asset.public_id).await.unwrap();
        assert!(!service.exists(&asset.public_id).await.unwrap());
    }

    #[tokio::test]
    async fn upload_rejects_invalid_image() {
        let service = ImageService::new(Arc::new(MemoryImageStorage::default()));
        let result = service
            .upload(ImageUpload {
                bytes: b"#!/bin/sh".to_vec(),
                mime_type: "image/png".to_string(),
                filename: "x.png".to_string(),
                folder: DEFAULT_FOLDER.to_string(),
            })
            .await;
        assert!(result.is_err());
    }
}
