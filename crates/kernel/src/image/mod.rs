//! Image asset repository.
//!
//! Images live in an object store and are referenced from rows by public id.

pub mod service;
pub mod storage;

pub use service::{
    ALLOWED_IMAGE_TYPES, DEFAULT_FOLDER, ImageAsset, ImageRepository, ImageService, ImageUpload,
    MAX_IMAGE_SIZE, validate_image,
};
pub use storage::{ImageStorage, LocalImageStorage, MemoryImageStorage};

#[cfg(feature = "s3")]
pub use storage::S3ImageStorage;
