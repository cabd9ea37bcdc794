//! Configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::code::RetryPolicy;
use crate::image::DEFAULT_FOLDER;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port (default: 3000).
    pub port: u16,

    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Maximum database connections in pool (default: 10).
    pub database_max_connections: u32,

    /// Redis connection URL for the code snippet store.
    pub redis_url: String,

    /// Path to uploads directory for local image storage (default: ./uploads).
    pub uploads_dir: PathBuf,

    /// Base URL for serving uploaded images (default: /files).
    pub files_url: String,

    /// Object store folder for uploaded images.
    pub image_folder: String,

    /// Attempts per code snippet write (default: 3).
    pub code_put_attempts: u32,

    /// Delay between code snippet write attempts (default: 1000 ms).
    pub code_put_retry_delay: Duration,

    /// S3 image storage. When None, images are stored under `uploads_dir`.
    pub s3: Option<S3Config>,

    /// CORS allowed origins (comma-separated, default: "*").
    pub cors_allowed_origins: Vec<String>,
}

/// S3 settings, enabled by `S3_BUCKET`.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub prefix: Option<String>,
    /// Custom endpoint for S3-compatible services.
    pub endpoint: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("PORT must be a valid u16")?;

        let database_url =
            env::var("DATABASE_URL").context("DATABASE_URL environment variable is required")?;

        let database_max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("DATABASE_MAX_CONNECTIONS must be a valid u32")?;

        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

        let uploads_dir = env::var("UPLOADS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./uploads"));

        let files_url = env::var("FILES_URL").unwrap_or_else(|_| "/files".to_string());

        let image_folder =
            env::var("IMAGE_FOLDER").unwrap_or_else(|_| DEFAULT_FOLDER.to_string());

        let code_put_attempts: u32 = env::var("CODE_PUT_ATTEMPTS")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .context("CODE_PUT_ATTEMPTS must be a valid u32")?;
        if code_put_attempts == 0 {
            anyhow::bail!("CODE_PUT_ATTEMPTS must be at least 1");
        }

        let code_put_retry_delay = env::var("CODE_PUT_RETRY_DELAY_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .map(Duration::from_millis)
            .context("CODE_PUT_RETRY_DELAY_MS must be a valid u64")?;

        let s3 = env::var("S3_BUCKET")
            .ok()
            .filter(|b| !b.trim().is_empty())
            .map(|bucket| S3Config {
                bucket,
                prefix: env::var("S3_PREFIX").ok().filter(|p| !p.is_empty()),
                endpoint: env::var("S3_ENDPOINT").ok().filter(|e| !e.is_empty()),
            });

        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_else(|_| vec!["*".to_string()]);

        Ok(Self {
            port,
            database_url,
            database_max_connections,
            redis_url,
            uploads_dir,
            files_url,
            image_folder,
            code_put_attempts,
            code_put_retry_delay,
            s3,
            cors_allowed_origins,
        })
    }

    /// Retry policy for code snippet writes.
    pub fn code_retry(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.code_put_attempts,
            delay: self.code_put_retry_delay,
        }
    }
}
