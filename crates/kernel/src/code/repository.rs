//! Repository trait and snippet types.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::ContentError;
use crate::models::{CodePayload, ContentRef};

/// Stored code snippet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSnippet {
    pub key: String,
    pub content: String,
    pub language: String,
    /// Row that references this snippet.
    pub owner: ContentRef,
    pub created_by: Uuid,
    /// Unix milliseconds.
    pub created: i64,
    /// Unix milliseconds.
    pub changed: i64,
}

impl CodeSnippet {
    pub fn payload(&self) -> CodePayload {
        CodePayload {
            content: self.content.clone(),
            language: self.language.clone(),
        }
    }
}

/// Input for writing a snippet.
#[derive(Debug, Clone)]
pub struct NewCodeSnippet {
    pub payload: CodePayload,
    pub owner: ContentRef,
    pub created_by: Uuid,
}

impl NewCodeSnippet {
    /// Build the stored form under `key`.
    pub fn into_snippet(self, key: String) -> CodeSnippet {
        let now = chrono::Utc::now().timestamp_millis();
        CodeSnippet {
            key,
            content: self.payload.content,
            language: self.payload.language,
            owner: self.owner,
            created_by: self.created_by,
            created: now,
            changed: now,
        }
    }
}

/// Document store holding code payloads.
#[async_trait]
pub trait CodeRepository: Send + Sync {
    /// Write a snippet, generating a key when none is given. Returns the key.
    async fn put(&self, key: Option<&str>, snippet: NewCodeSnippet) -> Result<String>;

    /// Fetch a snippet; `None` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<CodeSnippet>>;

    /// Fetch many snippets in one round trip. Missing keys are absent from the map.
    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, CodeSnippet>>;

    /// Delete a snippet. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Generate a fresh snippet key: `code_<unix-millis>_<7 base36 chars>`.
pub fn generate_key() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..7)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("code_{}_{suffix}", chrono::Utc::now().timestamp_millis())
}

/// Reject payloads the document store should never see.
pub fn validate_payload(payload: &CodePayload) -> Result<(), ContentError> {
    if payload.content.trim().is_empty() {
        return Err(ContentError::validation("code content must not be empty"));
    }
    if payload.language.trim().is_empty() {
        return Err(ContentError::validation("code language must not be empty"));
    }
    Ok(())
}

/// Retry policy for snippet writes.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

/// Write a snippet, retrying failed attempts with a fixed delay.
///
/// The key is fixed before the first attempt so a retry after a write that
/// landed but failed to acknowledge overwrites rather than duplicates.
pub async fn put_with_retry(
    repo: &dyn CodeRepository,
    snippet: NewCodeSnippet,
    policy: RetryPolicy,
) -> Result<String> {
    let key = generate_key();
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        match repo.put(Some(&key), snippet.clone()).await {
            Ok(key) => return Ok(key),
            Err(e) if attempt < attempts => {
                warn!(error = %e, key = %key, attempt, attempts, "code snippet write failed, retrying");
                attempt += 1;
                if !policy.delay.is_zero() {
                    tokio::time::sleep(policy.delay).await;
                }
            }
            Err(e) => {
                return Err(e.context(format!(
                    "failed to save code snippet after {attempts} attempts"
                )));
            }
        }
    }
}
