//! Redis-backed code snippet repository.
//!
//! Each snippet is a JSON document under `codes:<key>`.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::Client as RedisClient;
use tracing::{debug, warn};

use super::repository::{CodeRepository, CodeSnippet, NewCodeSnippet, generate_key};

/// Key namespace for snippets.
const KEY_PREFIX: &str = "codes:";

/// Code snippet repository stored in Redis.
#[derive(Clone)]
pub struct RedisCodeRepository {
    client: RedisClient,
}

impl RedisCodeRepository {
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }

    fn storage_key(key: &str) -> String {
        format!("{KEY_PREFIX}{key}")
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .context("failed to get Redis connection for code snippets")
    }
}

#[async_trait]
impl CodeRepository for RedisCodeRepository {
    async fn put(&self, key: Option<&str>, snippet: NewCodeSnippet) -> Result<String> {
        let key = key.map(str::to_string).unwrap_or_else(generate_key);
        let stored = snippet.into_snippet(key.clone());
        let json = serde_json::to_string(&stored).context("serialize code snippet")?;

        let mut conn = self.connection().await?;
        conn.set::<_, _, ()>(Self::storage_key(&key), json)
            .await
            .context("failed to write code snippet")?;

        debug!(key = %key, owner = %stored.owner, "code snippet saved");
        Ok(key)
    }

    async fn get(&self, key: &str) -> Result<Option<CodeSnippet>> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn
            .get(Self::storage_key(key))
            .await
            .context("failed to read code snippet")?;

        value
            .map(|json| serde_json::from_str(&json).context("corrupt code snippet document"))
            .transpose()
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, CodeSnippet>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let storage_keys: Vec<String> = keys.iter().map(|k| Self::storage_key(k)).collect();
        let mut conn = self.connection().await?;

        // Explicit MGET: a one-element key list must still come back as an array
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&storage_keys)
            .query_async(&mut conn)
            .await
            .context("failed to batch-read code snippets")?;

        let mut found = HashMap::with_capacity(keys.len());
        for (key, value) in keys.iter().zip(values) {
            let Some(json) = value else {
                continue;
            };
            match serde_json::from_str::<CodeSnippet>(&json) {
                Ok(snippet) => {
                    found.insert(key.clone(), snippet);
                }
                Err(e) => warn!(error = %e, key = %key, "skipping corrupt code snippet document"),
            }
        }

        debug!(requested = keys.len(), found = found.len(), "code snippets batch-read");
        Ok(found)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(Self::storage_key(key))
            .await
            .context("failed to delete code snippet")?;

        debug!(key = %key, "code snippet deleted");
        Ok(())
    }
}

impl std::fmt::Debug for RedisCodeRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCodeRepository").finish()
    }
}
