//! In-process code snippet repository.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;

use super::repository::{CodeRepository, CodeSnippet, NewCodeSnippet, generate_key};

/// Code snippets held in a concurrent map. Used for tests and local runs.
#[derive(Debug, Default)]
pub struct MemoryCodeRepository {
    snippets: DashMap<String, CodeSnippet>,
}

impl MemoryCodeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snippets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.snippets.contains_key(key)
    }
}

#[async_trait]
impl CodeRepository for MemoryCodeRepository {
    async fn put(&self, key: Option<&str>, snippet: NewCodeSnippet) -> Result<String> {
        let key = key.map(str::to_string).unwrap_or_else(generate_key);
        let mut stored = snippet.into_snippet(key.clone());
        if let Some(existing) = self.snippets.get(&key) {
            stored.created = existing.created;
        }
        self.snippets.insert(key.clone(), stored);
        Ok(key)
    }

    async fn get(&self, key: &str) -> Result<Option<CodeSnippet>> {
        Ok(self.snippets.get(key).map(|s| s.clone()))
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, CodeSnippet>> {
        Ok(keys
            .iter()
            .filter_map(|k| self.snippets.get(k).map(|s| (k.clone(), s.clone())))
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.snippets.remove(key);
        Ok(())
    }
}
