//! Types shared by posts and comments.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which relational table a row lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Post,
    Comment,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Post => "post",
            ContentKind::Comment => "comment",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "post" => Ok(ContentKind::Post),
            "comment" => Ok(ContentKind::Comment),
            other => anyhow::bail!("unknown content kind: {other}"),
        }
    }
}

/// A typed pointer at a post or comment row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentRef {
    pub kind: ContentKind,
    pub id: Uuid,
}

impl ContentRef {
    pub fn post(id: Uuid) -> Self {
        Self {
            kind: ContentKind::Post,
            id,
        }
    }

    pub fn comment(id: Uuid) -> Self {
        Self {
            kind: ContentKind::Comment,
            id,
        }
    }
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Reference from a row to an image in the object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Identifier used to delete the image.
    pub public_id: String,
    /// Resolved public URL.
    pub url: String,
}

impl ImageRef {
    /// Rebuild from the two nullable columns a row stores the image in.
    ///
    /// A half-populated pair is treated as no image.
    pub(crate) fn from_columns(public_id: Option<String>, url: Option<String>) -> Option<Self> {
        match (public_id, url) {
            (Some(public_id), Some(url)) => Some(Self { public_id, url }),
            _ => None,
        }
    }
}

/// Code snippet payload as the user wrote it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodePayload {
    pub content: String,
    pub language: String,
}

impl CodePayload {
    pub fn new(content: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            language: language.into(),
        }
    }
}

/// Column changes for a row update.
///
/// Outer `None` leaves the column unchanged; `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowPatch {
    pub body: Option<String>,
    pub code_ref: Option<Option<String>>,
    pub image: Option<Option<ImageRef>>,
}

impl RowPatch {
    pub fn is_empty(&self) -> bool {
        self.body.is_none() && self.code_ref.is_none() && self.image.is_none()
    }
}

/// A row as it was immediately before and after an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replaced<T> {
    pub previous: T,
    pub current: T,
}
