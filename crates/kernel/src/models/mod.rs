//! Content data model.
//!
//! Rows live in the relational store; code payloads and images live in
//! their own stores and are referenced from the row by key / public id.

pub mod actor;
pub mod comment;
pub mod content;
pub mod patch;
pub mod post;

pub use actor::{Actor, Role};
pub use comment::{Comment, NewComment, ResolvedComment};
pub use content::{CodePayload, ContentKind, ContentRef, ImageRef, Replaced, RowPatch};
pub use patch::Patch;
pub use post::{NewPost, Post, ResolvedPost};
