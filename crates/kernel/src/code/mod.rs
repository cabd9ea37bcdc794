//! Code snippet repository.
//!
//! Code payloads are kept out of the relational row in a document store,
//! keyed by an opaque string the row holds in `code_ref`.

pub mod memory;
pub mod redis_store;
pub mod repository;

pub use memory::MemoryCodeRepository;
pub use redis_store::RedisCodeRepository;
pub use repository::{
    CodeRepository, CodeSnippet, NewCodeSnippet, RetryPolicy, generate_key, put_with_retry,
    validate_payload,
};
