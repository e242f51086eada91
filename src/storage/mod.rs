//! Photo storage collaborator. The core only ever holds the opaque reference
//! returned by [`ObjectStorage::put`].

pub mod local;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::AppError;

pub use local::LocalObjectStorage;

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Stores `bytes` and returns a reference to them.
    async fn put(&self, bytes: Vec<u8>, content_type: &str) -> Result<String, AppError>;

    /// Time-limited URL for an existing reference.
    async fn presigned_url(&self, reference: &str, ttl: Duration) -> Result<String, AppError>;

    /// Resolves the token embedded in a presigned URL.
    async fn open(&self, token: &str) -> Result<StoredObject, AppError>;
}
