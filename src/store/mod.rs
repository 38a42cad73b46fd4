//! Durable document storage.
//!
//! The orchestration layer only needs get/put/delete/list-by-prefix from
//! its backing store. [`KeyValueStore`] captures that capability;
//! [`DocumentStore`] layers JSON documents keyed `{prefix}/{id}{extension}`
//! on top of it.

mod documents;
mod fs;
mod memory;

use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

pub use documents::DocumentStore;
pub use fs::FsStore;
pub use memory::MemoryStore;

/// Errors raised by a [`KeyValueStore`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StoreError {
    /// Raised when the key cannot be mapped onto the backing medium.
    #[error("invalid key {key}: {message}")]
    InvalidKey {
        /// Offending key.
        key: String,
        /// Why the key was rejected.
        message: String,
    },
    /// Raised when the backing medium fails.
    #[error("failed to access {key}: {message}")]
    Io {
        /// Key being accessed.
        key: String,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a document cannot be encoded or decoded.
    #[error("failed to encode or decode {key}: {message}")]
    Codec {
        /// Key of the document.
        key: String,
        /// Serializer message.
        message: String,
    },
}

/// Future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Durable object storage.
pub trait KeyValueStore: Send + Sync {
    /// Reads a value; `None` when the key is absent.
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>>;

    /// Writes a value, replacing any previous one.
    fn put<'a>(&'a self, key: &'a str, value: Vec<u8>) -> StoreFuture<'a, ()>;

    /// Removes a value. Removing an absent key succeeds.
    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()>;

    /// Lists every key starting with `prefix`, in no particular order.
    fn list_keys<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, Vec<String>>;
}

/// Entity persisted as one JSON document.
pub trait Document: Serialize + DeserializeOwned + Send + Sync {
    /// Key prefix shared by every document of this type.
    const PREFIX: &'static str;

    /// Id the document is keyed by.
    fn document_id(&self) -> &str;
}

#[cfg(test)]
mod tests;
