//! Storage backend abstraction layer
//!
//! Objects are addressed by an [`ObjectKey`]: either the repository's single
//! config object or a blob of one of the [`BlobType`] collections. Handlers
//! talk to storage only through the [`StorageBackend`] trait, so the on-disk
//! implementation can be swapped for an in-memory fake in tests.

mod local;
#[cfg(test)]
mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::Config;
use crate::errors::{RestError, Result};

pub use local::LocalBackend;
#[cfg(test)]
pub use memory::MemoryBackend;

/// Longest id accepted from a client
pub const MAX_ID_LEN: usize = 128;

/// Request body handed to [`StorageBackend::write`]
pub type ObjectStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Object collections addressable by id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlobType {
    Data,
    Index,
    Keys,
    Locks,
    Snapshots,
}

impl BlobType {
    pub const ALL: [BlobType; 5] = [
        BlobType::Data,
        BlobType::Index,
        BlobType::Keys,
        BlobType::Locks,
        BlobType::Snapshots,
    ];

    /// Directory name under the repository root
    pub fn dir_name(self) -> &'static str {
        match self {
            BlobType::Data => "data",
            BlobType::Index => "index",
            BlobType::Keys => "keys",
            BlobType::Locks => "locks",
            BlobType::Snapshots => "snapshots",
        }
    }

    /// Content-addressed types treat a repeated upload of the same id as a no-op
    pub fn is_content_addressed(self) -> bool {
        !matches!(self, BlobType::Locks)
    }
}

impl fmt::Display for BlobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for BlobType {
    type Err = RestError;

    fn from_str(s: &str) -> Result<Self> {
        BlobType::ALL
            .into_iter()
            .find(|t| t.dir_name() == s)
            .ok_or_else(|| RestError::NotFound(format!("unknown type {:?}", s)))
    }
}

/// Client-supplied object identifier
///
/// Only lowercase hexadecimal strings of 1 to [`MAX_ID_LEN`] characters are
/// accepted, which rules out separators, dots and every other way of
/// escaping the type directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(String);

impl ObjectId {
    pub fn parse(raw: &str) -> Result<Self> {
        let valid = !raw.is_empty()
            && raw.len() <= MAX_ID_LEN
            && raw.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if !valid {
            return Err(RestError::InvalidId(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address of a single stored object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectKey {
    Config,
    Blob(BlobType, ObjectId),
}

impl ObjectKey {
    /// What a write does when the object is already present
    pub fn write_policy(&self) -> WritePolicy {
        match self {
            ObjectKey::Blob(kind, _) if kind.is_content_addressed() => WritePolicy::Idempotent,
            _ => WritePolicy::CreateOnly,
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKey::Config => f.write_str("config"),
            ObjectKey::Blob(kind, id) => write!(f, "{}/{}", kind, id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    /// Existing object wins; the upload reports `Unchanged`
    Idempotent,
    /// Existing object is a `Conflict`
    CreateOnly,
}

/// Successful result of a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Unchanged,
}

impl WriteOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            WriteOutcome::Created => "created",
            WriteOutcome::Unchanged => "unchanged",
        }
    }
}

/// Storage backend trait for repository object operations
///
/// Every operation is individually atomic: readers observe an object either
/// fully committed or not at all, never partially written.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Check whether the object is committed
    async fn exists(&self, key: &ObjectKey) -> Result<bool>;

    /// Read the full object content
    async fn read(&self, key: &ObjectKey) -> Result<Bytes>;

    /// Store `body`, checking it against `declared` bytes when known
    async fn write(
        &self,
        key: &ObjectKey,
        body: ObjectStream,
        declared: Option<u64>,
    ) -> Result<WriteOutcome>;

    /// Remove the object
    async fn delete(&self, key: &ObjectKey) -> Result<()>;

    /// Ids currently committed under `kind`, sorted
    async fn list(&self, kind: BlobType) -> Result<Vec<ObjectId>>;
}

/// Open the filesystem backend rooted at the configured repository path
pub async fn create_backend(config: &Config) -> Result<Arc<dyn StorageBackend>> {
    let backend = LocalBackend::open(&config.repository.path).await?;
    Ok(Arc::new(backend))
}
