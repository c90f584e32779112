use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::errors::{RestError, Result};
use crate::storage::{
    BlobType, ObjectId, ObjectKey, ObjectStream, StorageBackend, WriteOutcome, WritePolicy,
};

/// In-memory, HashMap-based backend
///
/// Applies the same write policies and length checks as [`super::LocalBackend`]
/// so handler tests can run without touching a disk.
#[derive(Default)]
pub struct MemoryBackend {
    objects: RwLock<HashMap<ObjectKey, Bytes>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects currently stored
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn exists(&self, key: &ObjectKey) -> Result<bool> {
        Ok(self.objects.read().expect("lock poisoned").contains_key(key))
    }

    async fn read(&self, key: &ObjectKey) -> Result<Bytes> {
        self.objects
            .read()
            .expect("lock poisoned")
            .get(key)
            .cloned()
            .ok_or_else(|| RestError::NotFound(key.to_string()))
    }

    async fn write(
        &self,
        key: &ObjectKey,
        mut body: ObjectStream,
        declared: Option<u64>,
    ) -> Result<WriteOutcome> {
        if self.exists(key).await? {
            return match key.write_policy() {
                WritePolicy::Idempotent => Ok(WriteOutcome::Unchanged),
                WritePolicy::CreateOnly => Err(RestError::Conflict(key.to_string())),
            };
        }

        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(chunk) => buf.extend_from_slice(&chunk),
                Err(e) => {
                    return Err(match declared {
                        Some(declared) => RestError::LengthMismatch {
                            declared,
                            received: buf.len() as u64,
                        },
                        None => RestError::Io(e),
                    })
                }
            }
        }
        if let Some(declared) = declared {
            if buf.len() as u64 != declared {
                return Err(RestError::LengthMismatch {
                    declared,
                    received: buf.len() as u64,
                });
            }
        }

        let mut objects = self.objects.write().expect("lock poisoned");
        if objects.contains_key(key) && key.write_policy() == WritePolicy::CreateOnly {
            return Err(RestError::Conflict(key.to_string()));
        }
        objects.insert(key.clone(), buf.freeze());
        Ok(WriteOutcome::Created)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        self.objects
            .write()
            .expect("lock poisoned")
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| RestError::NotFound(key.to_string()))
    }

    async fn list(&self, kind: BlobType) -> Result<Vec<ObjectId>> {
        let mut ids: Vec<ObjectId> = self
            .objects
            .read()
            .expect("lock poisoned")
            .keys()
            .filter_map(|key| match key {
                ObjectKey::Blob(k, id) if *k == kind => Some(id.clone()),
                _ => None,
            })
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::{blob, body};

    #[tokio::test]
    async fn test_memory_backend_policies() {
        let backend = MemoryBackend::new();
        let key = blob(BlobType::Data, "aa");

        assert_eq!(
            backend.write(&key, body(b"abc", 1), Some(3)).await.unwrap(),
            WriteOutcome::Created
        );
        assert_eq!(
            backend.write(&key, body(b"abc", 1), Some(3)).await.unwrap(),
            WriteOutcome::Unchanged
        );
        assert!(matches!(
            backend.write(&blob(BlobType::Data, "bb"), body(b"ab", 1), Some(3)).await,
            Err(RestError::LengthMismatch { declared: 3, received: 2 })
        ));
        assert_eq!(backend.len(), 1);
    }
}
