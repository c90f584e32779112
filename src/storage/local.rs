//! Filesystem storage backend
//!
//! Layout under the repository root:
//!
//! ```text
//! config
//! data/  index/  keys/  locks/  snapshots/
//! tmp/
//! ```
//!
//! Uploads are staged under `tmp/`, fsynced, then committed into their type
//! directory in a single filesystem operation. Content-addressed blobs are
//! committed with `rename` (last writer wins, both writers carry the same
//! bytes). Create-only objects (config, locks) are committed with
//! `hard_link`, which fails atomically when the destination already exists.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::errors::{RestError, Result};
use crate::storage::{
    BlobType, ObjectId, ObjectKey, ObjectStream, StorageBackend, WriteOutcome, WritePolicy,
};

const TMP_DIR: &str = "tmp";
const CONFIG_FILE: &str = "config";

/// Repository stored as plain files under a root directory
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Open the repository at `root`, creating missing directories
    ///
    /// Files left in `tmp/` by an interrupted upload are removed; they were
    /// never committed and no reader can reach them.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let dirs = BlobType::ALL
            .iter()
            .map(|kind| kind.dir_name())
            .chain(std::iter::once(TMP_DIR));
        for dir in dirs {
            create_private_dir(&root.join(dir)).await?;
        }

        let backend = Self { root };
        backend.sweep_tmp().await?;
        info!(root = %backend.root().display(), "Repository opened");
        Ok(backend)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tmp_dir(&self) -> PathBuf {
        self.root.join(TMP_DIR)
    }

    fn type_dir(&self, kind: BlobType) -> PathBuf {
        self.root.join(kind.dir_name())
    }

    fn path_for(&self, key: &ObjectKey) -> PathBuf {
        match key {
            ObjectKey::Config => self.root.join(CONFIG_FILE),
            ObjectKey::Blob(kind, id) => self.type_dir(*kind).join(id.as_str()),
        }
    }

    async fn sweep_tmp(&self) -> Result<()> {
        let mut entries = fs::read_dir(self.tmp_dir()).await?;
        let mut removed = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "Removed stale temporary files");
        }
        Ok(())
    }
}

#[cfg(unix)]
async fn create_private_dir(path: &Path) -> Result<()> {
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(path)
        .await?;
    Ok(())
}

#[cfg(not(unix))]
async fn create_private_dir(path: &Path) -> Result<()> {
    fs::DirBuilder::new().recursive(true).create(path).await?;
    Ok(())
}

/// Persist the directory entry of a freshly committed file
#[cfg(unix)]
async fn sync_dir(dir: &Path) {
    let synced = match File::open(dir).await {
        Ok(handle) => handle.sync_all().await,
        Err(e) => Err(e),
    };
    if let Err(e) = synced {
        warn!(dir = %dir.display(), error = %e, "Directory fsync failed");
    }
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) {}

/// Temporary upload file, removed on drop unless committed
struct StagedFile {
    path: PathBuf,
    committed: bool,
}

impl StagedFile {
    async fn create(tmp_dir: &Path) -> Result<(Self, File)> {
        let path = tmp_dir.join(uuid::Uuid::new_v4().simple().to_string());
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        Ok((
            Self {
                path,
                committed: false,
            },
            file,
        ))
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        // Drop cannot await; a single unlink runs inline on the worker
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove temporary file");
            }
        }
    }
}

/// Copy `body` into `file`, enforcing the declared length
async fn receive(file: &mut File, mut body: ObjectStream, declared: Option<u64>) -> Result<u64> {
    let mut received = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(received, error = %e, "Request body ended early");
                return Err(match declared {
                    Some(declared) => RestError::LengthMismatch { declared, received },
                    None => RestError::Io(e),
                });
            }
        };
        received += chunk.len() as u64;
        if let Some(declared) = declared {
            if received > declared {
                return Err(RestError::LengthMismatch { declared, received });
            }
        }
        file.write_all(&chunk).await?;
    }

    if let Some(declared) = declared {
        if received != declared {
            return Err(RestError::LengthMismatch { declared, received });
        }
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok(received)
}

#[async_trait]
impl StorageBackend for LocalBackend {
    async fn exists(&self, key: &ObjectKey) -> Result<bool> {
        Ok(fs::try_exists(self.path_for(key)).await?)
    }

    async fn read(&self, key: &ObjectKey) -> Result<Bytes> {
        match fs::read(self.path_for(key)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(RestError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(
        &self,
        key: &ObjectKey,
        body: ObjectStream,
        declared: Option<u64>,
    ) -> Result<WriteOutcome> {
        let dest = self.path_for(key);
        let policy = key.write_policy();

        if fs::try_exists(&dest).await? {
            return match policy {
                WritePolicy::Idempotent => {
                    debug!(key = %key, "Object already present");
                    Ok(WriteOutcome::Unchanged)
                }
                WritePolicy::CreateOnly => Err(RestError::Conflict(key.to_string())),
            };
        }

        let (staged, mut file) = StagedFile::create(&self.tmp_dir()).await?;
        let size = receive(&mut file, body, declared).await?;
        drop(file);

        match policy {
            WritePolicy::Idempotent => {
                fs::rename(staged.path(), &dest).await?;
                staged.commit();
            }
            WritePolicy::CreateOnly => match fs::hard_link(staged.path(), &dest).await {
                // the tmp name is unlinked when `staged` drops
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    return Err(RestError::Conflict(key.to_string()));
                }
                Err(e) => return Err(e.into()),
            },
        }

        if let Some(parent) = dest.parent() {
            sync_dir(parent).await;
        }
        debug!(key = %key, size, "Object committed");
        Ok(WriteOutcome::Created)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(RestError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, kind: BlobType) -> Result<Vec<ObjectId>> {
        let mut entries = fs::read_dir(self.type_dir(kind)).await?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name();
            match name.to_str().map(ObjectId::parse) {
                Some(Ok(id)) => ids.push(id),
                _ => debug!(kind = %kind, name = ?name, "Skipping foreign file"),
            }
        }
        ids.sort();
        Ok(ids)
    }
}
