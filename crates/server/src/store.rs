// Durable snapshot storage: room key -> full document state blob.
//
// Snapshots are overwritten wholesale on each flush; there is no
// versioning or update log. The `Dir` variant stores one file per room
// under the data directory, named by the SHA-256 of the room key so
// arbitrary slugs never touch path semantics. Writes go through a temp
// file, fsync, and an atomic rename. The `Memory` variant backs tests
// and counts writes.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

const SNAPSHOT_FILE_EXT: &str = "snap";

#[derive(Debug, Clone)]
pub enum SnapshotStore {
    Dir(PathBuf),
    Memory(Arc<Mutex<MemoryStore>>),
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: HashMap<String, Vec<u8>>,
    write_count: u64,
    fail_reads: bool,
}

impl SnapshotStore {
    /// Open (creating if needed) a directory-backed store.
    pub fn open_dir(data_dir: impl AsRef<Path>) -> Result<Self> {
        let snapshots_dir = data_dir.as_ref().join("snapshots");
        fs::create_dir_all(&snapshots_dir).with_context(|| {
            format!("failed to create snapshots directory `{}`", snapshots_dir.display())
        })?;
        Ok(Self::Dir(snapshots_dir))
    }

    pub fn in_memory() -> Self {
        Self::Memory(Arc::new(Mutex::new(MemoryStore::default())))
    }

    /// Load the last persisted snapshot for a room, if any.
    pub fn load(&self, room_key: &str) -> Result<Option<Vec<u8>>> {
        match self {
            Self::Dir(snapshots_dir) => {
                let path = snapshot_path(snapshots_dir, room_key);
                if !path.exists() {
                    return Ok(None);
                }
                let mut file = OpenOptions::new()
                    .read(true)
                    .open(&path)
                    .with_context(|| format!("failed to open snapshot `{}`", path.display()))?;
                let mut payload = Vec::new();
                file.read_to_end(&mut payload)
                    .with_context(|| format!("failed to read snapshot `{}`", path.display()))?;
                Ok(Some(payload))
            }
            Self::Memory(store) => {
                let guard = store.lock().unwrap_or_else(PoisonError::into_inner);
                if guard.fail_reads {
                    anyhow::bail!("snapshot read failure injected for test");
                }
                Ok(guard.blobs.get(room_key).cloned())
            }
        }
    }

    /// Persist a full snapshot for a room, replacing any previous one.
    pub fn save(&self, room_key: &str, payload: &[u8]) -> Result<()> {
        match self {
            Self::Dir(snapshots_dir) => {
                let target_path = snapshot_path(snapshots_dir, room_key);
                let tmp_path = target_path.with_extension("tmp");

                let mut file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&tmp_path)
                    .with_context(|| {
                        format!("failed to open temp snapshot `{}`", tmp_path.display())
                    })?;
                file.write_all(payload).context("failed to write snapshot payload")?;
                file.sync_data().context("failed to fsync snapshot file")?;
                drop(file);

                fs::rename(&tmp_path, &target_path).with_context(|| {
                    format!(
                        "failed to atomically move snapshot `{}` to `{}`",
                        tmp_path.display(),
                        target_path.display()
                    )
                })?;
                Ok(())
            }
            Self::Memory(store) => {
                let mut guard = store.lock().unwrap_or_else(PoisonError::into_inner);
                guard.blobs.insert(room_key.to_owned(), payload.to_vec());
                guard.write_count += 1;
                Ok(())
            }
        }
    }

    /// Number of completed writes. Only meaningful for `Memory`.
    pub fn write_count(&self) -> u64 {
        match self {
            Self::Dir(_) => 0,
            Self::Memory(store) => {
                store.lock().unwrap_or_else(PoisonError::into_inner).write_count
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn fail_reads_for_tests(&self) {
        if let Self::Memory(store) = self {
            store.lock().unwrap_or_else(PoisonError::into_inner).fail_reads = true;
        }
    }
}

fn snapshot_path(snapshots_dir: &Path, room_key: &str) -> PathBuf {
    let digest = Sha256::digest(room_key.as_bytes());
    let mut name = String::with_capacity(digest.len() * 2);
    for byte in digest {
        name.push_str(&format!("{byte:02x}"));
    }
    snapshots_dir.join(name).with_extension(SNAPSHOT_FILE_EXT)
}
