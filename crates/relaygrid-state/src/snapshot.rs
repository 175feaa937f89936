//! SnapshotStore — whole-file JSON persistence.
//!
//! A store is bound to one file. `load` returns `None` when the file does
//! not exist; `save` serializes the full value and atomically replaces the
//! file. Saves through clones of one store are serialized, so concurrent
//! writers never share the temp file. The in-memory variant keeps the last saved document in a buffer
//! (for testing).

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

#[derive(Clone)]
enum Backend {
    File(PathBuf),
    Memory(Arc<Mutex<Option<Vec<u8>>>>),
}

/// Thread-safe snapshot file handle.
#[derive(Clone)]
pub struct SnapshotStore {
    backend: Backend,
    save_lock: Arc<Mutex<()>>,
}

impl SnapshotStore {
    /// Bind a store to the given file path. The file need not exist yet.
    pub fn open(path: &Path) -> Self {
        Self {
            backend: Backend::File(path.to_path_buf()),
            save_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(Arc::new(Mutex::new(None))),
            save_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Path of the backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        match &self.backend {
            Backend::File(path) => Some(path),
            Backend::Memory(_) => None,
        }
    }

    /// Load the snapshot. A missing file yields `Ok(None)`.
    pub fn load<T: DeserializeOwned>(&self) -> StateResult<Option<T>> {
        let bytes = match &self.backend {
            Backend::File(path) => match std::fs::read(path) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(?path, "no snapshot on disk");
                    return Ok(None);
                }
                Err(e) => return Err(StateError::Read(format!("{}: {e}", path.display()))),
            },
            Backend::Memory(buf) => match buf.lock().expect("snapshot lock").clone() {
                Some(bytes) => bytes,
                None => return Ok(None),
            },
        };

        let value = serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?;
        Ok(Some(value))
    }

    /// Serialize `value` and replace the snapshot with it.
    pub fn save<T: Serialize + ?Sized>(&self, value: &T) -> StateResult<()> {
        let _guard = self.save_lock.lock().expect("snapshot save lock");
        self.write(value)
    }

    /// Take a snapshot with `snapshot` and save it, both under the save lock.
    ///
    /// Writers that capture their state inside the closure are persisted in
    /// the order they captured it, so an older snapshot never overwrites a
    /// newer one.
    pub fn save_with<T, F>(&self, snapshot: F) -> StateResult<()>
    where
        T: Serialize,
        F: FnOnce() -> T,
    {
        let _guard = self.save_lock.lock().expect("snapshot save lock");
        let value = snapshot();
        self.write(&value)
    }

    fn write<T: Serialize + ?Sized>(&self, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec_pretty(value).map_err(map_err!(Serialize))?;
        match &self.backend {
            Backend::File(path) => {
                if let Some(parent) = path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    std::fs::create_dir_all(parent).map_err(map_err!(Write))?;
                }
                let tmp = tmp_path(path);
                std::fs::write(&tmp, &bytes).map_err(map_err!(Write))?;
                std::fs::rename(&tmp, path).map_err(map_err!(Write))?;
                debug!(?path, bytes = bytes.len(), "snapshot written");
            }
            Backend::Memory(buf) => {
                *buf.lock().expect("snapshot lock") = Some(bytes);
            }
        }
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
