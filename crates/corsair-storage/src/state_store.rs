//! The key/value storage state with toggleable disk persistence.

use crate::{Error, Result};
use rand::RngCore as _;
use serde_json::{Map, Value};
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A flat string-to-JSON map, optionally mirrored to a snapshot file.
///
/// Merge semantics of [`set_state`](StateStore::set_state): top-level keys
/// overwrite, a JSON `null` deletes the key. While durability is enabled
/// every mutation rewrites the snapshot through an atomic temp-file rename.
pub struct StateStore {
    state: Map<String, Value>,
    path: Option<PathBuf>,
    save_to_disk: bool,
}

impl StateStore {
    /// Open a store.
    ///
    /// With `Some(path)`, an existing snapshot is loaded and durability
    /// stays enabled; a missing file starts empty with durability off until
    /// [`set_save_to_disk`](StateStore::set_save_to_disk) enables it.
    /// `None` is a RAM-only store.
    pub fn open(path: Option<PathBuf>) -> Result<Self> {
        let mut store = Self {
            state: Map::new(),
            save_to_disk: false,
            path,
        };
        if let Some(path) = store.path.clone() {
            if path.exists() {
                store.state = load_snapshot(&path)?;
                store.save_to_disk = true;
                debug!(keys = store.state.len(), path = %path.display(), "loaded storage snapshot");
            }
        }
        Ok(store)
    }

    /// An in-memory store, never persisted.
    pub fn in_memory() -> Self {
        Self {
            state: Map::new(),
            path: None,
            save_to_disk: false,
        }
    }

    /// Look up a key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    /// Whether a key is present.
    pub fn has(&self, key: &str) -> bool {
        self.state.contains_key(key)
    }

    /// Whether the store holds no keys at all.
    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    /// The current key set.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.state.keys().map(String::as_str)
    }

    /// Merge-overwrite `partial` into the state.
    ///
    /// A `null` value deletes the key. No-op entries still trigger a
    /// snapshot rewrite; callers coalesce writes at their own level.
    pub fn set_state(&mut self, partial: Map<String, Value>) -> Result<()> {
        for (key, value) in partial {
            if value.is_null() {
                self.state.remove(&key);
            } else {
                self.state.insert(key, value);
            }
        }
        self.flush()
    }

    /// Toggle durability.
    ///
    /// Enabling writes the snapshot immediately; disabling removes the
    /// on-disk file and keeps serving from RAM.
    pub fn set_save_to_disk(&mut self, save: bool) -> Result<()> {
        if save == self.save_to_disk {
            return Ok(());
        }
        self.save_to_disk = save;
        match (&self.path, save) {
            (Some(_), true) => self.flush(),
            (Some(path), false) => {
                if path.exists() {
                    fs::remove_file(path)?;
                    debug!(path = %path.display(), "removed storage snapshot");
                }
                Ok(())
            }
            (None, _) => Ok(()),
        }
    }

    /// Whether mutations are currently mirrored to disk.
    pub fn save_to_disk(&self) -> bool {
        self.save_to_disk
    }

    /// Drop every key (and the snapshot, when durable).
    pub fn clear(&mut self) -> Result<()> {
        self.state.clear();
        self.flush()
    }

    fn flush(&self) -> Result<()> {
        let (Some(path), true) = (&self.path, self.save_to_disk) else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(&Value::Object(self.state.clone()))?;
        write_atomic(path, &bytes)
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("keys", &self.state.keys().collect::<Vec<_>>())
            .field("path", &self.path)
            .field("save_to_disk", &self.save_to_disk)
            .finish()
    }
}

fn load_snapshot(path: &Path) -> Result<Map<String, Value>> {
    let bytes = fs::read(path)?;
    match serde_json::from_slice::<Value>(&bytes)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::InvalidSnapshot(format!(
            "expected a JSON object, got {other:?}"
        ))),
    }
}

/// Write through a same-directory temp file and rename over the target.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let mut suffix = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut suffix);
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("state");
    let tmp = parent.join(format!(".{file_name}.tmp.{}", hex::encode(suffix)));

    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}
