//! One-JSON-file-per-item checkpoint directories.
//!
//! A checkpoint file exists only if the stage that writes it fully
//! succeeded for that item, so its presence is the one and only skip signal.
//! Files are written to a hidden temporary sibling first and renamed into
//! place, which keeps a half-written file from ever carrying the final name.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{Result, StudyDeckError};

const EXTENSION: &str = "json";

/// One checkpoint file found in a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// File stem.
    pub id: String,
    pub path: PathBuf,
}

/// A directory of `<id>.json` checkpoint files.
#[derive(Debug, Clone)]
pub struct CheckpointDir {
    root: PathBuf,
}

impl CheckpointDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the checkpoint for `id`, whether or not it exists.
    pub fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.{}", id, EXTENSION))
    }

    /// Whether the checkpoint for `id` has been committed.
    pub fn exists(&self, id: &str) -> bool {
        self.path_for(id).is_file()
    }

    /// Serializes `value` as pretty JSON and commits it under `id`.
    ///
    /// The directory is created on demand.
    pub fn write<T: Serialize>(&self, id: &str, value: &T) -> Result<PathBuf> {
        fs::create_dir_all(&self.root)?;

        let final_path = self.path_for(id);
        let tmp_path = self.root.join(format!(".{}.{}.tmp", id, EXTENSION));

        let json = serde_json::to_string_pretty(value)?;
        fs::write(&tmp_path, json)?;
        if let Err(e) = fs::rename(&tmp_path, &final_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        Ok(final_path)
    }

    /// Reads and deserializes the checkpoint for `id`.
    pub fn read<T: DeserializeOwned>(&self, id: &str) -> Result<T> {
        read_json(&self.path_for(id))
    }

    /// All committed checkpoints, sorted by id.
    ///
    /// Hidden files (including in-flight temporaries) and non-JSON files are
    /// ignored. A missing directory is an empty worklist.
    pub fn list(&self) -> Result<Vec<WorkItem>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut items = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if id.starts_with('.') {
                continue;
            }
            items.push(WorkItem { id: id.to_string(), path: path.clone() });
        }

        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(items)
    }

    /// Moves the checkpoint for `id` into `dest`, keeping its file name.
    pub fn relocate(&self, id: &str, dest: &Path) -> Result<PathBuf> {
        let from = self.path_for(id);
        if !from.exists() {
            return Err(StudyDeckError::FileNotFound(from));
        }

        fs::create_dir_all(dest)?;
        let to = dest.join(from.file_name().unwrap_or_default());
        fs::rename(&from, &to)?;
        Ok(to)
    }
}

/// Reads and deserializes a JSON file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(StudyDeckError::FileNotFound(path.to_path_buf()));
    }
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}
