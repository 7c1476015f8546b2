//! On-disk snapshot store
//!
//! Writes encoded snapshots atomically (tmp file, fsync, rename) and loads
//! the newest one by its embedded creation timestamp.

use matching_engine::snapshot::EngineSnapshot;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::codec::{self, CodecError};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("no snapshots found")]
    NoSnapshots,
}

/// Directory-backed snapshot store.
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Encode and write a snapshot atomically. Returns the final path.
    pub fn write(&self, snapshot: &EngineSnapshot) -> Result<PathBuf, StoreError> {
        fs::create_dir_all(&self.dir)?;

        let data = codec::encode(snapshot)?;
        let filename = format!("snapshot-{:020}.snap", snapshot.created_at);
        let path = self.dir.join(&filename);
        let tmp_path = self.dir.join(format!("{}.tmp", filename));

        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;

        info!(path = %path.display(), books = snapshot.books.len(), "snapshot written");
        Ok(path)
    }

    /// Load and decode one snapshot file.
    pub fn load(&self, path: &Path) -> Result<EngineSnapshot, StoreError> {
        let mut file = File::open(path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(codec::decode(&data)?)
    }

    /// Load the snapshot with the highest creation timestamp.
    pub fn load_latest(&self) -> Result<EngineSnapshot, StoreError> {
        let (_, path) = self
            .list()?
            .into_iter()
            .next_back()
            .ok_or(StoreError::NoSnapshots)?;
        self.load(&path)
    }

    /// All snapshots as (created_at, path), oldest first.
    pub fn list(&self) -> Result<Vec<(i64, PathBuf)>, StoreError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(created_at) = Self::parse_created_at(&name) {
                snapshots.push((created_at, entry.path()));
            }
        }
        snapshots.sort_by_key(|(created_at, _)| *created_at);
        Ok(snapshots)
    }

    fn parse_created_at(filename: &str) -> Option<i64> {
        filename
            .strip_prefix("snapshot-")?
            .strip_suffix(".snap")?
            .parse::<i64>()
            .ok()
    }
}
