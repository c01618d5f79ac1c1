//! Filesystem chunk store: one directory per grid, one file per chunk.

use std::path::{Path, PathBuf};

use crate::chunk::{decode_chunk, encode_chunk, Chunk};
use crate::config::GridStoreConfig;
use crate::error::{GridStoreError, Result};
use crate::types::{ChunkId, GridId};

use super::ChunkStore;

/// Stores chunks as `<root>/<pid>-<grid>/<row>_<col>.chunk`.
///
/// Grid ids are unique within a process and the directory name carries the
/// process id, so several managers and processes can share one root.
///
/// Files are written to a temporary name and renamed into place, so a chunk
/// file is either the previous copy or the new one.
#[derive(Debug, Clone)]
pub struct FilesystemChunkStore {
    root: PathBuf,
    process: u32,
}

impl FilesystemChunkStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            process: std::process::id(),
        })
    }

    /// Create a store rooted at the configured swap directory.
    pub fn from_config(config: &GridStoreConfig) -> Result<Self> {
        Self::new(config.swap_dir.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one grid's chunks.
    pub fn grid_dir(&self, grid: GridId) -> PathBuf {
        self.root.join(format!("{}-{grid}", self.process))
    }

    /// File holding one chunk.
    pub fn chunk_path(&self, grid: GridId, id: ChunkId) -> PathBuf {
        self.grid_dir(grid).join(format!("{}_{}.chunk", id.row, id.col))
    }
}

impl ChunkStore for FilesystemChunkStore {
    fn store(&self, grid: GridId, id: ChunkId, chunk: &Chunk) -> Result<()> {
        let dir = self.grid_dir(grid);
        std::fs::create_dir_all(&dir)?;

        let path = self.chunk_path(grid, id);
        let tmp = path.with_extension("chunk.tmp");
        std::fs::write(&tmp, encode_chunk(chunk))?;
        std::fs::rename(&tmp, &path)?;

        tracing::debug!(%grid, chunk = %id, path = %path.display(), "stored chunk");
        Ok(())
    }

    fn load(&self, grid: GridId, id: ChunkId) -> Result<Chunk> {
        let path = self.chunk_path(grid, id);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(GridStoreError::ChunkNotFound(format!(
                    "{grid} chunk {id} at {}",
                    path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };
        decode_chunk(&bytes).map_err(|e| match e {
            GridStoreError::CorruptPersistedChunk(msg) => GridStoreError::corrupt(format!(
                "{}: {msg}",
                path.display()
            )),
            other => other,
        })
    }

    fn store_metadata(&self, grid: GridId, metadata: &serde_json::Value) -> Result<()> {
        let dir = self.grid_dir(grid);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("grid.json"), serde_json::to_vec_pretty(metadata)?)?;
        Ok(())
    }

    fn remove_grid(&self, grid: GridId) -> Result<()> {
        let dir = self.grid_dir(grid);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
