//! Common test fixtures for chunked-grid tests.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// A temporary swap directory, removed when dropped.
pub struct SwapDir {
    dir: TempDir,
}

impl SwapDir {
    /// Create a fresh, empty swap directory.
    pub fn new() -> Self {
        let dir = tempfile::Builder::new()
            .prefix("chunked-grid-swap-")
            .tempdir()
            .expect("failed to create temporary swap directory");
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Number of files below the directory, recursively.
    pub fn file_count(&self) -> usize {
        count_files(self.dir.path())
    }

    /// Every file below the directory with the given extension.
    pub fn files_with_extension(&self, extension: &str) -> Vec<PathBuf> {
        let mut files = Vec::new();
        collect_files(self.dir.path(), &mut files);
        files.retain(|p| p.extension().is_some_and(|e| e == extension));
        files.sort();
        files
    }
}

impl Default for SwapDir {
    fn default() -> Self {
        Self::new()
    }
}

fn count_files(dir: &Path) -> usize {
    let mut files = Vec::new();
    collect_files(dir, &mut files);
    files.len()
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out);
        } else {
            out.push(path);
        }
    }
}

/// Common grid shapes for testing: (nrows, ncols, chunk_nrows, chunk_ncols).
pub mod shapes {
    /// 3x3 grid of 2x2 chunks: four chunks, three of them cut short.
    pub const UNEVEN_3X3: (i64, i64, u32, u32) = (3, 3, 2, 2);

    /// 5x5 grid of 2x2 chunks.
    pub const SMALL_5X5: (i64, i64, u32, u32) = (5, 5, 2, 2);

    /// 64x48 grid of 16x16 chunks (4x3 chunks).
    pub const MEDIUM: (i64, i64, u32, u32) = (64, 48, 16, 16);

    /// Single row, many columns.
    pub const STRIP: (i64, i64, u32, u32) = (1, 100, 1, 8);
}

/// Common no-data sentinels for testing.
pub mod no_data {
    /// The classic ESRI ASCII grid sentinel.
    pub const ESRI: f64 = -9999.0;

    /// A sentinel that is not a round number.
    pub const ODD: f64 = -3.25;
}
