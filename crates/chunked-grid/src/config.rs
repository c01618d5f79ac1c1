//! Configuration for the grid store.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::stats::StatisticsMode;

/// Configuration for the grid store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridStoreConfig {
    /// Memory budget for resident chunks in megabytes.
    pub memory_budget_mb: usize,

    /// Rows per chunk.
    pub chunk_nrows: u32,

    /// Columns per chunk.
    pub chunk_ncols: u32,

    /// How grids maintain their statistics.
    pub statistics: StatisticsMode,

    /// Root directory for swapped-out chunks.
    pub swap_dir: PathBuf,
}

impl Default for GridStoreConfig {
    fn default() -> Self {
        Self {
            memory_budget_mb: 512,
            chunk_nrows: 256,
            chunk_ncols: 256,
            statistics: StatisticsMode::Exact,
            swap_dir: std::env::temp_dir().join("chunked-grid"),
        }
    }
}

impl GridStoreConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("GRID_STORE_MEMORY_BUDGET_MB") {
            if let Ok(size) = val.parse() {
                config.memory_budget_mb = size;
            }
        }

        if let Ok(val) = std::env::var("GRID_STORE_CHUNK_ROWS") {
            if let Ok(rows) = val.parse() {
                config.chunk_nrows = rows;
            }
        }

        if let Ok(val) = std::env::var("GRID_STORE_CHUNK_COLS") {
            if let Ok(cols) = val.parse() {
                config.chunk_ncols = cols;
            }
        }

        if let Ok(val) = std::env::var("GRID_STORE_STATISTICS") {
            config.statistics = StatisticsMode::from_str(&val);
        }

        if let Ok(val) = std::env::var("GRID_STORE_SWAP_DIR") {
            if !val.is_empty() {
                config.swap_dir = PathBuf::from(val);
            }
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.memory_budget_mb == 0 {
            return Err("memory_budget_mb must be > 0".to_string());
        }

        if self.chunk_nrows == 0 || self.chunk_ncols == 0 {
            return Err("chunk_nrows and chunk_ncols must be > 0".to_string());
        }

        if self.swap_dir.as_os_str().is_empty() {
            return Err("swap_dir must not be empty".to_string());
        }

        Ok(())
    }

    /// Get the memory budget in bytes.
    pub fn memory_budget_bytes(&self) -> usize {
        self.memory_budget_mb.saturating_mul(1024 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = GridStoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.memory_budget_bytes(), 512 * 1024 * 1024);
    }

    #[test]
    fn test_validate_rejects_zero_chunk_extent() {
        let config = GridStoreConfig {
            chunk_ncols: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_budget() {
        let config = GridStoreConfig {
            memory_budget_mb: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serde_round_trip() {
        let config = GridStoreConfig {
            statistics: StatisticsMode::Deferred,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: GridStoreConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.statistics, StatisticsMode::Deferred);
        assert_eq!(back.chunk_nrows, config.chunk_nrows);
    }
}
