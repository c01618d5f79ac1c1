//! Integration test: grids larger than the memory budget.
//!
//! Verifies that chunks swapped out through a store come back with the same
//! values, that a budget too small for a single chunk fails cleanly, and that
//! corrupt swap files are reported instead of read as data.

use std::sync::Arc;

use chunked_grid::{
    ChunkId, ChunkKind, FilesystemChunkStore, Grid, GridSpec, GridStoreConfig, GridStoreError,
    InMemoryChunkStore, MemoryManager, StatisticsMode,
};
use test_utils::{create_test_values, init_test_tracing, shapes, SwapDir};

const ND: f64 = -9999.0;

fn medium_spec() -> GridSpec {
    let (nrows, ncols, chunk_nrows, chunk_ncols) = shapes::MEDIUM;
    GridSpec::new(nrows, ncols)
        .with_chunk_shape(chunk_nrows, chunk_ncols)
        .with_no_data_value(ND)
}

fn fill(grid: &mut Grid, values: &[f64]) {
    let ncols = grid.ncols();
    for (i, value) in values.iter().enumerate() {
        let i = i as i64;
        grid.set_cell(i / ncols, i % ncols, *value).unwrap();
    }
}

/// Budget for about three dense 16x16 chunks.
fn tight_budget() -> usize {
    3 * (64 + 16 * 16 * 8)
}

#[test]
fn test_values_survive_filesystem_swapping() {
    init_test_tracing();
    let swap = SwapDir::new();
    let manager = MemoryManager::new(tight_budget());
    let store = Arc::new(FilesystemChunkStore::new(swap.path()).unwrap());
    let mut grid = Grid::new(&manager, store.clone(), medium_spec()).unwrap();

    let values = create_test_values(64, 48);
    fill(&mut grid, &values);

    let stats = manager.stats();
    assert!(stats.evictions > 0, "expected evictions, got {stats:?}");
    assert!(stats.used_bytes <= stats.budget_bytes);
    assert!(!swap.files_with_extension("chunk").is_empty());
    assert!(store.grid_dir(grid.id()).join("grid.json").exists());

    for row in 0..64i64 {
        for col in 0..48i64 {
            let expected = (col * 1000 + row) as f64;
            assert_eq!(grid.get_cell(row, col).unwrap(), expected, "cell ({row}, {col})");
        }
    }
    assert!(manager.stats().loads > 0);

    let grid_stats = grid.statistics().unwrap();
    assert_eq!(grid_stats.count, 64 * 48);
    assert_eq!(grid_stats.min, Some(0.0));
    assert_eq!(grid_stats.max, Some(47_063.0));

    drop(grid);
    assert_eq!(swap.file_count(), 0);
}

#[test]
fn test_values_survive_in_memory_swapping() {
    let manager = MemoryManager::new(tight_budget());
    let store = Arc::new(InMemoryChunkStore::new());
    let mut grid = Grid::new(&manager, store.clone(), medium_spec()).unwrap();

    let values = create_test_values(64, 48);
    fill(&mut grid, &values);
    grid.flush().unwrap();
    assert_eq!(store.len(), 12);

    let sum: f64 = values.iter().sum();
    assert_eq!(grid.statistics().unwrap().sum, sum);
    assert_eq!(grid.get_cell(63, 47).unwrap(), 47_063.0);
}

#[test]
fn test_swap_out_and_reload_every_encoding() {
    let manager = MemoryManager::unbounded();
    let store = Arc::new(InMemoryChunkStore::new());
    let spec = GridSpec::new(8, 24).with_chunk_shape(8, 8).with_no_data_value(ND);
    let mut grid = Grid::new(&manager, store, spec).unwrap();

    // Chunk (0, 0): dense.
    for row in 0..8 {
        for col in 0..8 {
            grid.set_cell(row, col, (row * 8 + col) as f64).unwrap();
        }
    }
    // Chunk (0, 1): sparse, a few values on a no-data background.
    grid.set_cell(2, 9, 1.5).unwrap();
    grid.set_cell(7, 15, 1.5).unwrap();
    grid.set_cell(4, 12, -3.0).unwrap();
    // Chunk (0, 2): singleton.
    grid.set_cell(0, 16, ND).unwrap();

    let kinds: Vec<_> = (0..3)
        .map(|c| grid.chunk_kind(ChunkId::new(0, c)).unwrap())
        .collect();
    assert_eq!(
        kinds,
        vec![
            Some(ChunkKind::Dense),
            Some(ChunkKind::SparseMapped),
            Some(ChunkKind::Singleton)
        ]
    );

    let before: Vec<f64> = (0..8)
        .flat_map(|row| (0..24).map(move |col| (row, col)))
        .map(|(row, col)| grid.get_cell(row, col).unwrap())
        .collect();

    assert_eq!(grid.swap_out().unwrap(), 3);
    assert!(manager.resident_chunk_ids(grid.id()).is_empty());

    let after: Vec<f64> = (0..8)
        .flat_map(|row| (0..24).map(move |col| (row, col)))
        .map(|(row, col)| grid.get_cell(row, col).unwrap())
        .collect();
    assert_eq!(before, after);
    assert_eq!(grid.chunk_kind(ChunkId::new(0, 1)).unwrap(), Some(ChunkKind::SparseMapped));
}

#[test]
fn test_budget_below_one_chunk_is_exhausted() {
    let manager = MemoryManager::new(100);
    let store = Arc::new(InMemoryChunkStore::new());
    let mut grid = Grid::new(&manager, store, medium_spec()).unwrap();

    let err = grid.set_cell(0, 0, 1.0).unwrap_err();
    assert!(err.is_exhausted(), "unexpected error: {err}");
    assert!(matches!(err, GridStoreError::ResourceExhausted { .. }));

    // Nothing was applied.
    assert_eq!(grid.get_cell(0, 0).unwrap(), ND);
    assert_eq!(grid.statistics().unwrap().count, 0);
}

#[test]
fn test_corrupt_swap_file_is_reported() {
    let swap = SwapDir::new();
    let manager = MemoryManager::unbounded();
    let store = Arc::new(FilesystemChunkStore::new(swap.path()).unwrap());
    let mut grid = Grid::new(&manager, store.clone(), medium_spec()).unwrap();

    grid.set_cell(1, 1, 5.0).unwrap();
    grid.swap_out().unwrap();

    let path = store.chunk_path(grid.id(), ChunkId::new(0, 0));
    std::fs::write(&path, b"not a chunk at all").unwrap();

    let err = grid.get_cell(1, 1).unwrap_err();
    assert!(
        matches!(err, GridStoreError::CorruptPersistedChunk(_)),
        "unexpected error: {err}"
    );
}

#[test]
fn test_grids_share_one_budget() {
    let manager = MemoryManager::new(tight_budget());
    let store = Arc::new(InMemoryChunkStore::new());
    let mut first = Grid::new(&manager, store.clone(), medium_spec()).unwrap();
    let mut second = Grid::new(&manager, store.clone(), medium_spec()).unwrap();

    let values = create_test_values(64, 48);
    fill(&mut first, &values);
    fill(&mut second, &values);

    assert!(manager.stats().used_bytes <= tight_budget());
    assert_eq!(first.get_cell(10, 10).unwrap(), 10_010.0);
    assert_eq!(second.get_cell(10, 10).unwrap(), 10_010.0);

    drop(first);
    assert!(manager.resident_chunk_ids(second.id()).len() <= 3);
    assert_eq!(second.get_cell(63, 0).unwrap(), 63.0);
}

#[test]
fn test_config_drives_manager_and_spec() {
    let config = GridStoreConfig {
        memory_budget_mb: 1,
        chunk_nrows: 10,
        chunk_ncols: 20,
        statistics: StatisticsMode::Deferred,
        ..Default::default()
    };
    config.validate().unwrap();

    let manager = MemoryManager::from_config(&config);
    assert_eq!(manager.stats().budget_bytes, 1024 * 1024);

    let spec = GridSpec::from_config(100, 100, &config).with_no_data_value(ND);
    let mut grid = Grid::new(&manager, Arc::new(InMemoryChunkStore::new()), spec).unwrap();
    assert_eq!(grid.layout().n_chunk_rows(), 10);
    assert_eq!(grid.layout().n_chunk_cols(), 5);

    grid.set_cell(50, 50, 3.0).unwrap();
    assert!(grid.statistics_snapshot().stale);
    assert_eq!(grid.statistics().unwrap().count, 1);
}

#[test]
fn test_managers_sharing_a_swap_root_keep_their_chunks() {
    let swap = SwapDir::new();
    let store = Arc::new(FilesystemChunkStore::new(swap.path()).unwrap());
    let (first_manager, second_manager) = (MemoryManager::unbounded(), MemoryManager::unbounded());
    let mut first = Grid::new(&first_manager, store.clone(), medium_spec()).unwrap();
    let mut second = Grid::new(&second_manager, store.clone(), medium_spec()).unwrap();
    assert_ne!(first.id(), second.id());
    assert_ne!(store.grid_dir(first.id()), store.grid_dir(second.id()));

    first.set_cell(0, 0, 1.0).unwrap();
    first.set_cell(1, 1, -1.0).unwrap();
    second.set_cell(0, 0, 99.0).unwrap();
    first.swap_out().unwrap();
    second.swap_out().unwrap();

    assert_eq!(first.get_cell(0, 0).unwrap(), 1.0);
    assert_eq!(first.get_cell(1, 1).unwrap(), -1.0);
    assert_eq!(second.get_cell(0, 0).unwrap(), 99.0);

    drop(second);
    first.swap_out().unwrap();
    assert_eq!(first.get_cell(0, 0).unwrap(), 1.0);
}

#[test]
fn test_store_from_config_swaps_into_swap_dir() {
    let swap = SwapDir::new();
    let config = GridStoreConfig {
        swap_dir: swap.path().join("configured"),
        ..Default::default()
    };
    let manager = MemoryManager::from_config(&config);
    let store = Arc::new(FilesystemChunkStore::from_config(&config).unwrap());
    let mut grid = Grid::new(&manager, store, GridSpec::from_config(8, 8, &config)).unwrap();

    grid.set_cell(3, 3, 2.5).unwrap();
    grid.swap_out().unwrap();
    assert!(!swap.files_with_extension("chunk").is_empty());
    assert_eq!(grid.get_cell(3, 3).unwrap(), 2.5);
}
