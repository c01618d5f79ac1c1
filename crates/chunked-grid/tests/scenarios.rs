//! Integration test: end-to-end scenarios through the public API.

use std::sync::Arc;

use anyhow::Result;
use chunked_grid::{
    CellId, ChunkId, ChunkKind, ChunkLayout, Grid, GridDimensions, GridSpec, GridStoreConfig,
    InMemoryChunkStore, MemoryManager, SourceHeader, VecSource,
};
use test_utils::{
    assert_approx_eq, assert_coords_approx_eq, create_constant_values, create_elevation_values,
    create_patchy_values, create_sparse_values, no_data, shapes,
};

fn new_grid(manager: &MemoryManager, spec: GridSpec) -> Result<Grid> {
    Ok(Grid::new(manager, Arc::new(InMemoryChunkStore::new()), spec)?)
}

fn import(manager: &MemoryManager, nrows: i64, ncols: i64, values: Vec<f64>) -> Result<Grid> {
    let header = SourceHeader {
        nrows,
        ncols,
        no_data_value: no_data::ESRI,
        dimensions: GridDimensions::default(),
    };
    let config = GridStoreConfig {
        chunk_nrows: 2,
        chunk_ncols: 2,
        ..Default::default()
    };
    let mut source = VecSource::new(header, values);
    Ok(Grid::from_source(
        manager,
        Arc::new(InMemoryChunkStore::new()),
        &mut source,
        &config,
    )?)
}

#[test]
fn test_uneven_chunk_layout() -> Result<()> {
    let (nrows, ncols, chunk_nrows, chunk_ncols) = shapes::UNEVEN_3X3;
    let layout = ChunkLayout::new(nrows, ncols, chunk_nrows, chunk_ncols)?;

    let ids: Vec<ChunkId> = layout.chunk_ids().collect();
    assert_eq!(
        ids,
        vec![
            ChunkId::new(0, 0),
            ChunkId::new(0, 1),
            ChunkId::new(1, 0),
            ChunkId::new(1, 1)
        ]
    );
    let shapes: Vec<(u32, u32)> = ids.iter().map(|id| layout.chunk_shape(*id)).collect();
    assert_eq!(shapes, vec![(2, 2), (2, 1), (1, 2), (1, 1)]);

    let mut covered = Vec::new();
    for id in &ids {
        let (rows, cols) = layout.chunk_shape(*id);
        for r in 0..rows {
            for c in 0..cols {
                let cell = layout.global(*id, r, c);
                let loc = layout.locate(cell.row, cell.col)?;
                assert_eq!((loc.chunk, loc.row, loc.col), (*id, r, c));
                covered.push(cell);
            }
        }
    }
    covered.sort();
    covered.dedup();
    assert_eq!(covered.len(), 9);
    Ok(())
}

#[test]
fn test_nearest_value_between_two_corners() -> Result<()> {
    let manager = MemoryManager::unbounded();
    let (nrows, ncols, chunk_nrows, chunk_ncols) = shapes::SMALL_5X5;
    let values = create_sparse_values(5, 5, no_data::ESRI, &[((0, 0), 7.0), ((4, 4), 9.0)]);
    let grid = import(&manager, nrows, ncols, values)?;
    assert_eq!(grid.layout().chunk_nrows(), chunk_nrows);
    assert_eq!(grid.layout().chunk_ncols(), chunk_ncols);

    assert_eq!(grid.nearest_value(2, 2)?, Some(8.0));
    assert_eq!(
        grid.nearest_cell_ids(2, 2)?,
        vec![CellId::new(0, 0), CellId::new(4, 4)]
    );
    assert_approx_eq!(grid.nearest_value_distance(2, 2)?.unwrap_or(f64::NAN), 8f64.sqrt(), 1e-12);

    // From the centre of cell (2, 2) as a point.
    assert_eq!(grid.nearest_value_at_point(2.5, 2.5)?, Some(8.0));
    // Closer to (0, 0) than to (4, 4).
    assert_eq!(grid.nearest_value(1, 2)?, Some(7.0));
    Ok(())
}

#[test]
fn test_nearest_value_after_swapping() -> Result<()> {
    let manager = MemoryManager::new(1_000);
    let values = create_patchy_values(20, 20, no_data::ESRI, 0.05, 7);
    let grid = import(&manager, 20, 20, values.clone())?;
    grid.swap_out()?;

    // Brute force over every data cell.
    let (row, col) = (10i64, 10i64);
    let mut best = f64::INFINITY;
    let mut ties = Vec::new();
    for (i, value) in values.iter().enumerate() {
        if *value == no_data::ESRI {
            continue;
        }
        let (r, c) = ((i / 20) as i64, (i % 20) as i64);
        let d2 = ((r - row).pow(2) + (c - col).pow(2)) as f64;
        if d2 < best {
            best = d2;
            ties.clear();
        }
        if d2 == best {
            ties.push((CellId::new(r, c), *value));
        }
    }

    let found = grid.nearest(row, col)?;
    if ties.is_empty() {
        assert!(found.is_none());
        return Ok(());
    }
    let found = found.ok_or_else(|| anyhow::anyhow!("expected a nearest value"))?;
    let expected_cells: Vec<CellId> = ties.iter().map(|(cell, _)| *cell).collect();
    let expected_mean = ties.iter().map(|(_, v)| v).sum::<f64>() / ties.len() as f64;
    assert_eq!(found.cells, expected_cells);
    assert_approx_eq!(found.value, expected_mean, 1e-9);
    assert_approx_eq!(found.distance, best.sqrt(), 1e-12);
    Ok(())
}

#[test]
fn test_import_statistics_match_source() -> Result<()> {
    let manager = MemoryManager::unbounded();
    let values = create_elevation_values(12, 9);
    let mut grid = import(&manager, 12, 9, values.clone())?;

    // Bottom row first.
    assert_eq!(grid.get_cell(0, 0)?, values[0]);
    assert_eq!(grid.get_cell(11, 8)?, values[12 * 9 - 1]);
    assert_eq!(grid.get_cell(3, 4)?, values[3 * 9 + 4]);

    let stats = grid.statistics()?;
    assert_eq!(stats.count, 108);
    let expected_max = values.iter().copied().fold(f64::MIN, f64::max);
    assert_eq!(stats.max, Some(expected_max));
    assert_approx_eq!(stats.sum, values.iter().sum::<f64>(), 1e-6);
    Ok(())
}

#[test]
fn test_singleton_chunk_conversion() -> Result<()> {
    let manager = MemoryManager::unbounded();
    let spec = GridSpec::new(4, 4).with_chunk_shape(4, 4).with_no_data_value(no_data::ESRI);
    let mut grid = new_grid(&manager, spec)?;
    let chunk = ChunkId::new(0, 0);

    grid.init_cells(5.0)?;
    for (row, col) in [(0, 0), (1, 2), (3, 3)] {
        grid.set_cell(row, col, 5.0)?;
    }
    assert_eq!(grid.chunk_kind(chunk)?, Some(ChunkKind::Singleton));

    grid.set_cell(2, 1, 6.0)?;
    assert_ne!(grid.chunk_kind(chunk)?, Some(ChunkKind::Singleton));
    for row in 0..4 {
        for col in 0..4 {
            let expected = if (row, col) == (2, 1) { 6.0 } else { 5.0 };
            assert_eq!(grid.get_cell(row, col)?, expected);
        }
    }

    let stats = grid.statistics()?;
    assert_eq!((stats.count, stats.sum), (16, 81.0));
    assert_eq!((stats.min, stats.n_min), (Some(5.0), 15));
    Ok(())
}

#[test]
fn test_copy_drops_cells_outside_new_extent() -> Result<()> {
    let manager = MemoryManager::unbounded();
    let spec = GridSpec::new(10, 10).with_chunk_shape(4, 4).with_no_data_value(no_data::ODD);
    let mut source = new_grid(&manager, spec)?;
    source.set_cell(1, 1, 2.0)?;
    source.set_cell(8, 8, 3.0)?;

    let mut spec = source.spec().with_chunk_shape(3, 3);
    spec.nrows = 5;
    spec.ncols = 5;
    let mut copy = Grid::from_grid(&manager, Arc::new(InMemoryChunkStore::new()), &source, spec)?;

    assert_eq!(copy.get_cell(1, 1)?, 2.0);
    assert_eq!(copy.statistics()?.count, 1);
    assert!(copy.get_cell(8, 8).is_err());
    Ok(())
}

#[test]
fn test_values_within_distance_of_a_point() -> Result<()> {
    let manager = MemoryManager::unbounded();
    let spec = GridSpec::new(10, 10)
        .with_chunk_shape(4, 4)
        .with_dimensions(GridDimensions::new(2.0, 0.0, 0.0));
    let mut grid = new_grid(&manager, spec)?;
    grid.set_cell(5, 5, 1.0)?;
    grid.set_cell(5, 6, 2.0)?;
    grid.set_cell(9, 9, 3.0)?;

    // Cell (5, 5) is centred on (11, 11); its neighbours are 2 away.
    let cells = grid.cell_ids_within_distance(11.0, 11.0, 2.0);
    assert_eq!(cells.len(), 5);
    let values = grid.values_within_distance(11.0, 11.0, 2.0)?;
    assert_eq!(values, vec![(CellId::new(5, 5), 1.0), (CellId::new(5, 6), 2.0)]);
    Ok(())
}

#[test]
fn test_nearest_value_along_a_strip() -> Result<()> {
    let manager = MemoryManager::new(1_000);
    let (nrows, ncols, chunk_nrows, chunk_ncols) = shapes::STRIP;
    let dims = GridDimensions::new(0.5, 10.0, 20.0);
    let spec = GridSpec::new(nrows, ncols)
        .with_chunk_shape(chunk_nrows, chunk_ncols)
        .with_no_data_value(no_data::ESRI)
        .with_dimensions(dims);
    let mut grid = new_grid(&manager, spec)?;
    grid.set_cell(0, 3, 2.0)?;
    grid.set_cell(0, 97, 4.0)?;
    grid.swap_out()?;

    let found = grid
        .nearest(0, 50)?
        .ok_or_else(|| anyhow::anyhow!("expected a nearest value"))?;
    assert_eq!(found.cells, vec![CellId::new(0, 3), CellId::new(0, 97)]);
    assert_eq!(found.value, 3.0);
    assert_approx_eq!(found.distance, 23.5, 1e-12);

    assert_coords_approx_eq!((dims.cell_x(97), dims.cell_y(0)), (58.75, 20.25), 1e-12);
    assert_eq!(grid.nearest_value_at_point(58.8, 20.3)?, Some(4.0));
    Ok(())
}

#[test]
fn test_constant_import_optimises_to_singletons() -> Result<()> {
    let manager = MemoryManager::unbounded();
    let mut grid = import(&manager, 6, 6, create_constant_values(6, 6, 3.0))?;
    grid.optimise_chunks()?;

    for id in grid.layout().chunk_ids() {
        assert_eq!(grid.chunk_kind(id)?, Some(ChunkKind::Singleton), "chunk {id}");
    }
    let stats = grid.statistics()?;
    assert_eq!((stats.count, stats.sum), (36, 108.0));
    assert_eq!((stats.min, stats.max), (Some(3.0), Some(3.0)));
    Ok(())
}
