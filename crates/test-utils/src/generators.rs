//! Value generators for grid tests.
//!
//! All generators return values in import order: row 0 (the bottom row)
//! first, left to right within a row.

/// Creates grid values with a predictable pattern.
///
/// Each cell value is calculated as: `col * 1000 + row`
///
/// This makes it easy to verify that data is being read/written correctly
/// by checking that the value at (row, col) == col * 1000 + row.
///
/// # Example
///
/// ```
/// use test_utils::create_test_values;
///
/// let values = create_test_values(5, 10);
/// assert_eq!(values.len(), 50);
/// assert_eq!(values[0], 0.0);    // row=0, col=0
/// assert_eq!(values[1], 1000.0); // row=0, col=1
/// assert_eq!(values[10], 1.0);   // row=1, col=0
/// ```
pub fn create_test_values(nrows: usize, ncols: usize) -> Vec<f64> {
    let mut data = Vec::with_capacity(nrows * ncols);
    for row in 0..nrows {
        for col in 0..ncols {
            data.push((col * 1000 + row) as f64);
        }
    }
    data
}

/// Creates an elevation-like surface: a smooth ramp with a central hill.
pub fn create_elevation_values(nrows: usize, ncols: usize) -> Vec<f64> {
    let (cr, cc) = (nrows as f64 / 2.0, ncols as f64 / 2.0);
    let radius = cr.max(cc).max(1.0);
    let mut data = Vec::with_capacity(nrows * ncols);
    for row in 0..nrows {
        for col in 0..ncols {
            let d = ((row as f64 - cr).powi(2) + (col as f64 - cc).powi(2)).sqrt() / radius;
            let hill = (1.0 - d).max(0.0) * 500.0;
            data.push(100.0 + row as f64 + hill);
        }
    }
    data
}

/// Creates values that are `no_data` everywhere except at `points`, which
/// hold the paired value.
pub fn create_sparse_values(
    nrows: usize,
    ncols: usize,
    no_data: f64,
    points: &[((usize, usize), f64)],
) -> Vec<f64> {
    let mut data = vec![no_data; nrows * ncols];
    for &((row, col), value) in points {
        if row < nrows && col < ncols {
            data[row * ncols + col] = value;
        }
    }
    data
}

/// Creates values where roughly `fraction` of cells hold data, placed by a
/// deterministic hash of `seed` and the cell position.
pub fn create_patchy_values(nrows: usize, ncols: usize, no_data: f64, fraction: f64, seed: u64) -> Vec<f64> {
    let mut data = Vec::with_capacity(nrows * ncols);
    for row in 0..nrows {
        for col in 0..ncols {
            let h = mix(seed ^ ((row as u64) << 32) ^ col as u64);
            let unit = (h >> 11) as f64 / (1u64 << 53) as f64;
            if unit < fraction {
                data.push((h % 100) as f64);
            } else {
                data.push(no_data);
            }
        }
    }
    data
}

/// Creates a grid filled with one value.
pub fn create_constant_values(nrows: usize, ncols: usize, value: f64) -> Vec<f64> {
    vec![value; nrows * ncols]
}

fn mix(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}
