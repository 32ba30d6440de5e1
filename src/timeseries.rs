use ndarray::Array2;

use crate::error::Result;

/// Defines how the whitening pipeline reads a persisted M×N timeseries
/// (M = channels, N = samples, stored column-major by time).
///
/// The implementor owns the actual storage. Reads take `&self` and the
/// trait requires `Sync`, so one source can serve many worker threads
/// concurrently without locking.
pub trait TimeseriesSource: Sync {
    /// Number of channels M. Fixed for the lifetime of the array.
    fn num_channels(&self) -> usize;

    /// Number of samples N.
    fn num_samples(&self) -> usize;

    /// Reads the contiguous sample range `[t_start, t_start + t_count)`
    /// across all channels, promoting the stored element type to f64.
    ///
    /// # Returns
    /// An `Array2<f64>` of shape `(num_channels, t_count)`.
    fn read_block(&self, t_start: usize, t_count: usize) -> Result<Array2<f64>>;
}

/// Number of chunks needed to cover `num_samples` at `chunk_size`
/// samples per chunk: `ceil(num_samples / chunk_size)`.
pub fn num_chunks(num_samples: usize, chunk_size: usize) -> usize {
    num_samples.div_ceil(chunk_size)
}

/// Half-open sample range `[t1, t2)` of chunk `num`.
///
/// Chunks are contiguous and non-overlapping; every chunk spans
/// `chunk_size` samples except possibly the last, which is clipped to
/// the end of the array.
pub fn chunk_bounds(num: usize, chunk_size: usize, num_samples: usize) -> (usize, usize) {
    let t1 = num * chunk_size;
    let t2 = (t1 + chunk_size).min(num_samples);
    (t1, t2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_count_rounds_up() {
        assert_eq!(num_chunks(100, 30), 4);
        assert_eq!(num_chunks(90, 30), 3);
        assert_eq!(num_chunks(1, 30), 1);
        assert_eq!(num_chunks(0, 30), 0);
    }

    #[test]
    fn chunk_ranges_tile_the_sample_axis() {
        // Union of chunk ranges covers [0, N) exactly, no gaps or overlaps,
        // for a spread of chunk sizes and sample counts.
        for &chunk_size in &[1usize, 2, 7, 30, 100, 1000] {
            for &n in &[0usize, 1, 29, 30, 31, 100, 999] {
                let chunks = num_chunks(n, chunk_size);
                let mut covered = 0;
                for num in 0..chunks {
                    let (t1, t2) = chunk_bounds(num, chunk_size, n);
                    assert_eq!(t1, covered, "gap or overlap at chunk {num}");
                    assert!(t2 > t1, "empty chunk {num} (c={chunk_size}, n={n})");
                    assert!(t2 - t1 <= chunk_size);
                    covered = t2;
                }
                assert_eq!(covered, n, "chunks do not cover c={chunk_size}, n={n}");
            }
        }
    }

    #[test]
    fn last_chunk_is_clipped() {
        let (t1, t2) = chunk_bounds(3, 30, 100);
        assert_eq!((t1, t2), (90, 100));
    }
}
