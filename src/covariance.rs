//! Sampled per-chunk Gram matrices feeding the covariance estimate.

use ndarray::Array2;

use crate::error::{Result, WhitenError};
use crate::timeseries::{chunk_bounds, TimeseriesSource};

/// Target number of chunks sampled for the covariance estimate. Sampling
/// bounds phase-1 cost on very large inputs at the price of estimation
/// accuracy.
pub const COVARIANCE_SAMPLE_TARGET: usize = 10;

/// Indices of the chunks sampled for covariance estimation: every
/// `step`-th chunk starting at 0, with
/// `step = max(1, floor(num_chunks / COVARIANCE_SAMPLE_TARGET))`.
/// Small inputs sample every chunk.
pub fn sampled_chunk_indices(num_chunks: usize) -> Vec<usize> {
    let step = (num_chunks / COVARIANCE_SAMPLE_TARGET).max(1);
    (0..num_chunks).step_by(step).collect()
}

/// Computes the Gram matrix `chunk · chunkᵗ` (M×M) of chunk `num`.
///
/// Pure function of the source, the chunk index, and the chunk size:
/// safe to invoke from any number of workers in any order.
pub fn chunk_gram_matrix<S: TimeseriesSource>(
    source: &S,
    num: usize,
    chunk_size: usize,
) -> Result<Array2<f64>> {
    let num_channels = source.num_channels();
    let num_samples = source.num_samples();
    let (t1, t2) = chunk_bounds(num, chunk_size, num_samples);
    if t1 >= num_samples {
        return Err(WhitenError::io(
            format!("reading chunk {num} for covariance estimation"),
            std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("chunk starts at sample {t1} but only {num_samples} samples exist"),
            ),
        ));
    }

    let chunk = source.read_block(t1, t2 - t1)?;
    if chunk.nrows() != num_channels {
        return Err(WhitenError::ShapeMismatch {
            context: format!("reading chunk {num} for covariance estimation"),
            expected_rows: num_channels,
            actual_rows: chunk.nrows(),
        });
    }

    Ok(chunk.dot(&chunk.t()))
}
