//! Two-phase parallel whitening pipeline.
//!
//! Phase 1 estimates the channel covariance from sampled chunks; phase 2
//! applies the derived whitening matrix to every chunk, staging results
//! keyed by chunk index; a final serial pass reassembles the staged
//! chunks into the output array in ascending temporal order.

use std::path::PathBuf;
use std::sync::Mutex;

use log::{debug, info};
use ndarray::Array2;
use rayon::prelude::*;

use crate::covariance::{chunk_gram_matrix, sampled_chunk_indices};
use crate::error::{Result, WhitenError};
use crate::mda::{DiskReadMda, DiskWriteMda};
use crate::progress::ProgressTracker;
use crate::staging::ChunkStagingStore;
use crate::timeseries::{chunk_bounds, num_chunks};
use crate::whitening::whitening_matrix;

pub const DEFAULT_CHUNK_SIZE: usize = 300_000;

/// Run configuration: an explicit immutable value captured by reference
/// into every worker task. Workers read nothing global.
#[derive(Debug, Clone)]
pub struct WhitenConfig {
    /// Input M×N timeseries array (M channels, N samples).
    pub timeseries: PathBuf,
    /// Whitened output array (float32, same shape as the input).
    pub timeseries_out: PathBuf,
    /// Samples per chunk.
    pub chunk_size: usize,
    /// Worker pool size.
    pub num_processes: usize,
    /// Directory for staged whitened chunks. Unset falls back to the
    /// current directory, with a warning.
    pub staging_dir: Option<PathBuf>,
}

impl WhitenConfig {
    pub fn new(timeseries: impl Into<PathBuf>, timeseries_out: impl Into<PathBuf>) -> Self {
        Self {
            timeseries: timeseries.into(),
            timeseries_out: timeseries_out.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            num_processes: num_cpus::get(),
            staging_dir: None,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_num_processes(mut self, num_processes: usize) -> Self {
        self.num_processes = num_processes;
        self
    }

    pub fn with_staging_dir(mut self, staging_dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(staging_dir.into());
        self
    }

    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(WhitenError::Config("chunk_size must be at least 1".into()));
        }
        if self.num_processes == 0 {
            return Err(WhitenError::Config("num_processes must be at least 1".into()));
        }
        Ok(())
    }
}

/// State machine with two sequential phases, each internally parallel,
/// followed by serial reassembly.
pub struct WhiteningPipeline {
    config: WhitenConfig,
}

impl WhiteningPipeline {
    pub fn new(config: WhitenConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn run(&self) -> Result<()> {
        let config = &self.config;
        let input = DiskReadMda::open(&config.timeseries)?;
        let channels = input.num_channels();
        let samples = input.num_samples();
        let total_chunks = num_chunks(samples, config.chunk_size);
        info!(
            "Chunk size: {}, num chunks: {}, num processes: {}",
            config.chunk_size, total_chunks, config.num_processes
        );

        if total_chunks == 0 {
            // Empty input: emit a valid zero-sample output and stop.
            DiskWriteMda::create(&config.timeseries_out, channels)?;
            return Ok(());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_processes)
            .build()
            .map_err(|e| WhitenError::Config(format!("failed to build worker pool: {e}")))?;

        // Phase 1: covariance estimation from sampled chunks. Partial Gram
        // matrices are summed, so completion order does not matter.
        let sampled = sampled_chunk_indices(total_chunks);
        debug!(
            "estimating channel covariance from {} of {} chunks",
            sampled.len(),
            total_chunks
        );
        let grams: Vec<Array2<f64>> = pool.install(|| {
            sampled
                .par_iter()
                .map(|&num| chunk_gram_matrix(&input, num, config.chunk_size))
                .collect::<Result<Vec<_>>>()
        })?;
        let w = whitening_matrix(&grams, config.chunk_size)?;
        debug!("whitening matrix derived for {channels} channels");

        // Phase 2: apply W to every chunk. The header-only output
        // placeholder is written up front; chunk data goes through the
        // staging store until every key is present.
        let store = ChunkStagingStore::resolve(config.staging_dir.as_deref());
        store.clear(total_chunks)?;
        DiskWriteMda::create(&config.timeseries_out, channels)?;

        let progress = Mutex::new(ProgressTracker::new(total_chunks));
        pool.install(|| {
            (0..total_chunks).into_par_iter().try_for_each(|num| {
                let (t1, t2) = chunk_bounds(num, config.chunk_size, samples);
                let chunk = input
                    .read_block(t1, t2 - t1)
                    .map_err(|e| for_chunk(e, num))?;
                if chunk.nrows() != channels {
                    return Err(WhitenError::ShapeMismatch {
                        context: format!("whitening chunk {num}"),
                        expected_rows: channels,
                        actual_rows: chunk.nrows(),
                    });
                }
                let whitened = w.dot(&chunk).mapv(|v| v as f32);

                // One critical section per chunk: stage the result, count
                // it completed, and maybe emit a status line, all under
                // the same guard.
                let mut tracker = progress.lock().expect("progress lock poisoned");
                store.write(num, whitened.view())?;
                tracker.report_completed();
                tracker.maybe_report();
                Ok(())
            })
        })?;

        // Reassembly runs serially in ascending chunk order: staging keys
        // are unordered, so the temporal order of the output depends
        // entirely on this loop.
        info!("Assembling whitened chunks...");
        let mut output = DiskWriteMda::create(&config.timeseries_out, channels)?;
        for num in 0..total_chunks {
            let staged = store.read(num)?;
            if staged.nrows() != channels {
                return Err(WhitenError::ShapeMismatch {
                    context: format!("assembling staged chunk {num}"),
                    expected_rows: channels,
                    actual_rows: staged.nrows(),
                });
            }
            output.append_block(staged.view())?;
        }
        store.clear(total_chunks)?;
        debug!("whitened {total_chunks} chunks ({channels}×{samples})");
        Ok(())
    }
}

/// Whitens `config.timeseries` into `config.timeseries_out`.
pub fn whiten(config: WhitenConfig) -> Result<()> {
    WhiteningPipeline::new(config)?.run()
}

fn for_chunk(e: WhitenError, num: usize) -> WhitenError {
    match e {
        WhitenError::Io { context, source } => WhitenError::Io {
            context: format!("whitening chunk {num}: {context}"),
            source,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_chunk_size_is_a_config_error() {
        let config = WhitenConfig::new("in.mda", "out.mda").with_chunk_size(0);
        assert!(matches!(
            WhiteningPipeline::new(config),
            Err(WhitenError::Config(_))
        ));
    }

    #[test]
    fn zero_workers_is_a_config_error() {
        let config = WhitenConfig::new("in.mda", "out.mda").with_num_processes(0);
        assert!(matches!(
            WhiteningPipeline::new(config),
            Err(WhitenError::Config(_))
        ));
    }

    #[test]
    fn defaults_follow_the_documented_values() {
        let config = WhitenConfig::new("in.mda", "out.mda");
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(config.num_processes >= 1);
        assert!(config.staging_dir.is_none());
    }

    #[test]
    fn missing_input_surfaces_as_io_error() {
        let config = WhitenConfig::new("/nonexistent/input.mda", "/nonexistent/out.mda");
        assert!(matches!(whiten(config), Err(WhitenError::Io { .. })));
    }
}
