// Parallel whitening of large on-disk multi-channel timeseries

//! Decorrelates ("whitens") an M-channel, N-sample timeseries that is too
//! large to hold in memory: a whitening matrix is derived via SVD from a
//! channel covariance estimated over sampled chunks, then applied to every
//! chunk in parallel, and the whitened chunks are reassembled into the
//! output array in temporal order.
//!
//! ```no_run
//! use parallel_whiten::{whiten, WhitenConfig};
//!
//! let config = WhitenConfig::new("raw.mda", "whitened.mda")
//!     .with_chunk_size(300_000)
//!     .with_staging_dir("/tmp/whiten-staging");
//! whiten(config)?;
//! # Ok::<(), parallel_whiten::WhitenError>(())
//! ```

pub mod covariance;
pub mod error;
pub mod mda;
pub mod pipeline;
pub mod progress;
pub mod staging;
pub mod timeseries;
pub mod whitening;

pub use error::{Result, WhitenError};
pub use mda::{DiskReadMda, DiskWriteMda};
pub use pipeline::{whiten, WhitenConfig, WhiteningPipeline, DEFAULT_CHUNK_SIZE};
pub use timeseries::TimeseriesSource;
pub use whitening::whitening_matrix;
