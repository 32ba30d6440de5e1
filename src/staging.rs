//! Keyed write-once store for whitened chunks awaiting reassembly.
//!
//! Each chunk is staged as its own `whitened-<num>.bin` file (a u64
//! rows / u64 cols header, then the f32 payload column-major), so
//! concurrent workers staging distinct keys never contend at the
//! filesystem level. The pipeline still serializes writes behind the
//! progress guard so the staging write and the completed-count update
//! stay one atomic unit.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{info, warn};
use ndarray::{Array2, ArrayView2, Axis};

use crate::error::{Result, WhitenError};

const STAGED_HEADER_LEN: usize = 16;

pub struct ChunkStagingStore {
    dir: PathBuf,
}

impl ChunkStagingStore {
    /// Opens the store in `explicit` if configured, otherwise in the
    /// current directory with a warning.
    pub fn resolve(explicit: Option<&Path>) -> Self {
        let dir = match explicit {
            Some(dir) => dir.to_path_buf(),
            None => {
                warn!("no staging directory configured; staging whitened chunks in the current directory");
                PathBuf::from(".")
            }
        };
        info!("using staging directory {}", dir.display());
        Self { dir }
    }

    fn chunk_path(&self, num: usize) -> PathBuf {
        self.dir.join(format!("whitened-{num}.bin"))
    }

    /// Stages one whitened chunk under key `num`. Each key may be written
    /// exactly once; a second write is an error.
    pub fn write(&self, num: usize, block: ArrayView2<f32>) -> Result<()> {
        let path = self.chunk_path(num);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                WhitenError::io(format!("staging whitened chunk {num} at {}", path.display()), e)
            })?;

        let mut bytes = Vec::with_capacity(STAGED_HEADER_LEN + block.len() * 4);
        bytes.extend_from_slice(&(block.nrows() as u64).to_le_bytes());
        bytes.extend_from_slice(&(block.ncols() as u64).to_le_bytes());
        let mut values = Vec::with_capacity(block.len());
        for col in block.axis_iter(Axis(1)) {
            values.extend(col.iter().copied());
        }
        bytes.extend_from_slice(bytemuck::cast_slice(&values));

        file.write_all(&bytes).map_err(|e| {
            WhitenError::io(format!("staging whitened chunk {num} at {}", path.display()), e)
        })
    }

    /// Reads the staged chunk under key `num`. A missing or truncated key
    /// is a loud error, never a silent skip.
    pub fn read(&self, num: usize) -> Result<Array2<f32>> {
        let path = self.chunk_path(num);
        let bytes = fs::read(&path).map_err(|e| {
            WhitenError::io(format!("reading staged chunk {num} from {}", path.display()), e)
        })?;
        if bytes.len() < STAGED_HEADER_LEN {
            return Err(self.truncated(num, &path));
        }
        let rows = u64::from_le_bytes(bytes[0..8].try_into().unwrap()) as usize;
        let cols = u64::from_le_bytes(bytes[8..16].try_into().unwrap()) as usize;
        let expected_len = STAGED_HEADER_LEN + rows.saturating_mul(cols).saturating_mul(4);
        if bytes.len() != expected_len {
            return Err(self.truncated(num, &path));
        }
        let values: Vec<f32> = bytes[STAGED_HEADER_LEN..]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Array2::from_shape_fn((rows, cols), |(m, t)| values[t * rows + m]))
    }

    /// Removes every staged key in `[0, num_chunks)`. Missing keys are
    /// fine: this runs both before phase 2 (clearing leftovers of an
    /// aborted earlier run, so write-once holds within the run) and after
    /// reassembly (the staged chunks are consumed).
    pub fn clear(&self, num_chunks: usize) -> Result<()> {
        for num in 0..num_chunks {
            let path = self.chunk_path(num);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(WhitenError::io(
                        format!("removing staged chunk {num} at {}", path.display()),
                        e,
                    ))
                }
            }
        }
        Ok(())
    }

    fn truncated(&self, num: usize, path: &Path) -> WhitenError {
        WhitenError::io(
            format!("reading staged chunk {num} from {}", path.display()),
            std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "staged chunk is truncated",
            ),
        )
    }
}
