//! On-disk 2-D array format adapter.
//!
//! The format is a small little-endian header followed by the elements in
//! column-major order: `[dtype_code: i32, bytes_per_entry: i32, ndim: i32]`,
//! then one extent per dimension. A positive `ndim` is followed by `i32`
//! extents; a negative `ndim` marks 64-bit `i64` extents (with `-ndim`
//! dimensions), which is what the writer emits so output arrays are not
//! capped at `i32::MAX` samples.
//!
//! For a timeseries the first extent is the channel count M and the second
//! the sample count N; one time sample (a column) is a contiguous run of
//! M elements.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use ndarray::{Array2, ArrayView2, Axis};

use crate::error::{Result, WhitenError};
use crate::timeseries::TimeseriesSource;

const HEADER_FIXED_LEN: usize = 12;

/// Element type codes understood by the reader. Output is always Float32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MdaType {
    Byte,
    Float32,
    Int16,
    Int32,
    UInt16,
    Float64,
}

impl MdaType {
    fn from_code(code: i32) -> Option<Self> {
        match code {
            -2 => Some(MdaType::Byte),
            -3 => Some(MdaType::Float32),
            -4 => Some(MdaType::Int16),
            -5 => Some(MdaType::Int32),
            -6 => Some(MdaType::UInt16),
            -7 => Some(MdaType::Float64),
            _ => None,
        }
    }

    fn bytes_per_entry(self) -> usize {
        match self {
            MdaType::Byte => 1,
            MdaType::Int16 | MdaType::UInt16 => 2,
            MdaType::Float32 | MdaType::Int32 => 4,
            MdaType::Float64 => 8,
        }
    }
}

const FLOAT32_CODE: i32 = -3;

fn read_i32_le(bytes: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn read_i64_le(bytes: &[u8], offset: usize) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    i64::from_le_bytes(buf)
}

fn format_error(path: &Path, what: &str) -> WhitenError {
    WhitenError::io(
        format!("parsing array header of {}", path.display()),
        std::io::Error::new(std::io::ErrorKind::InvalidData, what.to_string()),
    )
}

/// Memory-mapped read-only view of a persisted M×N array.
///
/// The mapping is shared: `read_block` takes `&self`, so one reader serves
/// every worker thread concurrently with no locking.
pub struct DiskReadMda {
    map: Mmap,
    dtype: MdaType,
    rows: usize,
    cols: usize,
    data_offset: usize,
    path: PathBuf,
}

impl DiskReadMda {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .map_err(|e| WhitenError::io(format!("opening input array {}", path.display()), e))?;
        // Safety: the input array is read-only for the whole run; nothing
        // truncates or rewrites it while the map is live.
        let map = unsafe { Mmap::map(&file) }
            .map_err(|e| WhitenError::io(format!("mapping input array {}", path.display()), e))?;

        if map.len() < HEADER_FIXED_LEN {
            return Err(format_error(&path, "file too short for header"));
        }
        let code = read_i32_le(&map, 0);
        let dtype = MdaType::from_code(code)
            .ok_or_else(|| format_error(&path, &format!("unsupported element type code {code}")))?;
        let bytes_per_entry = read_i32_le(&map, 4);
        if bytes_per_entry != dtype.bytes_per_entry() as i32 {
            return Err(format_error(
                &path,
                &format!("bytes-per-entry {bytes_per_entry} does not match element type"),
            ));
        }

        let ndim_raw = read_i32_le(&map, 8);
        let (ndim, extent_len) = if ndim_raw < 0 {
            ((-ndim_raw) as usize, 8)
        } else {
            (ndim_raw as usize, 4)
        };
        if ndim != 2 {
            return Err(format_error(&path, &format!("expected 2 dimensions, found {ndim}")));
        }
        let data_offset = HEADER_FIXED_LEN + ndim * extent_len;
        if map.len() < data_offset {
            return Err(format_error(&path, "file too short for dimension extents"));
        }
        let (rows, cols) = if extent_len == 8 {
            (
                read_i64_le(&map, HEADER_FIXED_LEN),
                read_i64_le(&map, HEADER_FIXED_LEN + 8),
            )
        } else {
            (
                read_i32_le(&map, HEADER_FIXED_LEN) as i64,
                read_i32_le(&map, HEADER_FIXED_LEN + 4) as i64,
            )
        };
        if rows <= 0 || cols < 0 {
            return Err(format_error(&path, &format!("invalid extents ({rows}, {cols})")));
        }
        let (rows, cols) = (rows as usize, cols as usize);

        let expected_len = rows
            .checked_mul(cols)
            .and_then(|n| n.checked_mul(dtype.bytes_per_entry()))
            .and_then(|n| n.checked_add(data_offset))
            .ok_or_else(|| format_error(&path, "dimension extents overflow"))?;
        if map.len() < expected_len {
            return Err(format_error(
                &path,
                &format!("truncated payload: expected {expected_len} bytes, found {}", map.len()),
            ));
        }

        Ok(Self {
            map,
            dtype,
            rows,
            cols,
            data_offset,
            path,
        })
    }

    pub fn num_channels(&self) -> usize {
        self.rows
    }

    pub fn num_samples(&self) -> usize {
        self.cols
    }

    /// Decodes the contiguous sample range `[t_start, t_start + t_count)`
    /// into an `(rows, t_count)` f64 matrix.
    pub fn read_block(&self, t_start: usize, t_count: usize) -> Result<Array2<f64>> {
        let end = t_start.checked_add(t_count).filter(|&e| e <= self.cols);
        if end.is_none() {
            return Err(WhitenError::io(
                format!(
                    "reading samples [{t_start}, {}) of {}",
                    t_start.wrapping_add(t_count),
                    self.path.display()
                ),
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("range exceeds the {} samples present", self.cols),
                ),
            ));
        }
        let bpe = self.dtype.bytes_per_entry();
        let byte_start = self.data_offset + t_start * self.rows * bpe;
        let byte_len = t_count * self.rows * bpe;
        let values = decode_to_f64(&self.map[byte_start..byte_start + byte_len], self.dtype);
        // Column t is the contiguous run values[t*rows .. (t+1)*rows].
        Ok(Array2::from_shape_fn((self.rows, t_count), |(m, t)| {
            values[t * self.rows + m]
        }))
    }
}

impl TimeseriesSource for DiskReadMda {
    fn num_channels(&self) -> usize {
        self.rows
    }

    fn num_samples(&self) -> usize {
        self.cols
    }

    fn read_block(&self, t_start: usize, t_count: usize) -> Result<Array2<f64>> {
        DiskReadMda::read_block(self, t_start, t_count)
    }
}

fn decode_to_f64(bytes: &[u8], dtype: MdaType) -> Vec<f64> {
    match dtype {
        MdaType::Byte => bytes.iter().map(|&b| b as f64).collect(),
        MdaType::Int16 => bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]) as f64)
            .collect(),
        MdaType::UInt16 => bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]) as f64)
            .collect(),
        MdaType::Int32 => bytes
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
            .collect(),
        MdaType::Float32 => bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
            .collect(),
        MdaType::Float64 => bytes
            .chunks_exact(8)
            .map(|c| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(c);
                f64::from_le_bytes(buf)
            })
            .collect(),
    }
}

/// Append-only float32 writer.
///
/// `create` emits a header-only placeholder with zero samples; each
/// `append_block` extends the payload and rewrites the sample-count
/// extent, so the header always describes the bytes on disk.
pub struct DiskWriteMda {
    file: File,
    rows: usize,
    cols: usize,
    path: PathBuf,
}

impl DiskWriteMda {
    pub fn create(path: impl AsRef<Path>, rows: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| WhitenError::io(format!("creating output array {}", path.display()), e))?;

        let mut header = Vec::with_capacity(HEADER_FIXED_LEN + 16);
        header.extend_from_slice(&FLOAT32_CODE.to_le_bytes());
        header.extend_from_slice(&4i32.to_le_bytes());
        // ndim = -2: two dimensions with 64-bit extents.
        header.extend_from_slice(&(-2i32).to_le_bytes());
        header.extend_from_slice(&(rows as i64).to_le_bytes());
        header.extend_from_slice(&0i64.to_le_bytes());
        file.write_all(&header)
            .map_err(|e| WhitenError::io(format!("writing header of {}", path.display()), e))?;

        Ok(Self {
            file,
            rows,
            cols: 0,
            path,
        })
    }

    pub fn num_samples(&self) -> usize {
        self.cols
    }

    /// Appends a column block, extending the sample count by
    /// `block.ncols()`. The block's row count must match the declared
    /// channel count.
    pub fn append_block(&mut self, block: ArrayView2<f32>) -> Result<()> {
        if block.nrows() != self.rows {
            return Err(WhitenError::ShapeMismatch {
                context: format!("appending a column block to {}", self.path.display()),
                expected_rows: self.rows,
                actual_rows: block.nrows(),
            });
        }

        // Serialize column-major: every sample's M channel values in a row.
        let mut values = Vec::with_capacity(block.len());
        for col in block.axis_iter(Axis(1)) {
            values.extend(col.iter().copied());
        }

        self.file
            .seek(SeekFrom::End(0))
            .map_err(|e| WhitenError::io(format!("seeking to end of {}", self.path.display()), e))?;
        self.file
            .write_all(bytemuck::cast_slice(&values))
            .map_err(|e| WhitenError::io(format!("appending to {}", self.path.display()), e))?;
        self.cols += block.ncols();
        self.rewrite_extents()
    }

    fn rewrite_extents(&mut self) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(HEADER_FIXED_LEN as u64))
            .map_err(|e| WhitenError::io(format!("seeking header of {}", self.path.display()), e))?;
        let mut extents = [0u8; 16];
        extents[..8].copy_from_slice(&(self.rows as i64).to_le_bytes());
        extents[8..].copy_from_slice(&(self.cols as i64).to_le_bytes());
        self.file
            .write_all(&extents)
            .map_err(|e| WhitenError::io(format!("updating header of {}", self.path.display()), e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.mda");

        let mut writer = DiskWriteMda::create(&path, 2).unwrap();
        writer
            .append_block(array![[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]].view())
            .unwrap();
        writer
            .append_block(array![[7.0f32], [8.0]].view())
            .unwrap();
        drop(writer);

        let reader = DiskReadMda::open(&path).unwrap();
        assert_eq!(reader.num_channels(), 2);
        assert_eq!(reader.num_samples(), 4);
        let block = reader.read_block(0, 4).unwrap();
        assert_eq!(block, array![[1.0, 2.0, 3.0, 7.0], [4.0, 5.0, 6.0, 8.0]]);
    }

    #[test]
    fn ranged_read_selects_columns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.mda");
        let mut writer = DiskWriteMda::create(&path, 2).unwrap();
        writer
            .append_block(array![[0.0f32, 1.0, 2.0, 3.0], [10.0, 11.0, 12.0, 13.0]].view())
            .unwrap();
        drop(writer);

        let reader = DiskReadMda::open(&path).unwrap();
        let block = reader.read_block(1, 2).unwrap();
        assert_eq!(block, array![[1.0, 2.0], [11.0, 12.0]]);
    }

    #[test]
    fn header_only_placeholder_has_zero_samples() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.mda");
        let writer = DiskWriteMda::create(&path, 5).unwrap();
        drop(writer);

        let reader = DiskReadMda::open(&path).unwrap();
        assert_eq!(reader.num_channels(), 5);
        assert_eq!(reader.num_samples(), 0);
    }

    #[test]
    fn out_of_range_read_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.mda");
        let mut writer = DiskWriteMda::create(&path, 1).unwrap();
        writer.append_block(array![[1.0f32, 2.0]].view()).unwrap();
        drop(writer);

        let reader = DiskReadMda::open(&path).unwrap();
        assert!(matches!(
            reader.read_block(1, 5),
            Err(WhitenError::Io { .. })
        ));
    }

    #[test]
    fn row_count_mismatch_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.mda");
        let mut writer = DiskWriteMda::create(&path, 3).unwrap();
        let err = writer
            .append_block(array![[1.0f32, 2.0], [3.0, 4.0]].view())
            .unwrap_err();
        assert!(matches!(err, WhitenError::ShapeMismatch { expected_rows: 3, actual_rows: 2, .. }));
    }

    #[test]
    fn reads_int16_with_32bit_extents() {
        // Hand-built file in the legacy 32-bit-extent form, int16 elements.
        let dir = tempdir().unwrap();
        let path = dir.path().join("in.mda");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(-4i32).to_le_bytes()); // int16
        bytes.extend_from_slice(&2i32.to_le_bytes());
        bytes.extend_from_slice(&2i32.to_le_bytes()); // ndim = 2, 32-bit extents
        bytes.extend_from_slice(&2i32.to_le_bytes()); // rows
        bytes.extend_from_slice(&3i32.to_le_bytes()); // cols
        for v in [1i16, -2, 3, -4, 5, -6] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        std::fs::write(&path, &bytes).unwrap();

        let reader = DiskReadMda::open(&path).unwrap();
        assert_eq!(reader.num_channels(), 2);
        assert_eq!(reader.num_samples(), 3);
        let block = reader.read_block(0, 3).unwrap();
        assert_eq!(block, array![[1.0, 3.0, 5.0], [-2.0, -4.0, -6.0]]);
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.mda");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(-3i32).to_le_bytes());
        bytes.extend_from_slice(&4i32.to_le_bytes());
        bytes.extend_from_slice(&2i32.to_le_bytes());
        bytes.extend_from_slice(&4i32.to_le_bytes()); // rows
        bytes.extend_from_slice(&4i32.to_le_bytes()); // cols, but no payload follows
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(DiskReadMda::open(&path), Err(WhitenError::Io { .. })));
    }
}
