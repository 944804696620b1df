//! Typed readers and writers for flat column files.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;
use thiserror::Error;

use crate::catalog::offsets_path_for;
use crate::plan::ScalarType;

use super::BufferPool;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("column I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("column file {path} is not a whole number of {width}-byte elements")]
    Misaligned { path: String, width: usize },
}

/// Element width of a column type in its file, in bytes.
pub fn element_width(ty: ScalarType) -> usize {
    match ty {
        ScalarType::Bool | ScalarType::I8 => 1,
        ScalarType::I16 => 2,
        ScalarType::I32 => 4,
        ScalarType::I64 | ScalarType::F64 | ScalarType::Date => 8,
        // Text rows are counted through the offsets file (two u32 per row).
        ScalarType::Text => 8,
    }
}

/// An opened column with its mapping and element type.
pub struct ColumnFile {
    map: Arc<Mmap>,
    ty: ScalarType,
}

impl ColumnFile {
    /// Open a column through the pool. For text columns pass the offsets
    /// file path; rows are (offset, length) pairs.
    pub fn open(pool: &BufferPool, path: &Path, ty: ScalarType) -> Result<Self, StorageError> {
        let target = if ty == ScalarType::Text {
            offsets_path_for(path)
        } else {
            path.to_path_buf()
        };
        let map = pool.open(&target)?;

        let width = element_width(ty);
        if map.len() % width != 0 {
            return Err(StorageError::Misaligned {
                path: target.to_string_lossy().into_owned(),
                width,
            });
        }
        Ok(ColumnFile { map, ty })
    }

    /// Number of rows: file size divided by element width.
    pub fn len(&self) -> usize {
        self.map.len() / element_width(self.ty)
    }

    pub fn is_empty(&self) -> bool {
        self.map.len() == 0
    }

    pub fn ty(&self) -> ScalarType {
        self.ty
    }
}

/// Write a little-endian i32 column.
pub fn write_i32_column(path: &Path, values: &[i32]) -> Result<(), StorageError> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    fs::write(path, bytes)?;
    Ok(())
}

/// Write a little-endian i64 column.
pub fn write_i64_column(path: &Path, values: &[i64]) -> Result<(), StorageError> {
    let mut bytes = Vec::with_capacity(values.len() * 8);
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    fs::write(path, bytes)?;
    Ok(())
}

/// Write a little-endian f64 column.
pub fn write_f64_column(path: &Path, values: &[f64]) -> Result<(), StorageError> {
    let mut bytes = Vec::with_capacity(values.len() * 8);
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    fs::write(path, bytes)?;
    Ok(())
}

/// Write a text column: the data blob at `path`, the (offset, length) pairs
/// at the conventional offsets path.
pub fn write_text_column(path: &Path, values: &[&str]) -> Result<(), StorageError> {
    let mut blob = Vec::new();
    let mut offsets = Vec::with_capacity(values.len() * 8);
    for v in values {
        offsets.extend_from_slice(&(blob.len() as u32).to_le_bytes());
        offsets.extend_from_slice(&(v.len() as u32).to_le_bytes());
        blob.extend_from_slice(v.as_bytes());
    }
    fs::write(path, blob)?;
    fs::write(offsets_path_for(path), offsets)?;
    Ok(())
}

/// Read an i32 column back (tests and the loader's verify step).
pub fn read_i32_column(path: &Path) -> Result<Vec<i32>, StorageError> {
    let bytes = fs::read(path)?;
    if bytes.len() % 4 != 0 {
        return Err(StorageError::Misaligned {
            path: path.to_string_lossy().into_owned(),
            width: 4,
        });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
