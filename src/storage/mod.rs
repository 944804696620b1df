//! Column file storage.
//!
//! The on-disk column format the generated code scans: a numeric column is
//! a headerless flat array of little-endian fixed-width elements; a text
//! column is a data blob plus an offsets file of (offset, length) u32
//! pairs. This module is the Rust-side boundary over that format — writers
//! for loaders and tests, and a mmap-backed reader used for catalog row
//! counts.

pub mod buffer_pool;
pub mod column;

pub use buffer_pool::BufferPool;
pub use column::{
    read_i32_column, write_f64_column, write_i32_column, write_i64_column, write_text_column,
    ColumnFile, StorageError,
};
