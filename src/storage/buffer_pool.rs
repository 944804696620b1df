//! Memory-map cache over column files.
//!
//! Maps are opened once per path and shared for the pool's lifetime;
//! individual unmapping is not supported. The pool is an injected service,
//! not a process global, so the compiler stays testable without it.

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;
use parking_lot::Mutex;

/// Shared, lazily-populated mapping cache.
#[derive(Debug, Default)]
pub struct BufferPool {
    maps: Mutex<HashMap<PathBuf, Arc<Mmap>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        BufferPool::default()
    }

    /// Map `path`, returning the cached mapping when it was opened before.
    pub fn open(&self, path: &Path) -> io::Result<Arc<Mmap>> {
        let mut maps = self.maps.lock();
        if let Some(map) = maps.get(path) {
            return Ok(Arc::clone(map));
        }

        let file = File::open(path)?;
        let map = Arc::new(unsafe { Mmap::map(&file)? });
        maps.insert(path.to_path_buf(), Arc::clone(&map));
        Ok(map)
    }

    /// Number of cached mappings.
    pub fn len(&self) -> usize {
        self.maps.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.lock().is_empty()
    }
}
