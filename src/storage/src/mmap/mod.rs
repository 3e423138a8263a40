use std::fs::File;
use std::io;
use std::path::Path;
use std::time::SystemTime;

use memmap2::{Mmap, MmapOptions};

/// MmapFile is a sealed file mapped read-only into memory. The mapping is
/// created with the populate hint so pages are faulted in up front; it stays
/// valid until the value is dropped, even after the file is unlinked.
pub struct MmapFile {
    map: Mmap,
    len: usize,
    mod_time: SystemTime,
}

impl MmapFile {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let f = File::open(path)?;
        let meta = f.metadata()?;
        let len = meta.len() as usize;
        let mod_time = meta.modified()?;

        let mut opts = MmapOptions::new();
        opts.len(len);
        #[cfg(target_os = "linux")]
        opts.populate();
        let map = unsafe { opts.map(&f)? };

        Ok(Self { map, len, mod_time })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn mod_time(&self) -> SystemTime {
        self.mod_time
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.map[..self.len]
    }
}
