use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use pointdb_storage::mmap::MmapFile;
use tokio::sync::{OwnedRwLockReadGuard, RwLock};

use crate::engine::pd1::{
    BLOCK_HEADER_SIZE, FILE_HEADER_SIZE, FORMAT, MAGIC_NUMBER, SERIES_HEADER_SIZE, TRAILER_SIZE,
};

/// DataFile is a sealed, memory-mapped data file: magic header, blocks
/// grouped by ascending series id, an id-to-offset index, and a trailer
/// carrying the file's time range and series count.
///
/// The per-file lock is held shared by readers for the duration of a scan
/// and exclusively by delete, so a file is never unlinked under a running
/// query. The mapping itself stays valid until the last Arc drops.
pub struct DataFile {
    path: PathBuf,
    map: MmapFile,
    size: u32,
    lock: Arc<RwLock<()>>,
    deleted: AtomicBool,
}

impl DataFile {
    /// open memory-maps the file at path, validating the magic header and
    /// trailer before handing it out.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Arc<DataFile>> {
        let path = path.as_ref().to_path_buf();
        let map = MmapFile::open(&path)?;
        let size = map.len() as u32;

        if size < FILE_HEADER_SIZE + TRAILER_SIZE {
            bail!("data file {} too short: {} bytes", path.display(), size);
        }
        let b = map.as_slice();
        let magic = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
        if magic != MAGIC_NUMBER {
            bail!("data file {} has bad magic {:#x}", path.display(), magic);
        }

        let df = DataFile {
            path,
            map,
            size,
            lock: Arc::new(RwLock::new(())),
            deleted: AtomicBool::new(false),
        };

        let index = df.index_position();
        if index < FILE_HEADER_SIZE || index > df.size - TRAILER_SIZE {
            bail!(
                "data file {} has corrupt index position {}",
                df.path.display(),
                index
            );
        }

        Ok(Arc::new(df))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn mod_time(&self) -> SystemTime {
        self.map.mod_time()
    }

    fn u64_at(&self, pos: u32) -> u64 {
        let b = self.map.as_slice();
        let p = pos as usize;
        u64::from_be_bytes([
            b[p],
            b[p + 1],
            b[p + 2],
            b[p + 3],
            b[p + 4],
            b[p + 5],
            b[p + 6],
            b[p + 7],
        ])
    }

    fn u32_at(&self, pos: u32) -> u32 {
        let b = self.map.as_slice();
        let p = pos as usize;
        u32::from_be_bytes([b[p], b[p + 1], b[p + 2], b[p + 3]])
    }

    pub fn min_time(&self) -> i64 {
        self.u64_at(self.size - 20) as i64
    }

    pub fn max_time(&self) -> i64 {
        self.u64_at(self.size - 12) as i64
    }

    pub fn series_count(&self) -> u32 {
        self.u32_at(self.size - 4)
    }

    /// index_position is the offset of the first index entry; everything
    /// below it is block data.
    pub fn index_position(&self) -> u32 {
        self.size - (self.series_count() * SERIES_HEADER_SIZE + TRAILER_SIZE)
    }

    /// id_to_position reads the full index into a map from series id to the
    /// offset of that id's first block.
    pub fn id_to_position(&self) -> HashMap<u64, u32> {
        let count = self.series_count();
        let index_start = self.index_position();

        let mut m = HashMap::with_capacity(count as usize);
        for i in 0..count {
            let offset = index_start + i * SERIES_HEADER_SIZE;
            m.insert(self.u64_at(offset), self.u32_at(offset + 8));
        }
        m
    }

    /// starting_position_for_id binary searches the index for the offset of
    /// the id's first block. Returns 0 when the id has no data in this file;
    /// 0 is never a valid block position because the magic header occupies
    /// it.
    pub fn starting_position_for_id(&self, id: u64) -> u32 {
        let index_start = self.index_position();

        let mut min = 0u32;
        let mut max = self.series_count();
        while min < max {
            let mid = (max - min) / 2 + min;
            let offset = mid * SERIES_HEADER_SIZE + index_start;
            let check_id = self.u64_at(offset);
            if check_id == id {
                return self.u32_at(offset + 8);
            } else if check_id < id {
                min = mid + 1;
            } else {
                max = mid;
            }
        }
        0
    }

    /// block reads the block header at pos, returning the series id, the
    /// block's first timestamp (decoded from its 8-byte prefix) and the
    /// block bytes. Returns None once pos reaches the index region.
    pub fn block(&self, pos: u32) -> Option<(u64, i64, &[u8])> {
        if pos >= self.index_position() {
            return None;
        }
        let id = self.u64_at(pos);
        let length = self.u32_at(pos + 8);
        let start = (pos + BLOCK_HEADER_SIZE) as usize;
        let block = &self.map.as_slice()[start..start + length as usize];
        let t = self.u64_at(pos + BLOCK_HEADER_SIZE) as i64;
        Some((id, t, block))
    }

    /// raw returns the file bytes in [start, end), block headers included.
    pub fn raw(&self, start: u32, end: u32) -> &[u8] {
        &self.map.as_slice()[start as usize..end as usize]
    }

    /// read_guard takes the shared half of the per-file lock, keeping delete
    /// out for as long as the guard lives.
    pub async fn read_guard(self: &Arc<Self>) -> OwnedRwLockReadGuard<()> {
        self.lock.clone().read_owned().await
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    /// delete unlinks the file once every reader has released its shared
    /// guard. The mapping stays valid for any Arc still alive.
    pub async fn delete(&self) -> anyhow::Result<()> {
        let _guard = self.lock.write().await;
        tokio::fs::remove_file(&self.path).await?;
        self.deleted.store(true, Ordering::Release);
        Ok(())
    }
}

/// data_file_path names the sequence-numbered data file id inside dir.
pub fn data_file_path(dir: &Path, id: u32) -> PathBuf {
    dir.join(format!("{:07}.{}", id, FORMAT))
}

/// id_from_file_name parses the sequence number out of a data file name.
pub fn id_from_file_name(name: &str) -> Option<u32> {
    let stem = name.strip_suffix(&format!(".{}", FORMAT))?;
    stem.parse().ok()
}

/// sort_data_files orders a file set by ascending min time.
pub fn sort_data_files(files: &mut [Arc<DataFile>]) {
    files.sort_by_key(|f| f.min_time());
}
