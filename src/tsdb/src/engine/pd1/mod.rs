use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod block;
pub mod catalog;
pub mod codec;
pub mod compactor;
pub mod cursor;
pub mod data_file;
pub mod engine;
pub mod range_lock;
pub mod rewriter;
pub mod tx;
pub mod value;

/// FORMAT is the file format name of this engine and the extension of its
/// sealed data files.
pub const FORMAT: &str = "pd1";

/// MAGIC_NUMBER is written as the first 4 bytes of a data file to identify
/// it as a pd1 formatted file.
pub const MAGIC_NUMBER: u32 = 0x16D116D1;

/// MAX_DATA_FILE_SIZE is the hard ceiling on a data file; the compactor
/// refuses to fold files at or above it.
pub const MAX_DATA_FILE_SIZE: u32 = 1024 * 1024 * 1024; // 1GB

/// DEFAULT_ROTATE_BLOCK_SIZE is the block size above which compaction copies
/// a block verbatim instead of decoding it.
pub const DEFAULT_ROTATE_BLOCK_SIZE: u32 = 512 * 1024; // 512KB

/// DEFAULT_ROTATE_FILE_SIZE is the file size above which a flush writes a
/// new file rather than merging into the existing one.
pub const DEFAULT_ROTATE_FILE_SIZE: u32 = 5 * 1024 * 1024; // 5MB

/// DEFAULT_MAX_POINTS_PER_BLOCK caps how many values are encoded into one
/// block.
pub const DEFAULT_MAX_POINTS_PER_BLOCK: usize = 1000;

// byte size constants for the data file layout
pub const FILE_HEADER_SIZE: u32 = 4;
pub const BLOCK_HEADER_SIZE: u32 = 12; // series id + block length
pub const SERIES_HEADER_SIZE: u32 = 12; // series id + first block position
pub const TRAILER_SIZE: u32 = 20; // min time + max time + series count

/// EngineOptions tune the flush, rotation and compaction behavior of one
/// shard's engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineOptions {
    /// File size above which flushed points split into a new file instead of
    /// merging into the existing one.
    pub rotate_file_size: u32,
    /// Files at or above this size are never selected for compaction.
    pub max_data_file_size: u32,
    /// Blocks longer than this are copied raw during compaction.
    pub rotate_block_size: u32,
    /// Ceiling on the number of values encoded into a single block.
    pub max_points_per_block: usize,
    /// Minimum age of a file before it is eligible for compaction.
    pub compaction_age: Duration,
    /// Minimum number of eligible files before a compaction triggers.
    pub compaction_file_count: usize,
    /// Age of the oldest file above which maintenance runs a full compaction.
    pub index_compaction_full_age: Duration,
    /// Cool-down between two automatic compactions.
    pub index_minimum_compaction_interval: Duration,
    /// Disables automatic compaction entirely.
    pub skip_compaction: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            rotate_file_size: DEFAULT_ROTATE_FILE_SIZE,
            max_data_file_size: MAX_DATA_FILE_SIZE,
            rotate_block_size: DEFAULT_ROTATE_BLOCK_SIZE,
            max_points_per_block: DEFAULT_MAX_POINTS_PER_BLOCK,
            compaction_age: Duration::from_secs(60),
            compaction_file_count: 5,
            index_compaction_full_age: Duration::from_secs(300),
            index_minimum_compaction_interval: Duration::from_secs(60),
            skip_compaction: false,
        }
    }
}
