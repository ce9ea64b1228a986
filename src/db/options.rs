use crate::env::{FileSystem, LocalFileSystem};
use crate::error::LsmError;
use crate::sstable::{BlockCache, PinningBlockCache, TableOptions, WeakBlockCache, MIN_BLOCK_SIZE};
use crate::Result;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Largest memory table the skiplist arena is guaranteed to hold, even when
/// every record is as small as a record can be.
pub const MAX_VIRTUAL_TABLE_SIZE: usize = 32 << 20;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlockCacheKind {
    /// Cached blocks stay in memory until their table is deleted.
    Pinning,
    /// Cached blocks are dropped once no reader holds them.
    Weak,
}

impl BlockCacheKind {
    pub(crate) fn build(self) -> Arc<dyn BlockCache> {
        match self {
            BlockCacheKind::Pinning => Arc::new(PinningBlockCache::new()),
            BlockCacheKind::Weak => Arc::new(WeakBlockCache::new()),
        }
    }
}

#[derive(Clone)]
pub struct DatabaseOptions {
    pub path: PathBuf,
    /// Bytes buffered by a write-ahead log before they reach its file.
    pub write_log_buffer_size: usize,
    /// Manifest log size that triggers segmentation.
    pub manifest_log_size: u64,
    pub data_block_size: usize,
    /// Bloom filter size of a table, in bytes.
    pub bloom_filter_size: usize,
    /// Key and value bytes a memory table accepts before it is rotated.
    pub virtual_table_size: usize,
    pub max_pending_compactions: usize,
    pub block_cache: BlockCacheKind,
    /// Sync the manifest and finished tables to disk, and every log write.
    pub sync: bool,
    pub file_system: Arc<dyn FileSystem>,
}

impl DatabaseOptions {
    pub fn new(path: impl AsRef<Path>) -> DatabaseOptions {
        DatabaseOptions {
            path: path.as_ref().to_path_buf(),
            write_log_buffer_size: 4096,
            manifest_log_size: 4096,
            data_block_size: 4096,
            bloom_filter_size: 4096,
            virtual_table_size: 16 * 1024,
            max_pending_compactions: 64,
            block_cache: BlockCacheKind::Weak,
            sync: false,
            file_system: Arc::new(LocalFileSystem),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.data_block_size < MIN_BLOCK_SIZE {
            return Err(LsmError::Custom(format!(
                "data_block_size must be at least {}",
                MIN_BLOCK_SIZE
            )));
        }
        if self.virtual_table_size > MAX_VIRTUAL_TABLE_SIZE {
            return Err(LsmError::Custom(format!(
                "virtual_table_size must be at most {}",
                MAX_VIRTUAL_TABLE_SIZE
            )));
        }
        let positive = [
            ("write_log_buffer_size", self.write_log_buffer_size),
            ("bloom_filter_size", self.bloom_filter_size),
            ("virtual_table_size", self.virtual_table_size),
            ("max_pending_compactions", self.max_pending_compactions),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(LsmError::Custom(format!("{} must be positive", name)));
            }
        }
        Ok(())
    }

    pub(crate) fn table_options(&self) -> TableOptions {
        TableOptions {
            data_block_size: self.data_block_size,
            bloom_filter_size: self.bloom_filter_size,
        }
    }
}

impl fmt::Debug for DatabaseOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseOptions")
            .field("path", &self.path)
            .field("write_log_buffer_size", &self.write_log_buffer_size)
            .field("manifest_log_size", &self.manifest_log_size)
            .field("data_block_size", &self.data_block_size)
            .field("bloom_filter_size", &self.bloom_filter_size)
            .field("virtual_table_size", &self.virtual_table_size)
            .field("max_pending_compactions", &self.max_pending_compactions)
            .field("block_cache", &self.block_cache)
            .field("sync", &self.sync)
            .finish()
    }
}
