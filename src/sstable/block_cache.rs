use crate::env::FileId;
use crate::sstable::block::{Block, BlockHandle};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

pub type BlockKey = (FileId, BlockHandle);

/// Concurrent map from a block's location to its decoded form.
pub trait BlockCache: Send + Sync {
    fn get(&self, file: FileId, handle: BlockHandle) -> Option<Arc<Block>>;

    fn insert(&self, file: FileId, handle: BlockHandle, block: Arc<Block>);

    /// Forget every block of `file`.
    fn evict_file(&self, file: FileId);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keeps every cached block alive until its file is evicted.
#[derive(Default)]
pub struct PinningBlockCache {
    blocks: DashMap<BlockKey, Arc<Block>>,
}

impl PinningBlockCache {
    pub fn new() -> PinningBlockCache {
        PinningBlockCache::default()
    }
}

impl BlockCache for PinningBlockCache {
    fn get(&self, file: FileId, handle: BlockHandle) -> Option<Arc<Block>> {
        self.blocks.get(&(file, handle)).map(|b| b.value().clone())
    }

    fn insert(&self, file: FileId, handle: BlockHandle, block: Arc<Block>) {
        self.blocks.insert((file, handle), block);
    }

    fn evict_file(&self, file: FileId) {
        self.blocks.retain(|key, _| key.0 != file);
    }

    fn len(&self) -> usize {
        self.blocks.len()
    }
}

const MIN_PURGE_LEN: usize = 1024;

/// Holds blocks only while someone else does; a dropped block is decoded
/// again on its next access.
pub struct WeakBlockCache {
    blocks: DashMap<BlockKey, Weak<Block>>,
    /// Map length at which dead entries are swept out on insert.
    purge_at: AtomicUsize,
}

impl Default for WeakBlockCache {
    fn default() -> Self {
        WeakBlockCache {
            blocks: DashMap::new(),
            purge_at: AtomicUsize::new(MIN_PURGE_LEN),
        }
    }
}

impl WeakBlockCache {
    pub fn new() -> WeakBlockCache {
        WeakBlockCache::default()
    }

    /// Drop entries whose block is gone.
    pub fn purge(&self) {
        self.blocks.retain(|_, block| block.strong_count() > 0);
        let live = self.blocks.len();
        self.purge_at
            .store((live * 2).max(MIN_PURGE_LEN), Ordering::Release);
    }
}

impl BlockCache for WeakBlockCache {
    fn get(&self, file: FileId, handle: BlockHandle) -> Option<Arc<Block>> {
        self.blocks
            .get(&(file, handle))
            .and_then(|b| b.value().upgrade())
    }

    fn insert(&self, file: FileId, handle: BlockHandle, block: Arc<Block>) {
        self.blocks.insert((file, handle), Arc::downgrade(&block));
        if self.blocks.len() >= self.purge_at.load(Ordering::Acquire) {
            self.purge();
        }
    }

    fn evict_file(&self, file: FileId) {
        self.blocks
            .retain(|key, block| key.0 != file && block.strong_count() > 0);
    }

    fn len(&self) -> usize {
        self.blocks.len()
    }
}
