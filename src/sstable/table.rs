use crate::bloom::BloomFilter;
use crate::env::{FileAccess, FileId, FileMetadata, FileMode, FileSystem};
use crate::error::LsmError;
use crate::ioutils::read_exact_at;
use crate::iterator::KvIterator;
use crate::sstable::block::{Block, BlockHandle, BlockIter};
use crate::sstable::block_cache::BlockCache;
use crate::sstable::filter_key;
use crate::sstable::footer::Footer;
use crate::Result;
use std::fs::File;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Immutable on-disk sorted table.
pub struct PhysicalTable {
    metadata: FileMetadata,
    file: File,
    file_len: u64,
    filter: BloomFilter,
    first_key: Vec<u8>,
    last_key: Vec<u8>,
    index: Arc<Block>,
    cache: Arc<dyn BlockCache>,
    disposed: AtomicBool,
}

impl PhysicalTable {
    pub fn open(
        fs: &dyn FileSystem,
        metadata: FileMetadata,
        cache: Arc<dyn BlockCache>,
    ) -> Result<PhysicalTable> {
        let file = fs.open_file(&metadata.path, FileMode::Open, FileAccess::Read)?;
        let file_len = file.metadata()?.len();
        let footer = Footer::load_footer(&file, file_len)?;
        let data_end = file_len - footer.encoded_len();
        let index = read_block(&file, data_end, metadata.id, footer.index_handle, &*cache)?;
        Ok(PhysicalTable {
            file_len: data_end,
            filter: BloomFilter::from_bytes(footer.filter),
            first_key: footer.first_key,
            last_key: footer.last_key,
            index,
            file,
            metadata,
            cache,
            disposed: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn id(&self) -> FileId {
        self.metadata.id
    }

    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    pub fn first_key(&self) -> &[u8] {
        &self.first_key
    }

    pub fn last_key(&self) -> &[u8] {
        &self.last_key
    }

    pub fn is_empty(&self) -> bool {
        self.index.size() == 0
    }

    /// Exact-match lookup.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self
            .find_first_in(key, key, filter_key(key))?
            .map(|(_, value)| value))
    }

    /// First entry in `[start, end]`, consulting the bloom filter with
    /// `filter_key` before touching any data block. Every key of that range
    /// must map to `filter_key`.
    pub(crate) fn find_first_in(
        &self,
        start: &[u8],
        end: &[u8],
        filter_key: &[u8],
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(LsmError::Disposed);
        }
        if self.is_empty() || end < self.first_key() || start > self.last_key() {
            return Ok(None);
        }
        if !self.filter.test(filter_key) {
            return Ok(None);
        }

        let mut index_iter = self.index.iter();
        index_iter.seek(start);
        index_iter.status()?;
        if !index_iter.valid() {
            return Ok(None);
        }
        let handle = BlockHandle::decode(index_iter.value())?;
        let mut data_iter = self.read_block(handle)?.iter();
        data_iter.seek(start);
        data_iter.status()?;
        if data_iter.valid() && data_iter.key() <= end {
            Ok(Some((data_iter.key().to_vec(), data_iter.value().to_vec())))
        } else {
            Ok(None)
        }
    }

    pub fn iter(self: &Arc<Self>) -> TableIter {
        TableIter {
            index_iter: self.index.iter(),
            table: self.clone(),
            data_iter: None,
            error: None,
        }
    }

    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    fn read_block(&self, handle: BlockHandle) -> Result<Arc<Block>> {
        read_block(&self.file, self.file_len, self.id(), handle, &*self.cache)
    }
}

fn read_block(
    file: &File,
    data_end: u64,
    id: FileId,
    handle: BlockHandle,
    cache: &dyn BlockCache,
) -> Result<Arc<Block>> {
    if let Some(block) = cache.get(id, handle) {
        return Ok(block);
    }
    let end = handle.offset.checked_add(handle.length);
    if end.map_or(true, |end| end > data_end) {
        return Err(LsmError::corrupted(format!(
            "block {:?} beyond the data region of {}",
            handle, id
        )));
    }
    let mut data = vec![0u8; handle.length as usize];
    read_exact_at(file, &mut data, handle.offset)?;
    let block = Arc::new(Block::new(data));
    cache.insert(id, handle, block.clone());
    Ok(block)
}

/// Two-level cursor: the index block picks a data block, the data block
/// yields entries.
pub struct TableIter {
    table: Arc<PhysicalTable>,
    index_iter: BlockIter,
    data_iter: Option<BlockIter>,
    error: Option<LsmError>,
}

impl TableIter {
    fn init_data_block(&mut self) {
        self.data_iter = None;
        if let Err(e) = self.index_iter.status() {
            self.error = Some(e);
            return;
        }
        if !self.index_iter.valid() {
            return;
        }
        let block = BlockHandle::decode(self.index_iter.value())
            .and_then(|handle| self.table.read_block(handle));
        match block {
            Ok(block) => self.data_iter = Some(block.iter()),
            Err(e) => self.error = Some(e),
        }
    }

    fn skip_exhausted_blocks(&mut self) {
        while let Some(data_iter) = self.data_iter.as_mut() {
            if data_iter.valid() {
                return;
            }
            if let Err(e) = data_iter.status() {
                self.error = Some(e);
                self.data_iter = None;
                return;
            }
            self.index_iter.next();
            self.init_data_block();
            if let Some(data_iter) = self.data_iter.as_mut() {
                data_iter.seek_to_first();
            }
        }
    }
}

impl KvIterator for TableIter {
    fn valid(&self) -> bool {
        self.data_iter.as_ref().map_or(false, |d| d.valid())
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        match &self.data_iter {
            Some(d) => d.key(),
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        match &self.data_iter {
            Some(d) => d.value(),
            None => &[],
        }
    }

    fn seek_to_first(&mut self) {
        self.index_iter.seek_to_first();
        self.init_data_block();
        if let Some(data_iter) = self.data_iter.as_mut() {
            data_iter.seek_to_first();
        }
        self.skip_exhausted_blocks();
    }

    fn seek(&mut self, target: &[u8]) {
        self.index_iter.seek(target);
        self.init_data_block();
        if let Some(data_iter) = self.data_iter.as_mut() {
            data_iter.seek(target);
        }
        self.skip_exhausted_blocks();
    }

    fn next(&mut self) {
        if let Some(data_iter) = self.data_iter.as_mut() {
            data_iter.next();
        }
        self.skip_exhausted_blocks();
    }

    fn status(&mut self) -> Result<()> {
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
