use crate::collections::skip_list::skiplist::{SkipList, NIL};
use crate::env::FileSystem;
use crate::error::LsmError;
use crate::iterator::KvIterator;
use crate::sstable::{PhysicalTableBuilder, TableOptions};
use crate::wal::PhysicalLog;
use crate::Result;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Writable in-memory table backed by a write-ahead log.
///
/// `size` counts the key and value bytes accepted so far and never exceeds
/// `capacity`; a write that would cross it fails with [`LsmError::Filled`]
/// and leaves the table untouched.
pub struct VirtualTable {
    list: SkipList,
    log: Option<Arc<PhysicalLog>>,
    size: AtomicUsize,
    capacity: usize,
    disposed: AtomicBool,
}

impl VirtualTable {
    pub fn new(capacity: usize, log: Option<Arc<PhysicalLog>>) -> VirtualTable {
        VirtualTable {
            list: SkipList::new(),
            log,
            size: AtomicUsize::new(0),
            capacity,
            disposed: AtomicBool::new(false),
        }
    }

    /// Rebuilds a table from a recovered log. The table is read-only: its log
    /// has no writer. Capacity grows to hold everything the log contains.
    pub fn replay(
        log: Arc<PhysicalLog>,
        fs: &dyn FileSystem,
        capacity: usize,
    ) -> Result<VirtualTable> {
        let list = SkipList::new();
        let mut size = 0;
        let count = log.replay(fs, |key, value| {
            list.insert(key, value)?;
            size += key.len() + value.len();
            Ok(())
        })?;
        debug!("replayed {} records from {}", count, log.id());
        Ok(VirtualTable {
            list,
            log: Some(log),
            size: AtomicUsize::new(size),
            capacity: capacity.max(size),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_disposed()?;
        let needed = key.len() + value.len();
        let capacity = self.capacity;
        self.size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |size| {
                match size.checked_add(needed) {
                    Some(total) if total <= capacity => Some(total),
                    _ => None,
                }
            })
            .map_err(|_| LsmError::Filled)?;

        // the log is written only once the node is allocated, so a full arena
        // leaves no record behind
        let inserted = self.list.insert_with(key, value, || match &self.log {
            Some(log) => log.log_set(key, value),
            None => Ok(()),
        });
        match inserted {
            Ok(true) => Ok(()),
            Ok(false) => {
                self.size.fetch_sub(needed, Ordering::AcqRel);
                Ok(())
            }
            Err(e) => {
                self.size.fetch_sub(needed, Ordering::AcqRel);
                Err(e)
            }
        }
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_disposed()?;
        Ok(self.list.get(key).map(|value| value.to_vec()))
    }

    /// First entry in `[start, end]`.
    pub(crate) fn find_first_in(
        &self,
        start: &[u8],
        end: &[u8],
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.check_disposed()?;
        let node = self.list.find_greater_or_equal(start);
        if node != NIL && self.list.key_of(node) <= end {
            Ok(Some((
                self.list.key_of(node).to_vec(),
                self.list.value_of(node).to_vec(),
            )))
        } else {
            Ok(None)
        }
    }

    pub fn iter(self: &Arc<Self>) -> VirtualTableIter {
        VirtualTableIter {
            table: self.clone(),
            node: NIL,
        }
    }

    /// Writes every entry, in key order, as a table into `writer`.
    pub fn flush<W: Write>(&self, writer: W, options: TableOptions) -> Result<W> {
        let mut builder = PhysicalTableBuilder::new(writer, options);
        let mut iter = self.list.iter();
        iter.seek_to_first();
        while iter.valid() {
            builder.add(iter.key(), iter.value())?;
            iter.next();
        }
        debug!("flushed {} entries", builder.count());
        builder.complete()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.list.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes the skiplist arena has allocated, node overhead included.
    pub fn memory_usage(&self) -> usize {
        self.list.memory_usage()
    }

    pub fn log(&self) -> Option<&Arc<PhysicalLog>> {
        self.log.as_ref()
    }

    /// Rejects further reads and writes and closes the log.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(log) = &self.log {
            if let Err(e) = log.close() {
                error!("failed to close {}: {}", log.id(), e);
            }
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn check_disposed(&self) -> Result<()> {
        if self.is_disposed() {
            Err(LsmError::Disposed)
        } else {
            Ok(())
        }
    }
}

/// Cursor over a [`VirtualTable`] that keeps the table alive.
pub struct VirtualTableIter {
    table: Arc<VirtualTable>,
    node: u64,
}

impl KvIterator for VirtualTableIter {
    #[inline]
    fn valid(&self) -> bool {
        self.node != NIL
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        self.table.list.key_of(self.node)
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        self.table.list.value_of(self.node)
    }

    fn seek_to_first(&mut self) {
        self.node = self.table.list.first();
    }

    fn seek(&mut self, target: &[u8]) {
        self.node = self.table.list.find_greater_or_equal(target);
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        self.node = self.table.list.next_of(self.node);
    }

    fn status(&mut self) -> Result<()> {
        self.table.check_disposed()
    }
}
