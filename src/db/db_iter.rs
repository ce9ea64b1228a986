use crate::db::key_types::{decode_index_key, key_prefix, UserKey};
use crate::error::LsmError;
use crate::iterator::KvIterator;
use crate::manifest::ManifestPin;
use crate::sstable::filter_key;
use crate::Result;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

pub(crate) type SourceIter = Box<dyn KvIterator + Send>;

#[derive(PartialEq, Eq)]
pub(crate) struct KeyValueIterItem {
    pub(crate) key: Vec<u8>,
    pub(crate) iter_id: usize,
}

impl PartialOrd for KeyValueIterItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyValueIterItem {
    /// Larger iter idx is larger.
    /// Smaller key is larger.
    /// [std::collections::BinaryHeap] returns the greatest item
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .key
            .cmp(&self.key)
            .then(self.iter_id.cmp(&other.iter_id))
    }
}

/// K-way merge of sorted cursors. Sources later in the list win ties.
pub(crate) struct MergingIterator {
    iters: Vec<SourceIter>,
    heap: BinaryHeap<KeyValueIterItem>,
}

impl MergingIterator {
    pub(crate) fn new(iters: Vec<SourceIter>) -> MergingIterator {
        MergingIterator {
            heap: BinaryHeap::with_capacity(iters.len()),
            iters,
        }
    }

    fn rebuild(&mut self) {
        self.heap.clear();
        for (iter_id, iter) in self.iters.iter().enumerate() {
            if iter.valid() {
                self.heap.push(KeyValueIterItem {
                    key: iter.key().to_vec(),
                    iter_id,
                });
            }
        }
    }
}

impl KvIterator for MergingIterator {
    fn valid(&self) -> bool {
        !self.heap.is_empty()
    }

    fn key(&self) -> &[u8] {
        match self.heap.peek() {
            Some(top) => &top.key,
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        match self.heap.peek() {
            Some(top) => self.iters[top.iter_id].value(),
            None => &[],
        }
    }

    fn seek_to_first(&mut self) {
        for iter in self.iters.iter_mut() {
            iter.seek_to_first();
        }
        self.rebuild();
    }

    fn seek(&mut self, target: &[u8]) {
        for iter in self.iters.iter_mut() {
            iter.seek(target);
        }
        self.rebuild();
    }

    fn next(&mut self) {
        if let Some(top) = self.heap.pop() {
            let iter = &mut self.iters[top.iter_id];
            iter.next();
            if iter.valid() {
                self.heap.push(KeyValueIterItem {
                    key: iter.key().to_vec(),
                    iter_id: top.iter_id,
                });
            }
        }
    }

    fn status(&mut self) -> Result<()> {
        for iter in self.iters.iter_mut() {
            iter.status()?;
        }
        Ok(())
    }
}

/// Cursor over the newest value of every user key.
///
/// The manifest state it was created from stays pinned, so its tables are
/// neither disposed nor deleted while the cursor lives. Writes that land in
/// a pinned memory table after creation may or may not be observed.
pub struct DbIterator {
    inner: MergingIterator,
    prefix: Vec<u8>,
    user_key: UserKey,
    error: Option<LsmError>,
    _pin: ManifestPin,
}

impl DbIterator {
    pub(crate) fn new(pin: ManifestPin, iters: Vec<SourceIter>) -> DbIterator {
        DbIterator {
            inner: MergingIterator::new(iters),
            prefix: vec![],
            user_key: vec![],
            error: None,
            _pin: pin,
        }
    }

    fn load_current(&mut self) {
        if !self.inner.valid() {
            return;
        }
        match decode_index_key(self.inner.key()) {
            Ok((user_key, _)) => {
                self.prefix.clear();
                self.prefix.extend_from_slice(filter_key(self.inner.key()));
                self.user_key = user_key;
            }
            Err(e) => {
                self.error = Some(e);
            }
        }
    }
}

impl KvIterator for DbIterator {
    fn valid(&self) -> bool {
        self.error.is_none() && self.inner.valid()
    }

    /// User key of the current entry.
    fn key(&self) -> &[u8] {
        &self.user_key
    }

    fn value(&self) -> &[u8] {
        self.inner.value()
    }

    fn seek_to_first(&mut self) {
        self.inner.seek_to_first();
        self.load_current();
    }

    /// Positions at the first user key greater than or equal to `target`.
    fn seek(&mut self, target: &[u8]) {
        self.inner.seek(&key_prefix(target));
        self.load_current();
    }

    fn next(&mut self) {
        // skip older versions of the current key
        while self.inner.valid() && filter_key(self.inner.key()) == self.prefix.as_slice() {
            self.inner.next();
        }
        self.load_current();
    }

    fn status(&mut self) -> Result<()> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.inner.status()
    }
}
