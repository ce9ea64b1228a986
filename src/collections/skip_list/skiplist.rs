use crate::collections::skip_list::arena::{Arena, Offset};
use crate::collections::skip_list::{rand_height, MAX_HEIGHT};
use crate::error::LsmError;
use crate::iterator::KvIterator;
use crate::Result;
use std::cmp::Ordering as CmpOrdering;
use std::mem::size_of;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Link value meaning "no successor". The head node lives at offset 0 and is
/// never anybody's successor.
pub(crate) const NIL: u64 = 0;

#[repr(C)]
struct Node {
    key_len: u32,
    value_len: u32,
    height: u32,
    /// the actual size is `height`; key and value bytes follow the tower
    tower: [AtomicU64; 0],
}

impl Node {
    fn alloc_size(height: usize, key_len: usize, value_len: usize) -> usize {
        size_of::<Node>() + height * size_of::<AtomicU64>() + key_len + value_len
    }

    #[inline]
    fn next(&self, level: usize) -> u64 {
        debug_assert!(level < self.height as usize);
        unsafe { (*self.tower.as_ptr().add(level)).load(Ordering::Acquire) }
    }

    #[inline]
    fn set_next(&self, level: usize, next: u64) {
        unsafe { (*self.tower.as_ptr().add(level)).store(next, Ordering::Release) }
    }

    #[inline]
    fn cas_next(&self, level: usize, current: u64, new: u64) -> bool {
        unsafe {
            (*self.tower.as_ptr().add(level))
                .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        }
    }

    #[inline]
    fn data(&self) -> *const u8 {
        unsafe {
            (self as *const Node as *const u8)
                .add(size_of::<Node>() + self.height as usize * size_of::<AtomicU64>())
        }
    }

    #[inline]
    fn key(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.data(), self.key_len as usize) }
    }

    #[inline]
    fn value(&self) -> &[u8] {
        unsafe {
            std::slice::from_raw_parts(
                self.data().add(self.key_len as usize),
                self.value_len as usize,
            )
        }
    }
}

/// Lock-free ordered map from byte keys to byte values.
///
/// Nodes live in an [`Arena`] and link to each other by arena offset. Inserts
/// publish a node level by level with compare-and-swap, lowest level first.
/// The first value written for a key wins; later writes of the same key are
/// ignored.
pub struct SkipList {
    arena: Arena,
    head: u64,
    height: AtomicUsize,
    len: AtomicUsize,
}

impl Default for SkipList {
    fn default() -> Self {
        SkipList::new()
    }
}

impl SkipList {
    pub fn new() -> SkipList {
        let arena = Arena::default();
        let head = Self::allocate_node(&arena, &[], &[], MAX_HEIGHT)
            .expect("an empty arena has room for the head node");
        debug_assert_eq!(head, NIL);
        SkipList {
            arena,
            head,
            height: AtomicUsize::new(1),
            len: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn memory_usage(&self) -> usize {
        self.arena.get_memory_usage()
    }

    /// Inserts `key`, returning `false` if it was already present.
    /// [`LsmError::Filled`] when the arena has no room left for the node.
    pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        self.insert_with(key, value, || Ok(()))
    }

    /// Like [`SkipList::insert`], but runs `before_link` after the node has
    /// been allocated and before it becomes visible. An error from
    /// `before_link` leaves the list unchanged. Nothing runs for a key that
    /// is already present.
    pub fn insert_with(
        &self,
        key: &[u8],
        value: &[u8],
        before_link: impl FnOnce() -> Result<()>,
    ) -> Result<bool> {
        let list_height = self.height.load(Ordering::Acquire);
        let mut prevs = [self.head; MAX_HEIGHT];
        let mut nexts = [NIL; MAX_HEIGHT];

        let mut prev = self.head;
        for level in (0..list_height).rev() {
            let (p, n) = self.find_splice_for_level(key, prev, level);
            prevs[level] = p;
            nexts[level] = n;
            prev = p;
        }
        if nexts[0] != NIL && self.node(nexts[0]).key() == key {
            return Ok(false);
        }

        let height = rand_height();
        let mut current = list_height;
        while height > current {
            match self.height.compare_exchange_weak(
                current,
                height,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let offset =
            Self::allocate_node(&self.arena, key, value, height).ok_or(LsmError::Filled)?;
        before_link()?;
        let node = self.node(offset);
        for level in 0..height {
            loop {
                node.set_next(level, nexts[level]);
                if self.node(prevs[level]).cas_next(level, nexts[level], offset) {
                    break;
                }
                // Another writer linked a node after our predecessor; walk forward from it.
                let (p, n) = self.find_splice_for_level(key, prevs[level], level);
                if level == 0 && n != NIL && self.node(n).key() == key {
                    return Ok(false);
                }
                prevs[level] = p;
                nexts[level] = n;
            }
        }
        self.len.fetch_add(1, Ordering::AcqRel);
        Ok(true)
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        let node = self.find_greater_or_equal(key);
        if node != NIL && self.node(node).key() == key {
            Some(self.node(node).value())
        } else {
            None
        }
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            node: NIL,
        }
    }

    /// First node, or [`NIL`] when the list is empty.
    #[inline]
    pub(crate) fn first(&self) -> u64 {
        self.node(self.head).next(0)
    }

    #[inline]
    pub(crate) fn next_of(&self, node: u64) -> u64 {
        self.node(node).next(0)
    }

    #[inline]
    pub(crate) fn key_of(&self, node: u64) -> &[u8] {
        self.node(node).key()
    }

    #[inline]
    pub(crate) fn value_of(&self, node: u64) -> &[u8] {
        self.node(node).value()
    }

    /// First node whose key is greater than or equal to `key`, or [`NIL`].
    pub(crate) fn find_greater_or_equal(&self, key: &[u8]) -> u64 {
        let mut prev = self.head;
        let mut next = NIL;
        for level in (0..self.height.load(Ordering::Acquire)).rev() {
            let (p, n) = self.find_splice_for_level(key, prev, level);
            prev = p;
            next = n;
        }
        next
    }

    /// Starting at `before`, advance along `level` while the successor's key is
    /// less than `key`. Returns the final (predecessor, successor) pair.
    fn find_splice_for_level(&self, key: &[u8], before: u64, level: usize) -> (u64, u64) {
        let mut prev = before;
        loop {
            let next = self.node(prev).next(level);
            if next == NIL {
                return (prev, NIL);
            }
            match self.node(next).key().cmp(key) {
                CmpOrdering::Less => prev = next,
                _ => return (prev, next),
            }
        }
    }

    #[inline]
    fn node(&self, offset: u64) -> &Node {
        unsafe { &*(self.arena.get(Offset::from_raw(offset)) as *const Node) }
    }

    fn allocate_node(arena: &Arena, key: &[u8], value: &[u8], height: usize) -> Option<u64> {
        let size = Node::alloc_size(height, key.len(), value.len());
        let offset = arena.allocate(size, std::mem::align_of::<Node>())?;
        unsafe {
            let ptr = arena.get(offset) as *mut Node;
            std::ptr::write(
                ptr,
                Node {
                    key_len: key.len() as u32,
                    value_len: value.len() as u32,
                    height: height as u32,
                    tower: [],
                },
            );
            let node = &*ptr;
            for level in 0..height {
                node.set_next(level, NIL);
            }
            let data = node.data() as *mut u8;
            std::ptr::copy_nonoverlapping(key.as_ptr(), data, key.len());
            std::ptr::copy_nonoverlapping(value.as_ptr(), data.add(key.len()), value.len());
        }
        Some(offset.raw())
    }
}

/// Cursor over the bottom level of a [`SkipList`].
///
/// Inserts that complete while the cursor is live may or may not be observed.
pub struct Iter<'a> {
    list: &'a SkipList,
    node: u64,
}

impl<'a> Iter<'a> {
    pub fn key(&self) -> &'a [u8] {
        debug_assert!(self.node != NIL);
        self.list.key_of(self.node)
    }

    pub fn value(&self) -> &'a [u8] {
        debug_assert!(self.node != NIL);
        self.list.value_of(self.node)
    }
}

impl<'a> KvIterator for Iter<'a> {
    #[inline]
    fn valid(&self) -> bool {
        self.node != NIL
    }

    fn key(&self) -> &[u8] {
        Iter::key(self)
    }

    fn value(&self) -> &[u8] {
        Iter::value(self)
    }

    fn seek_to_first(&mut self) {
        self.node = self.list.first();
    }

    fn seek(&mut self, target: &[u8]) {
        self.node = self.list.find_greater_or_equal(target);
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        self.node = self.list.next_of(self.node);
    }
}

#[cfg(test)]
mod tests {
    use crate::collections::skip_list::skiplist::SkipList;
    use crate::iterator::KvIterator;
    use rand::Rng;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    #[test]
    fn test_ordered_insert_and_get() {
        let list = SkipList::new();
        assert!(list.is_empty());
        assert!(list.get(b"missing").is_none());

        let mut rng = rand::thread_rng();
        let mut expected = BTreeMap::new();
        for _ in 0..2000 {
            let key: u32 = rng.gen_range(0..5000);
            let key = key.to_be_bytes().to_vec();
            let value: [u8; 8] = rng.gen();
            let inserted = list.insert(&key, &value).unwrap();
            assert_eq!(inserted, !expected.contains_key(&key));
            expected.entry(key).or_insert_with(|| value.to_vec());
        }
        assert_eq!(list.len(), expected.len());

        let mut iter = list.iter();
        iter.seek_to_first();
        let mut prev: Option<Vec<u8>> = None;
        for (k, v) in expected.iter() {
            assert!(iter.valid());
            assert_eq!(iter.key(), k.as_slice());
            assert_eq!(iter.value(), v.as_slice());
            if let Some(p) = &prev {
                assert!(p.as_slice() < iter.key());
            }
            prev = Some(iter.key().to_vec());
            iter.next();
        }
        assert!(!iter.valid());

        for (k, v) in expected.iter() {
            assert_eq!(list.get(k), Some(v.as_slice()));
        }
    }

    #[test]
    fn test_first_write_wins() {
        let list = SkipList::new();
        assert!(list.insert(b"key", b"first").unwrap());
        assert!(!list.insert(b"key", b"second").unwrap());
        assert_eq!(list.get(b"key"), Some(&b"first"[..]));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_seek() {
        let list = SkipList::new();
        for i in (0..100u32).step_by(10) {
            list.insert(&i.to_be_bytes(), b"v").unwrap();
        }
        let mut iter = list.iter();
        iter.seek(&15u32.to_be_bytes());
        assert!(iter.valid());
        assert_eq!(iter.key(), &20u32.to_be_bytes());
        iter.seek(&20u32.to_be_bytes());
        assert_eq!(iter.key(), &20u32.to_be_bytes());
        iter.seek(&91u32.to_be_bytes());
        assert!(!iter.valid());
        iter.seek(&[]);
        assert_eq!(iter.key(), &0u32.to_be_bytes());
    }

    #[test]
    fn test_large_values() {
        let list = SkipList::new();
        let big = vec![7u8; 10_000];
        assert!(list.insert(b"big", &big).unwrap());
        assert!(list.insert(b"small", b"s").unwrap());
        assert_eq!(list.get(b"big"), Some(big.as_slice()));
        assert_eq!(list.get(b"small"), Some(&b"s"[..]));
    }

    #[test]
    fn test_concurrent_insert() {
        const THREADS: usize = 4;
        const PER_THREAD: usize = 5000;
        let list = Arc::new(SkipList::new());
        let mut handles = vec![];
        for t in 0..THREADS {
            let list = list.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..PER_THREAD {
                    let n = (i * THREADS + t) as u64;
                    assert!(list.insert(&n.to_be_bytes(), &(n * 3).to_le_bytes()).unwrap());
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(list.len(), THREADS * PER_THREAD);
        for n in 0..(THREADS * PER_THREAD) as u64 {
            assert_eq!(
                list.get(&n.to_be_bytes()),
                Some(&(n * 3).to_le_bytes()[..])
            );
        }
        let mut iter = list.iter();
        iter.seek_to_first();
        let mut count = 0u64;
        while iter.valid() {
            assert_eq!(iter.key(), &count.to_be_bytes());
            count += 1;
            iter.next();
        }
        assert_eq!(count as usize, THREADS * PER_THREAD);
    }

    #[test]
    fn test_concurrent_duplicate_keys() {
        let list = Arc::new(SkipList::new());
        let mut handles = vec![];
        for t in 0..4u8 {
            let list = list.clone();
            handles.push(std::thread::spawn(move || {
                let mut wins = 0;
                for i in 0..1000u32 {
                    if list.insert(&i.to_be_bytes(), &[t]).unwrap() {
                        wins += 1;
                    }
                }
                wins
            }));
        }
        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 1000);
        assert_eq!(list.len(), 1000);
    }
}
