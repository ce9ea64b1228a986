//! Concurrent bump allocator.
//!
//! Memory is carved out of fixed-size blocks and addressed by [`Offset`]
//! handles rather than raw pointers. Blocks are published into a two-level
//! directory, so a handle resolves to an address in constant time. Nothing is
//! freed until the arena itself is dropped.

use std::alloc::Layout;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, AtomicUsize, Ordering};

pub const BLOCK_SIZE: usize = 4096;

/// Every block starts on this alignment, the largest one the arena hands out.
const BLOCK_ALIGN: usize = 8;

const SEGMENT_SIZE: usize = 256;
const DIRECTORY_SIZE: usize = 512;
const MAX_BLOCKS: usize = SEGMENT_SIZE * DIRECTORY_SIZE;

const NO_BLOCK: u32 = u32::MAX;

/// Position of an allocation: block index in the high 32 bits, byte offset
/// inside that block in the low 32 bits.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Offset(u64);

impl Offset {
    #[inline]
    fn new(block: u32, within: usize) -> Offset {
        Offset(((block as u64) << 32) | within as u64)
    }

    #[inline]
    pub fn from_raw(raw: u64) -> Offset {
        Offset(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    fn block(self) -> usize {
        (self.0 >> 32) as usize
    }

    #[inline]
    fn within(self) -> usize {
        (self.0 & 0xffff_ffff) as usize
    }
}

struct Block {
    ptr: *mut u8,
    len: usize,
}

impl Block {
    fn allocate(len: usize) -> Block {
        let layout = Self::layout(len);
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            std::alloc::handle_alloc_error(layout);
        }
        Block { ptr, len }
    }

    #[inline]
    fn layout(len: usize) -> Layout {
        // BLOCK_ALIGN is a power of two and `len` never approaches isize::MAX.
        Layout::from_size_align(len, BLOCK_ALIGN).unwrap()
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        unsafe { std::alloc::dealloc(self.ptr, Self::layout(self.len)) }
    }
}

struct Segment {
    blocks: [AtomicPtr<Block>; SEGMENT_SIZE],
}

impl Segment {
    fn new() -> Segment {
        const EMPTY: AtomicPtr<Block> = AtomicPtr::new(ptr::null_mut());
        Segment {
            blocks: [EMPTY; SEGMENT_SIZE],
        }
    }
}

pub struct Arena {
    segments: Box<[AtomicPtr<Segment>]>,
    /// Current small-object block and the bytes used in it, packed like an [`Offset`].
    current: AtomicU64,
    next_block: AtomicUsize,
    memory_usage: AtomicUsize,
}

unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Default for Arena {
    fn default() -> Self {
        Arena {
            segments: (0..DIRECTORY_SIZE)
                .map(|_| AtomicPtr::new(ptr::null_mut()))
                .collect(),
            current: AtomicU64::new(Offset::new(NO_BLOCK, 0).raw()),
            next_block: AtomicUsize::new(0),
            memory_usage: AtomicUsize::new(0),
        }
    }
}

impl Arena {
    /// Allocates `size` bytes aligned to `align` (at most 8). The returned
    /// bytes are zeroed and never handed out again. `None` once the block
    /// directory is full.
    pub fn allocate(&self, size: usize, align: usize) -> Option<Offset> {
        debug_assert!(align.is_power_of_two() && align <= BLOCK_ALIGN);
        if size > BLOCK_SIZE / 4 {
            // Object is more than a quarter of our block size.  Allocate it separately
            // to avoid wasting too much space in leftover bytes.
            return Some(Offset::new(self.allocate_new_block(size)?, 0));
        }

        let mut current = self.current.load(Ordering::Acquire);
        loop {
            let cur = Offset::from_raw(current);
            if cur.block() != NO_BLOCK as usize {
                let start = (cur.within() + align - 1) & !(align - 1);
                let end = start + size;
                if end <= BLOCK_SIZE {
                    let next = Offset::new(cur.block() as u32, end);
                    match self.current.compare_exchange_weak(
                        current,
                        next.raw(),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => return Some(Offset::new(cur.block() as u32, start)),
                        Err(actual) => {
                            current = actual;
                            continue;
                        }
                    }
                }
            }

            // We waste the remaining space in the current block. A block lost in
            // this race stays in the directory and is released with the arena.
            let block = self.allocate_new_block(BLOCK_SIZE)?;
            let next = Offset::new(block, size);
            match self.current.compare_exchange(
                current,
                next.raw(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(Offset::new(block, 0)),
                Err(actual) => current = actual,
            }
        }
    }

    /// Address of the allocation at `offset`.
    ///
    /// # Safety
    /// `offset` must have been returned by [`Arena::allocate`] on this arena.
    #[inline]
    pub unsafe fn get(&self, offset: Offset) -> *mut u8 {
        let index = offset.block();
        let segment = self.segments[index / SEGMENT_SIZE].load(Ordering::Acquire);
        debug_assert!(!segment.is_null());
        let block = (*segment).blocks[index % SEGMENT_SIZE].load(Ordering::Acquire);
        debug_assert!(!block.is_null());
        debug_assert!(offset.within() <= (*block).len);
        (*block).ptr.add(offset.within())
    }

    #[inline]
    pub fn get_memory_usage(&self) -> usize {
        self.memory_usage.load(Ordering::Relaxed)
    }

    fn allocate_new_block(&self, bytes: usize) -> Option<u32> {
        let index = self
            .next_block
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                if n < MAX_BLOCKS {
                    Some(n + 1)
                } else {
                    None
                }
            })
            .ok()?;

        let slot = &self.segments[index / SEGMENT_SIZE];
        let mut segment = slot.load(Ordering::Acquire);
        if segment.is_null() {
            let fresh = Box::into_raw(Box::new(Segment::new()));
            match slot.compare_exchange(
                ptr::null_mut(),
                fresh,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => segment = fresh,
                Err(installed) => {
                    unsafe { drop(Box::from_raw(fresh)) };
                    segment = installed;
                }
            }
        }

        let block = Box::into_raw(Box::new(Block::allocate(bytes)));
        unsafe {
            (*segment).blocks[index % SEGMENT_SIZE].store(block, Ordering::Release);
        }
        self.memory_usage
            .fetch_add(bytes + std::mem::size_of::<Block>(), Ordering::Relaxed);
        Some(index as u32)
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        for slot in self.segments.iter() {
            let segment = slot.load(Ordering::Acquire);
            if segment.is_null() {
                continue;
            }
            unsafe {
                let segment = Box::from_raw(segment);
                for block in segment.blocks.iter() {
                    let block = block.load(Ordering::Acquire);
                    if !block.is_null() {
                        drop(Box::from_raw(block));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::collections::skip_list::arena::{Arena, Offset, BLOCK_SIZE, MAX_BLOCKS};
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn arena_test() {
        let arena = Arena::default();
        unsafe {
            let off = arena.allocate(1, 1).unwrap();
            assert!(arena.get_memory_usage() > 0);
            *arena.get(off) = 3;
            let off2 = arena.allocate(2, 1).unwrap();
            *arena.get(off2).add(1) = 12u8;
            assert_eq!(*arena.get(off), 3);
            for &size in [
                BLOCK_SIZE / 4 - 1,
                BLOCK_SIZE / 4,
                BLOCK_SIZE / 4 + 1,
                BLOCK_SIZE / 2,
                BLOCK_SIZE,
                BLOCK_SIZE * 2,
            ]
            .iter()
            {
                for _ in 0..10 {
                    let base = arena.allocate(size, 8).unwrap();
                    *arena.get(base).add(size - 1) = 111u8;
                    assert_eq!(*arena.get(base).add(size - 1), 111u8);
                }
            }
        }
    }

    #[test]
    fn layout_test() {
        let arena = Arena::default();
        unsafe {
            assert_eq!(arena.get(arena.allocate(5, 4).unwrap()) as usize % 4, 0);
            assert_eq!(arena.get(arena.allocate(19, 2).unwrap()) as usize % 2, 0);
            arena.allocate(19, 2).unwrap();
            assert_eq!(arena.get(arena.allocate(22, 8).unwrap()) as usize % 8, 0);
        }
    }

    #[test]
    fn concurrent_allocations_do_not_overlap() {
        let arena = Arc::new(Arena::default());
        let mut handles = vec![];
        for t in 0..4u8 {
            let arena = arena.clone();
            handles.push(std::thread::spawn(move || {
                let mut offsets = vec![];
                for i in 0..2000usize {
                    let size = 8 + i % 40;
                    let off = arena.allocate(size, 8).unwrap();
                    unsafe {
                        std::ptr::write_bytes(arena.get(off), t, size);
                    }
                    offsets.push((off.raw(), size));
                }
                (t, offsets)
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            let (t, offsets) = handle.join().unwrap();
            for (raw, size) in offsets {
                assert!(seen.insert(raw));
                let off = Offset::from_raw(raw);
                let bytes = unsafe { std::slice::from_raw_parts(arena.get(off), size) };
                assert!(bytes.iter().all(|&b| b == t));
            }
        }
    }

    #[test]
    fn test_exhausted_arena_refuses_allocations() {
        let arena = Arena::default();
        for _ in 0..MAX_BLOCKS {
            assert!(arena.allocate(BLOCK_SIZE / 4 + 1, 8).is_some());
        }
        assert!(arena.allocate(BLOCK_SIZE / 4 + 1, 8).is_none());
        assert!(arena.allocate(1, 1).is_none());
        assert!(arena.allocate(BLOCK_SIZE * 4, 8).is_none());
    }
}
