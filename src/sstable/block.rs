use crate::coding::{Decoder, Encoder};
use crate::error::LsmError;
use crate::iterator::KvIterator;
use crate::Result;
use std::ops::Range;
use std::sync::Arc;

pub const BLOCK_HANDLE_SIZE: usize = 16;

/// Location of a block inside a table file.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct BlockHandle {
    pub offset: u64,
    pub length: u64,
}

impl BlockHandle {
    pub fn new(offset: u64, length: u64) -> BlockHandle {
        BlockHandle { offset, length }
    }

    pub fn encode(&self) -> [u8; BLOCK_HANDLE_SIZE] {
        let mut encoder = Encoder::with_capacity(BLOCK_HANDLE_SIZE);
        encoder.put_u64(self.offset);
        encoder.put_u64(self.length);
        let mut buf = [0u8; BLOCK_HANDLE_SIZE];
        buf.copy_from_slice(encoder.as_slice());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<BlockHandle> {
        if data.len() != BLOCK_HANDLE_SIZE {
            return Err(LsmError::corrupted(format!(
                "block handle of {} bytes",
                data.len()
            )));
        }
        let mut decoder = Decoder::new(data);
        Ok(BlockHandle {
            offset: decoder.get_u64()?,
            length: decoder.get_u64()?,
        })
    }
}

/// Immutable run of sorted key/value entries, each stored as
/// `varint(key len) | key | varint(value len) | value`.
#[derive(Debug)]
pub struct Block {
    data: Vec<u8>,
}

impl Block {
    pub fn new(data: Vec<u8>) -> Block {
        Block { data }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn iter(self: &Arc<Self>) -> BlockIter {
        BlockIter {
            block: self.clone(),
            key: 0..0,
            value: 0..0,
            next_offset: 0,
            valid: false,
            error: None,
        }
    }

    /// Decodes the entry starting at `offset`, returning the key range, the
    /// value range and the offset of the following entry.
    fn decode_entry(&self, offset: usize) -> Result<(Range<usize>, Range<usize>, usize)> {
        let mut decoder = Decoder::new(&self.data[offset..]);
        let key_len = decoder.get_bytes()?.len();
        let key_end = offset + decoder.position();
        let value_len = decoder.get_bytes()?.len();
        let value_end = offset + decoder.position();
        Ok((
            key_end - key_len..key_end,
            value_end - value_len..value_end,
            value_end,
        ))
    }
}

/// Cursor over a [`Block`]. Seeks scan linearly; blocks are small.
pub struct BlockIter {
    block: Arc<Block>,
    key: Range<usize>,
    value: Range<usize>,
    next_offset: usize,
    valid: bool,
    error: Option<LsmError>,
}

impl BlockIter {
    fn parse_at(&mut self, offset: usize) {
        if offset >= self.block.data.len() {
            self.valid = false;
            return;
        }
        match self.block.decode_entry(offset) {
            Ok((key, value, next)) => {
                self.key = key;
                self.value = value;
                self.next_offset = next;
                self.valid = true;
            }
            Err(e) => {
                self.valid = false;
                self.error = Some(e);
            }
        }
    }
}

impl KvIterator for BlockIter {
    #[inline]
    fn valid(&self) -> bool {
        self.valid
    }

    fn key(&self) -> &[u8] {
        &self.block.data[self.key.clone()]
    }

    fn value(&self) -> &[u8] {
        &self.block.data[self.value.clone()]
    }

    fn seek_to_first(&mut self) {
        self.parse_at(0);
    }

    fn seek(&mut self, target: &[u8]) {
        if !self.valid || self.key() > target {
            self.seek_to_first();
        }
        while self.valid && self.key() < target {
            self.next();
        }
    }

    fn next(&mut self) {
        debug_assert!(self.valid);
        self.parse_at(self.next_offset);
    }

    fn status(&mut self) -> Result<()> {
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Accumulates sorted entries into the serialized form of a [`Block`].
#[derive(Default)]
pub struct BlockBuilder {
    buf: Encoder,
    count: usize,
    last_key: Vec<u8>,
}

impl BlockBuilder {
    pub fn new() -> BlockBuilder {
        BlockBuilder::default()
    }

    /// Keys must arrive in strictly increasing order.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        debug_assert!(self.count == 0 || key > self.last_key.as_slice());
        self.buf.put_bytes(key);
        self.buf.put_bytes(value);
        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.count += 1;
    }

    /// Serialized size so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn last_key(&self) -> &[u8] {
        &self.last_key
    }

    /// Bytes of the finished block. The builder keeps them until [`BlockBuilder::reset`].
    pub fn complete(&self) -> &[u8] {
        self.buf.as_slice()
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.count = 0;
        self.last_key.clear();
    }
}
