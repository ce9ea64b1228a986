//! Sorted String Table, which is stored in disk.
//!
//! # SSTable
//!
//! A table is stored in a file named "<number>.olog", where <number> is a zero-padded decimal.
//!
//! ```text
//! +-------------------------+ (offset 0)
//! | Data Block 1            |<-+
//! +-------------------------+  |
//! | Data Block 2            |<-+
//! +-------------------------+  |
//! | ...                     |  |
//! +-------------------------+  |
//! | Data Block n            |<-+
//! +-------------------------+  |
//! | Index Block             |--+
//! +-------------------------+
//! | Footer                  |
//! +-------------------------+
//! ```
//!
//! ## Key/Value Entry
//!
//! ```text
//! +-----------------------------------------+
//! | key length | key | value length | value |
//! +-----------------------------------------+
//! \-----------/\-----/\-------------/\------/
//!     varint   var-len    varint     var-len
//! ```
//!
//! ## Index Block
//!
//! One entry per data block. The key is the last key of the data block, the
//! value is its 16-byte block handle.
//!
//! ```text
//! +-------------------------------------------------------+
//! | key length | last key | 16 | offset (u64) | len (u64) |
//! +-------------------------------------------------------+
//! ```
//!
//! ## Footer
//!
//! ```text
//! +--------------------------------------------------------------------------------+
//! | filter bytes | first key | last key | index handle | footer length (u32 LE)    |
//! +--------------------------------------------------------------------------------+
//! \-------------/\----------/\---------/\-------------/
//!  varint-prefixed byte arrays           raw 16 bytes
//! ```
//!
//! The footer length counts every footer byte except itself.

pub mod block;
pub mod block_cache;
pub mod builder;
pub(crate) mod footer;
pub mod table;

pub use block_cache::{BlockCache, PinningBlockCache, WeakBlockCache};
pub use builder::PhysicalTableBuilder;
pub use table::{PhysicalTable, TableIter};

pub const MIN_BLOCK_SIZE: usize = 64;

/// Length of the version suffix carried by stored keys.
pub const KEY_SUFFIX_SIZE: usize = 8;

#[derive(Copy, Clone, Debug)]
pub struct TableOptions {
    /// A data block is sealed once it reaches this many bytes.
    pub data_block_size: usize,
    /// Bloom filter size in bytes.
    pub bloom_filter_size: usize,
}

impl Default for TableOptions {
    fn default() -> Self {
        TableOptions {
            data_block_size: 4096,
            bloom_filter_size: 4096,
        }
    }
}

/// The part of a stored key the bloom filter indexes: everything before the
/// version suffix, so all versions of one key share their filter bits.
#[inline]
pub fn filter_key(key: &[u8]) -> &[u8] {
    if key.len() >= KEY_SUFFIX_SIZE {
        &key[..key.len() - KEY_SUFFIX_SIZE]
    } else {
        key
    }
}
