#[macro_use]
extern crate log;

pub use db::{BlockCacheKind, Database, DatabaseOptions, DbIterator};
pub use error::{LsmError, Status};
pub use iterator::KvIterator;

mod bloom;
mod coding;
pub mod collections;
pub mod compaction;
pub mod db;
pub mod env;
pub mod epoch;
pub mod error;
mod hash;
mod ioutils;
pub mod iterator;
pub mod manifest;
pub mod memory;
pub mod sstable;
pub mod wal;

pub type Result<T> = std::result::Result<T, error::LsmError>;
