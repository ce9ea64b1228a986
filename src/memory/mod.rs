//! Memory table

mod virtual_table;

pub use virtual_table::{VirtualTable, VirtualTableIter};
