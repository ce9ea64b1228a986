use crate::bloom::BloomFilter;
use crate::ioutils::BufWriterWithPos;
use crate::sstable::block::{BlockBuilder, BlockHandle};
use crate::sstable::footer::Footer;
use crate::sstable::{filter_key, TableOptions};
use crate::Result;
use std::io::Write;

/// Streams sorted entries into the table file format.
pub struct PhysicalTableBuilder<W: Write> {
    writer: BufWriterWithPos<W>,
    options: TableOptions,
    data_block: BlockBuilder,
    index_block: BlockBuilder,
    filter: BloomFilter,
    first_key: Option<Vec<u8>>,
    count: usize,
}

impl<W: Write> PhysicalTableBuilder<W> {
    pub fn new(writer: W, options: TableOptions) -> PhysicalTableBuilder<W> {
        PhysicalTableBuilder {
            writer: BufWriterWithPos::new(writer, 0),
            filter: BloomFilter::with_size(options.bloom_filter_size),
            options,
            data_block: BlockBuilder::new(),
            index_block: BlockBuilder::new(),
            first_key: None,
            count: 0,
        }
    }

    /// Keys must arrive in strictly increasing order.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.first_key.is_none() {
            self.first_key = Some(key.to_vec());
        }
        self.data_block.add(key, value);
        self.filter.set(filter_key(key));
        self.count += 1;
        if self.data_block.len() >= self.options.data_block_size {
            self.flush_data_block()?;
        }
        Ok(())
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Writes the pending data block, the index block and the footer, and
    /// returns the underlying writer.
    pub fn complete(mut self) -> Result<W> {
        if !self.data_block.is_empty() {
            self.flush_data_block()?;
        }
        let index_handle = self.write_block(&self.index_block.complete().to_vec())?;
        let footer = Footer {
            filter: self.filter.as_bytes().to_vec(),
            first_key: self.first_key.take().unwrap_or_default(),
            last_key: self.index_block.last_key().to_vec(),
            index_handle,
        };
        footer.write_to_file(&mut self.writer)?;
        self.writer.flush()?;
        self.writer.into_inner()
    }

    fn flush_data_block(&mut self) -> Result<()> {
        let handle = self.write_block(&self.data_block.complete().to_vec())?;
        self.index_block
            .add(self.data_block.last_key(), &handle.encode());
        self.data_block.reset();
        Ok(())
    }

    fn write_block(&mut self, data: &[u8]) -> Result<BlockHandle> {
        let handle = BlockHandle::new(self.writer.pos(), data.len() as u64);
        self.writer.write_all(data)?;
        Ok(handle)
    }
}
