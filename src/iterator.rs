use crate::Result;

/// Ordered cursor over key/value pairs.
///
/// A fresh cursor is not positioned; call [`KvIterator::seek_to_first`] or
/// [`KvIterator::seek`] before reading. `key` and `value` may only be called
/// while [`KvIterator::valid`] holds.
pub trait KvIterator {
    fn valid(&self) -> bool;

    fn key(&self) -> &[u8];

    fn value(&self) -> &[u8];

    fn seek_to_first(&mut self);

    /// Position at the first entry whose key is greater than or equal to `target`.
    fn seek(&mut self, target: &[u8]);

    fn next(&mut self);

    /// Error that invalidated the cursor, if any.
    fn status(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<I: KvIterator + ?Sized> KvIterator for Box<I> {
    fn valid(&self) -> bool {
        (**self).valid()
    }

    fn key(&self) -> &[u8] {
        (**self).key()
    }

    fn value(&self) -> &[u8] {
        (**self).value()
    }

    fn seek_to_first(&mut self) {
        (**self).seek_to_first()
    }

    fn seek(&mut self, target: &[u8]) {
        (**self).seek(target)
    }

    fn next(&mut self) {
        (**self).next()
    }

    fn status(&mut self) -> Result<()> {
        (**self).status()
    }
}
