use crate::Result;
use std::fs::File;
use std::io;
use std::io::{BufWriter, Write};

/// Buffered writer that knows how many bytes have passed through it.
pub struct BufWriterWithPos<W: Write> {
    writer: BufWriter<W>,
    pos: u64,
}

impl<W: Write> BufWriterWithPos<W> {
    /// `pos` is the offset of the first byte that will be written.
    pub fn new(inner: W, pos: u64) -> BufWriterWithPos<W> {
        BufWriterWithPos {
            writer: BufWriter::new(inner),
            pos,
        }
    }

    #[inline]
    pub fn pos(&self) -> u64 {
        self.pos
    }

    pub fn get_ref(&self) -> &W {
        self.writer.get_ref()
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| e.into_error().into())
    }
}

impl<W: Write> Write for BufWriterWithPos<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let len = self.writer.write(buf)?;
        self.pos += len as u64;
        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Positioned read that leaves the file cursor untouched, so concurrent
/// readers can share one handle.
#[cfg(unix)]
pub fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
pub fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ))
            }
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
