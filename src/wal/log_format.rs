//! Record framing shared by write-ahead logs and the manifest log.
//!
//! ```text
//! +--------------------------------------------+
//! | payload length | payload | crc32 (payload) |
//! +--------------------------------------------+
//! \---------------/\--------/\----------------/
//!       varint      var-len       u32 LE
//! ```

use crate::coding::{Encoder, MAX_VARINT64_LEN};
use crate::error::LsmError;
use crate::Result;
use crc32fast::Hasher as Crc32;
use std::io::{self, Read, Write};

pub const CHECKSUM_SIZE: usize = 4;

/// Appends the framed form of `payload` to `encoder`.
pub fn encode_record(encoder: &mut Encoder, payload: &[u8]) {
    encoder.put_bytes(payload);
    encoder.put_u32(checksum(payload));
}

fn checksum(payload: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(payload);
    hasher.finalize()
}

/// Writes framed records to `W`, tracking the number of bytes written.
pub struct LogWriter<W: Write> {
    writer: W,
    length: u64,
    scratch: Encoder,
}

impl<W: Write> LogWriter<W> {
    pub fn new(writer: W) -> LogWriter<W> {
        LogWriter {
            writer,
            length: 0,
            scratch: Encoder::with_capacity(256),
        }
    }

    pub fn add_record(&mut self, payload: &[u8]) -> Result<()> {
        self.scratch.clear();
        encode_record(&mut self.scratch, payload);
        self.writer.write_all(self.scratch.as_slice())?;
        self.length += self.scratch.len() as u64;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    #[inline]
    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }
}

/// Reads framed records back. A clean end of input between records yields
/// `None`; anything else that does not parse is [`LsmError::Corrupted`].
pub struct LogReader<R: Read> {
    reader: R,
    offset: u64,
}

impl<R: Read> LogReader<R> {
    pub fn new(reader: R) -> LogReader<R> {
        LogReader { reader, offset: 0 }
    }

    pub fn read_record(&mut self) -> Result<Option<Vec<u8>>> {
        let start = self.offset;
        let len = match self.read_length()? {
            Some(len) => len,
            None => return Ok(None),
        };
        // the length is untrusted until the payload has actually been read
        let mut payload = Vec::new();
        let n = (&mut self.reader).take(len).read_to_end(&mut payload)?;
        self.offset += n as u64;
        if (n as u64) < len {
            return Err(truncated(start));
        }
        let mut crc = [0u8; CHECKSUM_SIZE];
        self.read_exact(&mut crc, start)?;
        if u32::from_le_bytes(crc) != checksum(&payload) {
            return Err(LsmError::corrupted(format!(
                "checksum mismatch in record at offset {}",
                start
            )));
        }
        Ok(Some(payload))
    }

    fn read_length(&mut self) -> Result<Option<u64>> {
        let start = self.offset;
        let mut result = 0u64;
        for i in 0..MAX_VARINT64_LEN {
            let mut byte = [0u8; 1];
            let n = loop {
                match self.reader.read(&mut byte) {
                    Ok(n) => break n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                }
            };
            if n == 0 {
                if i == 0 {
                    return Ok(None);
                }
                return Err(truncated(start));
            }
            self.offset += 1;
            result |= ((byte[0] & 0x7f) as u64) << (7 * i);
            if byte[0] & 0x80 == 0 {
                return Ok(Some(result));
            }
        }
        Err(LsmError::corrupted(format!(
            "record length overflow at offset {}",
            start
        )))
    }

    fn read_exact(&mut self, buf: &mut [u8], record_start: u64) -> Result<()> {
        match self.reader.read_exact(buf) {
            Ok(()) => {
                self.offset += buf.len() as u64;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(truncated(record_start)),
            Err(e) => Err(e.into()),
        }
    }
}

fn truncated(offset: u64) -> LsmError {
    LsmError::corrupted(format!("truncated record at offset {}", offset))
}

#[cfg(test)]
mod tests {
    use crate::error::Status;
    use crate::wal::log_format::{LogReader, LogWriter};

    #[test]
    fn test_records() {
        let mut writer = LogWriter::new(Vec::new());
        writer.add_record(b"first").unwrap();
        writer.add_record(b"").unwrap();
        writer.add_record(&vec![3u8; 300]).unwrap();
        let bytes = writer.get_ref().clone();
        assert_eq!(writer.length(), bytes.len() as u64);

        let mut reader = LogReader::new(bytes.as_slice());
        assert_eq!(reader.read_record().unwrap().unwrap(), b"first");
        assert_eq!(reader.read_record().unwrap().unwrap(), b"");
        assert_eq!(reader.read_record().unwrap().unwrap(), vec![3u8; 300]);
        assert!(reader.read_record().unwrap().is_none());
    }

    #[test]
    fn test_truncated_and_corrupted() {
        let mut writer = LogWriter::new(Vec::new());
        writer.add_record(b"hello world").unwrap();
        let bytes = writer.get_ref().clone();

        for cut in 1..bytes.len() {
            let mut reader = LogReader::new(&bytes[..cut]);
            let err = reader.read_record().unwrap_err();
            assert_eq!(err.status(), Status::Corrupted, "cut at {}", cut);
        }

        let mut flipped = bytes.clone();
        flipped[3] ^= 0x01;
        let mut reader = LogReader::new(flipped.as_slice());
        assert_eq!(reader.read_record().unwrap_err().status(), Status::Corrupted);
    }

    #[test]
    fn test_garbage_length() {
        let mut bytes = vec![0xffu8; 9];
        bytes.push(0x01);
        bytes.extend_from_slice(&[0u8; 8]);
        let mut reader = LogReader::new(bytes.as_slice());
        assert_eq!(reader.read_record().unwrap_err().status(), Status::Corrupted);

        let mut reader = LogReader::new(&[0xffu8; 10][..]);
        assert_eq!(reader.read_record().unwrap_err().status(), Status::Corrupted);
    }
}
