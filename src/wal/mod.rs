//! Write-ahead log of a memory table.
//!
//! A log file "<number>.ulog" is a sequence of framed records (see
//! [`log_format`]), each record holding one write:
//!
//! ```text
//! +-----------------------------------------+
//! | key length | key | value length | value |
//! +-----------------------------------------+
//! ```

pub mod append_file;
pub mod log_format;

use crate::coding::{Decoder, Encoder};
use crate::env::{FileAccess, FileId, FileMetadata, FileMode, FileSystem};
use crate::error::LsmError;
use crate::Result;
use append_file::AppendFile;
use log_format::{encode_record, LogReader};
use std::io::BufReader;

pub struct PhysicalLog {
    metadata: FileMetadata,
    /// `None` for logs recovered at startup, which are only replayed.
    writer: Option<AppendFile>,
}

impl PhysicalLog {
    pub fn create(
        fs: &dyn FileSystem,
        metadata: FileMetadata,
        buffer_size: usize,
        sync: bool,
    ) -> Result<PhysicalLog> {
        let file = fs.open_file(&metadata.path, FileMode::Create, FileAccess::Write)?;
        Ok(PhysicalLog {
            metadata,
            writer: Some(AppendFile::new(file, buffer_size, sync)),
        })
    }

    pub fn recovered(metadata: FileMetadata) -> PhysicalLog {
        PhysicalLog {
            metadata,
            writer: None,
        }
    }

    #[inline]
    pub fn id(&self) -> FileId {
        self.metadata.id
    }

    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    pub fn is_writable(&self) -> bool {
        self.writer.as_ref().map_or(false, |w| !w.is_closed())
    }

    pub fn log_set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let writer = self.writer.as_ref().ok_or(LsmError::Closed)?;
        let mut payload = Encoder::with_capacity(key.len() + value.len() + 10);
        payload.put_bytes(key);
        payload.put_bytes(value);
        let mut frame = Encoder::with_capacity(payload.len() + 10);
        encode_record(&mut frame, payload.as_slice());
        writer.write(frame.as_slice())
    }

    pub fn flush(&self) -> Result<()> {
        match &self.writer {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }

    pub fn close(&self) -> Result<()> {
        match &self.writer {
            Some(writer) => writer.close(),
            None => Ok(()),
        }
    }

    /// Feeds every record of the log file to `visit`, in write order, and
    /// returns the number of records.
    pub fn replay(
        &self,
        fs: &dyn FileSystem,
        mut visit: impl FnMut(&[u8], &[u8]) -> Result<()>,
    ) -> Result<usize> {
        let file = fs.open_file(&self.metadata.path, FileMode::Open, FileAccess::Read)?;
        let mut reader = LogReader::new(BufReader::new(file));
        let mut count = 0;
        while let Some(record) = reader.read_record()? {
            let mut decoder = Decoder::new(&record);
            let key = decoder.get_bytes()?;
            let value = decoder.get_bytes()?;
            if !decoder.is_empty() {
                return Err(LsmError::corrupted(format!(
                    "trailing bytes in record {} of {}",
                    count, self.metadata.id
                )));
            }
            visit(key, value)?;
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use crate::env::{FileId, FileMetadata, FileType, LocalFileSystem};
    use crate::error::Status;
    use crate::wal::PhysicalLog;

    #[test]
    fn test_log_replay() {
        let _ = env_logger::try_init();
        let temp_dir = tempfile::TempDir::new().unwrap();
        let metadata = FileMetadata::new(temp_dir.path(), FileId::new(FileType::Log, 3));
        let log = PhysicalLog::create(&LocalFileSystem, metadata.clone(), 64, false).unwrap();
        assert!(log.is_writable());
        let mut written = vec![];
        for i in 0..100u32 {
            let key = format!("key{}", i).into_bytes();
            let value = vec![i as u8; (i % 7) as usize];
            log.log_set(&key, &value).unwrap();
            written.push((key, value));
        }
        log.close().unwrap();
        assert!(!log.is_writable());
        assert!(log.log_set(b"k", b"v").is_err());

        let recovered = PhysicalLog::recovered(metadata);
        assert!(!recovered.is_writable());
        let mut replayed = vec![];
        let count = recovered
            .replay(&LocalFileSystem, |k, v| {
                replayed.push((k.to_vec(), v.to_vec()));
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 100);
        assert_eq!(replayed, written);
    }

    #[test]
    fn test_truncated_log_is_corrupted() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let metadata = FileMetadata::new(temp_dir.path(), FileId::new(FileType::Log, 4));
        let log = PhysicalLog::create(&LocalFileSystem, metadata.clone(), 4096, false).unwrap();
        log.log_set(b"alpha", b"one").unwrap();
        log.log_set(b"beta", b"two").unwrap();
        log.close().unwrap();

        let bytes = std::fs::read(&metadata.path).unwrap();
        std::fs::write(&metadata.path, &bytes[..bytes.len() - 2]).unwrap();
        let err = PhysicalLog::recovered(metadata)
            .replay(&LocalFileSystem, |_, _| Ok(()))
            .unwrap_err();
        assert_eq!(err.status(), Status::Corrupted);
    }
}
