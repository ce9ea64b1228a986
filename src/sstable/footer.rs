use crate::coding::{Decoder, Encoder};
use crate::error::LsmError;
use crate::ioutils::read_exact_at;
use crate::sstable::block::{BlockHandle, BLOCK_HANDLE_SIZE};
use crate::Result;
use std::fs::File;
use std::io::Write;

/// Trailing length field, not counted in itself.
pub const FOOTER_LENGTH_SIZE: u64 = 4;

pub(crate) struct Footer {
    pub filter: Vec<u8>,
    pub first_key: Vec<u8>,
    pub last_key: Vec<u8>,
    pub index_handle: BlockHandle,
}

impl Footer {
    pub(crate) fn write_to_file(&self, writer: &mut impl Write) -> Result<()> {
        let mut encoder = Encoder::with_capacity(
            self.filter.len() + self.first_key.len() + self.last_key.len() + 32,
        );
        encoder.put_bytes(&self.filter);
        encoder.put_bytes(&self.first_key);
        encoder.put_bytes(&self.last_key);
        encoder.put_raw(&self.index_handle.encode());
        let length = encoder.len() as u32;
        encoder.put_u32(length);
        writer.write_all(encoder.as_slice())?;
        Ok(())
    }

    pub(crate) fn load_footer(file: &File, file_len: u64) -> Result<Footer> {
        if file_len < FOOTER_LENGTH_SIZE {
            return Err(LsmError::corrupted("table file too short for a footer"));
        }
        let mut length = [0u8; 4];
        read_exact_at(file, &mut length, file_len - FOOTER_LENGTH_SIZE)?;
        let length = Decoder::new(&length).get_u32()? as u64;
        if length + FOOTER_LENGTH_SIZE > file_len || length < BLOCK_HANDLE_SIZE as u64 {
            return Err(LsmError::corrupted(format!(
                "footer length {} in a file of {} bytes",
                length, file_len
            )));
        }

        let mut buf = vec![0u8; length as usize];
        read_exact_at(file, &mut buf, file_len - FOOTER_LENGTH_SIZE - length)?;
        let mut decoder = Decoder::new(&buf);
        let filter = decoder.get_bytes()?.to_vec();
        let first_key = decoder.get_bytes()?.to_vec();
        let last_key = decoder.get_bytes()?.to_vec();
        let index_handle = BlockHandle::decode(decoder.get_raw(BLOCK_HANDLE_SIZE)?)?;
        if !decoder.is_empty() {
            return Err(LsmError::corrupted("trailing bytes in footer"));
        }
        Ok(Footer {
            filter,
            first_key,
            last_key,
            index_handle,
        })
    }

    /// Bytes the footer occupies at the end of the file.
    pub(crate) fn encoded_len(&self) -> u64 {
        let mut encoder = Encoder::new();
        encoder.put_bytes(&self.filter);
        encoder.put_bytes(&self.first_key);
        encoder.put_bytes(&self.last_key);
        encoder.len() as u64 + BLOCK_HANDLE_SIZE as u64 + FOOTER_LENGTH_SIZE
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Status;
    use crate::sstable::block::BlockHandle;
    use crate::sstable::footer::Footer;
    use std::io::Write;

    #[test]
    fn test_footer_round_trip() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("000001.olog");
        let footer = Footer {
            filter: vec![0xff; 64],
            first_key: b"apple".to_vec(),
            last_key: b"zebra".to_vec(),
            index_handle: BlockHandle::new(100, 42),
        };
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&[7u8; 142]).unwrap();
        footer.write_to_file(&mut file).unwrap();
        drop(file);

        let file = std::fs::File::open(&path).unwrap();
        let len = file.metadata().unwrap().len();
        assert_eq!(len, 142 + footer.encoded_len());
        let loaded = Footer::load_footer(&file, len).unwrap();
        assert_eq!(loaded.filter, footer.filter);
        assert_eq!(loaded.first_key, b"apple");
        assert_eq!(loaded.last_key, b"zebra");
        assert_eq!(loaded.index_handle, BlockHandle::new(100, 42));
    }

    #[test]
    fn test_bad_footer_length() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.olog");
        std::fs::write(&path, [1u8, 2, 0xff, 0xff, 0, 0]).unwrap();
        let file = std::fs::File::open(&path).unwrap();
        let err = Footer::load_footer(&file, 6).err().unwrap();
        assert_eq!(err.status(), Status::Corrupted);
        assert!(Footer::load_footer(&file, 2).is_err());
    }
}
