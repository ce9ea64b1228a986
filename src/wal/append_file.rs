use crate::error::LsmError;
use crate::Result;
use std::cell::UnsafeCell;
use std::fs::File;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Append-only file fronted by a fixed-size buffer that many threads may
/// write into at once.
///
/// A writer registers itself in `writers`, then reserves a byte range with a
/// single `fetch_add` on `offset` and copies its data there. The writer whose
/// reservation crosses the end of the buffer becomes the overflow thread: it
/// waits until every registered writer has finished copying, writes the
/// buffer to the file and restarts the buffer with its own data. Writers that
/// reserve past the end while an overflow is in progress wait for the reset
/// and retry. An `offset` beyond `capacity` therefore means "being flushed".
pub struct AppendFile {
    buffer: Box<[UnsafeCell<u8>]>,
    capacity: usize,
    offset: AtomicUsize,
    writers: AtomicUsize,
    file: Mutex<File>,
    sync: bool,
    closed: AtomicBool,
}

unsafe impl Send for AppendFile {}
unsafe impl Sync for AppendFile {}

impl AppendFile {
    pub fn new(file: File, capacity: usize, sync: bool) -> AppendFile {
        AppendFile {
            buffer: (0..capacity.max(1)).map(|_| UnsafeCell::new(0)).collect(),
            capacity: capacity.max(1),
            offset: AtomicUsize::new(0),
            writers: AtomicUsize::new(0),
            file: Mutex::new(file),
            sync,
            closed: AtomicBool::new(false),
        }
    }

    pub fn write(&self, data: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LsmError::Closed);
        }
        if data.len() >= self.capacity {
            return self.write_through(data);
        }

        loop {
            self.writers.fetch_add(1, Ordering::AcqRel);
            let start = self.offset.fetch_add(data.len(), Ordering::AcqRel);
            let end = start + data.len();
            if end <= self.capacity {
                unsafe { self.copy_into(start, data) };
                self.writers.fetch_sub(1, Ordering::AcqRel);
                return Ok(());
            }
            self.writers.fetch_sub(1, Ordering::AcqRel);

            if start <= self.capacity {
                // This reservation crossed the end: bytes [0, start) are complete
                // once the other writers drain.
                self.wait_for_writers();
                let result = self.flush_buffer(start);
                unsafe { self.copy_into(0, data) };
                self.offset.store(data.len(), Ordering::Release);
                return result;
            }

            while self.offset.load(Ordering::Acquire) > self.capacity {
                std::thread::yield_now();
            }
        }
    }

    /// Writes everything buffered so far to the file.
    pub fn flush(&self) -> Result<()> {
        self.write_through(&[])
    }

    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.write_through(&[])
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Seals the buffer, flushes it, then writes `data` unbuffered.
    fn write_through(&self, data: &[u8]) -> Result<()> {
        let sealed = self.capacity + 1;
        let mut current = self.offset.load(Ordering::Acquire);
        loop {
            if current > self.capacity {
                std::thread::yield_now();
                current = self.offset.load(Ordering::Acquire);
                continue;
            }
            match self.offset.compare_exchange_weak(
                current,
                sealed,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        self.wait_for_writers();

        let result = self.flush_buffer(current).and_then(|_| {
            if data.is_empty() {
                return Ok(());
            }
            let mut file = self.file.lock().unwrap();
            file.write_all(data)?;
            if self.sync {
                file.sync_data()?;
            }
            Ok(())
        });
        self.offset.store(0, Ordering::Release);
        result
    }

    fn wait_for_writers(&self) {
        while self.writers.load(Ordering::Acquire) != 0 {
            std::thread::yield_now();
        }
    }

    fn flush_buffer(&self, len: usize) -> Result<()> {
        let mut file = self.file.lock().unwrap();
        if len > 0 {
            let bytes =
                unsafe { std::slice::from_raw_parts(self.buffer.as_ptr() as *const u8, len) };
            file.write_all(bytes)?;
        }
        if self.sync {
            file.sync_data()?;
        }
        Ok(())
    }

    /// # Safety
    /// `[start, start + data.len())` must be a range reserved by the caller.
    unsafe fn copy_into(&self, start: usize, data: &[u8]) {
        std::ptr::copy_nonoverlapping(
            data.as_ptr(),
            (self.buffer.as_ptr() as *mut u8).add(start),
            data.len(),
        );
    }
}

impl Drop for AppendFile {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("failed to flush append file: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::wal::append_file::AppendFile;
    use std::sync::Arc;

    #[test]
    fn test_buffered_writes() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("000001.ulog");
        let file = std::fs::File::create(&path).unwrap();
        let append = AppendFile::new(file, 16, false);
        append.write(b"0123456789").unwrap();
        // still buffered
        assert_eq!(std::fs::read(&path).unwrap().len(), 0);
        append.write(b"abcdefghij").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"0123456789");
        append.write(&[b'x'; 40]).unwrap();
        append.flush().unwrap();

        let mut expected = b"0123456789abcdefghij".to_vec();
        expected.extend_from_slice(&[b'x'; 40]);
        assert_eq!(std::fs::read(&path).unwrap(), expected);

        append.close().unwrap();
        assert!(append.write(b"late").is_err());
    }

    #[test]
    fn test_concurrent_writers() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("000002.ulog");
        let file = std::fs::File::create(&path).unwrap();
        let append = Arc::new(AppendFile::new(file, 256, false));

        let mut handles = vec![];
        for t in 0..4u8 {
            let append = append.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..500u16 {
                    let mut record = vec![t; 6];
                    record[1..3].copy_from_slice(&i.to_le_bytes());
                    append.write(&record).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        append.close().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 4 * 500 * 6);
        let mut next = [0u16; 4];
        for record in bytes.chunks(6) {
            let t = record[0] as usize;
            assert_eq!(record[3..], [record[0]; 3]);
            let i = u16::from_le_bytes([record[1], record[2]]);
            // each writer's records appear in its own program order
            assert_eq!(i, next[t]);
            next[t] += 1;
        }
        assert_eq!(next, [500; 4]);
    }
}
