//! Background flushing of filled memory tables.
//!
//! A single thread takes [`CompactionJob`]s off a bounded queue and turns
//! each virtual table into a physical table. The manifest edit that
//! registers the new table also unregisters the virtual table and its log,
//! so the log file is deleted once no reader can still see the old state.

use crate::env::{FileAccess, FileId, FileMetadata, FileMode, FileSystem, FileType};
use crate::manifest::{Manifest, ManifestEdit};
use crate::memory::VirtualTable;
use crate::sstable::{BlockCache, PhysicalTable, TableOptions};
use crate::Result;
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

pub type CompactionCallback = Box<dyn FnOnce(&Result<Option<FileId>>) + Send>;

pub struct CompactionJob {
    pub table: Arc<VirtualTable>,
    /// Runs after the job, successful or not.
    pub callback: Option<CompactionCallback>,
}

impl CompactionJob {
    pub fn new(table: Arc<VirtualTable>) -> CompactionJob {
        CompactionJob {
            table,
            callback: None,
        }
    }

    pub fn with_callback(
        table: Arc<VirtualTable>,
        callback: impl FnOnce(&Result<Option<FileId>>) + Send + 'static,
    ) -> CompactionJob {
        CompactionJob {
            table,
            callback: Some(Box::new(callback)),
        }
    }
}

/// Bounded queue of compaction jobs.
///
/// A job counts as pending from [`enqueue`](CompactionQueue::enqueue) until
/// the consumer reports it with [`complete`](CompactionQueue::complete).
pub struct CompactionQueue {
    sender: Mutex<Option<Sender<CompactionJob>>>,
    receiver: Receiver<CompactionJob>,
    pending: Mutex<usize>,
    drained: Condvar,
}

impl CompactionQueue {
    pub fn new(capacity: usize) -> CompactionQueue {
        let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
        CompactionQueue {
            sender: Mutex::new(Some(sender)),
            receiver,
            pending: Mutex::new(0),
            drained: Condvar::new(),
        }
    }

    /// Blocks while the queue is full. Returns `false`, dropping the job, once
    /// the queue is disposed.
    pub fn enqueue(&self, job: CompactionJob) -> bool {
        let sender = match self.sender.lock().unwrap().as_ref() {
            Some(sender) => sender.clone(),
            None => return false,
        };
        *self.pending.lock().unwrap() += 1;
        if sender.send(job).is_err() {
            self.complete();
            return false;
        }
        true
    }

    /// Waits for the next job. `None` once the queue is disposed and empty.
    pub fn try_dequeue(&self) -> Option<CompactionJob> {
        self.receiver.recv().ok()
    }

    pub fn complete(&self) {
        let mut pending = self.pending.lock().unwrap();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.drained.notify_all();
        }
    }

    /// Jobs enqueued and not completed yet.
    pub fn count(&self) -> usize {
        *self.pending.lock().unwrap()
    }

    pub fn is_disposed(&self) -> bool {
        self.sender.lock().unwrap().is_none()
    }

    /// Stops accepting jobs and blocks until every accepted job completed.
    /// Must not be called from the consumer thread.
    pub fn dispose(&self) {
        self.sender.lock().unwrap().take();
        let mut pending = self.pending.lock().unwrap();
        while *pending > 0 {
            pending = self.drained.wait(pending).unwrap();
        }
    }
}

/// Flushes virtual tables into physical tables and records the swap.
pub struct Compactor {
    manifest: Arc<Manifest>,
    fs: Arc<dyn FileSystem>,
    cache: Arc<dyn BlockCache>,
    options: TableOptions,
    sync: bool,
    compactions: AtomicU64,
}

impl Compactor {
    pub fn new(
        manifest: Arc<Manifest>,
        fs: Arc<dyn FileSystem>,
        cache: Arc<dyn BlockCache>,
        options: TableOptions,
        sync: bool,
    ) -> Compactor {
        Compactor {
            manifest,
            fs,
            cache,
            options,
            sync,
            compactions: AtomicU64::new(0),
        }
    }

    /// Returns the id of the new table, or `None` when `table` was empty and
    /// was dropped without writing a file.
    pub fn compact(&self, table: &Arc<VirtualTable>) -> Result<Option<FileId>> {
        let mut edit = ManifestEdit::new().unregister_virtual_table(table.clone());
        if let Some(log) = table.log() {
            edit = edit.unregister_log(log.id());
        }

        if table.is_empty() {
            self.manifest.commit(edit)?;
            self.compactions.fetch_add(1, Ordering::AcqRel);
            debug!("dropped empty virtual table");
            return Ok(None);
        }

        let id = FileId::new(FileType::Table, self.manifest.next_file_number());
        let metadata = FileMetadata::new(self.manifest.dir(), id);
        let file = self
            .fs
            .open_file(&metadata.path, FileMode::Create, FileAccess::Write)?;
        let file = table.flush(file, self.options)?;
        if self.sync {
            file.sync_all()?;
        }
        drop(file);

        let physical = Arc::new(PhysicalTable::open(&*self.fs, metadata, self.cache.clone())?);
        self.manifest.commit(edit.register_table(physical))?;
        self.compactions.fetch_add(1, Ordering::AcqRel);
        info!(
            "compacted {} entries ({} bytes) into {}",
            table.len(),
            table.size(),
            id
        );
        Ok(Some(id))
    }

    /// Completed compactions, including dropped empty tables.
    pub fn count(&self) -> u64 {
        self.compactions.load(Ordering::Acquire)
    }
}

/// Starts the thread that drains `queue` until it is disposed.
pub fn spawn_compaction_thread(
    queue: Arc<CompactionQueue>,
    compactor: Arc<Compactor>,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("compaction".to_owned())
        .spawn(move || {
            info!("compaction thread start");
            while let Some(job) = queue.try_dequeue() {
                let result = compactor.compact(&job.table);
                if let Err(e) = &result {
                    error!("compaction failed: {}", e);
                }
                if let Some(callback) = job.callback {
                    callback(&result);
                }
                queue.complete();
            }
            info!("compaction thread exit");
        })?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use crate::compaction::{spawn_compaction_thread, CompactionJob, CompactionQueue, Compactor};
    use crate::env::{FileId, FileMetadata, FileType, LocalFileSystem};
    use crate::epoch::Epoch;
    use crate::manifest::{Manifest, ManifestEdit, ManifestOptions};
    use crate::memory::VirtualTable;
    use crate::sstable::{BlockCache, TableOptions, WeakBlockCache};
    use crate::wal::PhysicalLog;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn setup(dir: &Path) -> (Arc<Manifest>, Arc<Compactor>) {
        let fs = Arc::new(LocalFileSystem);
        let cache: Arc<dyn BlockCache> = Arc::new(WeakBlockCache::new());
        let options = ManifestOptions {
            dir: dir.to_path_buf(),
            max_log_size: 4096,
            sync: false,
        };
        let manifest =
            Arc::new(Manifest::open(options, fs.clone(), cache.clone(), Arc::new(Epoch::new())).unwrap());
        let compactor = Arc::new(Compactor::new(
            manifest.clone(),
            fs,
            cache,
            TableOptions::default(),
            false,
        ));
        (manifest, compactor)
    }

    fn registered_table(manifest: &Manifest, entries: u32) -> Arc<VirtualTable> {
        let id = FileId::new(FileType::Log, manifest.next_file_number());
        let metadata = FileMetadata::new(manifest.dir(), id);
        let log = Arc::new(PhysicalLog::create(&LocalFileSystem, metadata, 128, false).unwrap());
        let table = Arc::new(VirtualTable::new(1 << 20, Some(log.clone())));
        manifest
            .commit(
                ManifestEdit::new()
                    .register_virtual_table(table.clone())
                    .register_log(log),
            )
            .unwrap();
        for i in 0..entries {
            table.set(&i.to_be_bytes(), &i.to_le_bytes()).unwrap();
        }
        table
    }

    #[test]
    fn test_compact() {
        let _ = env_logger::try_init();
        let temp_dir = tempfile::TempDir::new().unwrap();
        let (manifest, compactor) = setup(temp_dir.path());
        let table = registered_table(&manifest, 500);
        let log_path = table.log().unwrap().metadata().path.clone();

        let id = compactor.compact(&table).unwrap().unwrap();
        assert_eq!(compactor.count(), 1);
        let current = manifest.current();
        assert!(current.virtual_tables().is_empty());
        assert!(current.physical_logs().is_empty());
        assert_eq!(current.physical_tables().len(), 1);
        assert_eq!(current.physical_tables()[0].id(), id);
        assert!(!log_path.exists());
        assert!(table.is_disposed());
        for i in 0..500u32 {
            assert_eq!(
                current.physical_tables()[0].get(&i.to_be_bytes()).unwrap(),
                Some(i.to_le_bytes().to_vec())
            );
        }
    }

    #[test]
    fn test_compact_empty_table() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let (manifest, compactor) = setup(temp_dir.path());
        let table = registered_table(&manifest, 0);
        assert_eq!(compactor.compact(&table).unwrap(), None);
        let current = manifest.current();
        assert!(current.virtual_tables().is_empty());
        assert!(current.physical_tables().is_empty());
        assert!(current.physical_logs().is_empty());
        assert_eq!(compactor.count(), 1);
    }

    #[test]
    fn test_dispose_waits_for_jobs() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let (manifest, compactor) = setup(temp_dir.path());
        let queue = Arc::new(CompactionQueue::new(2));
        let handle = spawn_compaction_thread(queue.clone(), compactor.clone()).unwrap();

        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let table = registered_table(&manifest, 100);
            let done = done.clone();
            assert!(queue.enqueue(CompactionJob::with_callback(table, move |result| {
                assert!(result.is_ok());
                std::thread::sleep(Duration::from_millis(10));
                done.fetch_add(1, Ordering::SeqCst);
            })));
        }
        queue.dispose();
        assert_eq!(done.load(Ordering::SeqCst), 5);
        assert_eq!(queue.count(), 0);
        assert!(queue.is_disposed());
        handle.join().unwrap();

        assert_eq!(manifest.current().physical_tables().len(), 5);
        let table = Arc::new(VirtualTable::new(16, None));
        assert!(!queue.enqueue(CompactionJob::new(table)));
        assert_eq!(queue.count(), 0);
    }
}
