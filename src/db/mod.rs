//! Database façade.
//!
//! Writes go to the active [`VirtualTable`] under one mutex. A filled table
//! is replaced by a fresh one, registered in the manifest together with its
//! log, and handed to the compaction thread. Reads take epoch protection,
//! then probe the tables of the current manifest state from newest to
//! oldest.

pub mod db_iter;
pub mod key_types;
pub mod options;

pub use db_iter::DbIterator;
pub use options::{BlockCacheKind, DatabaseOptions, MAX_VIRTUAL_TABLE_SIZE};

use crate::compaction::{spawn_compaction_thread, CompactionJob, CompactionQueue, Compactor};
use crate::db::db_iter::SourceIter;
use crate::db::key_types::{decode_index_key, encode_index_key, encoded_len, LookupKey, LSN};
use crate::env::{FileId, FileMetadata, FileType};
use crate::epoch::Epoch;
use crate::error::LsmError;
use crate::iterator::KvIterator;
use crate::manifest::{Manifest, ManifestEdit, ManifestOptions, ManifestState};
use crate::memory::VirtualTable;
use crate::wal::PhysicalLog;
use crate::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

pub struct Database {
    options: DatabaseOptions,
    epoch: Arc<Epoch>,
    manifest: Arc<Manifest>,
    /// Active memory table. Held for the whole of a write.
    writer: Mutex<Arc<VirtualTable>>,
    sequence: AtomicU64,
    queue: Arc<CompactionQueue>,
    compactor: Arc<Compactor>,
    compaction_thread: Option<JoinHandle<()>>,
}

impl Database {
    /// Opens or creates the database in `options.path`. Logs left by a
    /// previous run are replayed into memory tables that are compacted in
    /// the background.
    pub fn open(options: DatabaseOptions) -> Result<Database> {
        options.validate()?;
        let fs = options.file_system.clone();
        let cache = options.block_cache.build();
        let epoch = Arc::new(Epoch::new());
        let manifest = Arc::new(Manifest::open(
            ManifestOptions {
                dir: options.path.clone(),
                max_log_size: options.manifest_log_size,
                sync: options.sync,
            },
            fs.clone(),
            cache.clone(),
            epoch.clone(),
        )?);

        let mut last_sequence = manifest.last_sequence();
        let mut replayed = vec![];
        for log in manifest.current().physical_logs() {
            let table = Arc::new(VirtualTable::replay(
                log.clone(),
                &*fs,
                options.virtual_table_size,
            )?);
            last_sequence = last_sequence.max(max_sequence(&table)?);
            info!("recovered {} records from {}", table.len(), log.id());
            replayed.push(table);
        }
        if !replayed.is_empty() {
            let mut edit = ManifestEdit::new().last_sequence(last_sequence);
            for table in &replayed {
                edit = edit.register_virtual_table(table.clone());
            }
            manifest.commit(edit)?;
        }
        let active = new_virtual_table(&manifest, &options, last_sequence)?;

        let queue = Arc::new(CompactionQueue::new(options.max_pending_compactions));
        let compactor = Arc::new(Compactor::new(
            manifest.clone(),
            fs,
            cache,
            options.table_options(),
            options.sync,
        ));
        let compaction_thread = spawn_compaction_thread(queue.clone(), compactor.clone())?;
        for table in replayed {
            queue.enqueue(CompactionJob::new(table));
        }

        info!(
            "opened database at {:?}, last sequence {}",
            options.path, last_sequence
        );
        Ok(Database {
            options,
            epoch,
            manifest,
            writer: Mutex::new(active),
            sequence: AtomicU64::new(last_sequence),
            queue,
            compactor,
            compaction_thread: Some(compaction_thread),
        })
    }

    /// Stores `value` under `key`, shadowing any earlier value.
    ///
    /// A record whose stored size exceeds `virtual_table_size` can never fit
    /// in a memory table and fails with [`LsmError::RecordTooLarge`].
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let size = encoded_len(key) + value.len();
        let capacity = self.options.virtual_table_size;
        if size > capacity {
            return Err(LsmError::RecordTooLarge { size, capacity });
        }

        let _guard = self.epoch.protect();
        let mut active = self.writer.lock().unwrap();
        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        let index_key = encode_index_key(key, sequence);
        loop {
            match active.set(&index_key, value) {
                Ok(()) => return Ok(()),
                Err(LsmError::Filled) => self.rotate(&mut active)?,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let _guard = self.epoch.protect();
        let state = self.manifest.current();
        let lookup = LookupKey::new(key);

        // A memory table whose flush failed stays registered behind newer
        // tables, so every source is probed. After a hit, only versions newer
        // than it are searched for.
        let mut newest: Option<(Vec<u8>, Vec<u8>)> = None;
        for table in state.virtual_tables().iter().rev() {
            let end = newest.as_ref().map_or(lookup.end(), |(k, _)| k.as_slice());
            let found = table.find_first_in(lookup.start(), end)?;
            if found.is_some() {
                newest = found;
            }
        }
        for table in state.physical_tables().iter().rev() {
            let end = newest.as_ref().map_or(lookup.end(), |(k, _)| k.as_slice());
            let found = table.find_first_in(lookup.start(), end, lookup.prefix())?;
            if found.is_some() {
                newest = found;
            }
        }
        Ok(newest.map(|(_, value)| value))
    }

    /// Calls `visit` with every key in `[start, end]` and its newest value,
    /// in key order.
    pub fn get_range(
        &self,
        start: &[u8],
        end: &[u8],
        mut visit: impl FnMut(&[u8], &[u8]),
    ) -> Result<()> {
        let mut iter = self.iter()?;
        let _guard = self.epoch.protect();
        iter.seek(start);
        while iter.valid() && iter.key() <= end {
            visit(iter.key(), iter.value());
            iter.next();
        }
        iter.status()
    }

    /// Unpositioned cursor over the newest value of every key.
    pub fn iter(&self) -> Result<DbIterator> {
        let _guard = self.epoch.protect();
        let pin = self.manifest.pin();
        let mut iters: Vec<SourceIter> =
            Vec::with_capacity(pin.physical_tables().len() + pin.virtual_tables().len());
        for table in pin.physical_tables() {
            iters.push(Box::new(table.iter()));
        }
        for table in pin.virtual_tables() {
            iters.push(Box::new(table.iter()));
        }
        Ok(DbIterator::new(pin, iters))
    }

    /// Whether retired memory tables are waiting for or undergoing compaction.
    pub fn is_compacting(&self) -> bool {
        self.queue.count() > 0
    }

    pub fn compaction_count(&self) -> u64 {
        self.compactor.count()
    }

    pub fn current_state(&self) -> Arc<ManifestState> {
        self.manifest.current()
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    /// Replaces the filled active table and queues it for compaction.
    fn rotate(&self, active: &mut Arc<VirtualTable>) -> Result<()> {
        let table = new_virtual_table(
            &self.manifest,
            &self.options,
            self.sequence.load(Ordering::Acquire),
        )?;
        let retired = std::mem::replace(active, table);
        if let Some(log) = retired.log() {
            log.flush()?;
        }
        debug!(
            "rotated memory table: {} entries, {} bytes, {} bytes of arena",
            retired.len(),
            retired.size(),
            retired.memory_usage()
        );
        if !self.queue.enqueue(CompactionJob::new(retired)) {
            warn!("compaction queue disposed, retired table stays in memory");
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Some(log) = self.writer.lock().unwrap().log() {
            if let Err(e) = log.flush() {
                error!("failed to flush {}: {}", log.id(), e);
            }
        }
        self.queue.dispose();
        if let Some(handle) = self.compaction_thread.take() {
            if handle.join().is_err() {
                error!("compaction thread panicked");
            }
        }
        self.epoch.drain();
        if let Err(e) = self.manifest.close() {
            error!("failed to close manifest: {}", e);
        }
        info!("closed database at {:?}", self.options.path);
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Creates a memory table with a fresh log and registers both.
fn new_virtual_table(
    manifest: &Manifest,
    options: &DatabaseOptions,
    last_sequence: LSN,
) -> Result<Arc<VirtualTable>> {
    let id = FileId::new(FileType::Log, manifest.next_file_number());
    let log = Arc::new(PhysicalLog::create(
        &*options.file_system,
        FileMetadata::new(manifest.dir(), id),
        options.write_log_buffer_size,
        options.sync,
    )?);
    let table = Arc::new(VirtualTable::new(
        options.virtual_table_size,
        Some(log.clone()),
    ));
    manifest.commit(
        ManifestEdit::new()
            .last_sequence(last_sequence)
            .register_virtual_table(table.clone())
            .register_log(log),
    )?;
    debug!("new memory table logging to {}", id);
    Ok(table)
}

fn max_sequence(table: &Arc<VirtualTable>) -> Result<LSN> {
    let mut max = 0;
    let mut iter = table.iter();
    iter.seek_to_first();
    while iter.valid() {
        let (_, sequence) = decode_index_key(iter.key())?;
        max = max.max(sequence);
        iter.next();
    }
    Ok(max)
}

#[cfg(test)]
mod tests {
    use crate::db::{Database, DatabaseOptions};
    use crate::env::{FileAccess, FileMode, FileSystem, LocalFileSystem};
    use crate::error::{LsmError, Status};
    use crate::iterator::KvIterator;
    use crate::Result;
    use std::fs::File;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Local file system whose table creation can be made to fail.
    #[derive(Default)]
    struct FailingTableFs {
        fail_tables: AtomicBool,
    }

    impl FileSystem for FailingTableFs {
        fn create_dir(&self, path: &Path) -> Result<()> {
            LocalFileSystem.create_dir(path)
        }

        fn open_file(&self, path: &Path, mode: FileMode, access: FileAccess) -> Result<File> {
            let is_table = path.extension().map_or(false, |ext| ext == "olog");
            if is_table && mode == FileMode::Create && self.fail_tables.load(Ordering::Acquire) {
                return Err(LsmError::Custom("table creation failed".to_owned()));
            }
            LocalFileSystem.open_file(path, mode, access)
        }

        fn list_files(&self, path: &Path) -> Result<Vec<String>> {
            LocalFileSystem.list_files(path)
        }

        fn delete_file(&self, path: &Path) -> Result<bool> {
            LocalFileSystem.delete_file(path)
        }

        fn rename(&self, from: &Path, to: &Path) -> Result<()> {
            LocalFileSystem.rename(from, to)
        }
    }

    fn wait_for_compactions(db: &Database) {
        while db.is_compacting() {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
    }

    fn options(dir: &std::path::Path) -> DatabaseOptions {
        let mut options = DatabaseOptions::new(dir);
        options.virtual_table_size = 1024;
        options.data_block_size = 256;
        options
    }

    #[test]
    fn test_set_get() {
        let _ = env_logger::try_init();
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db = Database::open(options(temp_dir.path())).unwrap();
        assert_eq!(db.get(b"missing").unwrap(), None);

        db.set(b"key", b"v1").unwrap();
        assert_eq!(db.get(b"key").unwrap(), Some(b"v1".to_vec()));
        db.set(b"key", b"v2").unwrap();
        assert_eq!(db.get(b"key").unwrap(), Some(b"v2".to_vec()));
        assert_eq!(db.get(b"ke").unwrap(), None);
        assert_eq!(db.get(b"key\0").unwrap(), None);

        db.set(b"", b"empty key").unwrap();
        db.set(b"zero\0byte", b"").unwrap();
        assert_eq!(db.get(b"").unwrap(), Some(b"empty key".to_vec()));
        assert_eq!(db.get(b"zero\0byte").unwrap(), Some(vec![]));
        assert_eq!(db.get(b"zero").unwrap(), None);
    }

    #[test]
    fn test_overwrite_across_tables() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db = Database::open(options(temp_dir.path())).unwrap();
        for round in 0..20u32 {
            for i in 0..50u32 {
                db.set(&i.to_be_bytes(), &round.to_le_bytes()).unwrap();
            }
        }
        while db.is_compacting() {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(db.compaction_count() > 0);
        assert!(!db.current_state().physical_tables().is_empty());
        for i in 0..50u32 {
            assert_eq!(db.get(&i.to_be_bytes()).unwrap(), Some(19u32.to_le_bytes().to_vec()));
        }

        let mut iter = db.iter().unwrap();
        iter.seek_to_first();
        let mut count = 0u32;
        while iter.valid() {
            assert_eq!(iter.key(), &count.to_be_bytes());
            assert_eq!(iter.value(), &19u32.to_le_bytes());
            count += 1;
            iter.next();
        }
        assert!(iter.status().is_ok());
        assert_eq!(count, 50);
    }

    #[test]
    fn test_get_range() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db = Database::open(options(temp_dir.path())).unwrap();
        for i in (0..300u32).rev() {
            db.set(format!("key{:04}", i).as_bytes(), &i.to_le_bytes()).unwrap();
        }
        let mut seen = vec![];
        db.get_range(b"key0100", b"key0199", |k, v| {
            seen.push((k.to_vec(), v.to_vec()));
        })
        .unwrap();
        assert_eq!(seen.len(), 100);
        for (n, (k, v)) in seen.iter().enumerate() {
            let i = 100 + n as u32;
            assert_eq!(k, format!("key{:04}", i).as_bytes());
            assert_eq!(v, &i.to_le_bytes());
        }

        let mut count = 0;
        db.get_range(b"zzz", b"zzzz", |_, _| count += 1).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_record_too_large() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db = Database::open(options(temp_dir.path())).unwrap();
        let err = db.set(b"key", &[0u8; 1024]).unwrap_err();
        assert_eq!(err.status(), Status::Failed);
        assert!(matches!(err, LsmError::RecordTooLarge { capacity: 1024, .. }));
        assert_eq!(db.get(b"key").unwrap(), None);
        // largest record that fits
        db.set(b"key", &[7u8; 1024 - 13]).unwrap();
        assert_eq!(db.get(b"key").unwrap(), Some(vec![7u8; 1024 - 13]));
    }

    #[test]
    fn test_failed_flush_does_not_shadow_newer_value() {
        let _ = env_logger::try_init();
        let temp_dir = tempfile::TempDir::new().unwrap();
        let fs = Arc::new(FailingTableFs::default());
        let mut options = options(temp_dir.path());
        options.file_system = fs.clone() as Arc<dyn FileSystem>;
        let db = Database::open(options).unwrap();

        fs.fail_tables.store(true, Ordering::Release);
        db.set(b"key", b"old").unwrap();
        for i in 0..100u32 {
            db.set(&i.to_be_bytes(), &[0u8; 32]).unwrap();
        }
        wait_for_compactions(&db);
        assert!(db.current_state().physical_tables().is_empty());
        assert!(db.current_state().virtual_tables().len() > 1);

        fs.fail_tables.store(false, Ordering::Release);
        db.set(b"key", b"new").unwrap();
        for i in 0..100u32 {
            db.set(&i.to_be_bytes(), &[1u8; 32]).unwrap();
        }
        wait_for_compactions(&db);
        assert!(!db.current_state().physical_tables().is_empty());

        // the memory table holding "old" is still registered
        assert_eq!(db.get(b"key").unwrap(), Some(b"new".to_vec()));
        let mut values = vec![];
        db.get_range(b"key", b"key", |_, v| values.push(v.to_vec())).unwrap();
        assert_eq!(values, vec![b"new".to_vec()]);
    }
}
