//! Durable record of the files that make up the database.
//!
//! The manifest log "<number>.manifest" is a sequence of framed
//! [`EditRecord`](edit::EditRecord)s. Replaying them in order rebuilds the
//! set of live tables and logs. Once the log grows past
//! `max_log_size` it is replaced by a new log whose first record registers
//! the whole current state.

pub mod edit;
pub mod state;
mod version;

pub use edit::ManifestEdit;
pub use state::ManifestState;
pub use version::ManifestPin;

use crate::coding::Encoder;
use crate::env::{FileAccess, FileId, FileMetadata, FileMode, FileSystem, FileType, TEMP_EXTENSION};
use crate::epoch::Epoch;
use crate::error::LsmError;
use crate::sstable::{BlockCache, PhysicalTable};
use crate::wal::log_format::{LogReader, LogWriter};
use crate::wal::PhysicalLog;
use crate::Result;
use arc_swap::ArcSwap;
use edit::EditRecord;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use version::VersionSet;

#[derive(Clone, Debug)]
pub struct ManifestOptions {
    pub dir: PathBuf,
    /// Manifest log size in bytes that triggers segmentation.
    pub max_log_size: u64,
    /// Sync the manifest log after every edit.
    pub sync: bool,
}

struct ManifestLog {
    id: FileId,
    /// `None` once the manifest is closed.
    writer: Option<LogWriter<BufWriter<File>>>,
}

pub struct Manifest {
    options: ManifestOptions,
    fs: Arc<dyn FileSystem>,
    epoch: Arc<Epoch>,
    current: ArcSwap<ManifestState>,
    versions: Arc<VersionSet>,
    next_generation: AtomicU64,
    file_number: AtomicU64,
    last_sequence: AtomicU64,
    log: Mutex<ManifestLog>,
}

impl Manifest {
    /// Recovers the state recorded by the newest manifest log in the
    /// directory, or starts empty. Recovered logs are opened read-only.
    pub fn open(
        options: ManifestOptions,
        fs: Arc<dyn FileSystem>,
        cache: Arc<dyn BlockCache>,
        epoch: Arc<Epoch>,
    ) -> Result<Manifest> {
        let dir = options.dir.clone();
        fs.create_dir(&dir)?;

        let names = fs.list_files(&dir)?;
        // an interrupted segmentation leaves its unfinished manifest behind
        let temp_suffix = format!(".{}", TEMP_EXTENSION);
        for name in names.iter().filter(|name| name.ends_with(&temp_suffix)) {
            warn!("removing unfinished file {}", name);
            fs.delete_file(&dir.join(name))?;
        }
        let existing: Vec<FileId> = names.iter().filter_map(|name| FileId::parse(name)).collect();
        let latest = existing
            .iter()
            .filter(|id| id.file_type == FileType::Manifest)
            .max_by_key(|id| id.number)
            .copied();

        let mut recovered = Recovered::default();
        if let Some(id) = latest {
            info!("recovering from manifest {}", id);
            recovered.replay(&*fs, &dir, id)?;
        }
        let max_existing = existing.iter().map(|id| id.number + 1).max().unwrap_or(0);
        let file_number = recovered.next_file_number.max(max_existing);

        let mut physical_tables = Vec::with_capacity(recovered.tables.len());
        for &number in &recovered.tables {
            let metadata = FileMetadata::new(&dir, FileId::new(FileType::Table, number));
            physical_tables.push(Arc::new(PhysicalTable::open(&*fs, metadata, cache.clone())?));
        }
        let physical_logs: Vec<_> = recovered
            .logs
            .iter()
            .map(|&number| {
                let metadata = FileMetadata::new(&dir, FileId::new(FileType::Log, number));
                Arc::new(PhysicalLog::recovered(metadata))
            })
            .collect();
        let state = Arc::new(ManifestState {
            generation: 0,
            virtual_tables: vec![],
            physical_tables,
            physical_logs,
        });

        let versions = Arc::new(VersionSet::new(fs.clone(), dir.clone(), cache));
        versions.insert(state.clone());
        let manifest = Manifest {
            fs,
            epoch,
            current: ArcSwap::new(state.clone()),
            versions,
            next_generation: AtomicU64::new(1),
            file_number: AtomicU64::new(file_number),
            last_sequence: AtomicU64::new(recovered.last_sequence),
            log: Mutex::new(ManifestLog {
                id: FileId::new(FileType::Manifest, 0),
                writer: None,
            }),
            options,
        };

        {
            let mut log = manifest.log.lock().unwrap();
            manifest.segment(&mut log, &state)?;
        }
        manifest.remove_unused_files(&existing, &state);
        Ok(manifest)
    }

    /// Publishes the state that results from applying `edit` to the current
    /// one. The edit is in the manifest log before the state is visible.
    pub fn commit(&self, edit: ManifestEdit) -> Result<Arc<ManifestState>> {
        let mut log = self.log.lock().unwrap();
        let writer = log.writer.as_mut().ok_or(LsmError::Closed)?;

        if let Some(sequence) = edit.last_sequence {
            self.last_sequence.fetch_max(sequence, Ordering::AcqRel);
        }
        let record = edit.to_record(self.file_number.load(Ordering::Acquire));
        let mut encoder = Encoder::new();
        record.encode(&mut encoder);
        writer.add_record(encoder.as_slice())?;
        writer.flush()?;
        if self.options.sync {
            writer.get_ref().get_ref().sync_data()?;
        }
        let log_size = writer.length();

        let old = self.current.load_full();
        let generation = self.next_generation.fetch_add(1, Ordering::AcqRel);
        let state = Arc::new(old.apply(&edit, generation));
        self.versions.insert(state.clone());
        self.current.store(state.clone());
        trace!(
            "manifest generation {}: {} virtual tables, {} tables, {} logs, {} live states",
            generation,
            state.virtual_tables.len(),
            state.physical_tables.len(),
            state.physical_logs.len(),
            self.live_states()
        );

        if log_size > self.options.max_log_size {
            if let Err(e) = self.segment(&mut log, &state) {
                error!("failed to segment manifest {}: {}", log.id, e);
            }
        }
        drop(log);

        let versions = self.versions.clone();
        let retired = old.generation;
        self.epoch.defer(move || versions.release(retired));
        Ok(state)
    }

    /// Current state. Callers must hold epoch protection while they use the
    /// tables it refers to; use [`Manifest::pin`] to keep them longer.
    pub fn current(&self) -> Arc<ManifestState> {
        self.current.load_full()
    }

    /// Keeps the current state's tables and logs alive until the pin drops.
    pub fn pin(&self) -> ManifestPin {
        loop {
            let state = self.current.load_full();
            if self.versions.acquire(state.generation) {
                return ManifestPin::new(self.versions.clone(), state);
            }
        }
    }

    pub fn next_file_number(&self) -> u64 {
        self.file_number.fetch_add(1, Ordering::AcqRel)
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence.load(Ordering::Acquire)
    }

    pub fn dir(&self) -> &Path {
        &self.options.dir
    }

    /// Number of states not reclaimed yet, the current one included.
    pub fn live_states(&self) -> usize {
        self.versions.len()
    }

    pub fn is_closed(&self) -> bool {
        self.log.lock().unwrap().writer.is_none()
    }

    /// Flushes the manifest log and rejects later commits. Files of the
    /// current state are kept.
    pub fn close(&self) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        let mut writer = match log.writer.take() {
            Some(writer) => writer,
            None => return Ok(()),
        };
        writer.flush()?;
        writer.get_ref().get_ref().sync_data()?;
        drop(log);
        self.versions.clean();
        info!("manifest closed");
        Ok(())
    }

    /// Starts a new manifest log seeded with `state` and deletes the old log.
    ///
    /// The seed is written and synced under a temporary name, so a manifest
    /// carrying a final name always holds a complete state.
    fn segment(&self, log: &mut ManifestLog, state: &ManifestState) -> Result<()> {
        let id = FileId::new(FileType::Manifest, self.next_file_number());
        let temp_path = self.options.dir.join(id.temp_file_name());
        let file = self.fs.open_file(&temp_path, FileMode::Create, FileAccess::Write)?;
        let mut writer = LogWriter::new(BufWriter::new(file));

        let record = state.to_record(
            self.last_sequence.load(Ordering::Acquire),
            self.file_number.load(Ordering::Acquire),
        );
        let mut encoder = Encoder::new();
        record.encode(&mut encoder);
        writer.add_record(encoder.as_slice())?;
        writer.flush()?;
        writer.get_ref().get_ref().sync_data()?;
        self.fs
            .rename(&temp_path, &self.options.dir.join(id.file_name()))?;

        let old = std::mem::replace(log, ManifestLog { id, writer: Some(writer) });
        if old.writer.is_some() {
            self.delete_file(old.id);
        }
        info!("manifest segmented into {}", id);
        Ok(())
    }

    /// Deletes old manifests and files no recorded edit refers to.
    fn remove_unused_files(&self, existing: &[FileId], state: &ManifestState) {
        let current_log = self.log.lock().unwrap().id;
        for &id in existing {
            let keep = match id.file_type {
                FileType::Manifest => id == current_log,
                FileType::Table | FileType::Log => state.files().any(|f| f == id),
            };
            if keep {
                continue;
            }
            if id.file_type != FileType::Manifest {
                warn!("removing orphan file {}", id);
            }
            self.delete_file(id);
        }
    }

    fn delete_file(&self, id: FileId) {
        let path = self.options.dir.join(id.file_name());
        if let Err(e) = self.fs.delete_file(&path) {
            error!("failed to delete {}: {}", id, e);
        }
    }
}

impl Drop for Manifest {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("failed to close manifest: {}", e);
        }
    }
}

/// File sets rebuilt from a manifest log, in registration order.
#[derive(Default)]
struct Recovered {
    tables: Vec<u64>,
    logs: Vec<u64>,
    last_sequence: u64,
    next_file_number: u64,
}

impl Recovered {
    fn replay(&mut self, fs: &dyn FileSystem, dir: &Path, id: FileId) -> Result<()> {
        let file = fs.open_file(&dir.join(id.file_name()), FileMode::Open, FileAccess::Read)?;
        let mut reader = LogReader::new(BufReader::new(file));
        let mut edits = 0;
        while let Some(payload) = reader.read_record()? {
            self.apply(EditRecord::decode(&payload)?);
            edits += 1;
        }
        debug!("replayed {} manifest edits from {}", edits, id);
        Ok(())
    }

    fn apply(&mut self, record: EditRecord) {
        if let Some(sequence) = record.last_sequence {
            self.last_sequence = self.last_sequence.max(sequence);
        }
        if let Some(number) = record.next_file_number {
            self.next_file_number = self.next_file_number.max(number);
        }
        for id in record.unregistered {
            match id.file_type {
                FileType::Table => self.tables.retain(|&n| n != id.number),
                FileType::Log => self.logs.retain(|&n| n != id.number),
                FileType::Manifest => {}
            }
        }
        for id in record.registered {
            let files = match id.file_type {
                FileType::Table => &mut self.tables,
                FileType::Log => &mut self.logs,
                FileType::Manifest => continue,
            };
            if !files.contains(&id.number) {
                files.push(id.number);
            }
        }
    }
}
