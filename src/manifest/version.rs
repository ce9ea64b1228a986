use crate::env::{FileId, FileSystem};
use crate::manifest::state::ManifestState;
use crate::memory::VirtualTable;
use crate::sstable::{BlockCache, PhysicalTable};
use crate::wal::PhysicalLog;
use std::collections::{BTreeMap, HashSet};
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Reference-counted manifest states, addressed by generation.
///
/// The manifest holds one reference to its current state and gives it up
/// when the state is replaced; readers add their own through
/// [`ManifestPin`]. A state whose count drops to zero is removed, and the
/// resources it held that no remaining state refers to are reclaimed.
pub(crate) struct VersionSet {
    states: Mutex<BTreeMap<u64, (Arc<ManifestState>, usize)>>,
    fs: Arc<dyn FileSystem>,
    dir: PathBuf,
    cache: Arc<dyn BlockCache>,
}

impl VersionSet {
    pub fn new(fs: Arc<dyn FileSystem>, dir: PathBuf, cache: Arc<dyn BlockCache>) -> VersionSet {
        VersionSet {
            states: Mutex::new(BTreeMap::new()),
            fs,
            dir,
            cache,
        }
    }

    /// Adds a state holding one reference.
    pub fn insert(&self, state: Arc<ManifestState>) {
        let mut states = self.states.lock().unwrap();
        states.insert(state.generation, (state, 1));
    }

    /// Takes a reference on `generation` unless it is already gone.
    pub fn acquire(&self, generation: u64) -> bool {
        let mut states = self.states.lock().unwrap();
        match states.get_mut(&generation) {
            Some((_, refs)) if *refs > 0 => {
                *refs += 1;
                true
            }
            _ => false,
        }
    }

    pub fn release(&self, generation: u64) {
        let reclaim = {
            let mut states = self.states.lock().unwrap();
            match states.get_mut(&generation) {
                Some((_, refs)) => {
                    *refs -= 1;
                    *refs == 0
                }
                None => {
                    warn!("release of unknown manifest generation {}", generation);
                    false
                }
            }
        };
        if reclaim {
            self.clean();
        }
    }

    /// Number of states still tracked.
    pub fn len(&self) -> usize {
        self.states.lock().unwrap().len()
    }

    /// Drops every unreferenced state and reclaims what only those states
    /// held: virtual tables are disposed, tables and logs are deleted.
    pub fn clean(&self) {
        let dead = {
            let mut states = self.states.lock().unwrap();
            let dead_generations: Vec<u64> = states
                .iter()
                .filter(|(_, (_, refs))| *refs == 0)
                .map(|(generation, _)| *generation)
                .collect();
            if dead_generations.is_empty() {
                return;
            }
            let dead: Vec<Arc<ManifestState>> = dead_generations
                .iter()
                .filter_map(|g| states.remove(g))
                .map(|(state, _)| state)
                .collect();

            let mut alive_files = HashSet::new();
            let mut alive_virtual = HashSet::new();
            for (state, _) in states.values() {
                alive_files.extend(state.files());
                alive_virtual.extend(state.virtual_tables.iter().map(|t| Arc::as_ptr(t) as usize));
            }
            Reclaim::collect(&dead, &alive_files, &alive_virtual)
        };
        self.reclaim(dead);
    }

    fn reclaim(&self, dead: Reclaim) {
        for table in dead.virtual_tables {
            table.dispose();
        }
        for table in dead.physical_tables {
            table.dispose();
            self.cache.evict_file(table.id());
            self.delete(table.id());
        }
        for log in dead.physical_logs {
            if let Err(e) = log.close() {
                error!("failed to close {}: {}", log.id(), e);
            }
            self.delete(log.id());
        }
    }

    fn delete(&self, id: FileId) {
        let path = self.dir.join(id.file_name());
        match self.fs.delete_file(&path) {
            Ok(_) => info!("deleted obsolete file {}", id),
            Err(e) => error!("failed to delete {}: {}", id, e),
        }
    }
}

#[derive(Default)]
struct Reclaim {
    virtual_tables: Vec<Arc<VirtualTable>>,
    physical_tables: Vec<Arc<PhysicalTable>>,
    physical_logs: Vec<Arc<PhysicalLog>>,
}

impl Reclaim {
    fn collect(
        dead: &[Arc<ManifestState>],
        alive_files: &HashSet<FileId>,
        alive_virtual: &HashSet<usize>,
    ) -> Reclaim {
        let mut reclaim = Reclaim::default();
        let mut seen_files = HashSet::new();
        let mut seen_virtual = HashSet::new();
        for state in dead {
            for table in &state.virtual_tables {
                let ptr = Arc::as_ptr(table) as usize;
                if !alive_virtual.contains(&ptr) && seen_virtual.insert(ptr) {
                    reclaim.virtual_tables.push(table.clone());
                }
            }
            for table in &state.physical_tables {
                if !alive_files.contains(&table.id()) && seen_files.insert(table.id()) {
                    reclaim.physical_tables.push(table.clone());
                }
            }
            for log in &state.physical_logs {
                if !alive_files.contains(&log.id()) && seen_files.insert(log.id()) {
                    reclaim.physical_logs.push(log.clone());
                }
            }
        }
        reclaim
    }
}

/// Reference on a manifest state, released on drop.
pub struct ManifestPin {
    versions: Arc<VersionSet>,
    state: Arc<ManifestState>,
}

impl ManifestPin {
    pub(crate) fn new(versions: Arc<VersionSet>, state: Arc<ManifestState>) -> ManifestPin {
        ManifestPin { versions, state }
    }
}

impl Deref for ManifestPin {
    type Target = ManifestState;

    fn deref(&self) -> &ManifestState {
        &self.state
    }
}

impl Drop for ManifestPin {
    fn drop(&mut self) {
        self.versions.release(self.state.generation);
    }
}
