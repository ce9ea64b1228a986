use crate::env::FileId;
use crate::manifest::edit::{EditRecord, ManifestEdit};
use crate::memory::VirtualTable;
use crate::sstable::PhysicalTable;
use crate::wal::PhysicalLog;
use std::sync::Arc;

/// Immutable snapshot of the live tables and logs. Every list is ordered
/// oldest first.
#[derive(Default)]
pub struct ManifestState {
    pub(crate) generation: u64,
    pub(crate) virtual_tables: Vec<Arc<VirtualTable>>,
    pub(crate) physical_tables: Vec<Arc<PhysicalTable>>,
    pub(crate) physical_logs: Vec<Arc<PhysicalLog>>,
}

impl ManifestState {
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn virtual_tables(&self) -> &[Arc<VirtualTable>] {
        &self.virtual_tables
    }

    pub fn physical_tables(&self) -> &[Arc<PhysicalTable>] {
        &self.physical_tables
    }

    pub fn physical_logs(&self) -> &[Arc<PhysicalLog>] {
        &self.physical_logs
    }

    /// Ids of every file this state refers to.
    pub fn files(&self) -> impl Iterator<Item = FileId> + '_ {
        self.physical_tables
            .iter()
            .map(|t| t.id())
            .chain(self.physical_logs.iter().map(|l| l.id()))
    }

    /// Next state: `edit`'s unregistrations, then its registrations. Already
    /// registered entries are not added twice.
    pub(crate) fn apply(&self, edit: &ManifestEdit, generation: u64) -> ManifestState {
        let mut virtual_tables: Vec<_> = self
            .virtual_tables
            .iter()
            .filter(|t| !edit.unregister_virtual_tables.iter().any(|u| Arc::ptr_eq(*t, u)))
            .cloned()
            .collect();
        let mut physical_tables: Vec<_> = self
            .physical_tables
            .iter()
            .filter(|t| !edit.unregister_tables.contains(&t.id()))
            .cloned()
            .collect();
        let mut physical_logs: Vec<_> = self
            .physical_logs
            .iter()
            .filter(|l| !edit.unregister_logs.contains(&l.id()))
            .cloned()
            .collect();

        for table in &edit.register_virtual_tables {
            if !virtual_tables.iter().any(|t| Arc::ptr_eq(t, table)) {
                virtual_tables.push(table.clone());
            }
        }
        for table in &edit.register_tables {
            if !physical_tables.iter().any(|t| t.id() == table.id()) {
                physical_tables.push(table.clone());
            }
        }
        for log in &edit.register_logs {
            if !physical_logs.iter().any(|l| l.id() == log.id()) {
                physical_logs.push(log.clone());
            }
        }

        ManifestState {
            generation,
            virtual_tables,
            physical_tables,
            physical_logs,
        }
    }

    /// Edit that rebuilds this state from nothing.
    pub(crate) fn to_record(&self, last_sequence: u64, next_file_number: u64) -> EditRecord {
        EditRecord {
            last_sequence: Some(last_sequence),
            next_file_number: Some(next_file_number),
            unregistered: vec![],
            registered: self.files().collect(),
        }
    }
}
