use crate::coding::{Decoder, Encoder};
use crate::env::{FileId, FileType};
use crate::error::LsmError;
use crate::memory::VirtualTable;
use crate::sstable::PhysicalTable;
use crate::wal::PhysicalLog;
use crate::Result;
use std::sync::Arc;

/// Change to the set of live tables and logs, applied atomically by
/// [`Manifest::commit`](crate::manifest::Manifest::commit).
///
/// Unregistrations apply before registrations. Virtual tables live only in
/// memory and are never written to the manifest log; their logs are.
#[derive(Default)]
pub struct ManifestEdit {
    pub(crate) last_sequence: Option<u64>,
    pub(crate) register_virtual_tables: Vec<Arc<VirtualTable>>,
    pub(crate) unregister_virtual_tables: Vec<Arc<VirtualTable>>,
    pub(crate) register_tables: Vec<Arc<PhysicalTable>>,
    pub(crate) unregister_tables: Vec<FileId>,
    pub(crate) register_logs: Vec<Arc<PhysicalLog>>,
    pub(crate) unregister_logs: Vec<FileId>,
}

impl ManifestEdit {
    pub fn new() -> ManifestEdit {
        ManifestEdit::default()
    }

    pub fn last_sequence(mut self, sequence: u64) -> Self {
        self.last_sequence = Some(sequence);
        self
    }

    pub fn register_virtual_table(mut self, table: Arc<VirtualTable>) -> Self {
        self.register_virtual_tables.push(table);
        self
    }

    pub fn unregister_virtual_table(mut self, table: Arc<VirtualTable>) -> Self {
        self.unregister_virtual_tables.push(table);
        self
    }

    pub fn register_table(mut self, table: Arc<PhysicalTable>) -> Self {
        self.register_tables.push(table);
        self
    }

    pub fn unregister_table(mut self, id: FileId) -> Self {
        self.unregister_tables.push(id);
        self
    }

    pub fn register_log(mut self, log: Arc<PhysicalLog>) -> Self {
        self.register_logs.push(log);
        self
    }

    pub fn unregister_log(mut self, id: FileId) -> Self {
        self.unregister_logs.push(id);
        self
    }

    pub(crate) fn to_record(&self, next_file_number: u64) -> EditRecord {
        let unregistered = self
            .unregister_tables
            .iter()
            .chain(self.unregister_logs.iter())
            .copied()
            .collect();
        let registered = self
            .register_tables
            .iter()
            .map(|t| t.id())
            .chain(self.register_logs.iter().map(|l| l.id()))
            .collect();
        EditRecord {
            last_sequence: self.last_sequence,
            next_file_number: Some(next_file_number),
            unregistered,
            registered,
        }
    }
}

/// Durable form of an edit, one per manifest log record.
///
/// ```text
/// +----------------------------------------------------------------------+
/// | has seq (u8) | seq? | has file number (u8) | file number? |          |
/// | unregistered count | (type u8, number)* | registered count | (...)*  |
/// +----------------------------------------------------------------------+
/// ```
///
/// Every number is a varint.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct EditRecord {
    pub last_sequence: Option<u64>,
    pub next_file_number: Option<u64>,
    pub unregistered: Vec<FileId>,
    pub registered: Vec<FileId>,
}

impl EditRecord {
    pub fn encode(&self, encoder: &mut Encoder) {
        encode_optional(encoder, self.last_sequence);
        encode_optional(encoder, self.next_file_number);
        encode_file_ids(encoder, &self.unregistered);
        encode_file_ids(encoder, &self.registered);
    }

    pub fn decode(data: &[u8]) -> Result<EditRecord> {
        let mut decoder = Decoder::new(data);
        let record = EditRecord {
            last_sequence: decode_optional(&mut decoder)?,
            next_file_number: decode_optional(&mut decoder)?,
            unregistered: decode_file_ids(&mut decoder)?,
            registered: decode_file_ids(&mut decoder)?,
        };
        if !decoder.is_empty() {
            return Err(LsmError::corrupted("trailing bytes in manifest edit"));
        }
        Ok(record)
    }
}

fn encode_optional(encoder: &mut Encoder, value: Option<u64>) {
    match value {
        Some(v) => {
            encoder.put_u8(1);
            encoder.put_varint64(v);
        }
        None => encoder.put_u8(0),
    }
}

fn decode_optional(decoder: &mut Decoder) -> Result<Option<u64>> {
    match decoder.get_u8()? {
        0 => Ok(None),
        1 => Ok(Some(decoder.get_varint64()?)),
        flag => Err(LsmError::corrupted(format!("bad option flag {}", flag))),
    }
}

fn encode_file_ids(encoder: &mut Encoder, ids: &[FileId]) {
    encoder.put_varint64(ids.len() as u64);
    for id in ids {
        encoder.put_u8(id.file_type as u8);
        encoder.put_varint64(id.number);
    }
}

fn decode_file_ids(decoder: &mut Decoder) -> Result<Vec<FileId>> {
    let count = decoder.get_varint64()?;
    // each id takes at least two bytes
    if count > decoder.remaining() as u64 / 2 {
        return Err(LsmError::corrupted(format!("bad file id count {}", count)));
    }
    let mut ids = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let tag = decoder.get_u8()?;
        let file_type = FileType::from_u8(tag)
            .ok_or_else(|| LsmError::corrupted(format!("bad file type {}", tag)))?;
        ids.push(FileId::new(file_type, decoder.get_varint64()?));
    }
    Ok(ids)
}
