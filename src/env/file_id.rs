use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum FileType {
    Manifest = 1,
    Log = 2,
    Table = 3,
}

impl FileType {
    pub fn from_u8(v: u8) -> Option<FileType> {
        match v {
            1 => Some(FileType::Manifest),
            2 => Some(FileType::Log),
            3 => Some(FileType::Table),
            _ => None,
        }
    }

    fn extension(self) -> &'static str {
        match self {
            FileType::Manifest => "manifest",
            FileType::Log => "ulog",
            FileType::Table => "olog",
        }
    }
}

pub const TEMP_EXTENSION: &str = "tmp";

/// Identity of a database file: its type plus a number unique within the database.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId {
    pub file_type: FileType,
    pub number: u64,
}

impl FileId {
    pub fn new(file_type: FileType, number: u64) -> FileId {
        FileId { file_type, number }
    }

    pub fn file_name(&self) -> String {
        format!("{:06}.{}", self.number, self.file_type.extension())
    }

    /// Name a file is written under before it is renamed into place.
    pub fn temp_file_name(&self) -> String {
        format!("{}.{}", self.file_name(), TEMP_EXTENSION)
    }

    /// Inverse of [`FileId::file_name`]; `None` for foreign files.
    pub fn parse(name: &str) -> Option<FileId> {
        let (number, extension) = name.split_once('.')?;
        if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let file_type = [FileType::Manifest, FileType::Log, FileType::Table]
            .iter()
            .copied()
            .find(|t| t.extension() == extension)?;
        Some(FileId::new(file_type, number.parse().ok()?))
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// A [`FileId`] resolved against the database directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileMetadata {
    pub id: FileId,
    pub path: PathBuf,
}

impl FileMetadata {
    pub fn new(dir: &Path, id: FileId) -> FileMetadata {
        FileMetadata {
            id,
            path: dir.join(id.file_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::env::file_id::{FileId, FileMetadata, FileType};
    use std::path::Path;

    #[test]
    fn test_file_names() {
        let id = FileId::new(FileType::Table, 42);
        assert_eq!(id.file_name(), "000042.olog");
        assert_eq!(FileId::new(FileType::Log, 7).file_name(), "000007.ulog");
        assert_eq!(
            FileId::new(FileType::Manifest, 1234567).file_name(),
            "1234567.manifest"
        );
        assert_eq!(FileId::parse("000042.olog"), Some(id));
        assert_eq!(
            FileId::parse("000003.manifest"),
            Some(FileId::new(FileType::Manifest, 3))
        );
        assert_eq!(FileId::parse("LOCK"), None);
        assert_eq!(FileId::parse("abc.olog"), None);
        assert_eq!(FileId::parse("000001.tmp"), None);
        assert_eq!(FileId::parse(".olog"), None);

        let manifest = FileId::new(FileType::Manifest, 3);
        assert_eq!(manifest.temp_file_name(), "000003.manifest.tmp");
        assert_eq!(FileId::parse(&manifest.temp_file_name()), None);
    }

    #[test]
    fn test_metadata_path() {
        let meta = FileMetadata::new(Path::new("/tmp/db"), FileId::new(FileType::Log, 5));
        assert_eq!(meta.path, Path::new("/tmp/db/000005.ulog"));
        assert_eq!(FileType::from_u8(2), Some(FileType::Log));
        assert_eq!(FileType::from_u8(9), None);
    }
}
