pub mod file_id;
pub mod file_system;

pub use file_id::{FileId, FileMetadata, FileType, TEMP_EXTENSION};
pub use file_system::{FileAccess, FileMode, FileSystem, LocalFileSystem};
