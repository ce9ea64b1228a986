use crate::Result;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FileMode {
    /// Create a new file, truncating any existing one.
    Create,
    /// Open an existing file.
    Open,
    OpenOrCreate,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FileAccess {
    Read,
    Write,
}

/// Directory and file operations the engine needs from its host.
///
/// The engine assumes no other process writes to its directory.
pub trait FileSystem: Send + Sync {
    fn create_dir(&self, path: &Path) -> Result<()>;

    fn open_file(&self, path: &Path, mode: FileMode, access: FileAccess) -> Result<File>;

    /// Names (not paths) of the regular files in `path`.
    fn list_files(&self, path: &Path) -> Result<Vec<String>>;

    /// Returns `false` if the file did not exist.
    fn delete_file(&self, path: &Path) -> Result<bool>;

    /// Atomically replaces `to` with `from`.
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;
}

#[derive(Default, Debug)]
pub struct LocalFileSystem;

impl FileSystem for LocalFileSystem {
    fn create_dir(&self, path: &Path) -> Result<()> {
        std::fs::create_dir_all(path)?;
        Ok(())
    }

    fn open_file(&self, path: &Path, mode: FileMode, access: FileAccess) -> Result<File> {
        let mut options = OpenOptions::new();
        match access {
            FileAccess::Read => options.read(true),
            FileAccess::Write => options.read(true).write(true),
        };
        match mode {
            FileMode::Create => options.create(true).truncate(true),
            FileMode::Open => &mut options,
            FileMode::OpenOrCreate => options.create(true),
        };
        Ok(options.open(path)?)
    }

    fn list_files(&self, path: &Path) -> Result<Vec<String>> {
        let mut names = vec![];
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_owned());
                }
            }
        }
        Ok(names)
    }

    fn delete_file(&self, path: &Path) -> Result<bool> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        std::fs::rename(from, to)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::env::file_system::{FileAccess, FileMode, FileSystem, LocalFileSystem};
    use std::io::{Read, Write};

    #[test]
    fn test_local_file_system() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let fs = LocalFileSystem;
        let dir = temp_dir.path().join("nested").join("db");
        fs.create_dir(&dir).unwrap();

        let path = dir.join("000001.ulog");
        assert!(fs.open_file(&path, FileMode::Open, FileAccess::Read).is_err());
        {
            let mut file = fs
                .open_file(&path, FileMode::Create, FileAccess::Write)
                .unwrap();
            file.write_all(b"hello").unwrap();
        }
        let mut content = String::new();
        fs.open_file(&path, FileMode::Open, FileAccess::Read)
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "hello");

        assert_eq!(fs.list_files(&dir).unwrap(), vec!["000001.ulog".to_owned()]);
        let renamed = dir.join("000002.ulog");
        fs.rename(&path, &renamed).unwrap();
        assert_eq!(fs.list_files(&dir).unwrap(), vec!["000002.ulog".to_owned()]);
        fs.rename(&renamed, &path).unwrap();
        assert!(fs.delete_file(&path).unwrap());
        assert!(!fs.delete_file(&path).unwrap());
        assert!(fs.list_files(&dir).unwrap().is_empty());
    }
}
