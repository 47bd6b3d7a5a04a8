//! Flash Filesystem Abstraction
//!
//! Documents are addressed by their absolute name on the device filesystem
//! (`/config.json`, `/contacts.json`, ...). Every write replaces the whole
//! document; nothing keeps a file handle open between operations.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Trait for the device filesystem
///
/// The firmware mounts SPIFFS through the ESP-IDF VFS and uses [`DirStorage`]
/// on the mount point; the hub uses [`DirStorage`] on a regular directory.
pub trait Storage {
    /// Read a whole document, `None` if it does not exist
    fn read(&self, name: &str) -> io::Result<Option<Vec<u8>>>;

    /// Replace a document
    fn write(&mut self, name: &str, data: &[u8]) -> io::Result<()>;

    /// Append to a document, creating it if needed
    fn append(&mut self, name: &str, data: &[u8]) -> io::Result<()>;

    /// Remove a document (missing documents are not an error)
    fn remove(&mut self, name: &str) -> io::Result<()>;

    /// Check whether a document exists
    fn exists(&self, name: &str) -> io::Result<bool> {
        Ok(self.read(name)?.is_some())
    }

    /// Erase every document
    fn format(&mut self) -> io::Result<()>;
}

/// Error reading or writing one of the JSON documents
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to access {name}: {source}")]
    Io {
        name: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {name}: {source}")]
    Parse {
        name: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize {name}: {source}")]
    Serialize {
        name: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Load and decode a JSON document, `None` if it does not exist
pub fn load_document<S, T>(storage: &S, name: &'static str) -> Result<Option<T>, StoreError>
where
    S: Storage + ?Sized,
    T: serde::de::DeserializeOwned,
{
    let Some(bytes) = storage
        .read(name)
        .map_err(|source| StoreError::Io { name, source })?
    else {
        return Ok(None);
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StoreError::Parse { name, source })
}

/// Encode and write a JSON document
pub fn save_document<S, T>(storage: &mut S, name: &'static str, value: &T) -> Result<(), StoreError>
where
    S: Storage + ?Sized,
    T: serde::Serialize,
{
    let bytes =
        serde_json::to_vec(value).map_err(|source| StoreError::Serialize { name, source })?;
    storage
        .write(name, &bytes)
        .map_err(|source| StoreError::Io { name, source })
}

/// Storage rooted at a directory
#[derive(Debug, Clone)]
pub struct DirStorage {
    root: PathBuf,
}

impl DirStorage {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Storage at the mount point of a filesystem that has no directories
    pub fn mounted(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name.trim_start_matches('/'))
    }
}

impl Storage for DirStorage {
    fn read(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        match std::fs::read(self.path(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, name: &str, data: &[u8]) -> io::Result<()> {
        std::fs::write(self.path(name), data)
    }

    fn append(&mut self, name: &str, data: &[u8]) -> io::Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(name))?;
        file.write_all(data)?;
        file.flush()
    }

    fn remove(&mut self, name: &str) -> io::Result<()> {
        match std::fs::remove_file(self.path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn exists(&self, name: &str) -> io::Result<bool> {
        Ok(self.path(name).is_file())
    }

    fn format(&mut self) -> io::Result<()> {
        // SPIFFS has no directories and its mount point cannot be removed,
        // so only the entries are erased
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.is_dir() {
                std::fs::remove_dir_all(&path)?;
            } else {
                std::fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

/// In-memory storage
#[derive(Debug, Clone, Default)]
pub struct MemStorage {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemStorage {
    fn read(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.files.get(name).cloned())
    }

    fn write(&mut self, name: &str, data: &[u8]) -> io::Result<()> {
        self.files.insert(name.to_string(), data.to_vec());
        Ok(())
    }

    fn append(&mut self, name: &str, data: &[u8]) -> io::Result<()> {
        self.files
            .entry(name.to_string())
            .or_default()
            .extend_from_slice(data);
        Ok(())
    }

    fn remove(&mut self, name: &str) -> io::Result<()> {
        self.files.remove(name);
        Ok(())
    }

    fn format(&mut self) -> io::Result<()> {
        self.files.clear();
        Ok(())
    }
}
