//! File-system collaborator.
//!
//! Every byte the database reads goes through [`DatabaseFs`]. Files are read
//! whole and released immediately; no handle outlives a single call. The
//! database never writes.
//!
//! Two implementations are provided:
//! - [`OsFs`] reads the real file system
//! - [`MemoryFs`] serves files from memory and counts reads per path, so
//!   tests can assert which files a query touched

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use walkdir::WalkDir;

/// Read-only file access used by the database.
pub trait DatabaseFs: Send + Sync {
    /// Read the whole file.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Whether a file exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Files (not directories) directly inside `dir`, sorted by path.
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;

    /// Read a text file as trimmed, non-empty lines.
    ///
    /// Invalid UTF-8 is replaced rather than rejected.
    fn read_lines(&self, path: &Path) -> io::Result<Vec<String>> {
        let bytes = self.read(path)?;
        Ok(String::from_utf8_lossy(&bytes)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

// ============================================================================
// OsFs
// ============================================================================

/// The real file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFs;

impl DatabaseFs for OsFs {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn list_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("not a directory: {}", dir.display()),
            ));
        }
        let mut files: Vec<PathBuf> = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
        files.sort();
        Ok(files)
    }
}

// ============================================================================
// MemoryFs
// ============================================================================

#[derive(Debug, Clone)]
enum MemoryEntry {
    Data(Vec<u8>),
    /// Reads fail with this kind, e.g. to simulate a locked file.
    Fail(io::ErrorKind),
}

/// In-memory file system with per-path read counters.
#[derive(Debug, Default)]
pub struct MemoryFs {
    files: RwLock<BTreeMap<PathBuf, MemoryEntry>>,
    reads: Mutex<HashMap<PathBuf, usize>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a file.
    pub fn insert(&self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) {
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        files.insert(path.into(), MemoryEntry::Data(contents.into()));
    }

    /// Register a file whose reads fail with `kind`.
    pub fn insert_failing(&self, path: impl Into<PathBuf>, kind: io::ErrorKind) {
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        files.insert(path.into(), MemoryEntry::Fail(kind));
    }

    pub fn remove(&self, path: &Path) {
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        files.remove(path);
    }

    /// Number of `read` calls made for `path`, successful or not.
    pub fn read_count(&self, path: &Path) -> usize {
        let reads = self.reads.lock().unwrap_or_else(|e| e.into_inner());
        reads.get(path).copied().unwrap_or(0)
    }

    /// Total number of `read` calls across all paths.
    pub fn total_reads(&self) -> usize {
        let reads = self.reads.lock().unwrap_or_else(|e| e.into_inner());
        reads.values().sum()
    }
}

impl DatabaseFs for MemoryFs {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        {
            let mut reads = self.reads.lock().unwrap_or_else(|e| e.into_inner());
            *reads.entry(path.to_path_buf()).or_insert(0) += 1;
        }
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        match files.get(path) {
            Some(MemoryEntry::Data(bytes)) => Ok(bytes.clone()),
            Some(MemoryEntry::Fail(kind)) => Err(io::Error::new(
                *kind,
                format!("simulated failure: {}", path.display()),
            )),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such file: {}", path.display()),
            )),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        files.contains_key(path)
    }

    fn list_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        Ok(files
            .keys()
            .filter(|path| path.parent() == Some(dir))
            .cloned()
            .collect())
    }
}
