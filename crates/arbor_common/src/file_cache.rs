use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Source files read so far, kept around so that errors can quote them.
#[derive(Clone, Debug, Default)]
pub struct FileCache {
    files: BTreeMap<PathBuf, String>,
}

impl FileCache {
    pub fn new() -> Self {
        FileCache::default()
    }

    pub fn read(&mut self, path: impl AsRef<Path>) -> io::Result<&str> {
        let canonical = path.as_ref().canonicalize()?;
        if !self.files.contains_key(&canonical) {
            let content = fs::read_to_string(&canonical)?;
            self.files.insert(canonical.clone(), content);
        }
        Ok(&self.files[&canonical])
    }

    /// Registers in-memory source under `path`, as if it had been read from disk.
    pub fn insert(&mut self, path: impl Into<PathBuf>, content: impl Into<String>) -> &str {
        let path = path.into();
        self.files.insert(path.clone(), content.into());
        &self.files[&path]
    }

    pub fn read_cached(&self, path: impl AsRef<Path>) -> io::Result<&str> {
        let path = path.as_ref();
        if let Some(content) = self.files.get(path) {
            return Ok(content);
        }
        let canonical = path.canonicalize()?;
        self.files.get(&canonical).map(String::as_str).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} was never read", canonical.display()),
            )
        })
    }
}
