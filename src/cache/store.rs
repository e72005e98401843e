//! On-disk persistence for [`FragmentCache`](super::FragmentCache).
//!
//! Directory layout:
//! ```text
//! {root}/
//! +-- CACHEDIR.TAG   # marks the directory for backup tools
//! +-- .gitignore     # ignores everything
//! +-- VERSION        # crate version that wrote the entries
//! +-- content/
//!     +-- {sha256}   # rendered block, UTF-8
//! ```

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const CACHEDIR_TAG: &str = "Signature: 8a477f597d28d172789f06886806bc55
# This file is a cache directory tag created by mdbook-pytabs.
# For information about cache directory tags, see:
#\thttps://bford.info/cachedir/
";

const CACHE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Whether `dir` carries a cache directory tag.
pub fn is_cache_dir(dir: &Path) -> bool {
    fs::read_to_string(dir.join("CACHEDIR.TAG"))
        .map(|tag| tag.starts_with("Signature: 8a477f597d28d172789f06886806bc55"))
        .unwrap_or(false)
}

/// Backing storage for cache entries.
pub trait CacheStore: Send + Sync {
    /// Every readable entry. Unreadable ones are skipped.
    fn load(&self) -> HashMap<String, String>;

    fn write(&self, key: &str, value: &str) -> io::Result<()>;

    fn remove(&self, key: &str) -> io::Result<()>;

    /// Deletes the whole store.
    fn clear(&self) -> io::Result<()>;
}

/// One file per entry under `{root}/content/`.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens `root`, creating it if needed. Entries written by another
    /// version of this crate are discarded.
    pub fn open(root: &Path) -> io::Result<Self> {
        let store = Self {
            root: root.to_path_buf(),
        };
        store.validate_version();
        fs::create_dir_all(store.content_dir())?;

        let tag = root.join("CACHEDIR.TAG");
        if !tag.exists() {
            fs::write(&tag, CACHEDIR_TAG)?;
        }
        let gitignore = root.join(".gitignore");
        if !gitignore.exists() {
            fs::write(&gitignore, "*\n")?;
        }
        Ok(store)
    }

    /// Opens a store some earlier build created. Creates nothing and refuses
    /// a directory whose `CACHEDIR.TAG` is missing or was not written by a
    /// cache, so that clearing it can never delete unrelated data.
    pub fn open_existing(root: &Path) -> io::Result<Self> {
        if !is_cache_dir(root) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a cache directory (no CACHEDIR.TAG)", root.display()),
            ));
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn content_dir(&self) -> PathBuf {
        self.root.join("content")
    }

    fn validate_version(&self) {
        let version_file = self.root.join("VERSION");
        match fs::read_to_string(&version_file) {
            Ok(stored) if stored == CACHE_VERSION => return,
            Ok(stored) => log::info!(
                "Cache version mismatch (stored={}, current={}), wiping cache",
                stored,
                CACHE_VERSION
            ),
            Err(_) => log::debug!("No cache VERSION file in {}", self.root.display()),
        }

        let content = self.content_dir();
        if content.exists() {
            if let Err(e) = fs::remove_dir_all(&content) {
                log::warn!("Failed to remove stale cache entries: {}", e);
            }
        }
        if let Err(e) = fs::create_dir_all(&self.root) {
            log::warn!("Failed to create cache directory: {}", e);
            return;
        }
        if let Err(e) = fs::write(&version_file, CACHE_VERSION) {
            log::warn!("Failed to write cache VERSION file: {}", e);
        }
    }
}

impl CacheStore for FileStore {
    fn load(&self) -> HashMap<String, String> {
        let mut entries = HashMap::new();
        let dir = match fs::read_dir(self.content_dir()) {
            Ok(dir) => dir,
            Err(e) => {
                log::debug!("Cache directory not readable: {}", e);
                return entries;
            }
        };

        for entry in dir.flatten() {
            let path = entry.path();
            let Some(key) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            match fs::read_to_string(&path) {
                Ok(value) => {
                    entries.insert(key.to_string(), value);
                }
                Err(e) => log::warn!("Skipping corrupt cache entry {}: {}", path.display(), e),
            }
        }
        entries
    }

    fn write(&self, key: &str, value: &str) -> io::Result<()> {
        let dir = self.content_dir();
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(key), value)
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.content_dir().join(key)) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            result => result,
        }
    }

    fn clear(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.root) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            result => result,
        }
    }
}
