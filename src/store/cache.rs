//! Local identity cache: a synchronous key-value store that survives page
//! reloads. Holds the serialized privileged-identity snapshot. Advisory only;
//! every failure of the underlying medium degrades to a cache miss and is
//! never surfaced to the engine as an error.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::warn;

pub trait IdentityCache: Send + Sync {
    fn read(&self, key: &str) -> Option<String>;
    fn write(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// Process-local cache. Does not survive restarts; useful in tests and as a
/// default when no persistent medium is configured.
#[derive(Default)]
pub struct MemoryIdentityCache {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryIdentityCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityCache for MemoryIdentityCache {
    fn read(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    fn write(&self, key: &str, value: &str) {
        self.entries.write().insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries.write().remove(key);
    }
}

/// Filesystem-backed cache, one file per key under a root directory.
pub struct FileIdentityCache {
    root: PathBuf,
}

impl FileIdentityCache {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        let root = root.into();
        fs::create_dir_all(&root).ok();
        Self { root }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys are engine-chosen identifiers, not user input; strip path
        // separators anyway so a bad key cannot escape the root.
        let safe: String = key
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.root.join(safe)
    }
}

impl IdentityCache for FileIdentityCache {
    fn read(&self, key: &str) -> Option<String> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(s) => Some(s),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(target: "sessium::cache", "cache read failed key={}: {}", key, e);
                None
            }
        }
    }

    fn write(&self, key: &str, value: &str) {
        if let Err(e) = fs::write(self.path_for(key), value) {
            warn!(target: "sessium::cache", "cache write failed key={}: {}", key, e);
        }
    }

    fn remove(&self, key: &str) {
        if let Err(e) = fs::remove_file(self.path_for(key)) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(target: "sessium::cache", "cache remove failed key={}: {}", key, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_cache_round_trip() {
        let c = MemoryIdentityCache::new();
        assert_eq!(c.read("k"), None);
        c.write("k", "v");
        assert_eq!(c.read("k").as_deref(), Some("v"));
        c.remove("k");
        assert_eq!(c.read("k"), None);
    }

    #[test]
    fn file_cache_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let c = FileIdentityCache::new(tmp.path());
            c.write("identity", "{\"id\":\"p1\"}");
        }
        let c = FileIdentityCache::new(tmp.path());
        assert_eq!(c.read("identity").as_deref(), Some("{\"id\":\"p1\"}"));
        c.remove("identity");
        assert_eq!(c.read("identity"), None);
        // removing a missing key is silent
        c.remove("identity");
    }

    #[test]
    fn file_cache_sanitizes_separators() {
        let tmp = tempfile::tempdir().unwrap();
        let c = FileIdentityCache::new(tmp.path());
        c.write("a/b", "x");
        assert_eq!(c.read("a/b").as_deref(), Some("x"));
        assert!(tmp.path().join("a_b").exists());
    }
}
