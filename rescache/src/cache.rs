//! On-disk cache: the pure filesystem routines of `CacheStore`, the `CacheEntry`
//! sidecar format, and the cross-process advisory lock scoped to one cache entry.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;
use sha1::{Digest, Sha1};
use url::Url;

use crate::error::{Error, Result};
use crate::path::PathBufExt;
use crate::version::Version;

/// Metadata sidecar for one cached artifact, as described in §3.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheEntry {
    pub remote_content_length: i64,
    pub original_content_length: i64,
    /// Raw `Last-Modified` header value as last seen from the remote, if any.
    pub last_modified: Option<String>,
    /// Unix milliseconds of the last time this entry was written.
    pub last_updated: i64,
    /// Soft tombstone: set instead of deleting the artifact outright, so an external
    /// GC pass can sweep stale entries at its own pace.
    pub delete_flag: bool,
}

impl CacheEntry {

    /// Load a sidecar from its line-oriented `key=value` representation. Returns the
    /// default (empty) entry if the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(Error::new_io_file(e, path)),
        };

        let mut entry = Self::default();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| Error::new_io_file(e, path))?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else { continue };
            match key {
                "remote_content_length" => entry.remote_content_length = value.parse().unwrap_or(-1),
                "original_content_length" => entry.original_content_length = value.parse().unwrap_or(-1),
                "last_modified" => entry.last_modified = Some(value.to_owned()),
                "last_updated" => entry.last_updated = value.parse().unwrap_or(0),
                "delete" => entry.delete_flag = value == "true",
                _ => {}
            }
        }
        Ok(entry)
    }

    /// Persist this sidecar as `key=value` lines, one assignment per line.
    pub fn store(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::new_io_file(e, path))?;
        }
        let mut file = File::create(path).map_err(|e| Error::new_io_file(e, path))?;
        writeln!(file, "remote_content_length={}", self.remote_content_length).map_err(|e| Error::new_io_file(e, path))?;
        writeln!(file, "original_content_length={}", self.original_content_length).map_err(|e| Error::new_io_file(e, path))?;
        if let Some(last_modified) = &self.last_modified {
            writeln!(file, "last_modified={last_modified}").map_err(|e| Error::new_io_file(e, path))?;
        }
        writeln!(file, "last_updated={}", self.last_updated).map_err(|e| Error::new_io_file(e, path))?;
        writeln!(file, "delete={}", self.delete_flag).map_err(|e| Error::new_io_file(e, path))?;
        file.flush().map_err(|e| Error::new_io_file(e, path))?;
        Ok(())
    }

    /// Compare this entry's stored `Last-Modified` against the remote's, per §3/§4.3.1.
    /// An entry with no recorded `Last-Modified`, or a remote that did not supply one,
    /// is never considered current.
    pub fn is_current(&self, remote_last_modified: Option<&str>) -> bool {
        !self.delete_flag
            && self.last_modified.is_some()
            && self.last_modified.as_deref() == remote_last_modified
    }

    pub fn mark_for_delete(&mut self) {
        self.delete_flag = true;
    }

}

/// Cross-process advisory lock scoped to one `(url, version)` cache entry. Released
/// on drop; held for the duration of any mutating operation on the artifact (§3).
pub struct CacheEntryLock {
    file: File,
    path: PathBuf,
}

impl CacheEntryLock {

    fn acquire(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::new_io_file(e, &path))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| Error::new_io_file(e, &path))?;
        file.lock_exclusive().map_err(|e| Error::new_io_file(e, &path))?;
        Ok(Self { file, path })
    }

}

impl Drop for CacheEntryLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl std::fmt::Debug for CacheEntryLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntryLock").field("path", &self.path).finish()
    }
}

/// Pure filesystem routines for deriving, reading and writing cache artifacts. Holds
/// no resource state; every method is a deterministic function of its arguments and
/// the cache root.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Use the platform cache directory (falling back to the system temp directory)
    /// joined with a fixed subdirectory name.
    pub fn default_root() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .joined("rescache")
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Only `http(s)://` resources are cacheable; `file://` and anything else is
    /// handled directly by the tracker without ever touching this store.
    pub fn is_cacheable(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https")
    }

    fn digest_for(url: &Url, version: Option<&Version>) -> String {
        let mut sha1 = Sha1::new();
        sha1.update(url.as_str().as_bytes());
        if let Some(version) = version {
            sha1.update(b"\0");
            sha1.update(version.as_str().as_bytes());
        }
        format!("{:x}", sha1.finalize())
    }

    /// Deterministic path for the artifact of `(url, version)`.
    pub fn cache_file_for(&self, url: &Url, version: Option<&Version>) -> PathBuf {
        self.root.clone().joined(Self::digest_for(url, version))
    }

    /// Allocate a path distinct from any file currently present for `(url, version)`,
    /// used when an entry is superseded instead of refreshed in place (e.g. a forced
    /// refetch or a cache that turned out to be stale).
    pub fn make_new_cache_file(&self, url: &Url, version: Option<&Version>) -> PathBuf {
        let base = self.cache_file_for(url, version);
        if !base.exists() {
            return base;
        }
        for generation in 1u32.. {
            let candidate = base.clone().appended(format!(".{generation}"));
            if !candidate.exists() {
                return candidate;
            }
        }
        unreachable!("u32 generations exhausted")
    }

    pub fn sidecar_file_for(cache_file: &Path) -> PathBuf {
        cache_file.to_path_buf().appended(".entry")
    }

    pub fn lock_file_for(cache_file: &Path) -> PathBuf {
        cache_file.to_path_buf().appended(".lock")
    }

    /// Acquire the inter-process lock for the cache entry at `cache_file`. Scoped to
    /// the entry, not the whole store, so unrelated resources never contend.
    pub fn lock(&self, cache_file: &Path) -> Result<CacheEntryLock> {
        CacheEntryLock::acquire(Self::lock_file_for(cache_file))
    }

    pub fn load_entry(&self, cache_file: &Path) -> Result<CacheEntry> {
        CacheEntry::load(&Self::sidecar_file_for(cache_file))
    }

    pub fn store_entry(&self, cache_file: &Path, entry: &CacheEntry) -> Result<()> {
        entry.store(&Self::sidecar_file_for(cache_file))
    }

    /// Whether the artifact at `cache_file` with sidecar `entry` is current with
    /// respect to `remote_last_modified`, i.e. may be used without a re-download.
    pub fn is_current(&self, cache_file: &Path, entry: &CacheEntry, remote_last_modified: Option<&str>) -> bool {
        cache_file.is_file() && entry.is_current(remote_last_modified)
    }

    /// Open a truncating, buffered write stream to `cache_file`, creating parent
    /// directories as needed.
    pub fn open_output_stream(&self, cache_file: &Path) -> Result<File> {
        if let Some(parent) = cache_file.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::new_io_file(e, cache_file))?;
        }
        File::options()
            .write(true)
            .create(true)
            .truncate(true)
            .open(cache_file)
            .map_err(|e| Error::new_io_file(e, cache_file))
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_file_is_deterministic_and_version_sensitive() {
        let store = CacheStore::new("/tmp/rescache-test-root");
        let url = Url::parse("https://example.test/a.jar").unwrap();
        let a = store.cache_file_for(&url, None);
        let b = store.cache_file_for(&url, None);
        assert_eq!(a, b);

        let versioned = store.cache_file_for(&url, Some(&Version::new("1.0")));
        assert_ne!(a, versioned);
    }

    #[test]
    fn entry_round_trips_through_sidecar_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry");
        let entry = CacheEntry {
            remote_content_length: 42,
            original_content_length: 100,
            last_modified: Some("Sun, 06 Nov 1994 08:49:37 GMT".to_owned()),
            last_updated: 12345,
            delete_flag: false,
        };
        entry.store(&path).unwrap();
        let loaded = CacheEntry::load(&path).unwrap();
        assert_eq!(entry, loaded);
    }

    #[test]
    fn missing_sidecar_loads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let entry = CacheEntry::load(&dir.path().join("missing")).unwrap();
        assert_eq!(entry, CacheEntry::default());
    }

    #[test]
    fn is_current_requires_matching_last_modified() {
        let mut entry = CacheEntry::default();
        assert!(!entry.is_current(Some("T0")));
        entry.last_modified = Some("T0".to_owned());
        assert!(entry.is_current(Some("T0")));
        assert!(!entry.is_current(Some("T1")));
        assert!(!entry.is_current(None));
    }

    #[test]
    fn make_new_cache_file_avoids_existing_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let url = Url::parse("https://example.test/a.jar").unwrap();
        let first = store.cache_file_for(&url, None);
        fs::write(&first, b"x").unwrap();
        let fresh = store.make_new_cache_file(&url, None);
        assert_ne!(first, fresh);
        assert!(!fresh.exists());
    }
}
