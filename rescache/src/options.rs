//! `UpdatePolicy` and per-resource `DownloadOptions`, consulted by [`crate::tracker`]'s
//! cache check and [`crate::prober`]'s candidate generation respectively.

use crate::cache::CacheEntry;

/// Governs whether a cached copy may be used without contacting the remote host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdatePolicy {
    /// Always revalidate against the remote before trusting the cache.
    Always,
    /// Ignore any cached copy and re-fetch unconditionally.
    Force,
    /// Never contact the remote if a cached copy exists, regardless of its age.
    Never,
    /// Use the cache without revalidation, same as `Never`, but named for the common
    /// case of a resource interned once per process: a fresh process re-interns the
    /// resource and is free to revalidate it again. This is the default.
    #[default]
    Session,
}

impl UpdatePolicy {

    /// Whether a cached `entry` may be used as-is, without even attempting to reach
    /// the remote host to compare `Last-Modified`.
    pub fn should_use_cache_without_connecting(&self, entry: &CacheEntry) -> bool {
        match self {
            UpdatePolicy::Always => false,
            UpdatePolicy::Force => false,
            UpdatePolicy::Never => !entry.delete_flag,
            UpdatePolicy::Session => !entry.delete_flag,
        }
    }

    #[inline]
    pub fn is_force(&self) -> bool {
        matches!(self, UpdatePolicy::Force)
    }

}

/// Candidate-generation toggles for one resource, consulted by
/// [`crate::prober::DefaultUrlCreator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DownloadOptions {
    /// Also probe a URL with the resource's version appended as a path segment.
    pub use_version_suffix: bool,
    /// Also probe a `.pack.gz` suffixed variant of every candidate.
    pub use_pack_suffix: bool,
}

impl DownloadOptions {
    pub fn new(use_version_suffix: bool, use_pack_suffix: bool) -> Self {
        Self { use_version_suffix, use_pack_suffix }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(delete_flag: bool) -> CacheEntry {
        let mut entry = CacheEntry::default();
        entry.delete_flag = delete_flag;
        entry
    }

    #[test]
    fn always_and_force_never_trust_the_cache_without_connecting() {
        assert!(!UpdatePolicy::Always.should_use_cache_without_connecting(&entry(false)));
        assert!(!UpdatePolicy::Force.should_use_cache_without_connecting(&entry(false)));
    }

    #[test]
    fn never_and_session_trust_a_live_entry() {
        assert!(UpdatePolicy::Never.should_use_cache_without_connecting(&entry(false)));
        assert!(UpdatePolicy::Session.should_use_cache_without_connecting(&entry(false)));
    }

    #[test]
    fn a_tombstoned_entry_is_never_trusted() {
        assert!(!UpdatePolicy::Never.should_use_cache_without_connecting(&entry(true)));
        assert!(!UpdatePolicy::Session.should_use_cache_without_connecting(&entry(true)));
    }

    #[test]
    fn is_force_identifies_only_the_force_variant() {
        assert!(UpdatePolicy::Force.is_force());
        assert!(!UpdatePolicy::Session.is_force());
    }
}
