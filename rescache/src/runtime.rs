//! The `Runtime` collaborator: ambient environment facts the connect phase consults
//! before touching the network (§6). Out of scope for this crate to *detect* — e.g.
//! there is no captive-portal probing here — so the default implementation answers
//! conservatively and an embedding application supplies its own when it has a real
//! notion of connectivity.

use url::Url;

/// Ambient environment the downloader worker consults. Grounded in §6's
/// `Runtime.is_online / is_offline_forced / detect_online(url) / is_allow_redirect`
/// row; each method here is a pluggable collaborator, not core logic.
pub trait Runtime: Send + Sync {
    /// The embedding application has forced offline mode (e.g. a CLI `--offline` flag);
    /// when `true` the connect phase skips network probing entirely and falls back to
    /// whatever is already cached.
    fn is_offline_forced(&self) -> bool {
        false
    }

    /// Best-effort reachability probe for `url`'s origin, used only to short-circuit
    /// a guaranteed-unreachable host before spending a worker on it. Returning `true`
    /// unconditionally (the default) just means every origin gets tried.
    fn detect_online(&self, url: &Url) -> bool {
        let _ = url;
        true
    }

    /// Whether the [`crate::prober::UrlProber`] is allowed to follow 3xx redirects.
    /// When `false`, a redirect response fails the whole probe with
    /// [`crate::error::Error::RedirectionDisallowed`].
    fn is_allow_redirect(&self) -> bool {
        true
    }
}

/// The permissive default: always online, always allow redirects, never force
/// offline. Suitable for tests and for applications with no connectivity policy of
/// their own.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRuntime;

impl Runtime for DefaultRuntime {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_runtime_is_permissive() {
        let runtime = DefaultRuntime;
        assert!(!runtime.is_offline_forced());
        assert!(runtime.is_allow_redirect());
        assert!(runtime.detect_online(&Url::parse("https://example.test").unwrap()));
    }
}
