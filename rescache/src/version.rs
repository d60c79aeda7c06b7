//! Resource identity: a normalized URL paired with an optional version string.

use std::fmt;

use url::Url;

use crate::error::{Error, Result};

/// An opaque version tag attached to a resource request. Two resources with the same
/// normalized URL but different versions are distinct identities.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version(Box<str>);

impl Version {

    #[inline]
    pub fn new(raw: impl Into<Box<str>>) -> Self {
        Self(raw.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Version {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Version {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Normalize a raw URL string, failing with [`Error::IllegalUrl`] if it cannot be
/// parsed. Normalization is idempotent: normalizing an already-normalized URL yields
/// an identical result, which is what makes identity interning reliable.
pub fn normalize_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|error| Error::new_illegal_url(raw, error))
}

/// Identity of a resource: its normalized location and optional requested version.
/// Two identities are equal iff both their URL and version compare equal, which is
/// exactly the equivalence used to intern [`crate::resource::Resource`] instances.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub url: Url,
    pub version: Option<Version>,
}

impl Identity {

    pub fn new(url: Url, version: Option<Version>) -> Self {
        Self { url, version }
    }

    /// Append a suffix to the identity's URL path, used to derive the synthetic
    /// cache key for compressed payloads (`.pack.gz`, `.gz`).
    pub fn with_suffixed_url(&self, suffix: &str) -> Url {
        let mut url = self.url.clone();
        let mut path = url.path().to_owned();
        path.push_str(suffix);
        url.set_path(&path);
        url
    }

}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{} @ {version}", self.url),
            None => write!(f, "{}", self.url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_url_rejects_garbage() {
        assert!(normalize_url("not a url").is_err());
    }

    #[test]
    fn normalize_url_is_idempotent() {
        let once = normalize_url("https://example.test/a.jar").unwrap();
        let twice = normalize_url(once.as_str()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn with_suffixed_url_appends_to_the_path_only() {
        let identity = Identity::new(Url::parse("https://example.test/a.jar?x=1").unwrap(), None);
        let suffixed = identity.with_suffixed_url(".pack.gz");
        assert_eq!(suffixed.path(), "/a.jar.pack.gz");
        assert_eq!(suffixed.query(), Some("x=1"));
    }

    #[test]
    fn identities_with_different_versions_are_distinct() {
        let url = Url::parse("https://example.test/a.jar").unwrap();
        let a = Identity::new(url.clone(), Some(Version::new("1.0")));
        let b = Identity::new(url, Some(Version::new("2.0")));
        assert_ne!(a, b);
    }
}
