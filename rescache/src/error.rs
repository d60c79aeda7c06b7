//! Crate-wide error type.

use std::io;
use std::path::PathBuf;

use url::Url;

/// An error produced while tracking, probing or downloading a resource.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Caller referenced a resource that was never added to this tracker.
    #[error("invalid descriptor: {url}")]
    InvalidDescriptor {
        url: String,
    },
    /// The URL could not be normalized into a valid resource identity.
    #[error("illegal url: {url}")]
    IllegalUrl {
        url: String,
        #[source]
        error: url::ParseError,
    },
    /// Every candidate URL answered with a transport-level failure, or none answered
    /// at all (in which case `error` is `None`: the prober tried several candidates
    /// and methods, so there is no single underlying failure to attach).
    #[error("network unreachable: {url}")]
    NetworkUnreachable {
        url: Url,
        #[source]
        error: Option<reqwest::Error>,
    },
    /// Every candidate URL answered with a non-2xx status not classified as a redirect.
    #[error("invalid status {status} for {url}")]
    HttpInvalidStatus {
        url: Url,
        status: u16,
    },
    /// A candidate answered with a redirect while the runtime's policy forbids it.
    #[error("redirection disallowed: {from} -> {to}")]
    RedirectionDisallowed {
        from: Url,
        to: Url,
    },
    /// A read or write failed while transferring bytes.
    #[error("io failure @ {file:?}")]
    IoFailure {
        #[source]
        error: io::Error,
        file: Option<PathBuf>,
    },
    /// Gzip or tabular-pack decoding failed.
    #[error("decode failure: {message}")]
    DecodeFailure {
        message: String,
        #[source]
        error: Option<io::Error>,
    },
    /// A waiter was interrupted before its resources completed.
    #[error("cancelled")]
    Cancelled,
}

impl Error {

    #[inline]
    pub fn new_io(error: io::Error) -> Self {
        Self::IoFailure { error, file: None }
    }

    #[inline]
    pub fn new_io_file(error: io::Error, file: impl Into<PathBuf>) -> Self {
        Self::IoFailure { error, file: Some(file.into()) }
    }

    #[inline]
    pub fn new_illegal_url(url: impl Into<String>, error: url::ParseError) -> Self {
        Self::IllegalUrl { url: url.into(), error }
    }

    #[inline]
    pub fn new_network_unreachable(url: Url, error: reqwest::Error) -> Self {
        Self::NetworkUnreachable { url, error: Some(error) }
    }

    /// Used when the prober exhausted every candidate and method without one of them
    /// ever returning a usable response (§4.4: "returning nil means no candidate
    /// answered").
    #[inline]
    pub fn new_no_candidate_answered(url: Url) -> Self {
        Self::NetworkUnreachable { url, error: None }
    }

    #[inline]
    pub fn new_decode(message: impl Into<String>) -> Self {
        Self::DecodeFailure { message: message.into(), error: None }
    }

    #[inline]
    pub fn new_decode_io(message: impl Into<String>, error: io::Error) -> Self {
        Self::DecodeFailure { message: message.into(), error: Some(error) }
    }

}

/// Type alias for a result with the crate's standard error type.
pub type Result<T> = std::result::Result<T, Error>;
