//! Content-encoding classification and decode helpers for the download phase
//! (§4.3.2). Tabular-pack ("pack200") decoding itself is out of scope for this crate
//! (§1 Non-goals) — [`Pack200Unpacker`] is a pluggable collaborator with only a
//! stub implementation here, the same way the teacher leaves Forge's installer
//! processors as an external collaborator rather than reimplementing them.

use std::io::{self, Read, Write};

use flate2::read::GzDecoder;

use crate::error::{Error, Result};

/// How the bytes on the wire relate to the final artifact, derived from the
/// `Content-Encoding` response header or a `.pack.gz` / `.gz` path suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Plain,
    Gzip,
    PackGz,
}

impl ContentEncoding {

    /// Classify a response by its `Content-Encoding` header value and, failing that,
    /// the probed URL's path suffix.
    pub fn classify(content_encoding: Option<&str>, url_path: &str) -> Self {
        match content_encoding.map(str::trim) {
            Some("pack200-gzip") => return ContentEncoding::PackGz,
            Some("gzip") => return ContentEncoding::Gzip,
            _ => {}
        }
        if url_path.ends_with(".pack.gz") {
            ContentEncoding::PackGz
        } else if url_path.ends_with(".gz") {
            ContentEncoding::Gzip
        } else {
            ContentEncoding::Plain
        }
    }

    /// The suffix appended to the origin location to form the *download cache key*
    /// under which the as-received bytes are stored, distinct from the key the final
    /// decoded artifact is stored under.
    pub fn cache_key_suffix(self) -> Option<&'static str> {
        match self {
            ContentEncoding::Plain => None,
            ContentEncoding::Gzip => Some(".gz"),
            ContentEncoding::PackGz => Some(".pack.gz"),
        }
    }

}

/// Decode a gzip stream from `reader` fully into `writer`, returning the number of
/// decoded bytes written.
pub fn gzip_decode(reader: impl Read, mut writer: impl Write) -> Result<u64> {
    let mut decoder = GzDecoder::new(reader);
    io::copy(&mut decoder, &mut writer).map_err(|e| Error::new_decode_io("gzip decode failed", e))
}

/// Decoder from tabular-pack ("pack200") format to a jar stream (§4.3.2 step 4,
/// "packgz" branch). The algorithm itself is not reimplemented here; this crate only
/// defines the seam an embedding application plugs a real decoder into.
pub trait Pack200Unpacker: Send + Sync {
    fn unpack(&self, input: &mut dyn Read, output: &mut dyn Write) -> Result<()>;
}

/// The only implementation shipped here: always fails. Any resource whose negotiated
/// encoding is `packgz` will surface [`Error::DecodeFailure`] unless the embedding
/// application supplies a real unpacker.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedPack200Unpacker;

impl Pack200Unpacker for UnsupportedPack200Unpacker {
    fn unpack(&self, _input: &mut dyn Read, _output: &mut dyn Write) -> Result<()> {
        Err(Error::new_decode("pack200 decoding is not supported by this build"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_prefers_header_over_suffix() {
        assert_eq!(ContentEncoding::classify(Some("gzip"), "/a.jar"), ContentEncoding::Gzip);
        assert_eq!(ContentEncoding::classify(Some("pack200-gzip"), "/a.jar"), ContentEncoding::PackGz);
    }

    #[test]
    fn classify_falls_back_to_path_suffix() {
        assert_eq!(ContentEncoding::classify(None, "/a.jar.pack.gz"), ContentEncoding::PackGz);
        assert_eq!(ContentEncoding::classify(None, "/a.jar.gz"), ContentEncoding::Gzip);
        assert_eq!(ContentEncoding::classify(None, "/a.jar"), ContentEncoding::Plain);
    }

    #[test]
    fn gzip_round_trip_decodes_to_original_bytes() {
        use std::io::Cursor;
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"hello").unwrap();
        let compressed = encoder.finish().unwrap();

        let mut out = Vec::new();
        let n = gzip_decode(Cursor::new(compressed), &mut out).unwrap();
        assert_eq!(n, 5);
        assert_eq!(out, b"hello");
    }

    #[test]
    fn unsupported_unpacker_always_fails() {
        let unpacker = UnsupportedPack200Unpacker;
        let mut input: &[u8] = b"";
        let mut output = Vec::new();
        assert!(unpacker.unpack(&mut input, &mut output).is_err());
    }
}
