//! `UrlProber`: candidate generation and negotiation for a resource's actual
//! download location (§4.4).

use std::collections::HashSet;

use reqwest::blocking::Client;
use reqwest::{Method, StatusCode};
use url::Url;

use crate::error::{Error, Result};
use crate::http::ACCEPT_ENCODING;
use crate::options::DownloadOptions;
use crate::runtime::Runtime;
use crate::version::Identity;

/// The two methods tried against every candidate, HEAD first since it is cheapest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestMethod {
    Head,
    Get,
}

impl RequestMethod {
    const ALL: [RequestMethod; 2] = [RequestMethod::Head, RequestMethod::Get];

    fn as_reqwest(self) -> Method {
        match self {
            RequestMethod::Head => Method::HEAD,
            RequestMethod::Get => Method::GET,
        }
    }
}

/// Generates candidate URLs for a resource's identity, consulted by [`find_best_url`].
/// External collaborator: an embedding application can supply one that knows its own
/// mirror layout instead of the suffix-based default.
pub trait ResourceUrlCreator: Send + Sync {
    fn candidates(&self, identity: &Identity, options: &DownloadOptions) -> Vec<Url>;
}

/// Produces the base location plus, per [`DownloadOptions`], a version-suffixed and/or
/// pack-suffixed variant.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultUrlCreator;

impl ResourceUrlCreator for DefaultUrlCreator {
    fn candidates(&self, identity: &Identity, options: &DownloadOptions) -> Vec<Url> {
        let mut candidates = vec![identity.url.clone()];

        if options.use_version_suffix {
            if let Some(version) = &identity.version {
                candidates.push(identity.with_suffixed_url(&format!("/{version}")));
            }
        }

        if options.use_pack_suffix {
            let packed: Vec<Url> = candidates.iter().map(|url| {
                let mut packed = url.clone();
                let mut path = packed.path().to_owned();
                path.push_str(".pack.gz");
                packed.set_path(&path);
                packed
            }).collect();
            candidates.extend(packed);
        }

        candidates
    }
}

/// What probing found: the negotiated URL plus the response headers needed by the
/// connect phase, so it never has to issue a second request just to read them.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub url: Url,
    pub content_length: Option<u64>,
    pub last_modified: Option<String>,
    pub content_encoding: Option<String>,
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

fn is_invalid(status: StatusCode) -> bool {
    !(200..300).contains(&status.as_u16())
}

/// Enumerate `candidates(identity, options)` against `[HEAD, GET]` and return the
/// first URL that answers with a usable (2xx) status, following redirects as the
/// runtime's policy allows. Returns `Ok(None)` if every candidate was exhausted
/// without one answering, which the caller should treat as `ERROR`.
pub fn find_best_url(
    client: &Client,
    runtime: &dyn Runtime,
    creator: &dyn ResourceUrlCreator,
    identity: &Identity,
    options: &DownloadOptions,
) -> Result<Option<ProbeResult>> {

    let allow_redirect = runtime.is_allow_redirect();
    let mut visited: HashSet<(RequestMethod, Url)> = HashSet::new();

    for method in RequestMethod::ALL {
        let mut candidates = creator.candidates(identity, options);
        let mut index = 0;
        while index < candidates.len() {
            let url = candidates[index].clone();
            index += 1;

            if !visited.insert((method, url.clone())) {
                continue;
            }

            let response = match client
                .request(method.as_reqwest(), url.clone())
                .header(reqwest::header::ACCEPT_ENCODING, ACCEPT_ENCODING)
                .send()
            {
                Ok(response) => response,
                Err(_) => continue,
            };

            let status = response.status();

            if is_redirect(status) {
                let location = response.headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| url.join(value).ok());
                let _ = response.bytes();
                match location {
                    Some(target) if allow_redirect => candidates.push(target),
                    Some(target) => return Err(Error::RedirectionDisallowed { from: url, to: target }),
                    None => continue,
                }
                continue;
            }

            if is_invalid(status) {
                let _ = response.bytes();
                continue;
            }

            let content_length = response.headers()
                .get(reqwest::header::CONTENT_LENGTH)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse().ok());
            let last_modified = response.headers()
                .get(reqwest::header::LAST_MODIFIED)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned);
            let content_encoding = response.headers()
                .get(reqwest::header::CONTENT_ENCODING)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned);
            let _ = response.bytes();

            return Ok(Some(ProbeResult { url, content_length, last_modified, content_encoding }));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Version;

    fn identity(url: &str, version: Option<&str>) -> Identity {
        Identity::new(Url::parse(url).unwrap(), version.map(Version::new))
    }

    #[test]
    fn default_creator_yields_only_base_without_options() {
        let id = identity("https://example.test/a.jar", None);
        let candidates = DefaultUrlCreator.candidates(&id, &DownloadOptions::default());
        assert_eq!(candidates, vec![id.url]);
    }

    #[test]
    fn pack_suffix_option_doubles_candidates() {
        let id = identity("https://example.test/a.jar", None);
        let options = DownloadOptions::new(false, true);
        let candidates = DefaultUrlCreator.candidates(&id, &options);
        assert_eq!(candidates.len(), 2);
        assert!(candidates[1].path().ends_with(".pack.gz"));
    }

    #[test]
    fn version_suffix_is_skipped_without_a_version() {
        let id = identity("https://example.test/a.jar", None);
        let options = DownloadOptions::new(true, false);
        let candidates = DefaultUrlCreator.candidates(&id, &options);
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn redirect_classification_covers_all_three_oh_x_codes() {
        for code in [301, 302, 303, 307, 308] {
            assert!(is_redirect(StatusCode::from_u16(code).unwrap()));
        }
        assert!(!is_redirect(StatusCode::OK));
    }
}
