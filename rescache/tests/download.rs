//! End-to-end scenarios against a mocked HTTP origin: a resource is added to a
//! tracker, waited on, and the resulting cache artifact (or lack of one) inspected.
//!
//! All tests in this file share the single process-wide scheduler, configured once
//! with a temporary cache root on first use; this mirrors the `rescache::configure`
//! "set once before first use" contract rather than fighting it.

use std::fs;
use std::sync::{Arc, Once};

use mockito::Server;
use parking_lot::Mutex;

use rescache::{CancelToken, DownloadListener, DownloadOptions, EngineConfig, Tracker, UpdatePolicy};

static INIT: Once = Once::new();

fn configure_once() {
    INIT.call_once(|| {
        let dir = tempfile::Builder::new()
            .prefix("")
            .suffix(".rescache-download-tests")
            .tempdir_in(env!("CARGO_TARGET_TMPDIR"))
            .unwrap()
            .into_path();
        rescache::configure(EngineConfig::with_cache_root(dir));
    });
}

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<(String, bool)>>>);

impl DownloadListener for Recorder {
    fn download_completed(&mut self, url: &str, success: bool) {
        self.0.lock().push((url.to_owned(), success));
    }
}

#[test]
fn plain_hit_materializes_the_artifact_and_fires_listener() {
    configure_once();
    let mut server = Server::new();

    // Hit twice: once while the connect phase probes for headers, once more while
    // the download phase actually streams the body.
    let mock = server.mock("GET", "/plain.jar")
        .with_status(200)
        .with_header("Last-Modified", "Sun, 06 Nov 1994 08:49:37 GMT")
        .with_body("hello world")
        .expect(2)
        .create();

    let url = format!("{}/plain.jar", server.url());
    let tracker = Tracker::new(false);
    let cancel = CancelToken::new();
    let recorder = Recorder::default();
    tracker.add_download_listener(recorder.clone());

    tracker.add_resource(&url, None, DownloadOptions::default(), UpdatePolicy::Session).unwrap();
    assert!(tracker.wait_for_resource(&url, 5_000, &cancel).unwrap());

    let file = tracker.get_cache_file(&url).unwrap().expect("resource should resolve to a cache file");
    assert_eq!(fs::read_to_string(&file).unwrap(), "hello world");

    mock.assert();
    assert_eq!(recorder.0.lock().as_slice(), &[(url, true)]);
}

#[test]
fn session_policy_serves_from_disk_without_reconnecting() {
    configure_once();
    let mut server = Server::new();

    // Hit twice by the single download that happens below; the second tracker must
    // not generate any further hits.
    let mock = server.mock("GET", "/session.jar")
        .with_status(200)
        .with_header("Last-Modified", "Sun, 06 Nov 1994 08:49:37 GMT")
        .with_body("cached body")
        .expect(2)
        .create();

    let url = format!("{}/session.jar", server.url());

    {
        let tracker = Tracker::new(false);
        let cancel = CancelToken::new();
        tracker.add_resource(&url, None, DownloadOptions::default(), UpdatePolicy::Session).unwrap();
        assert!(tracker.wait_for_resource(&url, 5_000, &cancel).unwrap());
    }

    // A fresh tracker for the same URL: the prior resource was dropped along with its
    // tracker, so this re-interns a new `Resource`. Session policy should still serve
    // it straight from the on-disk sidecar without touching the network again.
    let tracker = Tracker::new(false);
    assert!(tracker.check_resource(&url).unwrap());
    let file = tracker.get_cache_file(&url).unwrap().unwrap();
    assert_eq!(fs::read_to_string(&file).unwrap(), "cached body");

    mock.assert();
}

#[test]
fn force_policy_always_redownloads() {
    configure_once();
    let mut server = Server::new();
    let path = "/force.jar";
    let url = format!("{}{}", server.url(), path);

    let first = server.mock("GET", path)
        .with_status(200)
        .with_header("Last-Modified", "Sun, 06 Nov 1994 08:49:37 GMT")
        .with_body("v1")
        .expect(2)
        .create();

    {
        let tracker = Tracker::new(false);
        let cancel = CancelToken::new();
        tracker.add_resource(&url, None, DownloadOptions::default(), UpdatePolicy::Session).unwrap();
        assert!(tracker.wait_for_resource(&url, 5_000, &cancel).unwrap());
        let file = tracker.get_cache_file(&url).unwrap().unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "v1");
    }
    first.assert();

    // Same Last-Modified as before: a Session-policy resource would be served from
    // disk, but Force must bypass that and hit the network again.
    let second = server.mock("GET", path)
        .with_status(200)
        .with_header("Last-Modified", "Sun, 06 Nov 1994 08:49:37 GMT")
        .with_body("v2")
        .expect(2)
        .create();

    let tracker = Tracker::new(false);
    let cancel = CancelToken::new();
    tracker.add_resource(&url, None, DownloadOptions::default(), UpdatePolicy::Force).unwrap();
    assert!(tracker.wait_for_resource(&url, 5_000, &cancel).unwrap());
    let file = tracker.get_cache_file(&url).unwrap().unwrap();
    assert_eq!(fs::read_to_string(&file).unwrap(), "v2");

    second.assert();
}

#[test]
fn force_policy_redownloads_a_still_alive_resource() {
    configure_once();
    let mut server = Server::new();
    let path = "/force-alive.jar";
    let url = format!("{}{}", server.url(), path);

    let first = server.mock("GET", path)
        .with_status(200)
        .with_header("Last-Modified", "Sun, 06 Nov 1994 08:49:37 GMT")
        .with_body("v1")
        .expect(2)
        .create();

    // Same tracker, same interned resource, kept alive across both phases: this is
    // what `force_policy_always_redownloads` doesn't cover, since it drops the
    // tracker (and with it the resource) between the two add_resource calls.
    let tracker = Tracker::new(false);
    let cancel = CancelToken::new();
    tracker.add_resource(&url, None, DownloadOptions::default(), UpdatePolicy::Session).unwrap();
    assert!(tracker.wait_for_resource(&url, 5_000, &cancel).unwrap());
    let file = tracker.get_cache_file(&url).unwrap().unwrap();
    assert_eq!(fs::read_to_string(&file).unwrap(), "v1");
    first.assert();

    // Same Last-Modified: a Session re-add would be satisfied by the on-disk entry
    // without reconnecting, but re-adding the still-alive resource as Force must
    // still force a real re-fetch.
    let second = server.mock("GET", path)
        .with_status(200)
        .with_header("Last-Modified", "Sun, 06 Nov 1994 08:49:37 GMT")
        .with_body("v2")
        .expect(2)
        .create();

    tracker.add_resource(&url, None, DownloadOptions::default(), UpdatePolicy::Force).unwrap();
    assert!(tracker.wait_for_resource(&url, 5_000, &cancel).unwrap());
    let file = tracker.get_cache_file(&url).unwrap().unwrap();
    assert_eq!(fs::read_to_string(&file).unwrap(), "v2");

    second.assert();
}

#[test]
fn gzip_encoded_response_is_decoded_into_the_final_artifact() {
    use std::io::Write;

    configure_once();
    let mut server = Server::new();

    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(b"decoded payload").unwrap();
    let compressed = encoder.finish().unwrap();

    let mock = server.mock("GET", "/gzip.jar")
        .with_status(200)
        .with_header("Content-Encoding", "gzip")
        .with_header("Last-Modified", "Sun, 06 Nov 1994 08:49:37 GMT")
        .with_body(compressed)
        .expect(2)
        .create();

    let url = format!("{}/gzip.jar", server.url());
    let tracker = Tracker::new(false);
    let cancel = CancelToken::new();
    tracker.add_resource(&url, None, DownloadOptions::default(), UpdatePolicy::Session).unwrap();
    assert!(tracker.wait_for_resource(&url, 5_000, &cancel).unwrap());

    let file = tracker.get_cache_file(&url).unwrap().unwrap();
    assert_eq!(fs::read_to_string(&file).unwrap(), "decoded payload");

    mock.assert();
}

#[test]
fn redirect_is_followed_when_the_runtime_allows_it() {
    configure_once();
    let mut server = Server::new();

    // Hit twice: once when the connect phase's probe follows the redirect, once more
    // when the download phase fetches the already-resolved location directly.
    let target = server.mock("GET", "/redirect-dst")
        .with_status(200)
        .with_header("Last-Modified", "Sun, 06 Nov 1994 08:49:37 GMT")
        .with_body("redirected body")
        .expect(2)
        .create();

    // The origin is only ever probed, never fetched again by the download phase.
    let origin = server.mock("GET", "/redirect-src")
        .with_status(301)
        .with_header("Location", "/redirect-dst")
        .expect(1)
        .create();

    let url = format!("{}/redirect-src", server.url());
    let tracker = Tracker::new(false);
    let cancel = CancelToken::new();
    tracker.add_resource(&url, None, DownloadOptions::default(), UpdatePolicy::Session).unwrap();
    assert!(tracker.wait_for_resource(&url, 5_000, &cancel).unwrap());

    let file = tracker.get_cache_file(&url).unwrap().unwrap();
    assert_eq!(fs::read_to_string(&file).unwrap(), "redirected body");

    origin.assert();
    target.assert();
}
