//! Redirect handling when the runtime's policy forbids it (§4.4). Kept in its own
//! test binary so its custom `Runtime` can be installed into this binary's
//! process-wide scheduler without disturbing the default-runtime scenarios in
//! `download.rs`.

use std::sync::Once;

use mockito::Server;

use rescache::{CancelToken, DownloadOptions, EngineConfig, Runtime, Tracker, UpdatePolicy};

static INIT: Once = Once::new();

#[derive(Debug, Clone, Copy, Default)]
struct NoRedirectRuntime;

impl Runtime for NoRedirectRuntime {
    fn is_allow_redirect(&self) -> bool {
        false
    }
}

fn configure_once() {
    INIT.call_once(|| {
        let dir = tempfile::Builder::new()
            .prefix("")
            .suffix(".rescache-redirect-tests")
            .tempdir_in(env!("CARGO_TARGET_TMPDIR"))
            .unwrap()
            .into_path();
        let mut config = EngineConfig::with_cache_root(dir);
        config.runtime = std::sync::Arc::new(NoRedirectRuntime);
        rescache::configure(config);
    });
}

#[test]
fn redirect_fails_the_resource_when_disallowed() {
    configure_once();
    let mut server = Server::new();

    let origin = server.mock("GET", "/redirect-src")
        .with_status(302)
        .with_header("Location", "/redirect-dst")
        .create();

    let url = format!("{}/redirect-src", server.url());
    let tracker = Tracker::new(false);
    let cancel = CancelToken::new();
    tracker.add_resource(&url, None, DownloadOptions::default(), UpdatePolicy::Session).unwrap();

    // ERROR is a terminal state, so wait_for is satisfied even though the resource
    // never became servable.
    assert!(tracker.wait_for_resource(&url, 5_000, &cancel).unwrap());
    assert!(tracker.get_cache_file(&url).unwrap().is_none());

    origin.assert();
}
