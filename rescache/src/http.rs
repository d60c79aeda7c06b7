//! This module provides various HTTP(S) request utilities, everything is based on
//! blocking reqwest: workers in this engine are plain OS threads that block on
//! sockets, not an async event loop (see the concurrency model in the crate docs).

use std::time::Duration;

use once_cell::sync::OnceCell;
use reqwest::blocking::{Client, ClientBuilder};

/// The user agent to be used on each HTTP request.
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Header value requested on every connect/download request, advertising support for
/// both the tabular-pack format and plain gzip.
pub const ACCEPT_ENCODING: &str = "pack200-gzip, gzip";

/// Get a new client builder for blocking HTTP(S) requests with the given timeouts.
pub fn builder(connect_timeout: Duration, read_timeout: Duration) -> ClientBuilder {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(connect_timeout)
        .timeout(read_timeout)
        .redirect(reqwest::redirect::Policy::none())
}

/// Return the singleton instance of the HTTP client used internally by the engine.
/// Redirects are intentionally not followed by reqwest itself: [`crate::prober`]
/// inspects each 3xx response and decides whether to follow it according to the
/// runtime's redirect policy.
pub fn client(connect_timeout: Duration, read_timeout: Duration) -> reqwest::Result<Client> {
    static INSTANCE: OnceCell<Client> = OnceCell::new();
    let inst = INSTANCE.get_or_try_init(|| builder(connect_timeout, read_timeout).build())?;
    Ok(inst.clone())
}
