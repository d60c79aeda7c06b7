//! The downloader worker's two phases (§4.3): connect (`initialize_resource`) and
//! download (`download_resource`). Both run inside the scheduler's privileged scope
//! and release whatever `CacheEntry` lock they hold on every exit path.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::sync::Arc;

use crate::cache::CacheEntry;
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::prober;
use crate::resource::Resource;
use crate::scheduler::Scheduler;
use crate::state;
use crate::unpack::ContentEncoding;

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Drive `resource` through whichever phases its current state calls for. A resource
/// handed to a worker always runs its phases to completion here rather than being
/// re-enqueued between them (§4.3: "for each scheduled resource it runs, in order,
/// the two phases"). `cancel` is the token (if any) supplied by whichever call
/// actually triggered this resource's processing; `stream_body` consults it on every
/// chunk read so a raise mid-transfer still aborts promptly.
pub fn process_resource(scheduler: &Scheduler, resource: &Arc<Resource>, cancel: &CancelToken) {
    scheduler.collaborators.privileged.run(Box::new(|| {
        if resource.state().contains(state::CONNECTING) {
            if connect_resource(scheduler, resource).is_err() {
                fail(resource);
                return;
            }
        }

        if !resource.is_terminal() {
            resource.try_transition(state::PREDOWNLOAD, state::ERROR, state::PREDOWNLOAD, state::DOWNLOADING);
        }

        if resource.state().contains(state::DOWNLOADING) {
            if download_resource(scheduler, resource, cancel).is_err() {
                fail(resource);
                return;
            }
        }
    }));

    resource.end_processing();
    notify(resource);
}

fn fail(resource: &Resource) {
    resource.with_inner(|inner| inner.state.insert(state::ERROR));
}

/// Abandon a resource whose cancel token was already raised before a worker ever
/// touched it, without running either phase. Mirrors the tail of
/// [`process_resource`] so both paths leave the resource in the same shape: `ERROR`,
/// no longer `PROCESSING`, and with its trackers notified.
pub(crate) fn abandon(resource: &Resource) {
    resource.with_inner(|inner| inner.state.insert(state::ERROR));
    resource.end_processing();
    notify(resource);
}

/// Classify the resource's current state and dispatch the matching event to every
/// tracker it is attached to, outside of any lock (§8 invariant 6).
fn notify(resource: &Resource) {
    let Some(event) = crate::listener::classify(resource.state()) else { return };
    let url = resource.identity.url.as_str().to_owned();
    for tracker in resource.live_trackers() {
        tracker.dispatch(&url, event);
    }
}

/// §4.3.1: probe reachability, negotiate the best URL, and decide whether the cached
/// artifact (if any) is still current.
fn connect_resource(scheduler: &Scheduler, resource: &Arc<Resource>) -> Result<()> {
    notify(resource);

    let identity = resource.identity.clone();
    let cache = &scheduler.collaborators.cache;
    let runtime = scheduler.collaborators.runtime.as_ref();

    if !cache.is_cacheable(&identity.url) {
        resource.with_inner(|inner| {
            inner.local_file = if identity.url.scheme() == "file" {
                identity.url.to_file_path().ok()
            } else {
                None
            };
        });
        resource.try_transition(
            state::CONNECTING,
            0,
            state::CONNECTING | state::PREDOWNLOAD | state::DOWNLOADING,
            state::CONNECTED | state::DOWNLOADED,
        );
        scheduler.notify_completion();
        notify(resource);
        return Ok(());
    }

    let mut cache_file = cache.cache_file_for(&identity.url, identity.version.as_ref());
    let mut lock = cache.lock(&cache_file)?;
    let mut entry = cache.load_entry(&cache_file)?;

    let online = !runtime.is_offline_forced() && runtime.detect_online(&identity.url);

    let probe = if online {
        prober::find_best_url(
            &scheduler.collaborators.client,
            runtime,
            scheduler.collaborators.url_creator.as_ref(),
            &identity,
            &resource.options(),
        )?
    } else {
        None
    };

    if online && probe.is_none() {
        return Err(Error::new_no_candidate_answered(identity.url.clone()));
    }
    if !online && !cache_file.is_file() {
        return Err(Error::new_no_candidate_answered(identity.url.clone()));
    }

    let remote_last_modified = probe.as_ref().and_then(|p| p.last_modified.clone());
    let remote_content_length = probe.as_ref().and_then(|p| p.content_length);

    // Offline, the connect phase cannot revalidate `Last-Modified` against anything,
    // so whatever is already on disk is trusted as-is.
    let current = if online {
        cache.is_current(&cache_file, &entry, remote_last_modified.as_deref())
            && !resource.update_policy().is_force()
    } else {
        true
    };

    if !current && cache_file.is_file() {
        entry.mark_for_delete();
        cache.store_entry(&cache_file, &entry)?;
        let new_cache_file = cache.make_new_cache_file(&identity.url, identity.version.as_ref());
        let new_lock = cache.lock(&new_cache_file)?;
        lock = new_lock;
        cache_file = new_cache_file;
        entry = CacheEntry::default();
    }

    let size = if current {
        if entry.remote_content_length >= 0 {
            entry.remote_content_length
        } else {
            fs::metadata(&cache_file).map(|m| m.len() as i64).unwrap_or(-1)
        }
    } else {
        remote_content_length.map(|v| v as i64).unwrap_or(-1)
    };

    resource.with_inner(|inner| {
        inner.local_file = Some(cache_file.clone());
        inner.size = size;
        if let Some(probe) = &probe {
            inner.download_location = Some(probe.url.clone());
        }
    });

    let remove = if current {
        state::CONNECTING | state::PREDOWNLOAD | state::DOWNLOADING
    } else {
        state::CONNECTING
    };
    let add = if current {
        state::CONNECTED | state::DOWNLOADED
    } else {
        state::CONNECTED
    };
    resource.try_transition(state::CONNECTING, 0, remove, add);

    if !current && online {
        entry.remote_content_length = remote_content_length.map(|v| v as i64).unwrap_or(-1);
        entry.last_modified = remote_last_modified;
    }
    entry.last_updated = now_millis();
    cache.store_entry(&cache_file, &entry)?;
    drop(lock);

    scheduler.notify_completion();
    notify(resource);

    Ok(())
}

/// §4.3.2: stream the negotiated URL into the cache, decoding gzip/packgz payloads
/// into the final artifact.
fn download_resource(scheduler: &Scheduler, resource: &Arc<Resource>, cancel: &CancelToken) -> Result<()> {
    notify(resource);

    let identity = resource.identity.clone();
    let cache = &scheduler.collaborators.cache;
    let download_location = resource.with_inner(|inner| inner.download_location.clone())
        .unwrap_or_else(|| identity.url.clone());

    let mut lock = cache.lock(&cache.cache_file_for(&identity.url, identity.version.as_ref()))?;

    let response = scheduler.collaborators.client
        .get(download_location.clone())
        .header(reqwest::header::ACCEPT_ENCODING, crate::http::ACCEPT_ENCODING)
        .send()
        .map_err(|error| Error::new_network_unreachable(download_location.clone(), error))?;

    if !response.status().is_success() {
        return Err(Error::HttpInvalidStatus { url: download_location.clone(), status: response.status().as_u16() });
    }

    let content_encoding = response.headers()
        .get(reqwest::header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let remote_last_modified = response.headers()
        .get(reqwest::header::LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let remote_content_length = response.headers()
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let encoding = ContentEncoding::classify(content_encoding.as_deref(), download_location.path());

    let final_file = cache.cache_file_for(&identity.url, identity.version.as_ref());
    let download_key = match encoding.cache_key_suffix() {
        Some(suffix) => identity.with_suffixed_url(suffix),
        None => identity.url.clone(),
    };
    let download_file = if encoding == ContentEncoding::Plain {
        final_file.clone()
    } else {
        cache.cache_file_for(&download_key, identity.version.as_ref())
    };

    let mut download_lock = if download_file == final_file {
        None
    } else {
        Some(cache.lock(&download_file)?)
    };
    let mut download_entry = cache.load_entry(&download_file)?;

    if download_entry.is_current(remote_last_modified.as_deref()) {
        let length = fs::metadata(&download_file).map(|m| m.len() as i64).unwrap_or(0);
        resource.with_inner(|inner| inner.transferred = length);
    } else {
        stream_body(response, &download_file, cache, resource, scheduler.config().get_chunk_size(), cancel)?;
        if encoding != ContentEncoding::Plain {
            download_entry.remote_content_length = remote_content_length.map(|v| v as i64).unwrap_or(-1);
            download_entry.last_modified = remote_last_modified.clone();
            download_entry.last_updated = now_millis();
            cache.store_entry(&download_file, &download_entry)?;
        }

        match encoding {
            ContentEncoding::Plain => {}
            ContentEncoding::Gzip => decode_gzip(&download_file, &final_file)?,
            ContentEncoding::PackGz => decode_packgz(scheduler, &download_file, &final_file)?,
        }
    }

    if download_file != final_file {
        let mut origin_entry = cache.load_entry(&final_file)?;
        origin_entry.original_content_length = fs::metadata(&final_file).map(|m| m.len() as i64).unwrap_or(-1);
        origin_entry.last_modified = remote_last_modified;
        origin_entry.last_updated = now_millis();
        cache.store_entry(&final_file, &origin_entry)?;

        download_entry.mark_for_delete();
        cache.store_entry(&download_file, &download_entry)?;
    }

    resource.try_transition(state::DOWNLOADING, 0, state::DOWNLOADING, state::DOWNLOADED);

    drop(download_lock.take());
    drop(lock);

    scheduler.notify_completion();
    notify(resource);

    Ok(())
}

fn stream_body(mut response: reqwest::blocking::Response, download_file: &std::path::Path, cache: &crate::cache::CacheStore, resource: &Resource, chunk_size: usize, cancel: &CancelToken) -> Result<()> {
    let mut output = cache.open_output_stream(download_file)?;
    let mut buffer = vec![0u8; chunk_size];
    let mut transferred = 0i64;
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let read = response.read(&mut buffer).map_err(Error::new_io)?;
        if read == 0 {
            break;
        }
        output.write_all(&buffer[..read]).map_err(|e| Error::new_io_file(e, download_file))?;
        transferred += read as i64;
        resource.with_inner(|inner| inner.transferred = transferred);
    }
    output.flush().map_err(|e| Error::new_io_file(e, download_file))?;
    Ok(())
}

fn decode_gzip(download_file: &std::path::Path, final_file: &std::path::Path) -> Result<()> {
    let input = File::open(download_file).map_err(|e| Error::new_io_file(e, download_file))?;
    let output = File::create(final_file).map_err(|e| Error::new_io_file(e, final_file))?;
    crate::unpack::gzip_decode(input, output)?;
    Ok(())
}

fn decode_packgz(scheduler: &Scheduler, download_file: &std::path::Path, final_file: &std::path::Path) -> Result<()> {
    let packed = File::open(download_file).map_err(|e| Error::new_io_file(e, download_file))?;
    let mut decoded = Vec::new();
    crate::unpack::gzip_decode(packed, &mut decoded)?;

    let mut input: &[u8] = &decoded;
    let mut output = File::create(final_file).map_err(|e| Error::new_io_file(e, final_file))?;
    scheduler.collaborators.unpacker.unpack(&mut input, &mut output)
}
