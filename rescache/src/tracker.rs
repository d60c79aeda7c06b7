//! [`Tracker`]: the application-facing facade over one set of tracked resources
//! (§4.1). Multiple trackers may reference the same interned [`Resource`]; a
//! `Tracker` only owns its own membership list and listeners.

use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use url::Url;

use crate::error::{Error, Result};
use crate::listener::{self, DownloadListener, Event};
use crate::locks::{self, TRACKER_LISTENERS, TRACKER_RESOURCES};
use crate::options::{DownloadOptions, UpdatePolicy};
use crate::resource::{self, Resource};
use crate::scheduler::{self, Scheduler};
use crate::state;
use crate::version::{self, Identity};

/// The shared, `Arc`-wrapped state behind a [`Tracker`] handle, so the scheduler's
/// prefetch registry can hold a `Weak` reference to it without keeping it alive.
pub struct TrackerHandle {
    prefetch: bool,
    resources: Mutex<Vec<Arc<Resource>>>,
    listeners: Mutex<Vec<Box<dyn DownloadListener + Send>>>,
}

impl TrackerHandle {

    /// Run `f` over each tracked resource under the resources lock, returning the
    /// first one `f` accepts. Used by [`crate::scheduler::Scheduler::pick_prefetch`].
    pub(crate) fn find_resource(&self, mut f: impl FnMut(&Resource) -> bool) -> Option<Arc<Resource>> {
        let resources = locks::acquire(&self.resources, TRACKER_RESOURCES);
        resources.iter().find(|r| f(r)).cloned()
    }

    /// Snapshot the listener list, release the lock, then invoke every listener
    /// outside of it (§8 invariant 6: no lock held during a callback).
    pub(crate) fn dispatch(&self, url: &str, event: Event) {
        debug_assert!(locks::no_lock_held(), "listener dispatch must run with no lock held");
        let mut snapshot: Vec<Box<dyn DownloadListener + Send>> = {
            let mut listeners = locks::acquire(&self.listeners, TRACKER_LISTENERS);
            std::mem::take(&mut *listeners)
        };
        for listener in snapshot.iter_mut() {
            listener::dispatch(listener.as_mut(), url, event);
        }
        let mut listeners = locks::acquire(&self.listeners, TRACKER_LISTENERS);
        listeners.append(&mut snapshot);
    }

}

/// A tracked set of resources plus the listeners watching them.
pub struct Tracker {
    handle: Arc<TrackerHandle>,
}

impl Tracker {

    /// Create a tracker. When `prefetch` is `true`, the scheduler may spend idle
    /// worker capacity speculatively advancing this tracker's resources even before
    /// anyone calls `wait_for` on them.
    pub fn new(prefetch: bool) -> Self {
        let handle = Arc::new(TrackerHandle {
            prefetch,
            resources: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
        });
        if prefetch {
            scheduler::global().register_prefetch(Arc::downgrade(&handle));
        }
        Self { handle }
    }

    fn scheduler(&self) -> &'static Scheduler {
        scheduler::global()
    }

    fn resource_for(&self, url: &str) -> Result<Arc<Resource>> {
        let normalized = version::normalize_url(url)?;
        let resources = locks::acquire(&self.handle.resources, TRACKER_RESOURCES);
        resources.iter()
            .find(|r| r.identity.url == normalized)
            .cloned()
            .ok_or_else(|| Error::InvalidDescriptor { url: url.to_owned() })
    }

    /// §4.1 `add_resource`: normalize, intern, record, run `check_cache`, and either
    /// mark the resource serviceable from cache or (for a prefetch tracker) let the
    /// scheduler start making speculative progress on it.
    pub fn add_resource(&self, url: &str, requested_version: Option<&str>, options: DownloadOptions, update_policy: UpdatePolicy) -> Result<()> {
        let normalized = version::normalize_url(url)?;
        let identity = Identity::new(normalized, requested_version.map(Into::into));
        let resource = resource::intern(identity, update_policy, options);
        resource.set_update_policy(update_policy);

        {
            let mut resources = locks::acquire(&self.handle.resources, TRACKER_RESOURCES);
            if !resources.iter().any(|r| Arc::ptr_eq(r, &resource)) {
                resources.push(resource.clone());
            }
        }
        resource.attach_tracker(&Arc::downgrade(&self.handle));

        self.check_cache(&resource);

        if self.handle.prefetch && !resource.is_terminal() {
            self.scheduler().enqueue(resource, crate::cancel::CancelToken::default());
        }

        Ok(())
    }

    /// §4.1's `check_cache` decision table.
    fn check_cache(&self, resource: &Arc<Resource>) {
        let cache = &self.scheduler().collaborators.cache;

        if !cache.is_cacheable(&resource.identity.url) {
            self.mark_serviceable_from_cache(resource);
            return;
        }

        if resource.update_policy().is_force() {
            if resource.is_terminal() {
                resource.reset_for_refetch();
            }
            return;
        }

        let cache_file = cache.cache_file_for(&resource.identity.url, resource.identity.version.as_ref());
        let Ok(entry) = cache.load_entry(&cache_file) else { return };

        if cache_file.is_file() && resource.update_policy().should_use_cache_without_connecting(&entry) {
            resource.with_inner(|inner| {
                inner.local_file = Some(cache_file.clone());
                inner.size = if entry.remote_content_length >= 0 { entry.remote_content_length } else { 0 };
            });
            self.mark_serviceable_from_cache(resource);
        }
    }

    fn mark_serviceable_from_cache(&self, resource: &Arc<Resource>) {
        resource.begin_processing();
        resource.try_transition(
            0,
            state::ERROR,
            state::PRECONNECT | state::CONNECTING | state::PREDOWNLOAD | state::DOWNLOADING,
            state::CONNECTED | state::DOWNLOADED,
        );
        resource.end_processing();
        let url = resource.identity.url.as_str().to_owned();
        self.handle.dispatch(&url, Event::DownloadCompleted { success: true });
    }

    /// §4.1 `remove_resource`: detach from this tracker only. The interned resource
    /// keeps living for as long as anything else references it.
    pub fn remove_resource(&self, url: &str) -> Result<()> {
        let resource = self.resource_for(url)?;
        resource.detach_tracker(&Arc::downgrade(&self.handle));
        let mut resources = locks::acquire(&self.handle.resources, TRACKER_RESOURCES);
        resources.retain(|r| !Arc::ptr_eq(r, &resource));
        Ok(())
    }

    /// Ensure `resource` is scheduled if it is not already terminal or in flight.
    pub fn start_resource(&self, url: &str) -> Result<()> {
        let resource = self.resource_for(url)?;
        if !resource.is_terminal() {
            self.scheduler().enqueue(resource, crate::cancel::CancelToken::default());
        }
        Ok(())
    }

    /// Snapshot of whether `url`'s resource is already serviceable without further
    /// work, per §6's `check_resource` entry point.
    pub fn check_resource(&self, url: &str) -> Result<bool> {
        Ok(self.resource_for(url)?.is_terminal())
    }

    /// §4.1 `wait_for`: enqueue every named resource, then block on the scheduler's
    /// completion condition until each one is terminal or `timeout_ms` elapses.
    /// `timeout_ms == 0` means wait indefinitely.
    pub fn wait_for(&self, urls: &[&str], timeout_ms: u64, cancel: &crate::cancel::CancelToken) -> Result<bool> {
        let resources = urls.iter()
            .map(|url| self.resource_for(url))
            .collect::<Result<Vec<_>>>()?;

        for resource in &resources {
            if !resource.is_terminal() {
                self.scheduler().enqueue(resource.clone(), cancel.clone());
            }
        }

        let deadline = if timeout_ms == 0 { None } else { Some(Instant::now() + Duration::from_millis(timeout_ms)) };

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let satisfied = self.scheduler().wait_until(&resources, deadline, |r| r.is_terminal() || cancel.is_cancelled());

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        Ok(satisfied)
    }

    /// Convenience single-resource form of [`Self::wait_for`].
    pub fn wait_for_resource(&self, url: &str, timeout_ms: u64, cancel: &crate::cancel::CancelToken) -> Result<bool> {
        self.wait_for(&[url], timeout_ms, cancel)
    }

    /// §4.1 `get_cache_file`: block until terminal, then resolve to a local path.
    pub fn get_cache_file(&self, url: &str) -> Result<Option<PathBuf>> {
        let resource = self.resource_for(url)?;
        self.scheduler().wait_until(std::slice::from_ref(&resource), None, |r| r.is_terminal());

        let state = resource.state();
        if state.contains(state::DOWNLOADED) {
            return Ok(resource.local_file());
        }
        if resource.identity.url.scheme() == "file" && !self.scheduler().collaborators.cache.is_cacheable(&resource.identity.url) {
            return Ok(resource.identity.url.to_file_path().ok());
        }
        Ok(None)
    }

    /// §4.1 `get_cache_url`: the same resolution as [`Self::get_cache_file`], wrapped
    /// as a `file://` URL.
    pub fn get_cache_url(&self, url: &str) -> Result<Option<Url>> {
        Ok(self.get_cache_file(url)?.and_then(|path| Url::from_file_path(path).ok()))
    }

    pub fn amount_read(&self, url: &str) -> Result<i64> {
        Ok(self.resource_for(url)?.amount_read())
    }

    pub fn total_size(&self, url: &str) -> Result<i64> {
        Ok(self.resource_for(url)?.total_size())
    }

    pub fn add_download_listener(&self, listener: impl DownloadListener + Send + 'static) {
        let mut listeners = locks::acquire(&self.handle.listeners, TRACKER_LISTENERS);
        listeners.push(Box::new(listener));
    }

    /// Remove every listener currently registered. The teacher's event traits have no
    /// notion of listener identity to remove one selectively, so neither does this.
    pub fn remove_download_listeners(&self) {
        let mut listeners = locks::acquire(&self.handle.listeners, TRACKER_LISTENERS);
        listeners.clear();
    }

}

impl Drop for Tracker {
    fn drop(&mut self) {
        let resources = locks::acquire(&self.handle.resources, TRACKER_RESOURCES);
        for resource in resources.iter() {
            resource.detach_tracker(&Arc::downgrade(&self.handle));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_resource_for_file_url_is_immediately_downloaded() {
        let tracker = Tracker::new(false);
        tracker.add_resource("file:///tmp/does-not-matter", None, DownloadOptions::default(), UpdatePolicy::Session).unwrap();
        assert!(tracker.check_resource("file:///tmp/does-not-matter").unwrap());
    }

    #[test]
    fn wait_for_unknown_url_is_invalid_descriptor() {
        let tracker = Tracker::new(false);
        let cancel = crate::cancel::CancelToken::new();
        let result = tracker.wait_for(&["https://example.test/never-added.jar"], 10, &cancel);
        assert!(matches!(result, Err(Error::InvalidDescriptor { .. })));
    }

    #[test]
    fn add_resource_is_idempotent_for_repeated_urls() {
        let tracker = Tracker::new(false);
        let url = "file:///tmp/idempotent-test-file";
        tracker.add_resource(url, None, DownloadOptions::default(), UpdatePolicy::Session).unwrap();
        tracker.add_resource(url, None, DownloadOptions::default(), UpdatePolicy::Session).unwrap();
        let resources = locks::acquire(&tracker.handle.resources, TRACKER_RESOURCES);
        assert_eq!(resources.len(), 1);
    }
}
