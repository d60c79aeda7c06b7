//! The [`Resource`] entity: identity, state bit-set, progress counters and the weak
//! process-wide interning table that gives every `(url, version)` a single shared
//! instance.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use url::Url;

use crate::locks::{self, RESOURCE_MONITOR};
use crate::options::{DownloadOptions, UpdatePolicy};
use crate::state::{self, ResourceState};
use crate::tracker::TrackerHandle;
use crate::version::Identity;

/// Mutable fields guarded by the resource's own monitor (lock rank
/// [`RESOURCE_MONITOR`]).
#[derive(Debug)]
pub struct ResourceInner {
    pub state: ResourceState,
    pub download_location: Option<Url>,
    pub local_file: Option<PathBuf>,
    /// Total expected size in bytes, or `-1` if unknown.
    pub size: i64,
    /// Bytes transferred so far. Monotonically non-decreasing (§8, invariant 2).
    pub transferred: i64,
    pub update_policy: UpdatePolicy,
    pub options: DownloadOptions,
    /// Trackers this resource is currently attached to, used only for listener
    /// dispatch; kept weak so a tracker can be dropped without pinning resources.
    pub trackers: Vec<Weak<TrackerHandle>>,
}

impl ResourceInner {
    fn new(update_policy: UpdatePolicy, options: DownloadOptions) -> Self {
        let mut state = ResourceState::empty();
        state.insert(state::PRECONNECT | state::PREDOWNLOAD);
        Self {
            state,
            download_location: None,
            local_file: None,
            size: -1,
            transferred: 0,
            update_policy,
            options,
            trackers: Vec::new(),
        }
    }
}

/// A single tracked resource, interned process-wide by [`Identity`].
#[derive(Debug)]
pub struct Resource {
    pub identity: Identity,
    inner: Mutex<ResourceInner>,
    /// Per-resource condition, woken whenever this resource's state changes. The
    /// scheduler's own completion condition (see [`crate::scheduler::Scheduler`]) is
    /// what [`crate::tracker::Tracker::wait_for`] actually blocks on, since a single
    /// wait can span many resources; this one exists so code that only cares about
    /// one specific resource does not need to go through the scheduler at all.
    condvar: Condvar,
}

impl Resource {

    fn new(identity: Identity, update_policy: UpdatePolicy, options: DownloadOptions) -> Arc<Self> {
        Arc::new(Self {
            identity,
            inner: Mutex::new(ResourceInner::new(update_policy, options)),
            condvar: Condvar::new(),
        })
    }

    /// Run `f` with exclusive access to this resource's mutable fields.
    pub fn with_inner<R>(&self, f: impl FnOnce(&mut ResourceInner) -> R) -> R {
        let mut guard = locks::acquire(&self.inner, RESOURCE_MONITOR);
        f(&mut guard)
    }

    #[inline]
    pub fn state(&self) -> ResourceState {
        self.with_inner(|inner| inner.state)
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Apply [`ResourceState::try_transition`] under the resource monitor and, if it
    /// succeeds, wake anyone waiting on this specific resource's condition.
    pub fn try_transition(&self, required: u8, forbidden: u8, remove: u8, add: u8) -> bool {
        let applied = self.with_inner(|inner| inner.state.try_transition(required, forbidden, remove, add));
        if applied {
            self.condvar.notify_all();
        }
        applied
    }

    /// Unconditionally set [`state::PROCESSING`], marking that this resource is now
    /// either queued or held by a worker.
    pub fn begin_processing(&self) {
        self.with_inner(|inner| inner.state.insert(state::PROCESSING));
    }

    /// Unconditionally clear [`state::PROCESSING`]. Called once a resource reaches a
    /// terminal state and will receive no further scheduler attention.
    pub fn end_processing(&self) {
        self.with_inner(|inner| inner.state.remove(state::PROCESSING));
        self.condvar.notify_all();
    }

    pub fn amount_read(&self) -> i64 {
        self.with_inner(|inner| inner.transferred)
    }

    pub fn total_size(&self) -> i64 {
        self.with_inner(|inner| inner.size)
    }

    pub fn local_file(&self) -> Option<PathBuf> {
        self.with_inner(|inner| inner.local_file.clone())
    }

    pub fn update_policy(&self) -> UpdatePolicy {
        self.with_inner(|inner| inner.update_policy)
    }

    /// Replace the stored update policy. [`intern`] only sets it once, at first
    /// creation; [`crate::tracker::Tracker::add_resource`] calls this on every
    /// re-add so a resource that outlives its first caller still observes a
    /// later `Force`.
    pub fn set_update_policy(&self, update_policy: UpdatePolicy) {
        self.with_inner(|inner| inner.update_policy = update_policy);
    }

    pub fn options(&self) -> DownloadOptions {
        self.with_inner(|inner| inner.options)
    }

    /// Clear any cached-as-current state and put the resource back at the start of
    /// both phases, for a `Force` re-add of a resource that is already terminal.
    /// Leaves `PROCESSING` untouched so a re-add racing an in-flight worker does not
    /// get double-enqueued; the worker's own completion will clear it.
    pub fn reset_for_refetch(&self) {
        self.with_inner(|inner| {
            let processing = inner.state.contains(state::PROCESSING);
            inner.state = ResourceState::empty();
            inner.state.insert(state::PRECONNECT | state::PREDOWNLOAD);
            if processing {
                inner.state.insert(state::PROCESSING);
            }
        });
        self.condvar.notify_all();
    }

    pub fn attach_tracker(&self, tracker: &Weak<TrackerHandle>) {
        self.with_inner(|inner| {
            if !inner.trackers.iter().any(|t| t.ptr_eq(tracker)) {
                inner.trackers.push(tracker.clone());
            }
        });
    }

    pub fn detach_tracker(&self, tracker: &Weak<TrackerHandle>) {
        self.with_inner(|inner| inner.trackers.retain(|t| !t.ptr_eq(tracker)));
    }

    /// Snapshot the trackers currently attached, dropping any that have died.
    pub fn live_trackers(&self) -> Vec<Arc<TrackerHandle>> {
        self.with_inner(|inner| {
            inner.trackers.retain(|t| t.strong_count() > 0);
            inner.trackers.iter().filter_map(Weak::upgrade).collect()
        })
    }

    /// Block the calling thread on this resource's own condition until `predicate`
    /// holds or `deadline` elapses. Used internally; most callers should go through
    /// [`crate::tracker::Tracker::wait_for`] instead.
    pub fn wait_while(&self, deadline: Option<std::time::Instant>, mut predicate: impl FnMut(ResourceState) -> bool) -> bool {
        let mut guard = locks::acquire(&self.inner, RESOURCE_MONITOR);
        while !predicate(guard.state) {
            let timed_out = match deadline {
                None => {
                    self.condvar.wait(guard.as_mutex_guard());
                    false
                }
                Some(deadline) => {
                    let now = std::time::Instant::now();
                    if now >= deadline {
                        true
                    } else {
                        let result = self.condvar.wait_for(guard.as_mutex_guard(), deadline - now);
                        result.timed_out()
                    }
                }
            };
            if timed_out {
                return predicate(guard.state);
            }
        }
        true
    }

}

/// Process-wide table mapping a normalized identity to its single interned
/// [`Resource`]. Entries are weak so the last `Arc<Resource>` being dropped (which
/// only happens once a resource is terminal and detached from every tracker) frees
/// the slot; a dead entry is swept lazily the next time the same identity is
/// requested.
static REGISTRY: Lazy<Mutex<HashMap<Identity, Weak<Resource>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Intern the resource for `identity`, creating it with `update_policy` and `options`
/// if this is the first time it is requested. Subsequent calls for the same identity
/// return the existing shared instance and ignore the `update_policy`/`options`
/// passed here (the first caller to create a resource wins, matching the idempotence
/// required by §8 invariant 4: repeated `add_resource` calls never create a second
/// entry). `options` is otherwise fixed for the resource's lifetime, but
/// `update_policy` is not: [`crate::tracker::Tracker::add_resource`] calls
/// [`Resource::set_update_policy`] on every call, including re-adds of an
/// already-interned resource, so a later `Force` still takes effect.
pub fn intern(identity: Identity, update_policy: UpdatePolicy, options: DownloadOptions) -> Arc<Resource> {
    let mut registry = REGISTRY.lock();
    if let Some(existing) = registry.get(&identity).and_then(Weak::upgrade) {
        return existing;
    }
    let resource = Resource::new(identity.clone(), update_policy, options);
    registry.insert(identity, Arc::downgrade(&resource));
    resource
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(n: u32) -> Identity {
        Identity::new(Url::parse(&format!("https://example.test/{n}.jar")).unwrap(), None)
    }

    #[test]
    fn interning_same_identity_returns_same_instance() {
        let a = intern(identity(1), UpdatePolicy::Session, DownloadOptions::default());
        let b = intern(identity(1), UpdatePolicy::Session, DownloadOptions::default());
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn dead_entry_is_recreated() {
        let identity = identity(2);
        {
            let a = intern(identity.clone(), UpdatePolicy::Session, DownloadOptions::default());
            drop(a);
        }
        let b = intern(identity, UpdatePolicy::Session, DownloadOptions::default());
        assert!(b.state().contains(state::PRECONNECT));
    }

    #[test]
    fn transferred_is_monotonic_under_try_transition() {
        let resource = intern(identity(3), UpdatePolicy::Session, DownloadOptions::default());
        resource.with_inner(|inner| inner.transferred = 10);
        resource.with_inner(|inner| inner.transferred += 5);
        assert_eq!(resource.amount_read(), 15);
    }
}
