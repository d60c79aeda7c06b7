//! The process-wide [`Scheduler`] singleton: demand queue, prefetch registry and the
//! completion condition every `wait_for` blocks on (§4.2).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};
use reqwest::blocking::Client;

use crate::cache::CacheStore;
use crate::cancel::CancelToken;
use crate::config::{EngineConfig, SchedulerConfig};
use crate::downloader;
use crate::locks::{self, PREFETCH, SCHEDULER};
use crate::prober::ResourceUrlCreator;
use crate::privileged::PrivilegedExecute;
use crate::resource::Resource;
use crate::runtime::Runtime;
use crate::state;
use crate::tracker::TrackerHandle;
use crate::unpack::Pack200Unpacker;

struct DemandQueue {
    resources: VecDeque<(Arc<Resource>, CancelToken)>,
}

/// The collaborators a worker needs to drive a resource through both phases,
/// bundled once at scheduler construction time.
pub struct Collaborators {
    pub client: Client,
    pub cache: CacheStore,
    pub runtime: Arc<dyn Runtime>,
    pub url_creator: Arc<dyn ResourceUrlCreator>,
    pub unpacker: Arc<dyn Pack200Unpacker>,
    pub privileged: Arc<dyn PrivilegedExecute>,
}

pub struct Scheduler {
    demand: Mutex<DemandQueue>,
    completion: Condvar,
    prefetch: Mutex<Vec<Weak<TrackerHandle>>>,
    workers_alive: AtomicUsize,
    config: SchedulerConfig,
    pub collaborators: Collaborators,
}

static CONFIG: OnceCell<EngineConfig> = OnceCell::new();
static SCHEDULER: OnceCell<Scheduler> = OnceCell::new();

/// Supply the collaborators and tunables the scheduler will use, before the first
/// [`crate::tracker::Tracker`] is created. Returns `false` (and leaves the existing
/// configuration untouched) if the scheduler has already been initialized, mirroring
/// a builder that can only be consumed once.
pub fn configure(config: EngineConfig) -> bool {
    CONFIG.set(config).is_ok()
}

/// The process-wide scheduler, lazily built from whatever [`configure`] supplied, or
/// [`EngineConfig::default`] if nothing was ever supplied.
pub fn global() -> &'static Scheduler {
    SCHEDULER.get_or_init(|| {
        let config = CONFIG.get_or_init(EngineConfig::default).clone();
        Scheduler::new(config)
    })
}

impl Scheduler {

    fn new(config: EngineConfig) -> Self {
        let client = crate::http::client(
            config.scheduler.get_connect_timeout(),
            config.scheduler.get_read_timeout(),
        ).expect("failed to build the shared HTTP client");

        Self {
            demand: Mutex::new(DemandQueue { resources: VecDeque::new() }),
            completion: Condvar::new(),
            prefetch: Mutex::new(Vec::new()),
            workers_alive: AtomicUsize::new(0),
            config: config.scheduler,
            collaborators: Collaborators {
                client,
                cache: config.cache,
                runtime: config.runtime,
                url_creator: config.url_creator,
                unpacker: config.unpacker,
                privileged: config.privileged,
            },
        }
    }

    #[inline]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Append `resource` to the demand queue if it is awaiting a phase, and make sure
    /// at least one worker is alive to pick it up. A resource that is already terminal
    /// or already `PROCESSING` is left untouched: this makes `enqueue` safe to call
    /// redundantly from `add_resource` and `wait_for` alike. `cancel` travels with the
    /// resource through the worker that ends up processing it, so a token raised after
    /// the resource starts running is still observed by `run_worker` and
    /// `downloader::stream_body`.
    pub fn enqueue(&'static self, resource: Arc<Resource>, cancel: CancelToken) {
        let current = resource.state();
        if !current.intersects(state::PRECONNECT | state::PREDOWNLOAD) || current.contains(state::PROCESSING) {
            return;
        }
        resource.begin_processing();
        {
            let mut demand = locks::acquire(&self.demand, SCHEDULER);
            demand.resources.push_back((resource, cancel));
        }
        self.ensure_worker();
    }

    /// Register `tracker` as a source of speculative work. The registry holds only
    /// weak references, so a dropped tracker is simply skipped (and swept) the next
    /// time [`Self::pick_prefetch`] runs.
    pub fn register_prefetch(&self, tracker: Weak<TrackerHandle>) {
        let mut prefetch = locks::acquire(&self.prefetch, PREFETCH);
        if !prefetch.iter().any(|t| t.ptr_eq(&tracker)) {
            prefetch.push(tracker);
        }
    }

    fn ensure_worker(&'static self) {
        let alive = self.workers_alive.load(Ordering::SeqCst);
        if alive >= self.config.get_max_workers() {
            return;
        }
        if self.workers_alive.fetch_add(1, Ordering::SeqCst) >= self.config.get_max_workers() {
            self.workers_alive.fetch_sub(1, Ordering::SeqCst);
            return;
        }
        thread::spawn(move || self.run_worker());
    }

    /// Wake every thread waiting on the completion condition, e.g. after a resource
    /// reaches a terminal state.
    pub fn notify_completion(&self) {
        self.completion.notify_all();
    }

    /// Block until `predicate` holds for every resource in `resources`, or `deadline`
    /// elapses. Returns `true` iff the predicate was satisfied before the deadline.
    pub fn wait_until(&self, resources: &[Arc<Resource>], deadline: Option<Instant>, mut predicate: impl FnMut(&Resource) -> bool) -> bool {
        let mut guard = locks::acquire(&self.demand, SCHEDULER);
        while !resources.iter().all(|r| predicate(r)) {
            let timed_out = match deadline {
                None => {
                    self.completion.wait(guard.as_mutex_guard());
                    false
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        true
                    } else {
                        self.completion.wait_for(guard.as_mutex_guard(), deadline - now).timed_out()
                    }
                }
            };
            if timed_out {
                return resources.iter().all(|r| predicate(r));
            }
        }
        true
    }

    fn run_worker(&'static self) {
        loop {
            match self.select_next() {
                Some((resource, cancel)) => {
                    if cancel.is_cancelled() {
                        downloader::abandon(&resource);
                    } else {
                        downloader::process_resource(self, &resource, &cancel);
                    }
                    self.notify_completion();
                }
                None => {
                    let mut demand = locks::acquire(&self.demand, SCHEDULER);
                    if !demand.resources.is_empty() {
                        drop(demand);
                        continue;
                    }
                    let timed_out = self.completion.wait_for(demand.as_mutex_guard(), self.config.get_idle_timeout()).timed_out();
                    if timed_out && demand.resources.is_empty() {
                        drop(demand);
                        self.workers_alive.fetch_sub(1, Ordering::SeqCst);
                        return;
                    }
                }
            }
        }
    }

    /// §4.2's four-step selection algorithm: connects before downloads, demand before
    /// prefetch, `None` when there is truly nothing to do.
    fn select_next(&self) -> Option<(Arc<Resource>, CancelToken)> {
        {
            let mut demand = locks::acquire(&self.demand, SCHEDULER);

            if let Some(index) = demand.resources.iter().position(|(r, _)| {
                let s = r.state();
                s.contains(state::PRECONNECT) && !s.contains(state::ERROR)
            }) {
                let (resource, cancel) = demand.resources.remove(index).unwrap();
                resource.try_transition(state::PRECONNECT, state::ERROR, state::PRECONNECT, state::CONNECTING);
                return Some((resource, cancel));
            }

            if let Some(index) = demand.resources.iter().position(|(r, _)| {
                let s = r.state();
                s.contains(state::PREDOWNLOAD) && !s.intersects(state::ERROR | state::PRECONNECT | state::CONNECTING)
            }) {
                let (resource, cancel) = demand.resources.remove(index).unwrap();
                resource.try_transition(state::PREDOWNLOAD, 0, state::PREDOWNLOAD, state::DOWNLOADING);
                return Some((resource, cancel));
            }
        }

        self.pick_prefetch()
    }

    /// Speculative work for trackers that opted in, tried only once the demand queue
    /// is empty. Unlike demand-queue items, `PROCESSING` is not already set, so this
    /// is responsible for setting it itself before handing the resource to a worker.
    ///
    /// Both branches below read the spec's wording as shorthand for "the resource
    /// hasn't entered that phase yet", matching the analogous demand-queue rules in
    /// [`Self::select_next`] rather than the literal set difference, which would
    /// never match a resource created with both `PRECONNECT` and `PREDOWNLOAD` set
    /// from the start (see DESIGN.md).
    /// Speculative work has no caller to cancel it, so it always runs under a fresh,
    /// never-raised token.
    fn pick_prefetch(&self) -> Option<(Arc<Resource>, CancelToken)> {
        let mut prefetch = locks::acquire(&self.prefetch, PREFETCH);
        prefetch.retain(|t| t.strong_count() > 0);

        for tracker in prefetch.iter().filter_map(Weak::upgrade) {
            if let Some(resource) = tracker.find_resource(|r| {
                let s = r.state();
                s.contains(state::PRECONNECT) && !s.intersects(state::ERROR | state::CONNECTING | state::PROCESSING)
            }) {
                resource.begin_processing();
                resource.try_transition(state::PRECONNECT, state::ERROR, state::PRECONNECT, state::CONNECTING);
                return Some((resource, CancelToken::default()));
            }
        }

        for tracker in prefetch.iter().filter_map(Weak::upgrade) {
            if let Some(resource) = tracker.find_resource(|r| {
                let s = r.state();
                s.contains(state::CONNECTED | state::PREDOWNLOAD)
                    && !s.intersects(state::ERROR | state::DOWNLOADED | state::DOWNLOADING | state::PRECONNECT | state::CONNECTING | state::PROCESSING)
            }) {
                resource.begin_processing();
                resource.try_transition(state::PREDOWNLOAD, state::ERROR, state::PREDOWNLOAD, state::DOWNLOADING);
                return Some((resource, CancelToken::default()));
            }
        }

        None
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{DownloadOptions, UpdatePolicy};
    use crate::version::Identity;
    use url::Url;

    fn fresh_resource(n: u32) -> Arc<Resource> {
        let identity = Identity::new(Url::parse(&format!("https://example.test/sched-{n}.jar")).unwrap(), None);
        crate::resource::intern(identity, UpdatePolicy::Session, DownloadOptions::default())
    }

    #[test]
    fn enqueue_is_a_no_op_for_an_already_processing_resource() {
        let scheduler = global();
        let resource = fresh_resource(1);
        resource.begin_processing();
        scheduler.enqueue(resource.clone(), CancelToken::default());
        // No panic, no duplicate entry: best-effort smoke test since the demand
        // queue is not directly observable from outside the module.
        assert!(resource.state().contains(state::PROCESSING));
    }
}
