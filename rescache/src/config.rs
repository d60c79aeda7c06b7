//! Ambient configuration for the worker pool, read once when the first [`Tracker`]
//! is created. This mirrors the teacher's builder-style configuration objects rather
//! than environment variables, since this is a library, not a standalone program.
//!
//! [`Tracker`]: crate::tracker::Tracker

use std::sync::Arc;
use std::time::Duration;

use crate::cache::CacheStore;
use crate::privileged::{NoopPrivileged, PrivilegedExecute};
use crate::prober::{DefaultUrlCreator, ResourceUrlCreator};
use crate::runtime::{DefaultRuntime, Runtime};
use crate::unpack::{Pack200Unpacker, UnsupportedPack200Unpacker};

/// Tunables for the process-wide [`crate::scheduler::Scheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of live worker threads.
    max_workers: usize,
    /// How long an idle worker waits for new work before exiting.
    idle_timeout: Duration,
    /// Size of each chunk read from the network while streaming a download.
    chunk_size: usize,
    /// TCP connect timeout applied to every probe and transfer.
    connect_timeout: Duration,
    /// Read timeout applied to every probe and transfer.
    read_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            idle_timeout: Duration::from_secs(10),
            chunk_size: 64 * 1024,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
        }
    }
}

impl SchedulerConfig {

    #[inline]
    pub fn max_workers(&mut self, max_workers: usize) -> &mut Self {
        self.max_workers = max_workers.max(1);
        self
    }

    #[inline]
    pub fn idle_timeout(&mut self, idle_timeout: Duration) -> &mut Self {
        self.idle_timeout = idle_timeout;
        self
    }

    #[inline]
    pub fn chunk_size(&mut self, chunk_size: usize) -> &mut Self {
        self.chunk_size = chunk_size.max(1024);
        self
    }

    #[inline]
    pub fn connect_timeout(&mut self, connect_timeout: Duration) -> &mut Self {
        self.connect_timeout = connect_timeout;
        self
    }

    #[inline]
    pub fn read_timeout(&mut self, read_timeout: Duration) -> &mut Self {
        self.read_timeout = read_timeout;
        self
    }

    #[inline]
    pub fn get_max_workers(&self) -> usize {
        self.max_workers
    }

    #[inline]
    pub fn get_idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    #[inline]
    pub fn get_chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[inline]
    pub fn get_connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    #[inline]
    pub fn get_read_timeout(&self) -> Duration {
        self.read_timeout
    }

}

/// Every collaborator the process-wide [`crate::scheduler::Scheduler`] needs, bundled
/// so it can be supplied once, before the first [`Tracker`] is created, the same way
/// the teacher threads its installer collaborators through a single builder rather
/// than having each component reach for its own global.
///
/// [`Tracker`]: crate::tracker::Tracker
#[derive(Clone)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub cache: CacheStore,
    pub runtime: Arc<dyn Runtime>,
    pub url_creator: Arc<dyn ResourceUrlCreator>,
    pub unpacker: Arc<dyn Pack200Unpacker>,
    pub privileged: Arc<dyn PrivilegedExecute>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            cache: CacheStore::new(CacheStore::default_root()),
            runtime: Arc::new(DefaultRuntime),
            url_creator: Arc::new(DefaultUrlCreator),
            unpacker: Arc::new(UnsupportedPack200Unpacker),
            privileged: Arc::new(NoopPrivileged),
        }
    }
}

impl EngineConfig {
    /// Convenience constructor for tests: a fresh, isolated cache rooted at `root`.
    pub fn with_cache_root(root: impl Into<std::path::PathBuf>) -> Self {
        Self { cache: CacheStore::new(root.into()), ..Self::default() }
    }
}
