//! Explicit cancellation, replacing the ambient thread-interruption signal the
//! original engine relied on (see the Interruption design note).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cheaply-cloneable flag that a caller can raise to unblock a [`wait_for`] and make
/// workers abandon the resource they are currently processing with [`ERROR`].
///
/// [`wait_for`]: crate::tracker::Tracker::wait_for
/// [`ERROR`]: crate::state::ERROR
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {

    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Raise the flag. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

}
