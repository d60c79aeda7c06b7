//! Download event dispatch: the crate's sole observability surface (§4.5). There is
//! no logging crate in this dependency tree — embedding applications observe progress
//! exclusively through [`DownloadListener`].

use crate::state::{self, ResourceState};

crate::trait_event_handler! {
    /// A handle for watching a tracker's resources progress through the pipeline.
    ///
    /// Every method has a no-op default so adding one here is not a breaking change
    /// for implementors, and `()`, `&mut H` and `(H0, H1)` are all valid handlers, the
    /// last one letting two observers (say, a metrics collector and a UI progress bar)
    /// be composed without either knowing about the other.
    pub trait DownloadListener {
        /// The connect phase started probing candidate URLs for `url`.
        fn update_started(url: &str);
        /// The download phase started streaming bytes for `url`.
        fn download_started(url: &str);
        /// `url` reached a terminal state; `success` is `false` on `ERROR`.
        fn download_completed(url: &str, success: bool);
    }
}

/// The event implied by a resource's state at snapshot time, or `None` if the state
/// does not currently map to any of the three dispatched events (e.g. a resource still
/// sitting in `PRECONNECT` with no active phase).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    UpdateStarted,
    DownloadStarted,
    DownloadCompleted { success: bool },
}

/// Classify `state` per §4.5: `ERROR|DOWNLOADED` wins over everything else, then
/// `DOWNLOADING`, then `CONNECTING`.
pub fn classify(state: ResourceState) -> Option<Event> {
    if state.intersects(state::ERROR | state::DOWNLOADED) {
        Some(Event::DownloadCompleted { success: !state.contains(state::ERROR) })
    } else if state.contains(state::DOWNLOADING) {
        Some(Event::DownloadStarted)
    } else if state.contains(state::CONNECTING) {
        Some(Event::UpdateStarted)
    } else {
        None
    }
}

/// Dispatch `event` for `url` to `listener`. Callers must hold no lock when invoking
/// this (§8, invariant 6) — it is only ever called from [`crate::tracker::Tracker`]
/// after snapshotting and releasing the listener list.
pub fn dispatch(listener: &mut dyn DownloadListener, url: &str, event: Event) {
    match event {
        Event::UpdateStarted => listener.update_started(url),
        Event::DownloadStarted => listener.download_started(url),
        Event::DownloadCompleted { success } => listener.download_completed(url, success),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_and_downloaded_both_classify_as_completed() {
        let mut s = ResourceState::empty();
        s.insert(state::ERROR);
        assert_eq!(classify(s), Some(Event::DownloadCompleted { success: false }));

        let mut s = ResourceState::empty();
        s.insert(state::DOWNLOADED);
        assert_eq!(classify(s), Some(Event::DownloadCompleted { success: true }));
    }

    #[test]
    fn downloading_beats_connecting() {
        let mut s = ResourceState::empty();
        s.insert(state::DOWNLOADING | state::CONNECTING);
        assert_eq!(classify(s), Some(Event::DownloadStarted));
    }

    #[test]
    fn preconnect_alone_has_no_event() {
        let mut s = ResourceState::empty();
        s.insert(state::PRECONNECT);
        assert_eq!(classify(s), None);
    }

    #[derive(Default)]
    struct Counter {
        completed: u32,
    }

    impl DownloadListener for Counter {
        fn download_completed(&mut self, _url: &str, _success: bool) {
            self.completed += 1;
        }
    }

    #[test]
    fn tuple_handler_forwards_to_both() {
        let mut pair = (Counter::default(), Counter::default());
        dispatch(&mut pair, "u", Event::DownloadCompleted { success: true });
        assert_eq!(pair.0.completed, 1);
        assert_eq!(pair.1.completed, 1);
    }
}
