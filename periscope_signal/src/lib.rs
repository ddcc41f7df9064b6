//! One-shot phase signals for periscope.
//!
//! Periscope runs an open-ended sequence of scrape cycles and must be able to
//! stop mid-cycle: a search job may be parked in its poll backoff when the
//! operator asks the agent to exit. The mechanism here has two components, a
//! `Broadcaster` and a `Watcher`. The `Broadcaster` fires exactly once. Every
//! `Watcher` derived from it observes that firing, including watchers that
//! were cloned after the fact, so a scrape cycle may hand a fresh clone to
//! each poll loop without racing the signal.
//!
//! There is only one `Broadcaster` and potentially many `Watcher` instances.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]

use tokio::sync::watch;

/// Construct a `Watcher` and `Broadcaster` pair.
#[must_use]
pub fn signal() -> (Watcher, Broadcaster) {
    let (sender, receiver) = watch::channel(false);
    (Watcher { receiver }, Broadcaster { sender })
}

#[derive(Debug)]
/// Mechanism to notify one or more `Watcher` instances that a phase has been
/// achieved.
pub struct Broadcaster {
    sender: watch::Sender<bool>,
}

impl Broadcaster {
    /// Send the signal through any `Watcher` instances.
    ///
    /// Function will NOT block until all peers have observed the signal.
    pub fn signal(self) {
        self.sender.send_replace(true);
    }
}

#[derive(Debug, Clone)]
/// Mechanism to watch for phase changes, typically used to control shutdown.
pub struct Watcher {
    receiver: watch::Receiver<bool>,
}

impl Watcher {
    /// Wait for the signal. Returns immediately if the signal has already
    /// fired or the `Broadcaster` has been dropped.
    pub async fn recv(&mut self) {
        // A closed channel means the broadcaster is gone, which is as final as
        // an explicit signal.
        let _ = self.receiver.wait_for(|fired| *fired).await;
    }

    /// Check whether the signal has fired without blocking.
    #[must_use]
    pub fn is_signaled(&self) -> bool {
        *self.receiver.borrow() || self.receiver.has_changed().is_err()
    }
}
