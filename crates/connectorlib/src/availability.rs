//! Availability signal.
//!
//! A reader that has nothing to return tells its host so from a poll; the
//! host then waits for the reader's current [`AvailabilityFuture`] before
//! polling again.
//!
//! ```text
//!   bridge                      host                  connector thread
//!   ──────                      ────                  ────────────────
//!   poll: nothing ready
//!   renew() ─┐ completes prior,
//!            └ installs fresh
//!                               current().await ...
//!                                                     data arrives
//!                                                     notifier.notify()
//!                               ... wakes up, polls
//! ```
//!
//! The slot holds exactly one signal at a time.  Completing a signal is a
//! single assignment: completing an already-completed signal is a no-op, and
//! it may happen from any thread.

use arc_swap::ArcSwap;
use futures::future::BoxFuture;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::future::IntoFuture;
use std::sync::Arc;
use tokio::sync::watch;

type SignalSender = watch::Sender<bool>;

/// Owner of the availability signal of one reader instance.
pub struct AvailabilitySlot {
    current: Arc<ArcSwap<SignalSender>>,
}

impl Default for AvailabilitySlot {
    fn default() -> Self {
        Self::new()
    }
}

impl AvailabilitySlot {
    /// Creates a slot holding a completed signal: until the reader first
    /// reports that nothing is ready, the host may poll freely.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(true);
        Self {
            current: Arc::new(ArcSwap::from_pointee(sender)),
        }
    }

    /// Returns a future for the current signal.  Never blocks.
    pub fn current(&self) -> AvailabilityFuture {
        AvailabilityFuture {
            receiver: self.current.load().subscribe(),
        }
    }

    /// Returns true if the current signal has completed.
    pub fn is_complete(&self) -> bool {
        *self.current.load().borrow()
    }

    /// Completes the current signal and installs a fresh, incomplete one.
    pub fn renew(&self) {
        let (sender, _) = watch::channel(false);
        let prior = self.current.swap(Arc::new(sender));
        prior.send_replace(true);
    }

    /// Completes the current signal.
    pub fn complete(&self) {
        self.current.load().send_replace(true);
    }

    /// Returns a handle that completes whichever signal is current at the
    /// time it is invoked.
    pub fn notifier(&self) -> AvailabilityNotifier {
        AvailabilityNotifier {
            current: self.current.clone(),
        }
    }
}

impl Debug for AvailabilitySlot {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("AvailabilitySlot")
            .field("complete", &self.is_complete())
            .finish()
    }
}

/// Thread-safe handle for completing a reader's current availability signal.
///
/// Connector readers that do I/O off the poll thread call
/// [`AvailabilityNotifier::notify`] whenever new data becomes ready.
#[derive(Clone)]
pub struct AvailabilityNotifier {
    current: Arc<ArcSwap<SignalSender>>,
}

impl AvailabilityNotifier {
    /// Completes the current signal.  Idempotent.
    pub fn notify(&self) {
        self.current.load().send_replace(true);
    }
}

impl Debug for AvailabilityNotifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("AvailabilityNotifier").finish_non_exhaustive()
    }
}

/// A single availability signal, as handed to the host.
///
/// Await it (it implements [`IntoFuture`]) or check it with
/// [`AvailabilityFuture::is_complete`].  If the owning slot goes away, the
/// future resolves so that a waiting host can observe the closed reader.
pub struct AvailabilityFuture {
    receiver: watch::Receiver<bool>,
}

impl AvailabilityFuture {
    pub fn is_complete(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Waits for the signal to complete.
    pub async fn wait(mut self) {
        loop {
            if *self.receiver.borrow_and_update() {
                return;
            }
            if self.receiver.changed().await.is_err() {
                return;
            }
        }
    }
}

impl IntoFuture for AvailabilityFuture {
    type Output = ();
    type IntoFuture = BoxFuture<'static, ()>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

impl Debug for AvailabilityFuture {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("AvailabilityFuture")
            .field("complete", &self.is_complete())
            .finish()
    }
}
