// crates/canon-engine/src/cancel.rs
// ============================================================================
// Module: Cooperative Cancellation Signal
// Description: A single-signal, multi-waiter cancellation primitive.
// Purpose: Let every worker honor a cancellation request at its next storage
// await without pulling in tokio-util's CancellationToken.
// Dependencies: std::sync, tokio::sync::Notify
// ============================================================================

//! ## Overview
//! One [`CancelHandle`] is paired with any number of cloned [`CancelSignal`]s.
//! Calling [`CancelHandle::cancel`] is permanent: once tripped, every clone
//! observes it immediately and forever.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tokio::sync::Notify;

/// A cloneable handle workers poll or await to learn whether they should
/// stop at the next safe point.
#[derive(Clone)]
pub struct CancelSignal {
    tripped: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

/// The single owner-side handle that trips a [`CancelSignal`] family.
pub struct CancelHandle {
    signal: CancelSignal,
}

/// Creates a linked cancel handle and signal pair.
#[must_use]
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let signal = CancelSignal { tripped: Arc::new(AtomicBool::new(false)), notify: Arc::new(Notify::new()) };
    (CancelHandle { signal: signal.clone() }, signal)
}

impl CancelHandle {
    /// Trips the signal; idempotent.
    pub fn cancel(&self) {
        self.signal.tripped.store(true, Ordering::Release);
        self.signal.notify.notify_waiters();
    }
}

impl CancelSignal {
    /// Non-blocking check, intended to be polled at least once per record.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }

    /// Resolves once the signal is tripped; safe to race against a sleep.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            self.notify.notified().await;
        }
    }
}
