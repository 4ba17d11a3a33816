//! Releases slot bitmaps while their screen is hidden.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::image_slot::ImageSlot;

/// Default delay between a screen hiding and its bitmaps being released.
pub const DEFAULT_GRACE_DELAY: Duration = Duration::from_millis(500);

type TrackedSlots = Arc<Mutex<Vec<ImageSlot>>>;

/// Watches a visibility signal and reclaims the tracked slots' bitmaps once
/// the signal has stayed false for the grace delay.
///
/// Becoming visible again within the delay cancels the release. Becoming
/// visible after it restores every reclaimed slot, normally straight from the
/// memory tier.
pub struct VisibilityReclaimer {
    slots: TrackedSlots,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for VisibilityReclaimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisibilityReclaimer")
            .field("tracked", &self.tracked())
            .finish_non_exhaustive()
    }
}

impl VisibilityReclaimer {
    /// Starts watching `visibility`. Must be called within a Tokio runtime.
    #[must_use]
    pub fn spawn(visibility: watch::Receiver<bool>, grace: Duration) -> Self {
        let slots = TrackedSlots::default();
        let task = tokio::spawn(run(visibility, slots.clone(), grace));
        Self { slots, task }
    }

    /// Adds `slot` to the set released and restored with the signal.
    pub fn track(&self, slot: ImageSlot) {
        let mut slots = self.slots.lock();
        if !slots.iter().any(|tracked| tracked.same_slot(&slot)) {
            slots.push(slot);
        }
    }

    /// Stops managing `slot`.
    pub fn untrack(&self, slot: &ImageSlot) {
        self.slots.lock().retain(|tracked| !tracked.same_slot(slot));
    }

    /// Number of tracked slots.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.slots.lock().len()
    }
}

impl Drop for VisibilityReclaimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(mut visibility: watch::Receiver<bool>, slots: TrackedSlots, grace: Duration) {
    let mut deadline = (!*visibility.borrow_and_update()).then(|| Instant::now() + grace);

    loop {
        let grace_elapsed = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            changed = visibility.changed() => {
                if changed.is_err() {
                    break;
                }
                if *visibility.borrow_and_update() {
                    if deadline.take().is_some() {
                        trace!("Visible again within grace period");
                    }
                    restore_all(&slots);
                } else if deadline.is_none() {
                    deadline = Some(Instant::now() + grace);
                }
            }
            () = grace_elapsed => {
                deadline = None;
                if !*visibility.borrow() {
                    reclaim_all(&slots);
                }
            }
        }
    }
}

fn reclaim_all(slots: &TrackedSlots) {
    let released = slots
        .lock()
        .iter()
        .filter(|slot| slot.reclaim())
        .count();
    debug!(released, "Released bitmaps of hidden slots");
}

fn restore_all(slots: &TrackedSlots) {
    let restored = slots
        .lock()
        .iter()
        .filter(|slot| slot.restore())
        .count();
    if restored > 0 {
        debug!(restored, "Restored bitmaps of visible slots");
    }
}
