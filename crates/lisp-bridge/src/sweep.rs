//! Liveness Sweeper
//!
//! Releases host values the script side can no longer reach. A host value is
//! reachable while any [`Handle`](crate::Handle) for it is alive or while a
//! pending call frame pins it. Everything else found in the handle table goes
//! to the host in a single release batch.
//!
//! Sweeps run on demand (host-triggered [`reconcile_liveness`]) or on a fixed
//! cadence via [`spawn_periodic_sweep`]. They never overlap: a sweep requested
//! while one is running is skipped.
//!
//! [`reconcile_liveness`]: crate::BridgeEntry::reconcile_liveness

use std::rc::Rc;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::bridge::Bridge;

struct SweepGuard<'a> {
    bridge: &'a Bridge,
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.bridge.sweeping().set(false);
    }
}

impl Bridge {
    /// Release every unreachable host value. Returns the batch size.
    pub fn sweep(&self) -> usize {
        if self.sweeping().replace(true) {
            tracing::warn!("sweep requested while one is in progress; skipping");
            return 0;
        }
        let _guard = SweepGuard { bridge: self };

        let pinned = self.frames().pinned();
        let batch = self.handles().borrow_mut().collect_unreachable(&pinned);
        let pruned = self.interned().borrow_mut().prune() + self.numbers().borrow_mut().prune();

        if !batch.is_empty() {
            self.host().release(&batch);
            self.record_released(batch.len());
        }

        tracing::debug!(
            released = batch.len(),
            pinned = pinned.len(),
            pruned,
            "sweep complete"
        );
        batch.len()
    }
}

/// Spawn the periodic sweeper on the current [`tokio::task::LocalSet`].
///
/// Returns `None` when the configured interval is zero. The task holds the
/// bridge weakly and ends on the first tick after the bridge is dropped.
pub fn spawn_periodic_sweep(bridge: &Rc<Bridge>) -> Option<JoinHandle<()>> {
    let period = bridge.config().sweep.interval()?;
    let bridge = Rc::downgrade(bridge);

    tracing::debug!(?period, "starting periodic sweeper");
    Some(tokio::task::spawn_local(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(bridge) = bridge.upgrade() else {
                tracing::debug!("bridge dropped; periodic sweeper exiting");
                break;
            };
            bridge.sweep();
        }
    }))
}
