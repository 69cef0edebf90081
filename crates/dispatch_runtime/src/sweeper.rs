//! Active offer expiry.
//!
//! Operations already fire due deadlines when they take the engine lock; the
//! sweeper makes sure an offer nobody touches still expires and gets
//! reassigned within one interval of its deadline.

use std::sync::Arc;
use std::time::Duration;

use dispatch_core::DispatchEngine;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Spawn the sweeper. It runs until `shutdown` flips to `true` or its sender
/// is dropped, and resolves to the number of offers it expired.
pub fn spawn_offer_sweeper(
    engine: Arc<DispatchEngine>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut total: u64 = 0;
        info!(interval_ms = every.as_millis() as u64, "offer sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Takes the engine lock and may write the snapshot file.
                    let sweep = engine.clone();
                    match tokio::task::spawn_blocking(move || sweep.expire_due_offers()).await {
                        Ok(0) => {}
                        Ok(expired) => {
                            debug!(
                                expired,
                                next_deadline = ?engine.next_deadline(),
                                "sweep expired offers"
                            );
                            total += expired as u64;
                        }
                        Err(error) => warn!(%error, "offer sweep did not finish"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(expired_total = total, "offer sweeper stopped");
        total
    })
}
