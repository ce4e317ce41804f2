//! Periodic background tasks that act on the [`Supervisor`]'s viewer table:
//! pausing sessions nobody's watching and eventually tearing them down.
//!
//! Each sweep is a `tokio::spawn`ed loop over a `tokio::time::interval` with
//! `MissedTickBehavior::Skip`, so a slow tick never causes a burst of
//! back-to-back catch-up iterations.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::registry::Supervisor;

/// Fixed cleanup-sweep tick interval. Unlike the pause sweep's cadence, this
/// one has no corresponding environment variable.
const CLEANUP_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Spawn the pause sweep: every `check_interval`, pause any running session
/// whose `(videoId, label)` has no viewer entry or has gone quiet for at
/// least `pause_threshold`.
pub fn spawn_pause_sweep(
    supervisor: Arc<Supervisor>,
    check_interval: Duration,
    pause_threshold: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let paused = supervisor.pause_inactive_sessions(pause_threshold).await;
            if paused > 0 {
                info!(count = paused, "pause sweep paused inactive sessions");
            } else {
                debug!("pause sweep found nothing to pause");
            }
        }
    })
}

/// Spawn the cleanup sweep: every 60 s, stop and discard any session whose
/// viewer has been inactive for at least `inactivity_threshold`.
pub fn spawn_cleanup_sweep(supervisor: Arc<Supervisor>, inactivity_threshold: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let cleaned = supervisor.cleanup_inactive_sessions(inactivity_threshold).await;
            if cleaned > 0 {
                info!(count = cleaned, "cleanup sweep removed inactive sessions");
            } else {
                debug!("cleanup sweep found nothing to remove");
            }
        }
    })
}
