//! Periodic host status delivery.
//!
//! Direct deployments send `systemStatus` to each viewer on its own timer
//! (driven from the socket task). Relay deployments run one broadcast-wide
//! ticker instead.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::state::DashboardState;

/// How `systemStatus` reaches viewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCadence {
    /// One timer per viewer, started when it connects.
    PerViewer(Duration),
    /// One timer for everyone.
    Broadcast(Duration),
}

impl StatusCadence {
    pub fn per_viewer_interval(&self) -> Option<Duration> {
        match self {
            StatusCadence::PerViewer(d) => Some(*d),
            StatusCadence::Broadcast(_) => None,
        }
    }
}

/// Broadcast `systemStatus` every `interval` until cancelled.
pub async fn run_status_ticker(
    state: DashboardState,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; viewers already got a status on join.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Status ticker stopped");
                return;
            }
            _ = ticker.tick() => {
                let receivers = state.publish_system_status();
                trace!(receivers, "Status broadcast sent");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::BroadcastHub;
    use crate::system::SystemSampler;

    #[test]
    fn test_cadence_interval() {
        let d = Duration::from_secs(1);
        assert_eq!(StatusCadence::PerViewer(d).per_viewer_interval(), Some(d));
        assert_eq!(StatusCadence::Broadcast(d).per_viewer_interval(), None);
    }

    #[tokio::test]
    async fn test_ticker_broadcasts_until_cancelled() {
        let state = DashboardState::new_relay_mode(BroadcastHub::default(), SystemSampler::new());
        let mut sub = state.register_viewer();
        sub.try_recv().unwrap();

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_status_ticker(
            state.clone(),
            Duration::from_millis(20),
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(110)).await;
        let mut received = 0;
        while sub.try_recv().is_ok() {
            received += 1;
        }
        assert!(received >= 2, "received {received}");

        shutdown.cancel();
        task.await.unwrap();
    }
}
