//! crates/attendance_core/src/connectivity.rs
//!
//! Tracks whether the server of record is reachable and announces transitions.
//!
//! The monitor keeps nothing but the last known reachability, held in a `watch`
//! channel: `is_online` is the query, `subscribe` is the transition feed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::ports::ConnectivityProbe;

/// What a reachability report changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    WentOffline,
    Restored,
}

pub struct ConnectivityMonitor {
    state: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    /// Creates a monitor starting from an assumed reachability.
    pub fn new(initially_online: bool) -> Self {
        let (state, _) = watch::channel(initially_online);
        Self { state }
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Records a reachability observation. Subscribers are woken only on a change.
    pub fn report(&self, reachable: bool) -> Transition {
        let changed = self.state.send_if_modified(|online| {
            if *online == reachable {
                false
            } else {
                *online = reachable;
                true
            }
        });
        match (changed, reachable) {
            (false, _) => Transition::Unchanged,
            (true, true) => Transition::Restored,
            (true, false) => Transition::WentOffline,
        }
    }

    /// A receiver that observes every reachability change.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

/// Polls `probe` every `interval` and feeds the results into `monitor` until cancelled.
pub async fn run_probe_loop(
    monitor: Arc<ConnectivityMonitor>,
    probe: Arc<dyn ConnectivityProbe>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let reachable = probe.is_reachable().await;
                match monitor.report(reachable) {
                    Transition::Restored => info!("Server reachable again"),
                    Transition::WentOffline => info!("Server unreachable, working offline"),
                    Transition::Unchanged => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn report_classifies_transitions() {
        let monitor = ConnectivityMonitor::new(false);
        assert_eq!(monitor.report(false), Transition::Unchanged);
        assert_eq!(monitor.report(true), Transition::Restored);
        assert!(monitor.is_online());
        assert_eq!(monitor.report(true), Transition::Unchanged);
        assert_eq!(monitor.report(false), Transition::WentOffline);
        assert!(!monitor.is_online());
    }

    #[tokio::test]
    async fn subscribers_see_restore_edges() {
        let monitor = ConnectivityMonitor::new(false);
        let mut rx = monitor.subscribe();

        monitor.report(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());

        // A repeated observation is not an edge.
        monitor.report(true);
        assert!(!rx.has_changed().unwrap());
    }

    struct FlagProbe(AtomicBool);

    #[async_trait]
    impl ConnectivityProbe for FlagProbe {
        async fn is_reachable(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn probe_loop_feeds_the_monitor() {
        let monitor = Arc::new(ConnectivityMonitor::new(false));
        let probe = Arc::new(FlagProbe(AtomicBool::new(true)));
        let cancel = CancellationToken::new();
        let mut rx = monitor.subscribe();

        let handle = tokio::spawn(run_probe_loop(
            monitor.clone(),
            probe,
            Duration::from_millis(5),
            cancel.clone(),
        ));

        rx.changed().await.unwrap();
        assert!(monitor.is_online());

        cancel.cancel();
        handle.await.unwrap();
    }
}
