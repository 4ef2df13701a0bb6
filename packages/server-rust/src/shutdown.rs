//! Graceful shutdown: bridge health state and in-flight dispatch tracking.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::watch;

/// Bridge lifecycle: Starting -> Ready -> Draining -> Stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Connecting to the backend and subscribing.
    Starting,
    /// Receiving and dispatching requests.
    Ready,
    /// No longer receiving; in-flight dispatch cycles are finishing.
    Draining,
    /// Every dispatch cycle finished.
    Stopped,
}

impl HealthState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coordinates shutdown between the signal handler, the dispatcher loop and
/// the spawned dispatch cycles.
///
/// The dispatcher loop stops receiving once `shutdown_receiver()` flips.
/// Each spawned cycle holds an [`InFlightGuard`]; the live-cycle count is
/// itself a watch channel, so `wait_for_drain()` wakes on the last guard
/// dropping instead of polling.
#[derive(Debug)]
pub struct ShutdownController {
    stop: watch::Sender<bool>,
    cycles: Arc<watch::Sender<u64>>,
    state: ArcSwap<HealthState>,
}

impl ShutdownController {
    #[must_use]
    pub fn new() -> Self {
        Self {
            stop: watch::Sender::new(false),
            cycles: Arc::new(watch::Sender::new(0)),
            state: ArcSwap::from_pointee(HealthState::Starting),
        }
    }

    pub fn set_ready(&self) {
        self.state.store(Arc::new(HealthState::Ready));
    }

    /// Receiver flipped to `true` once shutdown is triggered.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.stop.subscribe()
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.stop.borrow()
    }

    /// Moves to `Draining` and notifies every receiver, including ones
    /// subscribed later.
    pub fn trigger_shutdown(&self) {
        self.state.store(Arc::new(HealthState::Draining));
        self.stop.send_replace(true);
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.state.load()
    }

    /// Counts one dispatch cycle until the guard drops, panics included.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.cycles.send_modify(|n| *n += 1);
        InFlightGuard {
            cycles: Arc::clone(&self.cycles),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        *self.cycles.borrow()
    }

    /// Waits up to `timeout` for the live-cycle count to reach zero.
    ///
    /// Returns `true` and moves to `Stopped` on success; returns `false`
    /// and stays `Draining` when cycles are still running at the deadline.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let mut cycles = self.cycles.subscribe();
        let idle = tokio::time::timeout(timeout, cycles.wait_for(|n| *n == 0))
            .await
            .is_ok_and(|seen| seen.is_ok());
        if idle {
            self.state.store(Arc::new(HealthState::Stopped));
        }
        idle
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases one dispatch cycle on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    cycles: Arc<watch::Sender<u64>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.cycles.send_modify(|n| *n = n.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        let controller = ShutdownController::new();
        assert_eq!(controller.health_state(), HealthState::Starting);
        assert!(!controller.is_shutting_down());

        controller.set_ready();
        assert_eq!(controller.health_state(), HealthState::Ready);

        controller.trigger_shutdown();
        assert_eq!(controller.health_state(), HealthState::Draining);
        assert!(controller.is_shutting_down());
        assert_eq!(controller.health_state().to_string(), "draining");
    }

    #[test]
    fn guards_count_cycles() {
        let controller = ShutdownController::new();
        let a = controller.in_flight_guard();
        let b = controller.in_flight_guard();
        assert_eq!(controller.in_flight_count(), 2);
        drop(a);
        assert_eq!(controller.in_flight_count(), 1);
        drop(b);
        assert_eq!(controller.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn receivers_see_trigger() {
        let controller = ShutdownController::new();
        let mut rx = controller.shutdown_receiver();
        assert!(!*rx.borrow());

        controller.trigger_shutdown();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn late_receivers_see_trigger() {
        let controller = ShutdownController::new();
        controller.trigger_shutdown();
        assert!(*controller.shutdown_receiver().borrow());
    }

    #[tokio::test]
    async fn drain_waits_for_guards() {
        let controller = ShutdownController::new();
        controller.set_ready();
        let guard = controller.in_flight_guard();
        controller.trigger_shutdown();

        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            drop(guard);
        });

        assert!(controller.wait_for_drain(Duration::from_secs(2)).await);
        assert_eq!(controller.health_state(), HealthState::Stopped);
        release.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn drain_wakes_when_the_last_guard_drops() {
        let controller = Arc::new(ShutdownController::new());
        let first = controller.in_flight_guard();
        let second = controller.in_flight_guard();
        controller.trigger_shutdown();

        let waiter = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.wait_for_drain(Duration::from_secs(60)).await })
        };
        tokio::task::yield_now().await;
        drop(first);
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        let before = tokio::time::Instant::now();
        drop(second);
        assert!(waiter.await.unwrap());
        assert_eq!(before.elapsed(), Duration::ZERO);
        assert_eq!(controller.health_state(), HealthState::Stopped);
    }

    #[tokio::test]
    async fn drain_times_out() {
        let controller = ShutdownController::new();
        let _guard = controller.in_flight_guard();
        controller.trigger_shutdown();

        assert!(!controller.wait_for_drain(Duration::from_millis(30)).await);
        assert_eq!(controller.health_state(), HealthState::Draining);
    }
}
