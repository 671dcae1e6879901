//! Timer-driven refresh of the shared device snapshot.
//!
//! One coordinator owns the only mutable slot holding the latest snapshot.
//! Readers clone the published state and never observe a half-written value;
//! at most one fetch is in flight at any time.

use crate::api::{Error, SnapshotSource};
use crate::model::Snapshot;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Default wait between two scheduled refreshes. The device refreshes its own
/// reading every 5 minutes, polling faster gains nothing.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(300);

/// State published to subscribers after every refresh attempt.
///
/// A failed refresh keeps the previous snapshot and records the error, so the
/// last good data stays available to readers.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorState {
    pub snapshot: Option<Arc<Snapshot>>,
    pub last_error: Option<String>,
    /// Completed refresh attempts, successful or not.
    pub attempts: u64,
}

pub struct Coordinator {
    source: Arc<dyn SnapshotSource>,
    interval: Duration,
    state: watch::Sender<CoordinatorState>,
    /* Held for the duration of a fetch; try_lock failing means one is in flight. */
    refresh_gate: Mutex<()>,
}

impl Coordinator {
    pub fn new(source: Arc<dyn SnapshotSource>, interval: Duration) -> Coordinator {
        let (state, _) = watch::channel(CoordinatorState::default());

        Coordinator {
            source,
            interval,
            state,
            refresh_gate: Mutex::new(()),
        }
    }

    /// Latest published state. Non-blocking.
    pub fn current(&self) -> CoordinatorState {
        self.state.borrow().clone()
    }

    /// Receiver that sees every published state, success or failure.
    pub fn subscribe(&self) -> watch::Receiver<CoordinatorState> {
        self.state.subscribe()
    }

    /// Mandatory initial refresh. Unlike later scheduled refreshes, a failure
    /// here is returned to the caller: the integration is not ready without
    /// one complete snapshot.
    pub async fn first_refresh(&self) -> Result<Arc<Snapshot>, Error> {
        let _guard = self.refresh_gate.lock().await;

        match self.source.fetch().await {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                self.publish(Ok(snapshot.clone()));
                Ok(snapshot)
            }
            Err(error) => {
                self.publish(Err(error.to_string()));
                Err(error)
            }
        }
    }

    /// Run one refresh, or join the attempt already in flight.
    ///
    /// Overlapping triggers (a timer tick during a slow fetch, an explicit
    /// reload request) coalesce into a single outbound request; the late
    /// caller returns once that attempt has published its outcome.
    pub async fn refresh(&self) {
        let seen = self.state.borrow().attempts;

        match self.refresh_gate.try_lock() {
            Ok(_guard) => match self.source.fetch().await {
                Ok(snapshot) => self.publish(Ok(Arc::new(snapshot))),
                Err(error) => {
                    log::warn!("Error fetching data from the device: {}", error);
                    self.publish(Err(error.to_string()));
                }
            },
            Err(_) => {
                let mut updates = self.state.subscribe();
                while self.state.borrow().attempts == seen {
                    if updates.changed().await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    fn publish(&self, outcome: Result<Arc<Snapshot>, String>) {
        let prior = self.state.borrow().clone();
        let next = match outcome {
            Ok(snapshot) => CoordinatorState {
                snapshot: Some(snapshot),
                last_error: None,
                attempts: prior.attempts + 1,
            },
            Err(error) => CoordinatorState {
                snapshot: prior.snapshot,
                last_error: Some(error),
                attempts: prior.attempts + 1,
            },
        };
        self.state.send_replace(next);
    }

    /// Scheduled refresh loop. The first interval tick fires immediately and
    /// is skipped, the initial refresh already ran during setup.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            self.refresh().await;
        }
    }

    /// Spawn the refresh loop. Aborting the returned handle stops polling
    /// without touching the retained snapshot: the slot is only replaced
    /// after a fetch has fully completed.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    fn sample_snapshot(total: f64) -> Snapshot {
        match json!({ "solarReadingTotal": { "total": total } }) {
            Value::Object(map) => Snapshot::new(map),
            _ => unreachable!(),
        }
    }

    /// Counts fetches and blocks each one until a permit is released.
    struct BlockingSource {
        calls: AtomicUsize,
        gate: Semaphore,
    }

    #[async_trait]
    impl SnapshotSource for BlockingSource {
        async fn fetch(&self) -> Result<Snapshot, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let permit = self.gate.acquire().await.unwrap();
            permit.forget();
            Ok(sample_snapshot(1.0))
        }
    }

    /// Succeeds on the first fetch, fails on every later one.
    struct ScriptedSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SnapshotSource for ScriptedSource {
        async fn fetch(&self) -> Result<Snapshot, Error> {
            match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 => Ok(sample_snapshot(500.0)),
                _ => Err(Error::Timeout),
            }
        }
    }

    struct FailingSource;

    #[async_trait]
    impl SnapshotSource for FailingSource {
        async fn fetch(&self) -> Result<Snapshot, Error> {
            Err(Error::Transport("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn overlapping_refreshes_coalesce_into_one_fetch() {
        let source = Arc::new(BlockingSource {
            calls: AtomicUsize::new(0),
            gate: Semaphore::new(0),
        });
        let coordinator = Arc::new(Coordinator::new(source.clone(), DEFAULT_SCAN_INTERVAL));

        let first = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.refresh().await }
        });
        while source.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let second = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.refresh().await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        /* Enough permits for two fetches, were a second one ever issued. */
        source.gate.add_permits(2);
        first.await.unwrap();
        second.await.unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.current().attempts, 1);
    }

    #[tokio::test]
    async fn first_refresh_failure_is_returned_and_leaves_no_snapshot() {
        let coordinator = Coordinator::new(Arc::new(FailingSource), DEFAULT_SCAN_INTERVAL);

        let result = coordinator.first_refresh().await;

        assert!(matches!(result, Err(Error::Transport(_))));
        let state = coordinator.current();
        assert!(state.snapshot.is_none());
        assert!(state.last_error.is_some());
    }

    #[tokio::test]
    async fn failed_refresh_retains_the_last_good_snapshot() {
        let source = Arc::new(ScriptedSource {
            calls: AtomicUsize::new(0),
        });
        let coordinator = Coordinator::new(source, DEFAULT_SCAN_INTERVAL);

        let snapshot = coordinator.first_refresh().await.unwrap();
        coordinator.refresh().await;

        let state = coordinator.current();
        assert_eq!(state.attempts, 2);
        assert!(state.last_error.is_some());
        let retained = state.snapshot.unwrap();
        assert!(Arc::ptr_eq(&retained, &snapshot));
    }

    #[tokio::test]
    async fn a_later_success_clears_the_recorded_error() {
        let source = Arc::new(ScriptedSource {
            calls: AtomicUsize::new(0),
        });
        let coordinator = Coordinator::new(source.clone(), DEFAULT_SCAN_INTERVAL);

        coordinator.first_refresh().await.unwrap();
        coordinator.refresh().await;
        assert!(coordinator.current().last_error.is_some());

        /* Wind the script back so the next fetch succeeds again. */
        source.calls.store(0, Ordering::SeqCst);
        coordinator.refresh().await;

        assert!(coordinator.current().last_error.is_none());
    }

    #[tokio::test]
    async fn subscribers_are_notified_on_failures_too() {
        let coordinator = Coordinator::new(Arc::new(FailingSource), DEFAULT_SCAN_INTERVAL);
        let mut updates = coordinator.subscribe();

        coordinator.refresh().await;

        updates.changed().await.unwrap();
        assert!(updates.borrow().last_error.is_some());
    }
}
