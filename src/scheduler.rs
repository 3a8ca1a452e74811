use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use crate::archiver::PriceHistory;
use crate::config::{ConfigStore, SharedConfig};
use crate::extractor::PriceSource;
use crate::models::Observation;

pub const POLL_PERIOD: StdDuration = StdDuration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
}

/// Owned and written by the scheduler thread only; everyone else reads a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerState {
    pub phase: Phase,
    pub last_sweep: Option<DateTime<Utc>>,
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            last_sweep: None,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub updated: usize,
    pub failed: usize,
}

/// A sweep is due once strictly more than `interval` has passed since the
/// last completed one. Nothing has run yet means due.
pub fn is_due(last_sweep: Option<DateTime<Utc>>, now: DateTime<Utc>, interval: Duration) -> bool {
    match last_sweep {
        None => true,
        Some(last) => now - last > interval,
    }
}

/// Refresh every tracked product once. A failure on one product is logged
/// and never stops the others.
pub fn run_sweep(history: &PriceHistory, source: &dyn PriceSource) -> SweepReport {
    let mut report = SweepReport::default();

    if let Err(e) = history.reload() {
        tracing::warn!("could not reload price history, sweeping known products: {}", e);
    }

    for name in history.names() {
        let Some(product) = history.get(&name) else {
            continue;
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            source.extract_price(&product.url, &product.selector)
        }));

        match outcome {
            Ok(Some(price)) => match history.append_observation(&name, Observation::now(price)) {
                Ok(()) => {
                    tracing::info!("{}: R$ {:.2}", name, price);
                    report.updated += 1;
                }
                Err(e) => {
                    tracing::error!("Error saving price for {}: {}", name, e);
                    report.failed += 1;
                }
            },
            Ok(None) => {
                tracing::warn!("Could not update {}: no price found", name);
                report.failed += 1;
            }
            Err(_) => {
                tracing::error!("Error updating {}: extraction panicked", name);
                report.failed += 1;
            }
        }
    }

    report
}

/// Background refresh loop. Spawn once at start-up; stop through the handle.
pub struct Scheduler {
    history: Arc<PriceHistory>,
    source: Arc<dyn PriceSource>,
    config: SharedConfig,
    config_store: Option<ConfigStore>,
    poll: StdDuration,
}

impl Scheduler {
    pub fn new(history: Arc<PriceHistory>, source: Arc<dyn PriceSource>, config: SharedConfig) -> Self {
        Self {
            history,
            source,
            config,
            config_store: None,
            poll: POLL_PERIOD,
        }
    }

    /// Re-read this file before every due-check, so a frequency written by
    /// another process applies from the next check on.
    pub fn with_config_store(mut self, store: ConfigStore) -> Self {
        self.config_store = Some(store);
        self
    }

    pub fn with_poll_period(mut self, poll: StdDuration) -> Self {
        self.poll = poll;
        self
    }

    pub fn spawn(self) -> std::io::Result<SchedulerHandle> {
        let state = Arc::new(RwLock::new(SchedulerState::default()));
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let thread_state = Arc::clone(&state);

        let join = std::thread::Builder::new()
            .name("price-refresh".into())
            .spawn(move || {
                tracing::debug!("refresh scheduler started, polling every {:?}", self.poll);
                loop {
                    self.tick(&thread_state);
                    match shutdown_rx.recv_timeout(self.poll) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!("refresh scheduler stopped");
            })?;

        Ok(SchedulerHandle {
            state,
            shutdown: Some(shutdown_tx),
            join: Some(join),
        })
    }

    fn tick(&self, state: &RwLock<SchedulerState>) {
        // Re-read every check so a frequency change applies from here on.
        let config = match &self.config_store {
            Some(store) => self.config.refresh_from(store),
            None => self.config.get(),
        };
        let interval = config.interval();
        let last_sweep = state.read().last_sweep;
        if !is_due(last_sweep, Utc::now(), interval) {
            return;
        }

        state.write().phase = Phase::Running;
        tracing::info!("Starting automatic update of all products.");
        let report = run_sweep(&self.history, self.source.as_ref());
        tracing::info!(
            "Automatic update finished: {} updated, {} failed",
            report.updated,
            report.failed
        );

        let mut state = state.write();
        state.phase = Phase::Idle;
        state.last_sweep = Some(Utc::now());
    }
}

pub struct SchedulerHandle {
    state: Arc<RwLock<SchedulerState>>,
    shutdown: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn state(&self) -> SchedulerState {
        *self.state.read()
    }

    /// Signals the loop and waits for it. An in-flight sweep finishes first.
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                tracing::error!("refresh scheduler thread panicked");
            }
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archiver::tests::{MemoryStore, mouse};
    use crate::archiver::{JsonFileStore, ProductStore};
    use crate::config::RefreshConfig;
    use crate::models::{Product, SelectorDescriptor};
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ByUrl {
        calls: AtomicUsize,
    }

    impl PriceSource for ByUrl {
        fn extract_price(&self, url: &str, _selector: &SelectorDescriptor) -> Option<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match url {
                "http://a" => None,
                "http://boom" => panic!("driver crashed"),
                "http://b" => Some(42.0),
                _ => Some(1.0),
            }
        }
    }

    fn product(name: &str, url: &str) -> Product {
        Product::new(name, url, SelectorDescriptor::new("span", "price"), Observation::now(10.0))
    }

    fn history_with(products: Vec<Product>) -> Arc<PriceHistory> {
        let history = PriceHistory::open(Box::new(MemoryStore::default())).unwrap();
        for p in products {
            history.add_product(p).unwrap();
        }
        Arc::new(history)
    }

    #[test]
    fn due_check_is_strict() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let interval = Duration::hours(6);
        assert!(is_due(None, t0, interval));
        assert!(!is_due(Some(t0), t0 + Duration::hours(6), interval));
        assert!(is_due(Some(t0), t0 + Duration::hours(6) + Duration::seconds(1), interval));
        assert!(is_due(Some(t0), t0 + Duration::hours(2), Duration::hours(1)));
    }

    fn swept_two_hours_ago() -> RwLock<SchedulerState> {
        RwLock::new(SchedulerState {
            phase: Phase::Idle,
            last_sweep: Some(Utc::now() - Duration::hours(2)),
        })
    }

    #[test]
    fn frequency_change_applies_from_next_check() {
        let history = history_with(vec![mouse(99.90)]);
        let source = Arc::new(ByUrl { calls: AtomicUsize::new(0) });
        let config = SharedConfig::default();
        let scheduler = Scheduler::new(Arc::clone(&history), source.clone(), config.clone());
        let state = swept_two_hours_ago();

        scheduler.tick(&state);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);

        config.set_frequency_hours(1).unwrap();
        let before = state.read().last_sweep;
        scheduler.tick(&state);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(state.read().last_sweep > before);
        assert_eq!(state.read().phase, Phase::Idle);

        // The interval now counts from the sweep that just finished.
        scheduler.tick(&state);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn frequency_written_by_another_process_is_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = ConfigStore::new(&path);
        store.save(&RefreshConfig::default()).unwrap();

        let history = history_with(vec![mouse(99.90)]);
        let source = Arc::new(ByUrl { calls: AtomicUsize::new(0) });
        let config = SharedConfig::new(store.load().unwrap());
        let scheduler = Scheduler::new(Arc::clone(&history), source.clone(), config.clone())
            .with_config_store(store);
        let state = swept_two_hours_ago();

        scheduler.tick(&state);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);

        ConfigStore::new(&path).save(&RefreshConfig::new(1).unwrap()).unwrap();
        scheduler.tick(&state);
        assert_eq!(config.get().frequency_hours, 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(history.get("Mouse X").unwrap().prices(), vec![99.90, 1.0]);
    }

    #[test]
    fn sweep_covers_products_added_by_another_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prices.json");
        let watcher = PriceHistory::open(Box::new(JsonFileStore::new(&path))).unwrap();
        let cli = PriceHistory::open(Box::new(JsonFileStore::new(&path))).unwrap();
        cli.add_product(mouse(99.90)).unwrap();

        let source = ByUrl { calls: AtomicUsize::new(0) };
        let report = run_sweep(&watcher, &source);

        assert_eq!(report.updated, 1);
        assert_eq!(
            JsonFileStore::new(&path).load().unwrap()["Mouse X"].prices(),
            vec![99.90, 1.0]
        );
    }

    #[test]
    fn failed_product_does_not_stop_sweep() {
        // Names sort as A, B, C: the failing ones come first.
        let history = history_with(vec![
            product("A", "http://a"),
            product("B", "http://boom"),
            product("C", "http://b"),
        ]);
        let source = ByUrl { calls: AtomicUsize::new(0) };

        let report = run_sweep(&history, &source);

        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        assert_eq!(report, SweepReport { updated: 1, failed: 2 });
        assert_eq!(history.get("A").unwrap().price_history.len(), 1);
        assert_eq!(history.get("B").unwrap().price_history.len(), 1);
        assert_eq!(history.get("C").unwrap().prices(), vec![10.0, 42.0]);
    }

    #[test]
    fn spawned_scheduler_sweeps_and_stops() {
        let history = history_with(vec![mouse(99.90)]);
        let source = Arc::new(ByUrl { calls: AtomicUsize::new(0) });
        let config = SharedConfig::default();

        let handle = Scheduler::new(Arc::clone(&history), source.clone(), config.clone())
            .with_poll_period(StdDuration::from_millis(10))
            .spawn()
            .unwrap();

        let deadline = std::time::Instant::now() + StdDuration::from_secs(5);
        while handle.state().last_sweep.is_none() && std::time::Instant::now() < deadline {
            std::thread::sleep(StdDuration::from_millis(5));
        }
        let state = handle.state();
        handle.stop();

        assert!(state.last_sweep.is_some());
        assert_eq!(state.phase, Phase::Idle);
        // Six hours have not passed, so exactly one sweep ran.
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(history.get("Mouse X").unwrap().prices(), vec![99.90, 1.0]);
    }
}
