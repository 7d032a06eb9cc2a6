//! Fixed-rate world tick scheduler with a health watchdog.
//!
//! One dedicated worker thread runs the three tick phases in order (client
//! work, component work, object/area work), each fault-isolated: a phase
//! error is logged and never aborts the iteration or the loop. The worker
//! records when each iteration starts; an independent watchdog thread
//! checks that timestamp periodically and, when the worker has gone stale,
//! spawns a replacement.
//!
//! A generation counter makes the handoff safe: the live worker slot holds
//! the current generation (0 = none), a replacement swaps its own
//! generation in, and the abandoned worker notices the mismatch at its
//! next iteration boundary and exits without touching the slot. At most
//! one current-generation worker exists at any instant. Abandoned workers
//! are never forcibly stopped, so nothing they hold may poison a lock;
//! every shared lock in the core is a `parking_lot` primitive for exactly
//! that reason.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};
use vale_config::ServerConfig;

use crate::error::SimError;
use crate::manager::SessionManager;

/// The three ordered phases of one world tick.
pub trait TickHandler: Send + Sync + 'static {
    /// Per-session updates (movement effects, regeneration, warp checks).
    fn client_work(&self, elapsed: Duration) -> Result<(), SimError>;

    /// Server components (autosave sweep, timers).
    fn component_work(&self, elapsed: Duration) -> Result<(), SimError>;

    /// Per-map object and area maintenance.
    fn area_work(&self, elapsed: Duration) -> Result<(), SimError>;
}

impl TickHandler for SessionManager {
    fn client_work(&self, elapsed: Duration) -> Result<(), SimError> {
        self.update_all(elapsed);
        Ok(())
    }

    fn component_work(&self, _elapsed: Duration) -> Result<(), SimError> {
        self.auto_save_all();
        Ok(())
    }

    fn area_work(&self, _elapsed: Duration) -> Result<(), SimError> {
        self.refresh_area_mirror();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

struct Inner {
    interval: Duration,
    stale_after: Duration,
    watchdog_interval: Duration,
    /// Generation of the current worker; 0 when none is live.
    active_gen: AtomicU64,
    /// Next generation to hand out. Starts at 1.
    next_gen: AtomicU64,
    /// Start of the most recent iteration, in millis since `epoch`.
    last_start_ms: AtomicU64,
    epoch: Instant,
    shutdown: AtomicBool,
    /// Emit per-phase durations at TRACE level.
    trace_phases: bool,
}

impl Inner {
    fn mark_iteration_start(&self) {
        let ms = self.epoch.elapsed().as_millis() as u64;
        self.last_start_ms.store(ms, Ordering::Release);
    }

    fn staleness(&self) -> Duration {
        let now_ms = self.epoch.elapsed().as_millis() as u64;
        let last = self.last_start_ms.load(Ordering::Acquire);
        Duration::from_millis(now_ms.saturating_sub(last))
    }
}

/// Runs a [`TickHandler`] at a fixed rate and keeps it running.
pub struct TickScheduler {
    inner: Arc<Inner>,
    handler: Arc<dyn TickHandler>,
}

impl TickScheduler {
    pub fn new(config: &ServerConfig, handler: Arc<dyn TickHandler>) -> Self {
        Self::build(
            config.tick_interval(),
            Duration::from_millis(config.tick.stale_after_ms),
            Duration::from_secs(config.tick.watchdog_interval_secs),
            config.debug.trace_tick_phases,
            handler,
        )
    }

    /// Constructor with explicit timing, for tests that cannot wait out
    /// the production intervals.
    pub fn with_timing(
        interval: Duration,
        stale_after: Duration,
        watchdog_interval: Duration,
        handler: Arc<dyn TickHandler>,
    ) -> Self {
        Self::build(interval, stale_after, watchdog_interval, false, handler)
    }

    fn build(
        interval: Duration,
        stale_after: Duration,
        watchdog_interval: Duration,
        trace_phases: bool,
        handler: Arc<dyn TickHandler>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                interval,
                stale_after,
                watchdog_interval,
                active_gen: AtomicU64::new(0),
                next_gen: AtomicU64::new(1),
                last_start_ms: AtomicU64::new(0),
                epoch: Instant::now(),
                shutdown: AtomicBool::new(false),
                trace_phases,
            }),
            handler,
        }
    }

    /// Launches the worker and the watchdog. Terminal state is process
    /// shutdown; there is no graceful drain.
    pub fn start(&self) {
        self.launch();
        self.spawn_watchdog();
    }

    /// Spawns a worker if none is live. Returns whether a worker was
    /// spawned; a second call while one runs is refused by the atomic
    /// slot claim.
    pub fn launch(&self) -> bool {
        let generation = self.inner.next_gen.fetch_add(1, Ordering::Relaxed);
        if self
            .inner
            .active_gen
            .compare_exchange(0, generation, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.inner.mark_iteration_start();
        self.spawn_worker(generation);
        true
    }

    /// Replaces a stale worker: swaps a new generation into the slot and
    /// spawns a fresh worker. The old worker, if merely slow rather than
    /// dead, sees the mismatch and exits at its next iteration boundary.
    fn relaunch(&self) {
        let generation = self.inner.next_gen.fetch_add(1, Ordering::Relaxed);
        let old = self.inner.active_gen.swap(generation, Ordering::AcqRel);
        warn!(old_generation = old, new_generation = generation, "replacing stale tick worker");
        self.inner.mark_iteration_start();
        self.spawn_worker(generation);
    }

    fn spawn_worker(&self, generation: u64) {
        let inner = Arc::clone(&self.inner);
        let handler = Arc::clone(&self.handler);
        let spawned = std::thread::Builder::new()
            .name(format!("vale-tick-{generation}"))
            .spawn(move || run_worker(inner, handler, generation));
        if let Err(e) = spawned {
            error!(error = %e, "failed to spawn tick worker");
            // Free the slot so the watchdog can retry.
            let _ = self
                .inner
                .active_gen
                .compare_exchange(generation, 0, Ordering::AcqRel, Ordering::Acquire);
        }
    }

    fn spawn_watchdog(&self) {
        let inner = Arc::clone(&self.inner);
        let scheduler = TickScheduler {
            inner: Arc::clone(&self.inner),
            handler: Arc::clone(&self.handler),
        };
        let spawned = std::thread::Builder::new()
            .name("vale-watchdog".to_string())
            .spawn(move || {
                loop {
                    std::thread::sleep(inner.watchdog_interval);
                    if inner.shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    if inner.active_gen.load(Ordering::Acquire) == 0 {
                        info!("no tick worker live; launching one");
                        scheduler.launch();
                        continue;
                    }
                    let staleness = inner.staleness();
                    if staleness > inner.stale_after {
                        warn!(staleness_ms = staleness.as_millis() as u64, "tick worker stale");
                        scheduler.relaunch();
                    }
                }
            });
        if let Err(e) = spawned {
            error!(error = %e, "failed to spawn watchdog");
        }
    }

    /// Whether a current-generation worker is live.
    pub fn is_worker_active(&self) -> bool {
        self.inner.active_gen.load(Ordering::Acquire) != 0
    }

    /// The live worker's generation, 0 when none.
    pub fn worker_generation(&self) -> u64 {
        self.inner.active_gen.load(Ordering::Acquire)
    }

    /// Time since the last iteration started.
    pub fn staleness(&self) -> Duration {
        self.inner.staleness()
    }

    /// Stops the worker and watchdog at their next check.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
    }
}

/// Clears the worker slot when the current-generation worker exits for any
/// reason, including a panic partway through a phase.
struct SlotGuard {
    inner: Arc<Inner>,
    generation: u64,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        // Only the current generation may free the slot; an abandoned
        // worker's exit must not clobber its replacement.
        let _ = self.inner.active_gen.compare_exchange(
            self.generation,
            0,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

fn run_worker(inner: Arc<Inner>, handler: Arc<dyn TickHandler>, generation: u64) {
    let _guard = SlotGuard {
        inner: Arc::clone(&inner),
        generation,
    };
    debug!(generation = generation, "tick worker started");

    let mut last_iteration = Instant::now();
    loop {
        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }
        if inner.active_gen.load(Ordering::Acquire) != generation {
            debug!(generation = generation, "worker abandoned; exiting");
            return; // replacement owns the slot now
        }

        inner.mark_iteration_start();
        let started = Instant::now();
        let elapsed = started.duration_since(last_iteration);
        last_iteration = started;

        run_phase(&inner, "client", elapsed, |e| handler.client_work(e));
        run_phase(&inner, "component", elapsed, |e| handler.component_work(e));
        run_phase(&inner, "area", elapsed, |e| handler.area_work(e));

        let spent = started.elapsed();
        if let Some(remaining) = inner.interval.checked_sub(spent) {
            std::thread::sleep(remaining);
        }
    }
    debug!(generation = generation, "tick worker shut down");
}

fn run_phase(
    inner: &Inner,
    phase: &'static str,
    elapsed: Duration,
    f: impl FnOnce(Duration) -> Result<(), SimError>,
) {
    let started = Instant::now();
    if let Err(e) = f(elapsed) {
        error!(phase, error = %e, "tick phase failed");
    }
    if inner.trace_phases {
        trace!(phase, spent_us = started.elapsed().as_micros() as u64, "phase complete");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Counts phase invocations; optionally wedges the first client phase.
    struct Probe {
        client_calls: AtomicUsize,
        wedge_first: AtomicBool,
    }

    impl Probe {
        fn new(wedge_first: bool) -> Arc<Self> {
            Arc::new(Self {
                client_calls: AtomicUsize::new(0),
                wedge_first: AtomicBool::new(wedge_first),
            })
        }
    }

    impl TickHandler for Probe {
        fn client_work(&self, _elapsed: Duration) -> Result<(), SimError> {
            self.client_calls.fetch_add(1, Ordering::SeqCst);
            if self.wedge_first.swap(false, Ordering::SeqCst) {
                std::thread::sleep(Duration::from_secs(2));
            }
            Ok(())
        }

        fn component_work(&self, _elapsed: Duration) -> Result<(), SimError> {
            Ok(())
        }

        fn area_work(&self, _elapsed: Duration) -> Result<(), SimError> {
            Ok(())
        }
    }

    fn fast_scheduler(handler: Arc<Probe>) -> TickScheduler {
        TickScheduler::with_timing(
            Duration::from_millis(5),
            Duration::from_millis(50),
            Duration::from_millis(25),
            handler,
        )
    }

    #[test]
    fn test_second_launch_refused_while_worker_live() {
        let probe = Probe::new(false);
        let scheduler = fast_scheduler(Arc::clone(&probe));

        assert!(scheduler.launch());
        assert!(!scheduler.launch(), "slot claim must refuse a second worker");
        assert!(scheduler.is_worker_active());

        scheduler.shutdown();
    }

    #[test]
    fn test_worker_ticks_and_clears_slot_on_shutdown() {
        let probe = Probe::new(false);
        let scheduler = fast_scheduler(Arc::clone(&probe));
        scheduler.launch();

        std::thread::sleep(Duration::from_millis(60));
        assert!(probe.client_calls.load(Ordering::SeqCst) >= 2);

        scheduler.shutdown();
        std::thread::sleep(Duration::from_millis(60));
        assert!(!scheduler.is_worker_active(), "guard must free the slot");
    }

    #[test]
    fn test_phase_tracing_does_not_disturb_ticking() {
        let probe = Probe::new(false);
        let scheduler = TickScheduler::build(
            Duration::from_millis(5),
            Duration::from_millis(50),
            Duration::from_millis(25),
            true,
            Arc::clone(&probe) as Arc<dyn TickHandler>,
        );
        scheduler.launch();

        std::thread::sleep(Duration::from_millis(60));
        assert!(probe.client_calls.load(Ordering::SeqCst) >= 2);
        scheduler.shutdown();
    }

    #[test]
    fn test_watchdog_replaces_wedged_worker() {
        // First client phase blocks for 2s; staleness passes 50ms and the
        // watchdog (checking every 25ms) must swap in a new generation.
        let probe = Probe::new(true);
        let scheduler = fast_scheduler(Arc::clone(&probe));
        scheduler.start();

        let first_gen = scheduler.worker_generation();
        std::thread::sleep(Duration::from_millis(300));

        let replacement_gen = scheduler.worker_generation();
        assert!(replacement_gen > first_gen, "stale worker must be replaced");
        assert!(
            probe.client_calls.load(Ordering::SeqCst) >= 2,
            "replacement worker must be ticking while the old one is wedged"
        );

        scheduler.shutdown();
    }

    #[test]
    fn test_watchdog_launches_when_no_worker_live() {
        let probe = Probe::new(false);
        let scheduler = fast_scheduler(Arc::clone(&probe));
        // Watchdog only; no initial worker.
        scheduler.spawn_watchdog();

        std::thread::sleep(Duration::from_millis(100));
        assert!(scheduler.is_worker_active());
        scheduler.shutdown();
    }
}
