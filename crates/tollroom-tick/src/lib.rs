//! Periodic scheduler that drives billing meters and presence sweeps.
//!
//! A room actor re-evaluates its billing sessions on a fixed cadence
//! (once a second by default) so that the free-trial boundary is noticed
//! and published promptly. The presence sweeper uses the same scheduler
//! to look for participants whose grace period ran out.
//!
//! Billing never depends on *how many* ticks fired: cost is recomputed
//! from wall-clock timestamps each time. The scheduler only decides
//! *when* that recomputation happens. A late tick therefore just skips
//! ahead instead of trying to catch up.
//!
//! # Disabled mode
//!
//! With a zero interval, [`MeterScheduler::wait_for_tick`] pends forever.
//!
//! # Integration
//!
//! The scheduler sits inside a room actor's `tokio::select!` loop:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(cmd) = cmd_rx.recv() => { /* handle commands */ }
//!         _ = meter.wait_for_tick() => {
//!             let changed = book.tick_all(clock.now());
//!             meter.record_work_done();
//!         }
//!     }
//! }
//! ```

use std::time::{Duration, Instant};

use rand::Rng;
use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for a [`MeterScheduler`].
#[derive(Debug, Clone)]
pub struct MeterConfig {
    /// Time between ticks. Zero disables the scheduler.
    pub interval: Duration,
    /// Random jitter (0..max µs) added to the first tick so rooms created
    /// together don't all tick in the same instant.
    pub initial_jitter_us: u64,
    /// Warn when the work done for one tick takes more than this fraction
    /// of the interval.
    pub budget_warn_threshold: f64,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            initial_jitter_us: 2_000,
            budget_warn_threshold: 0.80,
        }
    }
}

impl MeterConfig {
    /// Shortest interval accepted. Anything non-zero below this is raised.
    pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    pub fn every_millis(ms: u64) -> Self {
        Self::every(Duration::from_millis(ms))
    }

    /// Clamps out-of-range values. Called by [`MeterScheduler::new`].
    pub fn validated(mut self) -> Self {
        if !self.interval.is_zero() && self.interval < Self::MIN_INTERVAL {
            warn!(
                interval_ms = self.interval.as_millis() as u64,
                min_ms = Self::MIN_INTERVAL.as_millis() as u64,
                "meter interval too short, clamping"
            );
            self.interval = Self::MIN_INTERVAL;
        }
        self.budget_warn_threshold = self.budget_warn_threshold.clamp(0.0, 1.0);
        self
    }

    fn interval(&self) -> Option<Duration> {
        (!self.interval.is_zero()).then_some(self.interval)
    }
}

// ---------------------------------------------------------------------------
// TickInfo
// ---------------------------------------------------------------------------

/// Returned by [`MeterScheduler::wait_for_tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickInfo {
    /// Tick number, starting at 1.
    pub tick: u64,
    /// `true` if this tick woke up noticeably late.
    pub overrun: bool,
    /// Ticks skipped because of the delay.
    pub ticks_skipped: u64,
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Counters kept by the scheduler.
#[derive(Debug, Clone, Default)]
pub struct MeterMetrics {
    pub total_ticks: u64,
    pub total_overruns: u64,
    pub total_skipped: u64,
    /// Longest time between a tick firing and
    /// [`record_work_done`](MeterScheduler::record_work_done).
    pub max_work_time: Duration,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Fixed-cadence scheduler. One per room actor, plus one for the presence
/// sweeper.
pub struct MeterScheduler {
    config: MeterConfig,
    interval: Option<Duration>,
    tick_count: u64,
    next_tick: Option<TokioInstant>,
    work_start: Option<Instant>,
    paused: bool,
    metrics: MeterMetrics,
}

impl MeterScheduler {
    pub fn new(config: MeterConfig) -> Self {
        let config = config.validated();
        let interval = config.interval();

        let next_tick = interval.map(|d| {
            let jitter = if config.initial_jitter_us > 0 {
                Duration::from_micros(rand::rng().random_range(0..config.initial_jitter_us))
            } else {
                Duration::ZERO
            };
            TokioInstant::now() + d + jitter
        });

        match interval {
            Some(d) => debug!(interval_ms = d.as_millis() as u64, "meter scheduler created"),
            None => debug!("meter scheduler created disabled"),
        }

        Self {
            config,
            interval,
            tick_count: 0,
            next_tick,
            work_start: None,
            paused: false,
            metrics: MeterMetrics::default(),
        }
    }

    pub fn every(interval: Duration) -> Self {
        Self::new(MeterConfig::every(interval))
    }

    /// Waits for the next tick.
    ///
    /// Pends forever while paused or disabled; `tokio::select!` keeps
    /// serving its other branches.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let (next, interval) = match (self.next_tick, self.interval) {
            (Some(next), Some(interval)) if !self.paused => (next, interval),
            _ => return std::future::pending().await,
        };

        time::sleep_until(next).await;

        let now = TokioInstant::now();
        self.tick_count += 1;
        self.work_start = Some(Instant::now());

        let late_by = now.saturating_duration_since(next);
        let overrun = late_by > interval / 10;
        let mut ticks_skipped = 0;
        if overrun {
            ticks_skipped = (late_by.as_nanos() / interval.as_nanos()) as u64;
            self.metrics.total_overruns += 1;
            if ticks_skipped > 0 {
                warn!(
                    tick = self.tick_count,
                    skipped = ticks_skipped,
                    late_ms = late_by.as_millis() as u64,
                    "meter tick late, skipping ahead"
                );
            }
        }
        // Always from now, never from the missed deadline.
        self.next_tick = Some(now + interval);

        self.metrics.total_ticks += 1;
        self.metrics.total_skipped += ticks_skipped;
        trace!(tick = self.tick_count, overrun, "meter tick");

        TickInfo {
            tick: self.tick_count,
            overrun,
            ticks_skipped,
        }
    }

    /// Marks the work for the current tick as finished.
    ///
    /// No-op unless a tick fired since the last call.
    pub fn record_work_done(&mut self) {
        let Some(start) = self.work_start.take() else {
            return;
        };
        let elapsed = start.elapsed();
        self.metrics.max_work_time = self.metrics.max_work_time.max(elapsed);

        if let Some(interval) = self.interval {
            let utilization = elapsed.as_secs_f64() / interval.as_secs_f64();
            if utilization >= self.config.budget_warn_threshold {
                warn!(
                    tick = self.tick_count,
                    elapsed_ms = elapsed.as_millis() as u64,
                    interval_ms = interval.as_millis() as u64,
                    "meter work approaching interval"
                );
            }
        }
    }

    /// Stops ticks until [`resume`](Self::resume). Idempotent.
    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            debug!(tick = self.tick_count, "meter scheduler paused");
        }
    }

    /// Restarts ticks one full interval from now. Idempotent.
    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            if let Some(interval) = self.interval {
                self.next_tick = Some(TokioInstant::now() + interval);
            }
            debug!(tick = self.tick_count, "meter scheduler resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_disabled(&self) -> bool {
        self.interval.is_none()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    pub fn metrics(&self) -> &MeterMetrics {
        &self.metrics
    }
}
