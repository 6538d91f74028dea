//! Cleanup alarm for roomkeeper.
//!
//! A one-shot timer the broker re-arms after every sweep: at the full
//! interval when the sweep found nothing to do, at a tenth of it when it
//! did, so a backlog of rooms to close drains quickly.
//!
//! # Integration
//!
//! The broker polls the alarm once per turn of its loop, after waiting
//! for a protocol event, so a busy event source can't starve the sweep:
//!
//! ```ignore
//! loop {
//!     if let Some(event) = protocol.next_event(timeout).await? {
//!         dispatch(event).await?;
//!     }
//!     if alarm.is_due() {
//!         let found = sweep().await?;
//!         alarm.rearm(found);
//!     }
//! }
//! ```
//!
//! [`CleanupAlarm::wait`] serves callers that would rather `select!` on
//! the deadline.

use std::time::Duration;

use rand::Rng;
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AlarmConfig {
    /// Full interval between sweeps that found nothing.
    pub interval: Duration,
    /// The interval is divided by this after a sweep that found work.
    pub fast_divisor: u32,
    /// Random delay (0..jitter) added to the first firing only.
    pub initial_jitter: Duration,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(600),
            fast_divisor: 10,
            initial_jitter: Duration::ZERO,
        }
    }
}

impl AlarmConfig {
    /// Shortest interval accepted; anything lower is raised to this.
    pub const MIN_INTERVAL: Duration = Duration::from_millis(100);

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    /// Clamp out-of-range values. Called by [`CleanupAlarm::new`].
    pub fn validated(mut self) -> Self {
        if self.interval < Self::MIN_INTERVAL {
            warn!(
                interval_ms = self.interval.as_millis() as u64,
                min_ms = Self::MIN_INTERVAL.as_millis() as u64,
                "cleanup interval too short, raising"
            );
            self.interval = Self::MIN_INTERVAL;
        }
        if self.fast_divisor == 0 {
            self.fast_divisor = 1;
        }
        self
    }

    /// The re-arm delay after a sweep that found work.
    pub fn fast_interval(&self) -> Duration {
        self.interval / self.fast_divisor
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct AlarmMetrics {
    /// Times the alarm went off.
    pub fired: u64,
    /// Sweeps that reported work, i.e. fast re-arms.
    pub busy_sweeps: u64,
    /// Longest observed delay between the deadline and the sweep starting.
    pub max_lateness: Duration,
}

// ---------------------------------------------------------------------------
// Alarm
// ---------------------------------------------------------------------------

pub struct CleanupAlarm {
    config: AlarmConfig,
    deadline: Instant,
    /// Set between firing and re-arming; a fired alarm doesn't fire again.
    fired: bool,
    metrics: AlarmMetrics,
}

impl CleanupAlarm {
    /// Arms the alarm for one full interval from now, plus jitter.
    pub fn new(config: AlarmConfig) -> Self {
        let config = config.validated();
        let jitter = if config.initial_jitter > Duration::ZERO {
            let us = rand::rng().random_range(0..config.initial_jitter.as_micros() as u64);
            Duration::from_micros(us)
        } else {
            Duration::ZERO
        };
        debug!(
            interval_secs = config.interval.as_secs_f64(),
            fast_secs = config.fast_interval().as_secs_f64(),
            "cleanup alarm armed"
        );
        Self {
            deadline: Instant::now() + config.interval + jitter,
            config,
            fired: false,
            metrics: AlarmMetrics::default(),
        }
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self::new(AlarmConfig::with_interval(interval))
    }

    /// Resolves once the deadline passes. Pends forever after firing until
    /// [`rearm`](Self::rearm) is called.
    pub async fn wait(&mut self) {
        if self.fired {
            std::future::pending::<()>().await;
        }
        time::sleep_until(self.deadline).await;
        self.fire();
    }

    /// Non-blocking check. Marks the alarm fired if the deadline passed.
    pub fn is_due(&mut self) -> bool {
        if self.fired || Instant::now() < self.deadline {
            return false;
        }
        self.fire();
        true
    }

    fn fire(&mut self) {
        self.fired = true;
        self.metrics.fired += 1;
        let late = Instant::now().saturating_duration_since(self.deadline);
        if late > self.metrics.max_lateness {
            self.metrics.max_lateness = late;
        }
        trace!(late_ms = late.as_millis() as u64, "cleanup alarm fired");
    }

    /// Arms the next firing: a tenth of the interval away if the sweep
    /// found work, the full interval otherwise.
    pub fn rearm(&mut self, found_work: bool) {
        let delay = if found_work {
            self.metrics.busy_sweeps += 1;
            self.config.fast_interval()
        } else {
            self.config.interval
        };
        self.deadline = Instant::now() + delay;
        self.fired = false;
        trace!(found_work, delay_ms = delay.as_millis() as u64, "cleanup alarm re-armed");
    }

    /// Time left before the alarm goes off, zero if it's due or fired.
    pub fn remaining(&self) -> Duration {
        if self.fired {
            return Duration::ZERO;
        }
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    pub fn metrics(&self) -> &AlarmMetrics {
        &self.metrics
    }
}
