//! Integration tests for the cleanup alarm.
//!
//! Uses `tokio::time::pause()` so sleeps resolve as soon as the clock is
//! advanced.

use std::time::Duration;

use roomkeeper_tick::{AlarmConfig, CleanupAlarm};
use tokio::time;

// =========================================================================
// AlarmConfig
// =========================================================================

#[test]
fn test_default_config() {
    let cfg = AlarmConfig::default();
    assert_eq!(cfg.interval, Duration::from_secs(600));
    assert_eq!(cfg.fast_interval(), Duration::from_secs(60));
}

#[test]
fn test_validated_clamps_interval_and_divisor() {
    let cfg = AlarmConfig {
        interval: Duration::from_millis(1),
        fast_divisor: 0,
        initial_jitter: Duration::ZERO,
    }
    .validated();
    assert_eq!(cfg.interval, AlarmConfig::MIN_INTERVAL);
    assert_eq!(cfg.fast_divisor, 1);
    assert_eq!(cfg.fast_interval(), AlarmConfig::MIN_INTERVAL);
}

// =========================================================================
// Firing
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_alarm_fires_after_interval() {
    let mut alarm = CleanupAlarm::with_interval(Duration::from_secs(10));
    assert!(!alarm.is_due());
    assert_eq!(alarm.remaining(), Duration::from_secs(10));

    time::advance(Duration::from_secs(9)).await;
    assert!(!alarm.is_due());

    time::advance(Duration::from_secs(1)).await;
    assert!(alarm.is_due());
    assert!(alarm.has_fired());
    assert_eq!(alarm.metrics().fired, 1);
}

#[tokio::test(start_paused = true)]
async fn test_fired_alarm_stays_quiet_until_rearmed() {
    let mut alarm = CleanupAlarm::with_interval(Duration::from_secs(1));
    time::advance(Duration::from_secs(2)).await;
    assert!(alarm.is_due());
    assert!(!alarm.is_due());
    assert_eq!(alarm.remaining(), Duration::ZERO);

    let waited = time::timeout(Duration::from_secs(60), alarm.wait()).await;
    assert!(waited.is_err(), "a fired alarm must not fire twice");
    assert_eq!(alarm.metrics().fired, 1);
}

#[tokio::test(start_paused = true)]
async fn test_wait_resolves_at_deadline() {
    let mut alarm = CleanupAlarm::with_interval(Duration::from_secs(5));
    let start = time::Instant::now();
    alarm.wait().await;
    assert_eq!(start.elapsed(), Duration::from_secs(5));
    assert!(alarm.has_fired());
}

// =========================================================================
// Re-arming
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_rearm_after_busy_sweep_uses_tenth_interval() {
    let mut alarm = CleanupAlarm::with_interval(Duration::from_secs(600));
    alarm.wait().await;

    alarm.rearm(true);
    assert_eq!(alarm.remaining(), Duration::from_secs(60));
    let start = time::Instant::now();
    alarm.wait().await;
    assert_eq!(start.elapsed(), Duration::from_secs(60));
    assert_eq!(alarm.metrics().busy_sweeps, 1);
}

#[tokio::test(start_paused = true)]
async fn test_rearm_after_idle_sweep_uses_full_interval() {
    let mut alarm = CleanupAlarm::with_interval(Duration::from_secs(600));
    alarm.wait().await;

    alarm.rearm(false);
    assert!(!alarm.has_fired());
    assert_eq!(alarm.remaining(), Duration::from_secs(600));
    assert_eq!(alarm.metrics().busy_sweeps, 0);
}

#[tokio::test(start_paused = true)]
async fn test_lateness_is_recorded() {
    let mut alarm = CleanupAlarm::with_interval(Duration::from_secs(1));
    time::advance(Duration::from_millis(1500)).await;
    assert!(alarm.is_due());
    assert_eq!(alarm.metrics().max_lateness, Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn test_initial_jitter_delays_first_firing_only() {
    let mut alarm = CleanupAlarm::new(AlarmConfig {
        interval: Duration::from_secs(10),
        fast_divisor: 10,
        initial_jitter: Duration::from_secs(1),
    });
    let first = alarm.remaining();
    assert!(first >= Duration::from_secs(10) && first < Duration::from_secs(11));

    alarm.wait().await;
    alarm.rearm(false);
    assert_eq!(alarm.remaining(), Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_alarm_in_select_loop() {
    let mut alarm = CleanupAlarm::with_interval(Duration::from_secs(1));
    let mut sweeps = 0;
    let mut events = 0;
    let mut ticker = time::interval(Duration::from_millis(300));

    while sweeps < 3 {
        tokio::select! {
            _ = ticker.tick() => events += 1,
            _ = alarm.wait() => {
                sweeps += 1;
                alarm.rearm(sweeps == 1);
            }
        }
    }
    // Sweeps at 1s, 1.1s (fast) and 2.1s.
    assert_eq!(alarm.metrics().fired, 3);
    assert!(events >= 7);
}
