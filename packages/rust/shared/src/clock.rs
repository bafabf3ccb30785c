//! Time source for polling sleeps and document timestamps.
//!
//! Components take a [`Clock`] instead of calling `Utc::now()` or
//! `tokio::time::sleep` directly, so tests can run polling loops without
//! real delays.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Source of "now" and of suspension between polls.
pub trait Clock: Send + Sync {
    /// Current UTC instant.
    fn now(&self) -> DateTime<Utc>;

    /// Suspend the calling task for `duration`.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Wall clock backed by `chrono` and the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

/// Simulated clock: sleeping returns immediately and advances `now`.
///
/// Every requested sleep is recorded so callers can assert on the polling
/// cadence.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// Move the clock forward without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
    }

    /// Sleeps requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        self.sleeps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(duration);
        self.advance(duration);
        std::future::ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn manual_clock_records_and_advances() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 23, 59, 0).unwrap();
        let clock = ManualClock::new(start);

        clock.sleep(Duration::from_secs(30)).await;
        clock.sleep(Duration::from_secs(45)).await;

        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(30), Duration::from_secs(45)]
        );
        assert_eq!(clock.now(), start + chrono::Duration::seconds(75));
        assert_eq!(clock.now().date_naive().to_string(), "2024-03-02");
    }
}
