//! Clock & scheduler primitives.
//!
//! A `Clock` abstracts the current time and timezone-anchored bucket keys
//! so every other component can be tested against a frozen instant instead
//! of real wall-clock sleeps. The scheduler helpers spawn periodic tickers
//! and single-shot timers that all honor one shared shutdown signal.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Granularity of a reminder bucket key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketGranularity {
    Date,
    Hour,
}

/// Abstracts "now" and timezone-anchored bucket keys.
///
/// Every component that gates behavior on elapsed time or reminder buckets
/// takes a `Arc<dyn Clock>` rather than calling `Utc::now()` directly, so
/// tests can freeze and advance time deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn timezone(&self) -> Tz;

    /// A bucket key is a TZ-anchored string (`YYYY-MM-DD` or `YYYY-MM-DD
    /// HH`) used to gate reminder emissions. Never mixes local and UTC.
    fn bucket_key(&self, granularity: BucketGranularity) -> String {
        let local = self.now().with_timezone(&self.timezone());
        match granularity {
            BucketGranularity::Date => local.format("%Y-%m-%d").to_string(),
            BucketGranularity::Hour => local.format("%Y-%m-%d %H").to_string(),
        }
    }

    /// True when `self.now()` falls on a Friday in `self.timezone()`
    /// (used by the weekly synthetic/license summary tickers).
    fn is_friday(&self) -> bool {
        use chrono::Datelike;
        self.now().with_timezone(&self.timezone()).weekday() == chrono::Weekday::Fri
    }

    /// Today's date in `self.timezone()`, for the once-per-date weekly
    /// summary gate (`settings.ssl_weekly_summary_last_sent_on` and its
    /// license-monitor counterpart).
    fn today(&self) -> chrono::NaiveDate {
        self.now().with_timezone(&self.timezone()).date_naive()
    }
}

/// Real wall-clock implementation.
pub struct SystemClock {
    tz: Tz,
}

impl SystemClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(Tz::UTC)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn timezone(&self) -> Tz {
        self.tz
    }
}

/// Test double: a clock pinned to an explicit instant that only moves when
/// told to. Lets component tests express scenarios like "at t=120s" as
/// `clock.advance(Duration::seconds(120))` instead of sleeping in real
/// time.
pub struct FrozenClock {
    at: Mutex<DateTime<Utc>>,
    tz: Tz,
}

impl FrozenClock {
    pub fn new(at: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            at: Mutex::new(at),
            tz: Tz::UTC,
        })
    }

    pub fn with_timezone(at: DateTime<Utc>, tz: Tz) -> Arc<Self> {
        Arc::new(Self {
            at: Mutex::new(at),
            tz,
        })
    }

    pub fn advance(&self, delta: Duration) {
        let mut guard = self.at.lock().expect("frozen clock mutex poisoned");
        *guard += delta;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.at.lock().expect("frozen clock mutex poisoned") = at;
    }
}

impl Clock for FrozenClock {
    fn now(&self) -> DateTime<Utc> {
        *self.at.lock().expect("frozen clock mutex poisoned")
    }

    fn timezone(&self) -> Tz {
        self.tz
    }
}

/// Owns the shutdown signal handed to every long-lived ticker task.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, rx)
    }

    /// Signals every ticker spawned against this handle's receivers to
    /// stop at their next tick boundary.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

/// Spawns a periodic task that calls `tick` on every `period`, stopping
/// when `shutdown` flips to `true`. Uses `MissedTickBehavior::Delay` so a
/// slow tick body never causes a burst of queued-up ticks.
pub fn spawn_ticker<F, Fut>(
    period: StdDuration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

/// Spawns a single-shot timer, returning a handle whose `abort()` cancels
/// it before it fires.
pub fn spawn_once<F>(delay: StdDuration, fut: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        fut.await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frozen_clock_advances_monotonically() {
        let start = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let clock = FrozenClock::new(start);
        assert_eq!(clock.now(), start);
        clock.advance(Duration::seconds(90));
        assert_eq!(clock.now(), start + Duration::seconds(90));
    }

    #[test]
    fn bucket_key_switches_granularity() {
        let at = DateTime::parse_from_rfc3339("2026-03-05T14:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let clock = FrozenClock::new(at);
        assert_eq!(clock.bucket_key(BucketGranularity::Date), "2026-03-05");
        assert_eq!(clock.bucket_key(BucketGranularity::Hour), "2026-03-05 14");
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_stops_on_shutdown() {
        let (handle, rx) = ShutdownHandle::new();
        let count = Arc::new(Mutex::new(0));
        let count2 = count.clone();
        let task = spawn_ticker(StdDuration::from_millis(10), rx, move || {
            let count = count2.clone();
            async move {
                *count.lock().unwrap() += 1;
            }
        });
        tokio::time::advance(StdDuration::from_millis(35)).await;
        handle.trigger();
        let _ = task.await;
        assert!(*count.lock().unwrap() >= 3);
    }
}
