use std::sync::RwLock;

use chrono::{DateTime, Utc};

/// Abstracts "now" so the worker loop can be driven deterministically in
/// tests instead of racing real wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Real clock backed by system time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fake clock that only advances when told to. Uses `std::sync::RwLock`
/// rather than `tokio::sync::RwLock` so it can be read from both sync and
/// async contexts without needing `.await`.
pub struct FakeClock {
    time: RwLock<DateTime<Utc>>,
}

impl FakeClock {
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            time: RwLock::new(time),
        }
    }

    pub fn set(&self, time: DateTime<Utc>) {
        *self.time.write().unwrap() = time;
    }

    pub fn advance(&self, duration: chrono::Duration) {
        let mut t = self.time.write().unwrap();
        *t += duration;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.time.read().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fake_clock_set_and_advance() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let clock = FakeClock::new(t0);
        assert_eq!(clock.now(), t0);

        let t1 = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
        clock.set(t1);
        assert_eq!(clock.now(), t1);

        clock.advance(chrono::Duration::hours(1));
        assert_eq!(clock.now(), t1 + chrono::Duration::hours(1));
    }

    #[test]
    fn system_clock_is_close_to_now() {
        let clock = SystemClock;
        let diff = (Utc::now() - clock.now()).num_seconds().abs();
        assert!(diff < 2);
    }
}
