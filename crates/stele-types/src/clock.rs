use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// Source of `stored` timestamps.
///
/// Wall-clock time can step backwards (NTP adjustment, VM migration); the
/// `stored` contract requires monotonically non-decreasing values per store
/// instance, so the clock pins each reading to at least the previous one.
/// Ties are allowed; adapters break them with a secondary sort key.
#[derive(Debug)]
pub struct StoredClock {
    last: Mutex<DateTime<Utc>>,
}

impl StoredClock {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    /// The current stored-time reading, never earlier than any prior reading.
    pub fn now(&self) -> DateTime<Utc> {
        let mut last = self.last.lock().expect("clock lock poisoned");
        let now = Utc::now();
        if now > *last {
            *last = now;
        }
        *last
    }
}

impl Default for StoredClock {
    fn default() -> Self {
        Self::new()
    }
}
