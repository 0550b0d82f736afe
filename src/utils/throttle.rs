//! Log throttling
//!
//! Per-frame failures on a live track repeat at the frame rate. The
//! throttler lets the first one through and suppresses the same key for an
//! interval, counting what it swallowed.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct Entry {
    last_logged: Instant,
    suppressed: u64,
}

/// Limits how often messages with the same key are logged
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use emotion_relay::utils::LogThrottler;
///
/// let throttler = LogThrottler::new(Duration::from_secs(5));
/// assert_eq!(throttler.check("track-1:inference"), Some(0));
/// assert_eq!(throttler.check("track-1:inference"), None);
/// ```
pub struct LogThrottler {
    entries: Mutex<HashMap<String, Entry>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// `Some(n)` when the message for `key` should be logged now, `n` being
    /// how many were suppressed since the last one that got through
    pub fn check(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) if now.duration_since(entry.last_logged) < self.interval => {
                entry.suppressed += 1;
                None
            }
            Some(entry) => {
                let suppressed = std::mem::take(&mut entry.suppressed);
                entry.last_logged = now;
                Some(suppressed)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        last_logged: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
        }
    }

    /// Forget a key, e.g. when its track goes away
    pub fn clear(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    /// Forget every key starting with `prefix`
    pub fn clear_prefix(&self, prefix: &str) {
        self.entries.lock().retain(|k, _| !k.starts_with(prefix));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for LogThrottler {
    /// 5 second interval
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// Throttled `tracing::warn!`
///
/// Each message that gets through carries a `suppressed` field with the
/// number of messages dropped for the same key since the previous one.
///
/// ```rust
/// use emotion_relay::utils::LogThrottler;
/// use emotion_relay::warn_throttled;
///
/// let throttler = LogThrottler::default();
/// warn_throttled!(throttler, "decode", "Decode failed: {}", "details");
/// ```
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if let Some(suppressed) = $throttler.check($key) {
            tracing::warn!(suppressed, $($arg)*);
        }
    };
}

/// Throttled `tracing::error!`
#[macro_export]
macro_rules! error_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if let Some(suppressed) = $throttler.check($key) {
            tracing::error!(suppressed, $($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_throttling() {
        let throttler = LogThrottler::new(Duration::from_millis(100));

        assert!(throttler.check("k").is_some());
        assert!(throttler.check("k").is_none());

        thread::sleep(Duration::from_millis(150));
        assert!(throttler.check("k").is_some());
    }

    #[test]
    fn test_suppressed_count() {
        let throttler = LogThrottler::new(Duration::from_millis(50));

        assert_eq!(throttler.check("k"), Some(0));
        assert_eq!(throttler.check("k"), None);
        assert_eq!(throttler.check("k"), None);

        thread::sleep(Duration::from_millis(80));
        assert_eq!(throttler.check("k"), Some(2));
    }

    #[test]
    fn test_different_keys() {
        let throttler = LogThrottler::with_secs(10);

        assert!(throttler.check("key1").is_some());
        assert!(throttler.check("key2").is_some());
        assert!(throttler.check("key1").is_none());
    }

    #[test]
    fn test_clear_prefix() {
        let throttler = LogThrottler::with_secs(10);

        throttler.check("track-a:decode");
        throttler.check("track-a:inference");
        throttler.check("track-b:inference");
        assert_eq!(throttler.len(), 3);

        throttler.clear_prefix("track-a:");
        assert_eq!(throttler.len(), 1);
        assert_eq!(throttler.check("track-a:decode"), Some(0));

        throttler.clear("track-b:inference");
        assert_eq!(throttler.check("track-b:inference"), Some(0));
        assert!(!throttler.is_empty());
    }

    #[test]
    fn test_macro_reports_suppressed_messages() {
        let throttler = LogThrottler::new(Duration::from_millis(50));
        for _ in 0..4 {
            warn_throttled!(throttler, "track-a:inference", "inference failed: {}", "boom");
        }

        // three of the four calls above were swallowed
        thread::sleep(Duration::from_millis(80));
        assert_eq!(throttler.check("track-a:inference"), Some(3));

        error_throttled!(throttler, "track-a:engine", track_id = "track-a", "engine down");
        assert_eq!(throttler.check("track-a:engine"), None);
    }
}
