//! Last-activity clock and connected-socket count for idle shutdown

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Counters {
    started: Instant,
    /// Millis since `started`
    last_activity_ms: AtomicU64,
    connected: AtomicUsize,
}

#[derive(Debug, Clone)]
pub struct ActivityTracker {
    inner: Arc<Counters>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Counters {
                started: Instant::now(),
                last_activity_ms: AtomicU64::new(0),
                connected: AtomicUsize::new(0),
            }),
        }
    }

    pub fn touch(&self) {
        let now = self.inner.started.elapsed().as_millis() as u64;
        self.inner.last_activity_ms.fetch_max(now, Ordering::Relaxed);
    }

    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.inner.last_activity_ms.load(Ordering::Relaxed));
        self.inner.started.elapsed().saturating_sub(last)
    }

    pub fn uptime(&self) -> Duration {
        self.inner.started.elapsed()
    }

    pub fn connected(&self) -> usize {
        self.inner.connected.load(Ordering::Relaxed)
    }

    /// Count a socket as connected until the guard drops
    pub fn connection_opened(&self) -> ConnectionGuard {
        self.inner.connected.fetch_add(1, Ordering::Relaxed);
        self.touch();
        ConnectionGuard {
            tracker: self.clone(),
        }
    }

    /// Idle past `timeout` with nothing connected
    pub fn should_shut_down(&self, timeout: Duration) -> bool {
        self.connected() == 0 && self.idle_for() > timeout
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct ConnectionGuard {
    tracker: ActivityTracker,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker.inner.connected.fetch_sub(1, Ordering::Relaxed);
        self.tracker.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_counts_connections() {
        let tracker = ActivityTracker::new();
        let a = tracker.connection_opened();
        let b = tracker.connection_opened();
        assert_eq!(tracker.connected(), 2);
        drop(a);
        assert_eq!(tracker.connected(), 1);
        drop(b);
        assert_eq!(tracker.connected(), 0);
    }

    #[test]
    fn test_idle_requires_no_connections() {
        let tracker = ActivityTracker::new();
        std::thread::sleep(Duration::from_millis(20));
        assert!(tracker.should_shut_down(Duration::from_millis(5)));

        let guard = tracker.connection_opened();
        std::thread::sleep(Duration::from_millis(20));
        assert!(!tracker.should_shut_down(Duration::from_millis(5)));
        drop(guard);

        tracker.touch();
        assert!(!tracker.should_shut_down(Duration::from_secs(60)));
    }
}
