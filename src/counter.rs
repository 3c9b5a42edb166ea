//! Global and per-path request counters.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Request hit counters.
///
/// One instance is created at startup and shared by handle. The global count
/// is a plain atomic. Path entries are created on first hit under the write
/// lock; afterwards increments only take the read lock to find the atomic.
/// Resetting sets counts to zero and keeps every seen path listed.
#[derive(Debug, Default)]
pub struct RequestCounter {
    global: AtomicU64,
    paths: RwLock<HashMap<String, Arc<AtomicU64>>>,
}

impl RequestCounter {
    /// Create a counter with everything at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the global count and return the new value.
    pub fn increment_global(&self) -> u64 {
        self.global.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Increment the count for `path` and return the new value.
    pub fn increment_path(&self, path: &str) -> u64 {
        if let Some(count) = self.paths.read().get(path) {
            return count.fetch_add(1, Ordering::SeqCst) + 1;
        }

        // Two first hits can both miss above; the entry API under the write
        // lock makes the second one reuse the first one's atomic.
        let count = Arc::clone(
            self.paths
                .write()
                .entry(path.to_string())
                .or_insert_with(|| Arc::new(AtomicU64::new(0))),
        );
        count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Current global count.
    pub fn global(&self) -> u64 {
        self.global.load(Ordering::SeqCst)
    }

    /// Current count for `path` (0 if never seen).
    pub fn path(&self, path: &str) -> u64 {
        self.paths
            .read()
            .get(path)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Point-in-time copy of every path count.
    pub fn all_paths(&self) -> HashMap<String, u64> {
        self.paths
            .read()
            .iter()
            .map(|(path, count)| (path.clone(), count.load(Ordering::SeqCst)))
            .collect()
    }

    /// Reset one path to zero. Unknown paths are left alone.
    pub fn reset_path(&self, path: &str) {
        if let Some(count) = self.paths.read().get(path) {
            count.store(0, Ordering::SeqCst);
            info!(path = %path, "Counter reset for path");
        }
    }

    /// Reset the global count and every path count to zero.
    pub fn reset_all(&self) {
        self.global.store(0, Ordering::SeqCst);
        for count in self.paths.read().values() {
            count.store(0, Ordering::SeqCst);
        }
        info!("All counters reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const THREADS: usize = 16;
    const ITERATIONS: usize = 1000;

    #[test]
    fn test_increment_returns_new_value() {
        let counter = RequestCounter::new();
        assert_eq!(counter.increment_global(), 1);
        assert_eq!(counter.increment_global(), 2);
        assert_eq!(counter.increment_path("/a"), 1);
        assert_eq!(counter.increment_path("/a"), 2);
        assert_eq!(counter.increment_path("/b"), 1);
        assert_eq!(counter.global(), 2);
        assert_eq!(counter.path("/a"), 2);
        assert_eq!(counter.path("/unseen"), 0);
    }

    #[test]
    fn test_concurrent_global_increments() {
        let counter = Arc::new(RequestCounter::new());
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..ITERATIONS {
                        counter.increment_global();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.global(), (THREADS * ITERATIONS) as u64);
    }

    #[test]
    fn test_concurrent_first_touch_on_same_path() {
        let counter = Arc::new(RequestCounter::new());
        let barrier = Arc::new(std::sync::Barrier::new(THREADS));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let counter = Arc::clone(&counter);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let mut seen = Vec::with_capacity(ITERATIONS);
                    for _ in 0..ITERATIONS {
                        seen.push(counter.increment_path("/race"));
                    }
                    seen
                })
            })
            .collect();

        let mut all_values: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all_values.sort_unstable();
        all_values.dedup();

        let expected = (THREADS * ITERATIONS) as u64;
        assert_eq!(counter.path("/race"), expected);
        // Every increment observed a distinct value
        assert_eq!(all_values.len() as u64, expected);
        assert_eq!(counter.all_paths().len(), 1);
    }

    #[test]
    fn test_reset_path_keeps_key() {
        let counter = RequestCounter::new();
        counter.increment_path("/a");
        counter.increment_path("/a");
        counter.increment_path("/b");

        counter.reset_path("/a");
        counter.reset_path("/never");

        let paths = counter.all_paths();
        assert_eq!(paths.get("/a"), Some(&0));
        assert_eq!(paths.get("/b"), Some(&1));
        assert!(!paths.contains_key("/never"));
        assert_eq!(counter.increment_path("/a"), 1);
    }

    #[test]
    fn test_reset_all_keeps_keys() {
        let counter = RequestCounter::new();
        counter.increment_global();
        counter.increment_path("/a");
        counter.increment_path("/b");

        counter.reset_all();

        assert_eq!(counter.global(), 0);
        let paths = counter.all_paths();
        assert_eq!(paths.len(), 2);
        assert!(paths.values().all(|c| *c == 0));
    }
}
