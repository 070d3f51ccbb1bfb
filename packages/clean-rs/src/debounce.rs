//! Per-tag debouncing for use cases.
//!
//! Repeated calls sharing a tag inside a rolling window collapse into a
//! single action. Every call restarts the window for its tag.
//!
//! | Mode               | First call     | Calls inside the window | Window expiry      |
//! |--------------------|----------------|-------------------------|--------------------|
//! | `immediate = true` | runs at once   | dropped                 | nothing runs       |
//! | `immediate = false`| deferred       | replace the pending one | last action runs   |
//!
//! Timers are tokio tasks; `cancel_all` aborts every pending one so nothing
//! fires against a disposed use case.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

struct PendingTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct TimerTable {
    next_generation: u64,
    timers: HashMap<String, PendingTimer>,
}

/// Table of debounce timers keyed by tag.
#[derive(Default)]
pub struct Debouncer {
    table: Arc<Mutex<TimerTable>>,
}

impl Debouncer {
    /// Create an empty debouncer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Collapse repeated `action`s sharing `tag` within `duration`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn debounce<F>(&self, action: F, tag: &str, duration: Duration, immediate: bool)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut table = lock_table(&self.table);

        let previous = table.timers.remove(tag);
        let window_open = previous
            .as_ref()
            .is_some_and(|timer| !timer.handle.is_finished());
        if let Some(timer) = previous {
            timer.handle.abort();
        }

        table.next_generation += 1;
        let generation = table.next_generation;

        let mut deferred = None;
        let mut run_now = None;
        if immediate {
            if window_open {
                debug!(tag, "debounced call dropped inside window");
            } else {
                run_now = Some(action);
            }
        } else {
            deferred = Some(action);
        }

        let shared = self.table.clone();
        let owned_tag = tag.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            {
                let mut table = lock_table(&shared);
                match table.timers.get(&owned_tag) {
                    Some(timer) if timer.generation == generation => {
                        table.timers.remove(&owned_tag);
                    }
                    // Superseded by a newer call.
                    _ => return,
                }
            }
            if let Some(action) = deferred {
                action();
            }
        });

        table
            .timers
            .insert(tag.to_string(), PendingTimer { generation, handle });
        drop(table);

        if let Some(action) = run_now {
            action();
        }
    }

    /// Returns true if a window is open for `tag`.
    pub fn is_pending(&self, tag: &str) -> bool {
        lock_table(&self.table)
            .timers
            .get(tag)
            .is_some_and(|timer| !timer.handle.is_finished())
    }

    /// Number of open windows.
    pub fn pending_count(&self) -> usize {
        lock_table(&self.table).timers.len()
    }

    /// Abort every pending timer. Deferred actions never run.
    pub fn cancel_all(&self) {
        let mut table = lock_table(&self.table);
        for (tag, timer) in table.timers.drain() {
            debug!(tag = %tag, "cancelling debounce timer");
            timer.handle.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

impl std::fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// Acquire the timer table, recovering from poison if necessary.
fn lock_table(table: &Mutex<TimerTable>) -> MutexGuard<'_, TimerTable> {
    table.lock().unwrap_or_else(|poisoned| {
        warn!("debounce table mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Box<dyn FnOnce() + Send>) {
        let count = Arc::new(AtomicUsize::new(0));
        let shared = count.clone();
        let make = move || {
            let shared = shared.clone();
            Box::new(move || {
                shared.fetch_add(1, Ordering::SeqCst);
            }) as Box<dyn FnOnce() + Send>
        };
        (count, make)
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_runs_first_call_only() {
        let debouncer = Debouncer::new();
        let (count, action) = counter();
        let window = Duration::from_millis(100);

        debouncer.debounce(action(), "t", window, true);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(25)).await;
        debouncer.debounce(action(), "t", window, true);
        tokio::time::sleep(Duration::from_millis(25)).await;
        debouncer.debounce(action(), "t", window, true);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Trailing calls are dropped, not queued.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!debouncer.is_pending("t"));

        debouncer.debounce(action(), "t", window, true);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_window_rolls_with_each_call() {
        let debouncer = Debouncer::new();
        let (count, action) = counter();
        let window = Duration::from_millis(100);

        debouncer.debounce(action(), "t", window, true);
        tokio::time::sleep(Duration::from_millis(80)).await;
        debouncer.debounce(action(), "t", window, true);
        tokio::time::sleep(Duration::from_millis(80)).await;
        // 160ms after the first call, but only 80ms after the last one.
        debouncer.debounce(action(), "t", window, true);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_runs_once_after_last_call() {
        let debouncer = Debouncer::new();
        let (count, action) = counter();
        let window = Duration::from_millis(100);

        for _ in 0..3 {
            debouncer.debounce(action(), "search", window, false);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);

        // 80ms after the last call: still inside the window.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(debouncer.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tags_are_independent() {
        let debouncer = Debouncer::new();
        let (count, action) = counter();
        let window = Duration::from_millis(100);

        debouncer.debounce(action(), "a", window, true);
        debouncer.debounce(action(), "b", window, true);
        debouncer.debounce(action(), "a", window, true);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(debouncer.pending_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_drops_deferred_actions() {
        let debouncer = Debouncer::new();
        let (count, action) = counter();

        debouncer.debounce(action(), "a", Duration::from_millis(100), false);
        debouncer.debounce(action(), "b", Duration::from_millis(100), false);
        debouncer.cancel_all();
        assert_eq!(debouncer.pending_count(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
