//! The bounded line queue between the log sources and the rule loop. The
//! producer never blocks: a full queue evicts its oldest entries and counts
//! the drops.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Depth fraction at which the high-water callback fires.
pub const DEFAULT_HIGH_WATER: f64 = 0.8;

type DepthCallback = Box<dyn Fn(usize) + Send + Sync>;
type DropCallback = Box<dyn Fn(u64) + Send + Sync>;

struct QueueInner {
    lines: VecDeque<String>,
    above_high_water: bool,
    peak_depth: usize,
}

/// Drop-oldest FIFO with a high-water mark.
pub struct LineQueue {
    inner: Mutex<QueueInner>,
    capacity: usize,
    high_water_depth: usize,
    dropped_total: AtomicU64,
    on_high_water: Option<DepthCallback>,
    on_drop: Option<DropCallback>,
}

impl LineQueue {
    pub fn new(capacity: usize) -> Self {
        Self::with_callbacks(capacity, DEFAULT_HIGH_WATER, None, None)
    }

    pub fn with_callbacks(
        capacity: usize,
        high_water: f64,
        on_high_water: Option<DepthCallback>,
        on_drop: Option<DropCallback>,
    ) -> Self {
        let capacity = capacity.max(1);
        let high_water_depth = ((capacity as f64) * high_water.clamp(0.0, 1.0)) as usize;
        Self {
            inner: Mutex::new(QueueInner {
                lines: VecDeque::with_capacity(capacity.min(4096)),
                above_high_water: false,
                peak_depth: 0,
            }),
            capacity,
            high_water_depth: high_water_depth.max(1),
            dropped_total: AtomicU64::new(0),
            on_high_water,
            on_drop,
        }
    }

    /// Enqueues one line, evicting the oldest entry when full.
    pub fn enqueue(&self, line: String) {
        self.enqueue_many(std::iter::once(line));
    }

    /// Enqueues a batch. Evictions are counted and reported once for the
    /// whole batch; the high-water callback fires on the upward crossing.
    pub fn enqueue_many<I>(&self, lines: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut evicted: u64 = 0;
        let (crossed, depth) = {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            for line in lines {
                if inner.lines.len() == self.capacity {
                    inner.lines.pop_front();
                    evicted += 1;
                }
                inner.lines.push_back(line);
            }
            let depth = inner.lines.len();
            inner.peak_depth = inner.peak_depth.max(depth);
            let crossed = !inner.above_high_water && depth >= self.high_water_depth;
            if crossed {
                inner.above_high_water = true;
            }
            (crossed, depth)
        };
        if evicted > 0 {
            self.dropped_total.fetch_add(evicted, Ordering::Relaxed);
            if let Some(callback) = &self.on_drop {
                callback(evicted);
            }
        }
        if crossed && let Some(callback) = &self.on_high_water {
            callback(depth);
        }
    }

    /// Removes and returns up to `limit` lines in FIFO order.
    pub fn dequeue_many(&self, limit: usize) -> Vec<String> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let take = limit.min(inner.lines.len());
        let drained: Vec<String> = inner.lines.drain(..take).collect();
        if inner.lines.len() < self.high_water_depth {
            // Re-arm the high-water edge trigger.
            inner.above_high_water = false;
        }
        drained
    }

    pub fn depth(&self) -> usize {
        self.inner.lock().expect("queue lock poisoned").lines.len()
    }

    pub fn peak_depth(&self) -> usize {
        self.inner.lock().expect("queue lock poisoned").peak_depth
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn keeps_the_most_recent_capacity_lines_in_order() {
        let queue = LineQueue::new(3);
        for i in 0..3 {
            queue.enqueue(format!("line {i}"));
        }
        // Queue is full; k more evict the k oldest.
        queue.enqueue_many(["line 3".to_owned(), "line 4".to_owned()]);
        assert_eq!(queue.dropped_total(), 2);
        assert_eq!(
            queue.dequeue_many(10),
            vec!["line 2", "line 3", "line 4"]
        );
    }

    #[test]
    fn dequeue_many_respects_the_limit() {
        let queue = LineQueue::new(10);
        queue.enqueue_many((0..5).map(|i| i.to_string()));
        assert_eq!(queue.dequeue_many(2), vec!["0", "1"]);
        assert_eq!(queue.depth(), 3);
        assert_eq!(queue.dequeue_many(10).len(), 3);
        assert!(queue.dequeue_many(10).is_empty());
    }

    #[test]
    fn high_water_fires_once_per_crossing() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        let queue = LineQueue::with_callbacks(
            10,
            0.8,
            Some(Box::new(move |_| {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            })),
            None,
        );
        queue.enqueue_many((0..8).map(|i| i.to_string()));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        // Still above: no second firing.
        queue.enqueue("again".to_owned());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        // Drain below, rise again: fires again.
        queue.dequeue_many(9);
        queue.enqueue_many((0..8).map(|i| i.to_string()));
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn drop_callback_reports_bulk_counts() {
        let reported = Arc::new(AtomicUsize::new(0));
        let reported_clone = reported.clone();
        let queue = LineQueue::with_callbacks(
            2,
            0.8,
            None,
            Some(Box::new(move |count| {
                reported_clone.fetch_add(count as usize, Ordering::SeqCst);
            })),
        );
        queue.enqueue_many((0..6).map(|i| i.to_string()));
        assert_eq!(reported.load(Ordering::SeqCst), 4);
        assert_eq!(queue.peak_depth(), 2);
    }
}
