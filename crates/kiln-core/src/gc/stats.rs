//! Collector statistics

use std::time::Duration;

/// Result of one collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcRunStats {
    /// Objects found reachable
    pub marked: usize,
    /// Objects finalized and reclaimed
    pub freed: usize,
    /// Bytes reclaimed
    pub freed_bytes: usize,
    /// Live objects after the collection
    pub live_objects: usize,
    /// Live bytes after the collection
    pub live_bytes: usize,
    /// Time spent in the collection
    pub pause_time: Duration,
}

/// Cumulative collector statistics
#[derive(Debug, Clone, Default)]
pub struct GcStats {
    /// Total number of collections
    pub collections: usize,

    /// Total objects freed
    pub objects_freed: usize,

    /// Total bytes freed
    pub bytes_freed: usize,

    /// Total objects allocated
    pub objects_allocated: usize,

    /// Total pause time across all collections
    pub total_pause_time: Duration,

    /// Last collection duration
    pub last_pause_time: Duration,

    /// Maximum pause time
    pub max_pause_time: Duration,

    /// Objects marked in last collection
    pub last_marked_count: usize,

    /// Objects freed in last collection
    pub last_freed_count: usize,

    /// Live objects after last collection
    pub live_objects: usize,

    /// Live bytes after last collection
    pub live_bytes: usize,
}

impl GcStats {
    /// Update statistics after a collection
    pub(crate) fn update(&mut self, run: &GcRunStats) {
        self.collections += 1;
        self.objects_freed += run.freed;
        self.bytes_freed += run.freed_bytes;
        self.total_pause_time += run.pause_time;
        self.last_pause_time = run.pause_time;

        if run.pause_time > self.max_pause_time {
            self.max_pause_time = run.pause_time;
        }

        self.last_marked_count = run.marked;
        self.last_freed_count = run.freed;
        self.live_objects = run.live_objects;
        self.live_bytes = run.live_bytes;
    }

    /// Average pause time
    pub fn avg_pause_time(&self) -> Duration {
        if self.collections == 0 {
            return Duration::ZERO;
        }
        self.total_pause_time / self.collections as u32
    }

    /// Fraction of objects that survived the last collection (0.0 to 1.0)
    pub fn survival_rate(&self) -> f64 {
        let total = self.live_objects + self.last_freed_count;
        if total == 0 {
            return 0.0;
        }
        self.live_objects as f64 / total as f64
    }
}
