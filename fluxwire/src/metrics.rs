//! Per-instance counters for writers and readers

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Mean of `sum` over `count`, 0 when nothing was recorded
fn average(sum: &AtomicU64, count: &AtomicU64) -> f64 {
    let count = count.load(Ordering::Relaxed);
    if count == 0 {
        0.0
    } else {
        sum.load(Ordering::Relaxed) as f64 / count as f64
    }
}

/// Counters of one [`Writer`](crate::Writer)
#[derive(Debug, Default)]
pub struct WriterMetrics {
    writes: AtomicU64,
    messages: AtomicU64,
    bytes: AtomicU64,
    batches: AtomicU64,
    errors: AtomicU64,
    retries: AtomicU64,
    batch_latency_sum: AtomicU64,
    batch_latency_count: AtomicU64,
}

impl WriterMetrics {
    /// A `write_messages` call
    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    /// A batch acknowledged by its partition leader
    pub fn record_batch(&self, messages: u64, bytes: u64, latency: Duration) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.messages.fetch_add(messages, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        self.batch_latency_sum
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
        self.batch_latency_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// A batch that failed for good
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WriterStats {
        let batches = self.batches.load(Ordering::Relaxed);
        let messages = self.messages.load(Ordering::Relaxed);
        WriterStats {
            writes: self.writes.load(Ordering::Relaxed),
            messages,
            bytes: self.bytes.load(Ordering::Relaxed),
            batches,
            errors: self.errors.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            average_batch_size: if batches == 0 {
                0.0
            } else {
                messages as f64 / batches as f64
            },
            average_batch_latency_us: average(&self.batch_latency_sum, &self.batch_latency_count),
        }
    }
}

/// Writer counters at a point in time
#[derive(Debug, Clone, PartialEq)]
pub struct WriterStats {
    pub writes: u64,
    pub messages: u64,
    pub bytes: u64,
    pub batches: u64,
    pub errors: u64,
    pub retries: u64,
    pub average_batch_size: f64,
    pub average_batch_latency_us: f64,
}

/// Counters of one [`Reader`](crate::Reader)
#[derive(Debug)]
pub struct ReaderMetrics {
    fetches: AtomicU64,
    messages: AtomicU64,
    bytes: AtomicU64,
    errors: AtomicU64,
    offset_resets: AtomicU64,
    rebalances: AtomicU64,
    commits: AtomicU64,
    fetch_latency_sum: AtomicU64,
    fetch_latency_count: AtomicU64,
    offset: AtomicI64,
    lag: AtomicI64,
}

impl Default for ReaderMetrics {
    fn default() -> Self {
        Self {
            fetches: AtomicU64::new(0),
            messages: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            offset_resets: AtomicU64::new(0),
            rebalances: AtomicU64::new(0),
            commits: AtomicU64::new(0),
            fetch_latency_sum: AtomicU64::new(0),
            fetch_latency_count: AtomicU64::new(0),
            offset: AtomicI64::new(-1),
            lag: AtomicI64::new(-1),
        }
    }
}

impl ReaderMetrics {
    pub fn record_fetch(&self, latency: Duration) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.fetch_latency_sum
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
        self.fetch_latency_count.fetch_add(1, Ordering::Relaxed);
    }

    /// A message handed to the caller
    pub fn record_message(&self, bytes: u64, offset: i64, high_watermark: i64) {
        self.messages.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        self.offset.store(offset, Ordering::Relaxed);
        if high_watermark >= 0 {
            self.lag
                .store((high_watermark - offset - 1).max(0), Ordering::Relaxed);
        }
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_offset_reset(&self) {
        self.offset_resets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rebalance(&self) {
        self.rebalances.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ReaderStats {
        ReaderStats {
            fetches: self.fetches.load(Ordering::Relaxed),
            messages: self.messages.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            offset_resets: self.offset_resets.load(Ordering::Relaxed),
            rebalances: self.rebalances.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            average_fetch_latency_us: average(&self.fetch_latency_sum, &self.fetch_latency_count),
            offset: self.offset.load(Ordering::Relaxed),
            lag: self.lag.load(Ordering::Relaxed),
            queue_length: 0,
        }
    }
}

/// Reader counters at a point in time
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderStats {
    pub fetches: u64,
    pub messages: u64,
    pub bytes: u64,
    pub errors: u64,
    pub offset_resets: u64,
    pub rebalances: u64,
    pub commits: u64,
    pub average_fetch_latency_us: f64,
    /// Offset of the last message returned, -1 before the first
    pub offset: i64,
    /// Messages between the last one returned and the high watermark
    pub lag: i64,
    /// Messages fetched ahead and not yet returned
    pub queue_length: usize,
}
