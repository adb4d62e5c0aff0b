#[cfg(feature = "metrics")]
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "metrics")]
use std::time::Instant;

/// Optional counters for a job queue.
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct QueueMetrics {
    /// Total number of jobs completed.
    pub jobs_completed: AtomicU64,
    /// Jobs whose work panicked (still counted as completed).
    pub jobs_panicked: AtomicU64,
    /// Successful batch claims.
    pub batches_claimed: AtomicU64,
    /// Claim attempts that found nothing left.
    pub empty_claims: AtomicU64,
    /// Cores that retired via `finish`.
    pub finishes: AtomicU64,
    /// Times a caller actually blocked on the completion event.
    pub parks: AtomicU64,
    /// Number of reconfigurations.
    pub cycles: AtomicU64,
    /// Time when metrics collection started.
    pub start_time: Instant,
}

#[cfg(feature = "metrics")]
impl QueueMetrics {
    pub fn new() -> Self {
        Self {
            jobs_completed: AtomicU64::new(0),
            jobs_panicked: AtomicU64::new(0),
            batches_claimed: AtomicU64::new(0),
            empty_claims: AtomicU64::new(0),
            finishes: AtomicU64::new(0),
            parks: AtomicU64::new(0),
            cycles: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Returns a snapshot of current metrics values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_panicked: self.jobs_panicked.load(Ordering::Relaxed),
            batches_claimed: self.batches_claimed.load(Ordering::Relaxed),
            empty_claims: self.empty_claims.load(Ordering::Relaxed),
            finishes: self.finishes.load(Ordering::Relaxed),
            parks: self.parks.load(Ordering::Relaxed),
            cycles: self.cycles.load(Ordering::Relaxed),
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

#[cfg(feature = "metrics")]
impl Default for QueueMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[cfg(feature = "metrics")]
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub jobs_completed: u64,
    pub jobs_panicked: u64,
    pub batches_claimed: u64,
    pub empty_claims: u64,
    pub finishes: u64,
    pub parks: u64,
    pub cycles: u64,
    pub elapsed_seconds: f64,
}

#[cfg(feature = "metrics")]
impl MetricsSnapshot {
    /// Calculates jobs per second throughput.
    pub fn jobs_per_second(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.jobs_completed as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }

    /// Average number of jobs per successful claim.
    pub fn mean_batch_size(&self) -> f64 {
        if self.batches_claimed > 0 {
            self.jobs_completed as f64 / self.batches_claimed as f64
        } else {
            0.0
        }
    }
}
