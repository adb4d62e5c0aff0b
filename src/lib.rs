//! # corebarrier - Multi-Core Job Queue Barrier
//!
//! A fixed-topology fork/join primitive: a controller picks a set of cores,
//! those cores cooperatively drain a bounded queue of jobs in batches, each
//! core signals when it is through, and any thread can block until the whole
//! queue is done.
//!
//! ## Architecture
//!
//! - **Core ids and masks**: which hardware contexts take part in a cycle
//! - **Job Queue**: the barrier itself (per-core active flags, per-core
//!   granularity, done-job counter, wait strategy, completion event)
//! - **Perf Job Queue**: the same queue with per-core timing bars for a
//!   process meter
//! - **Worker Pool**: one thread per core that drains dispatched queues
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use corebarrier::{CoreIdMask, Job, JobQueue, JobQueueConfig, SyncType, WorkerPool};
//!
//! let config = JobQueueConfig { num_cores: 2, ..JobQueueConfig::default() };
//! let queue = Arc::new(JobQueue::from_jobs(
//!     config,
//!     (0..16).map(|i| Job::new(move |core| println!("job {} on {}", i, core))),
//! ));
//!
//! let pool = WorkerPool::new(2);
//! queue.set_core_mask_and_wait_type(CoreIdMask::all(2), SyncType::PerCore);
//! pool.dispatch(queue.clone());
//! queue.wait();
//! pool.shutdown().unwrap();
//! ```

pub mod containers;
pub mod core_id;
pub mod event;
pub mod heap;
pub mod job;
pub mod job_queue;
pub mod meter;
pub mod metrics;
pub mod perf;
pub mod worker;

use serde::{Deserialize, Serialize};

/// Strategy for pinning worker threads to logical processors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PinningStrategy {
    /// No pinning (standard OS scheduling).
    #[default]
    None,
    /// Linear pinning (core i -> logical processor i).
    Linear,
    /// Pin to physical cores only (even-numbered logical processors), avoiding SMT contention.
    AvoidSMT,
}

pub use core_id::{CoreError, CoreId, CoreIdMask, CoreInfo, MAX_CORES};
pub use event::CompletionEvent;
pub use heap::{Heap, HeapError};
pub use job::Job;
pub use job_queue::{DEFAULT_GRANULARITY, JobQueue, JobQueueConfig, RunStatus, Status, SyncType};
pub use meter::{Color4f, ProcessMeter, ProcessMeterBar};
pub use perf::PerfJobQueue;
pub use worker::{JobRunner, WorkerPool};

#[cfg(test)]
mod tests;
