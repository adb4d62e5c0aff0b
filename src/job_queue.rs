//! The job queue barrier.
//!
//! A [`JobQueue`] holds a fixed set of jobs for one distribution cycle and the
//! per-core state needed to drain it cooperatively. A cycle looks like this:
//!
//! 1. The controller calls [`JobQueue::set_core_mask_and_wait_type`] to pick
//!    the participating cores and the wait strategy.
//! 2. Every participating core repeatedly calls [`JobQueue::run`], claiming
//!    batches of at most its granularity, until the queue reports drained.
//! 3. Each core then calls [`JobQueue::finish`], which publishes its writes,
//!    clears its active flag and (under [`SyncType::PerCore`]) parks until
//!    every job is done.
//! 4. The controller calls [`JobQueue::wait`] to observe global completion.
//!
//! "Globally done" (`done_jobs == num_jobs`) and "all participants through"
//! (no active flag left) are tracked separately and can be polled independently.

use std::ops::Range;
use std::sync::atomic::{self, AtomicBool, AtomicU8, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::containers::SafeArray;
use crate::core_id::{CoreId, CoreIdMask, CoreInfo, MAX_CORES};
use crate::event::CompletionEvent;
use crate::job::Job;
#[cfg(feature = "metrics")]
use crate::metrics::QueueMetrics;

/// Batch size a core claims per acquisition unless configured otherwise.
pub const DEFAULT_GRANULARITY: u32 = 8;

/// Configuration for a job queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobQueueConfig {
    /// Number of platform cores reconfiguration walks. Default: detected core count.
    pub num_cores: usize,
    /// Initial per-core granularity. Default: 8.
    pub default_granularity: u32,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            num_cores: CoreInfo::num_cores(),
            default_granularity: DEFAULT_GRANULARITY,
        }
    }
}

/// How completion is awaited by workers and controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum SyncType {
    /// Finishing cores park on the shared completion event.
    #[default]
    PerCore = 1,
    /// Reserved. Every use site fails immediately.
    PerThread = 2,
    /// Nobody blocks; the caller's own protocol guarantees completion.
    NoWait = 3,
}

impl SyncType {
    /// Numeric rank of the strategy.
    pub fn rank(self) -> u8 {
        self as u8
    }

    fn from_rank(rank: u8) -> Self {
        match rank {
            1 => SyncType::PerCore,
            2 => SyncType::PerThread,
            3 => SyncType::NoWait,
            other => unreachable!("invalid sync type rank {}", other),
        }
    }
}

/// Configuration state of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    /// Constructed, never configured.
    Idle = 0,
    /// Mask and wait type were just (re)established.
    Configured = 1,
    /// At least one batch has been claimed this cycle.
    Running = 2,
    /// Every job of the cycle has completed.
    Finished = 3,
}

impl Status {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Status::Idle,
            1 => Status::Configured,
            2 => Status::Running,
            3 => Status::Finished,
            other => unreachable!("invalid queue status {}", other),
        }
    }
}

/// Result of a single [`JobQueue::run`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunStatus {
    /// Jobs executed by this call.
    pub finished: u32,
    /// No claimable job remains.
    pub drained: bool,
}

#[cold]
#[track_caller]
fn unsupported_sync(site: &str) -> ! {
    panic!("{}: SyncType::PerThread is not implemented", site);
}

/// Multi-core work-distribution barrier over a fixed set of jobs.
pub struct JobQueue {
    jobs: Vec<Job>,
    /// Index of the next unclaimed job.
    cursor: AtomicU32,
    done_jobs: AtomicU32,
    active_cores: SafeArray<AtomicBool, MAX_CORES>,
    granularity: SafeArray<AtomicU32, MAX_CORES>,
    mask: AtomicU32,
    sync_type: AtomicU8,
    status: AtomicU8,
    event: CompletionEvent,
    num_cores: usize,
    #[cfg(feature = "metrics")]
    metrics: QueueMetrics,
}

impl JobQueue {
    /// Creates an empty queue for the detected platform cores.
    pub fn new() -> Self {
        Self::with_config(JobQueueConfig::default())
    }

    /// Creates an empty queue with custom configuration.
    pub fn with_config(config: JobQueueConfig) -> Self {
        let granularity = config.default_granularity.max(1);
        JobQueue {
            jobs: Vec::new(),
            cursor: AtomicU32::new(0),
            done_jobs: AtomicU32::new(0),
            active_cores: SafeArray::from_fn(|_| AtomicBool::new(false)),
            granularity: SafeArray::from_fn(|_| AtomicU32::new(granularity)),
            mask: AtomicU32::new(0),
            sync_type: AtomicU8::new(SyncType::default().rank()),
            status: AtomicU8::new(Status::Idle as u8),
            event: CompletionEvent::new(),
            num_cores: config.num_cores.clamp(1, MAX_CORES),
            #[cfg(feature = "metrics")]
            metrics: QueueMetrics::new(),
        }
    }

    /// Creates a queue pre-filled with `jobs`.
    pub fn from_jobs<I>(config: JobQueueConfig, jobs: I) -> Self
    where
        I: IntoIterator<Item = Job>,
    {
        let mut queue = Self::with_config(config);
        for job in jobs {
            queue.push(job);
        }
        queue
    }

    /// Registers a job for subsequent cycles.
    ///
    /// The queue drops back to [`Status::Idle`]; reconfigure before the next run.
    pub fn push(&mut self, job: impl Into<Job>) {
        assert!(
            self.jobs.len() < u32::MAX as usize,
            "job queue holds at most u32::MAX jobs"
        );
        self.jobs.push(job.into());
        self.invalidate_cycle();
    }

    /// Removes every registered job and rewinds the cycle counters.
    pub fn clear(&mut self) {
        self.jobs.clear();
        *self.cursor.get_mut() = 0;
        *self.done_jobs.get_mut() = 0;
        self.invalidate_cycle();
    }

    /// A changed job set invalidates any completion signalled for the old one.
    fn invalidate_cycle(&mut self) {
        *self.status.get_mut() = Status::Idle as u8;
        self.event.reset();
    }

    /// Reconfigures which cores participate in the next cycle and how
    /// completion is awaited.
    ///
    /// Must not be called while a run is in flight, including cores that are
    /// still retiring: wait for [`is_all_participant_through`](Self::is_all_participant_through)
    /// after the previous cycle is done.
    pub fn set_core_mask_and_wait_type(&self, mask: CoreIdMask, sync: SyncType) {
        self.status.store(Status::Configured as u8, Ordering::Release);
        self.mask.store(mask.bits(), Ordering::Relaxed);
        self.event.reset();
        self.cursor.store(0, Ordering::Relaxed);

        for i in 0..self.num_cores {
            let core = CoreId::from_index(i);
            self.active_cores[core].store(mask.is_on(core), Ordering::Relaxed);
            self.done_jobs.store(0, Ordering::Relaxed);
        }
        self.sync_type.store(sync.rank(), Ordering::Relaxed);

        if self.jobs.is_empty() {
            self.status.store(Status::Finished as u8, Ordering::Release);
            self.event.set();
        }

        #[cfg(feature = "metrics")]
        self.metrics.cycles.fetch_add(1, Ordering::Relaxed);

        debug!(
            mask = mask.bits(),
            ?sync,
            jobs = self.jobs.len(),
            "job queue reconfigured"
        );
    }

    /// Sets the batch size `core` claims per acquisition. `0` becomes `1`.
    pub fn set_granularity(&self, core: CoreId, x: u32) {
        self.granularity[core].store(x.max(1), Ordering::Relaxed);
    }

    /// Sets the same granularity for every core.
    pub fn set_granularity_all(&self, x: u32) {
        for i in 0..self.granularity.len() {
            self.set_granularity(CoreId::from_index(i), x);
        }
    }

    pub fn granularity(&self, core: CoreId) -> u32 {
        self.granularity[core].load(Ordering::Relaxed)
    }

    /// Claims and executes one batch on behalf of `worker`.
    ///
    /// The batch is at most `size` jobs and at most the core's granularity.
    /// `None` runs as the calling thread's registered core (see
    /// [`CoreInfo::current_core_id`]). Safe to call from many cores at once;
    /// each job is claimed by exactly one caller.
    pub fn run(&self, size: u32, worker: Option<CoreId>) -> RunStatus {
        let core = worker.unwrap_or_else(CoreInfo::current_core_id);
        match self.claim(size, core) {
            Some(batch) => RunStatus {
                finished: self.execute(batch, core),
                drained: self.is_drained(),
            },
            None => RunStatus {
                finished: 0,
                drained: self.is_drained(),
            },
        }
    }

    /// Drains the whole queue on the calling thread.
    ///
    /// Intended for degenerate single-core execution where no other core is
    /// engaged. Returns the number of jobs executed.
    ///
    /// # Panics
    ///
    /// In debug builds, panics if the executed count differs from the number
    /// of registered jobs, i.e. another core took part.
    pub fn run_all(&self) -> u32 {
        let size = self.num_jobs();
        let mut finished = 0;
        loop {
            let status = self.run(size, None);
            finished += status.finished;
            if status.drained {
                break;
            }
        }
        debug_assert_eq!(
            finished, size,
            "run_all executed {} of {} jobs",
            finished, size
        );
        finished
    }

    /// True once no participating core is still active.
    pub fn is_all_participant_through(&self) -> bool {
        self.active_cores
            .iter()
            .all(|active| !active.load(Ordering::Acquire))
    }

    /// True once every registered job of the cycle has completed.
    pub fn is_done(&self) -> bool {
        self.done_jobs.load(Ordering::Acquire) == self.num_jobs()
    }

    /// Retires `core` from the current cycle.
    ///
    /// Publishes all of the core's prior writes, clears its active flag, then
    /// parks according to the wait strategy.
    pub fn finish(&self, core: CoreId) {
        atomic::fence(Ordering::SeqCst);
        self.active_cores[core].store(false, Ordering::Release);

        #[cfg(feature = "metrics")]
        self.metrics.finishes.fetch_add(1, Ordering::Relaxed);

        debug!(%core, "core finished");
        self.wait_at_worker();
    }

    /// Worker-side park, called at the end of [`finish`](Self::finish).
    ///
    /// # Panics
    ///
    /// Panics under [`SyncType::PerThread`].
    pub fn wait_at_worker(&self) {
        atomic::fence(Ordering::SeqCst);

        match self.sync_type() {
            SyncType::PerCore => {
                if !self.is_done() {
                    self.park();
                }
            }
            SyncType::PerThread => unsupported_sync("wait_at_worker"),
            SyncType::NoWait => {}
        }
    }

    /// Controller-side blocking wait for global completion.
    ///
    /// # Panics
    ///
    /// Panics under [`SyncType::PerThread`].
    pub fn wait(&self) {
        let sync = self.sync_type();
        if sync.rank() >= 2 {
            if sync != SyncType::PerThread {
                return;
            }
            unsupported_sync("wait");
        }
        if !self.is_done() {
            self.park();
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    ///
    /// Returns false only if the timeout elapsed before completion. A wakeup
    /// that does not leave the queue done keeps waiting until the deadline.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let sync = self.sync_type();
        if sync.rank() >= 2 {
            if sync != SyncType::PerThread {
                return true;
            }
            unsupported_sync("wait_timeout");
        }

        let deadline = Instant::now() + timeout;
        while !self.is_done() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            self.event.wait_timeout(remaining);
        }
        true
    }

    pub fn num_jobs(&self) -> u32 {
        self.jobs.len() as u32
    }

    pub fn done_jobs(&self) -> u32 {
        self.done_jobs.load(Ordering::Acquire)
    }

    pub fn num_cores(&self) -> usize {
        self.num_cores
    }

    pub fn mask(&self) -> CoreIdMask {
        CoreIdMask::from_bits(self.mask.load(Ordering::Relaxed))
    }

    pub fn sync_type(&self) -> SyncType {
        SyncType::from_rank(self.sync_type.load(Ordering::Relaxed))
    }

    pub fn status(&self) -> Status {
        Status::from_raw(self.status.load(Ordering::Acquire))
    }

    pub fn is_core_active(&self, core: CoreId) -> bool {
        self.active_cores[core].load(Ordering::Acquire)
    }

    /// True once every job of the cycle has been claimed.
    pub fn is_drained(&self) -> bool {
        self.cursor.load(Ordering::Acquire) >= self.num_jobs()
    }

    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> &QueueMetrics {
        &self.metrics
    }

    /// Claims the next batch for `core` with a single cursor update.
    pub(crate) fn claim(&self, size: u32, core: CoreId) -> Option<Range<u32>> {
        let want = size.min(self.granularity(core));
        if want == 0 {
            return None;
        }

        let total = self.num_jobs();
        let claimed = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |next| {
                (next < total).then(|| next + want.min(total - next))
            });

        match claimed {
            Ok(start) => {
                let end = start + want.min(total - start);
                let _ = self.status.compare_exchange(
                    Status::Configured as u8,
                    Status::Running as u8,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                );
                #[cfg(feature = "metrics")]
                self.metrics.batches_claimed.fetch_add(1, Ordering::Relaxed);
                trace!(%core, start, end, "claimed batch");
                Some(start..end)
            }
            Err(_) => {
                #[cfg(feature = "metrics")]
                self.metrics.empty_claims.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Executes a claimed batch and publishes its completion.
    pub(crate) fn execute(&self, batch: Range<u32>, core: CoreId) -> u32 {
        let mut finished = 0;
        for idx in batch {
            let ok = self.jobs[idx as usize].execute(core);
            #[cfg(feature = "metrics")]
            {
                if !ok {
                    self.metrics.jobs_panicked.fetch_add(1, Ordering::Relaxed);
                }
            }
            #[cfg(not(feature = "metrics"))]
            let _ = ok;
            finished += 1;
        }

        let total = self.num_jobs();
        let done = self.done_jobs.fetch_add(finished, Ordering::AcqRel) + finished;
        debug_assert!(done <= total, "done jobs {} exceed total {}", done, total);

        #[cfg(feature = "metrics")]
        self.metrics
            .jobs_completed
            .fetch_add(finished as u64, Ordering::Relaxed);

        if done == total {
            self.status.store(Status::Finished as u8, Ordering::Release);
            self.event.set();
            debug!(%core, total, "all jobs done");
        }
        finished
    }

    fn park(&self) {
        #[cfg(feature = "metrics")]
        self.metrics.parks.fetch_add(1, Ordering::Relaxed);
        trace!(core = %CoreInfo::current_core_id(), "parking on completion event");
        self.event.wait();
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        JobQueue::new()
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("num_jobs", &self.num_jobs())
            .field("done_jobs", &self.done_jobs())
            .field("mask", &self.mask())
            .field("sync_type", &self.sync_type())
            .field("status", &self.status())
            .finish()
    }
}
