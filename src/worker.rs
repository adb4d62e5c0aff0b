//! Core worker threads.
//!
//! A [`WorkerPool`] owns one OS thread per core. Each thread registers itself
//! as its core, waits for a queue to be dispatched to it, drains that queue
//! batch by batch and retires with [`JobQueue::finish`]. The pool never decides
//! which cores take part: that is the queue's mask, fixed by the controller.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, warn};

use crate::PinningStrategy;
use crate::core_id::{CoreId, CoreInfo, MAX_CORES};
use crate::job_queue::{JobQueue, RunStatus};
use crate::perf::PerfJobQueue;

/// Something a core can drain: a barrier plus a way to run one batch on it.
pub trait JobRunner: Send + Sync {
    /// The barrier whose mask, counters and wait strategy govern the cycle.
    fn queue(&self) -> &JobQueue;

    /// Claims and executes one batch on behalf of `core`.
    fn run_batch(&self, size: u32, core: CoreId) -> RunStatus;
}

impl JobRunner for JobQueue {
    fn queue(&self) -> &JobQueue {
        self
    }

    fn run_batch(&self, size: u32, core: CoreId) -> RunStatus {
        self.run(size, Some(core))
    }
}

impl JobRunner for PerfJobQueue {
    fn queue(&self) -> &JobQueue {
        self
    }

    fn run_batch(&self, size: u32, core: CoreId) -> RunStatus {
        self.run(size, Some(core))
    }
}

type Dispatch = Arc<dyn JobRunner>;

/// A thread bound to one core.
pub struct Worker {
    core: CoreId,
    sender: Option<Sender<Dispatch>>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Starts the thread for `core`, optionally pinned to a logical processor.
    pub fn new(core: CoreId, pin: Option<core_affinity::CoreId>) -> Self {
        let (sender, receiver) = channel::unbounded::<Dispatch>();

        let handle = thread::spawn(move || {
            if let Some(id) = pin {
                if !core_affinity::set_for_current(id) {
                    debug!(%core, "failed to pin worker thread");
                }
            }
            CoreInfo::set_current_core_id(core);
            Worker::run_loop(core, receiver);
        });

        Worker {
            core,
            sender: Some(sender),
            handle: Some(handle),
        }
    }

    /// Drains every dispatched queue until the pool closes the channel.
    fn run_loop(core: CoreId, receiver: Receiver<Dispatch>) {
        for runner in receiver.iter() {
            Worker::drain(core, runner.as_ref());
        }
    }

    fn drain(core: CoreId, runner: &dyn JobRunner) {
        let queue = runner.queue();
        let size = queue.num_jobs();
        let mut finished = 0;
        loop {
            let status = runner.run_batch(size, core);
            finished += status.finished;
            if status.drained {
                break;
            }
        }
        debug!(%core, finished, "core drained queue");
        queue.finish(core);
    }

    /// Returns the worker's core.
    pub fn core(&self) -> CoreId {
        self.core
    }

    fn send(&self, runner: Dispatch) -> bool {
        match &self.sender {
            Some(sender) => sender.send(runner).is_ok(),
            None => false,
        }
    }

    /// Closes the channel and waits for the thread to finish.
    pub fn join(mut self) -> thread::Result<()> {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            handle.join()
        } else {
            Ok(())
        }
    }
}

/// One worker thread per core.
pub struct WorkerPool {
    workers: Vec<Worker>,
}

impl WorkerPool {
    /// Creates an unpinned pool for cores `0..num_cores`.
    pub fn new(num_cores: usize) -> Self {
        Self::new_with_strategy(num_cores, PinningStrategy::None)
    }

    /// Creates a pool whose threads are pinned according to `strategy`.
    pub fn new_with_strategy(num_cores: usize, strategy: PinningStrategy) -> Self {
        let num_cores = num_cores.clamp(1, MAX_CORES);
        let logical = match strategy {
            PinningStrategy::None => Vec::new(),
            _ => core_affinity::get_core_ids().unwrap_or_default(),
        };

        let workers = (0..num_cores)
            .map(|i| {
                let pin = match strategy {
                    PinningStrategy::None => None,
                    PinningStrategy::Linear => logical.get(i).copied(),
                    // Physical cores only; wrap if we run out.
                    PinningStrategy::AvoidSMT => logical
                        .get(i * 2)
                        .or_else(|| logical.get(i % logical.len().max(1)))
                        .copied(),
                };
                Worker::new(CoreId::from_index(i), pin)
            })
            .collect();

        debug!(num_cores, ?strategy, "worker pool started");
        WorkerPool { workers }
    }

    /// Hands `runner` to every core in its queue's mask.
    ///
    /// Returns the number of cores engaged. Cores in the mask that have no
    /// worker in this pool are skipped and stay active; the caller must not
    /// include them.
    ///
    /// Before reconfiguring the queue for another cycle the controller must
    /// wait for [`JobQueue::is_all_participant_through`] as well as
    /// [`JobQueue::wait`]. A core can still be inside `finish` after the last
    /// job completes, and reconfiguring under it lets it clear a flag that
    /// belongs to the next cycle.
    pub fn dispatch<R>(&self, runner: Arc<R>) -> usize
    where
        R: JobRunner + 'static,
    {
        let mask = runner.queue().mask();
        let runner: Dispatch = runner;

        let mut engaged = 0;
        for worker in self.workers.iter().filter(|w| mask.is_on(w.core)) {
            if worker.send(Arc::clone(&runner)) {
                engaged += 1;
            } else {
                warn!(core = %worker.core, "worker is gone, dispatch skipped");
            }
        }
        if engaged < mask.count() {
            warn!(
                engaged,
                requested = mask.count(),
                "dispatch mask names cores without a live worker"
            );
        }
        debug!(engaged, mask = mask.bits(), "queue dispatched");
        engaged
    }

    /// Returns the number of worker threads in the pool.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Shuts down the pool and waits for all threads to finish.
    ///
    /// Returns Ok if all workers shut down cleanly, or Err with the number of
    /// workers that panicked.
    pub fn shutdown(self) -> Result<(), usize> {
        let mut failed_count = 0;
        for worker in self.workers {
            let core = worker.core();
            if worker.join().is_err() {
                failed_count += 1;
                warn!(%core, "worker panicked during execution");
            }
        }

        if failed_count > 0 {
            Err(failed_count)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_id::CoreIdMask;
    use crate::job::Job;
    use crate::job_queue::{JobQueueConfig, SyncType};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(num_cores: usize) -> JobQueueConfig {
        JobQueueConfig {
            num_cores,
            default_granularity: 2,
        }
    }

    #[test]
    fn test_worker_pool_creation() {
        let pool = WorkerPool::new(4);
        assert_eq!(pool.size(), 4);
        pool.shutdown().expect("Shutdown failed");
    }

    #[test]
    fn test_worker_pool_execution() {
        let pool = WorkerPool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));

        let num_jobs = 10;
        let queue = Arc::new(JobQueue::from_jobs(
            config(2),
            (0..num_jobs).map(|_| {
                let counter = counter.clone();
                Job::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            }),
        ));
        queue.set_core_mask_and_wait_type(CoreIdMask::all(2), SyncType::PerCore);

        assert_eq!(pool.dispatch(queue.clone()), 2);
        queue.wait();

        assert_eq!(counter.load(Ordering::SeqCst), num_jobs);
        assert!(queue.is_done());
        pool.shutdown().expect("Shutdown failed");
    }

    #[test]
    fn test_jobs_see_their_core() {
        let pool = WorkerPool::new(3);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let queue = Arc::new(JobQueue::from_jobs(
            config(3),
            (0..12).map(|_| {
                let seen = seen.clone();
                Job::new(move |core| seen.lock().push(core.index()))
            }),
        ));
        // Core 1 does not participate
        let mask = CoreIdMask::all(3).off(CoreId::new(1).unwrap());
        queue.set_core_mask_and_wait_type(mask, SyncType::PerCore);

        assert_eq!(pool.dispatch(queue.clone()), 2);
        queue.wait();

        let seen = seen.lock();
        assert_eq!(seen.len(), 12);
        assert!(seen.iter().all(|&c| c != 1));
        pool.shutdown().expect("Shutdown failed");
    }
}
