//! Integration tests for the job queue barrier.

use crate::{
    CoreId, CoreIdMask, Heap, Job, JobQueue, JobQueueConfig, PerfJobQueue, ProcessMeter,
    SyncType, WorkerPool,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

fn core(i: usize) -> CoreId {
    CoreId::new(i).unwrap()
}

fn counting_jobs(n: usize, hits: &Arc<AtomicUsize>) -> Vec<Job> {
    (0..n)
        .map(|_| {
            let hits = hits.clone();
            Job::new(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect()
}

#[test]
fn test_two_core_scenario() {
    let hits = Arc::new(AtomicUsize::new(0));
    let queue = Arc::new(JobQueue::from_jobs(
        JobQueueConfig {
            num_cores: 2,
            default_granularity: 8,
        },
        counting_jobs(16, &hits),
    ));
    let mask = CoreIdMask::NONE.on(core(0)).on(core(1));
    queue.set_core_mask_and_wait_type(mask, SyncType::PerCore);

    // Controller blocks until both cores are through
    let controller = {
        let queue = queue.clone();
        thread::spawn(move || queue.wait())
    };

    let cores: Vec<_> = [core(0), core(1)]
        .into_iter()
        .map(|c| {
            let queue = queue.clone();
            thread::spawn(move || {
                let status = queue.run(16, Some(c));
                assert_eq!(status.finished, 8);
                queue.finish(c);
            })
        })
        .collect();

    for handle in cores {
        handle.join().expect("core thread panicked");
    }
    controller.join().expect("controller panicked");

    assert_eq!(queue.done_jobs(), 16);
    assert!(queue.is_all_participant_through());
    assert!(queue.is_done());
    assert_eq!(hits.load(Ordering::SeqCst), 16);
}

#[test]
fn test_completion_signals_agree() {
    let hits = Arc::new(AtomicUsize::new(0));
    let queue = Arc::new(JobQueue::from_jobs(
        JobQueueConfig {
            num_cores: 4,
            default_granularity: 3,
        },
        counting_jobs(50, &hits),
    ));
    let pool = WorkerPool::new(4);

    for _ in 0..5 {
        queue.set_core_mask_and_wait_type(CoreIdMask::all(4), SyncType::PerCore);
        assert!(!queue.is_done());
        assert!(!queue.is_all_participant_through());

        pool.dispatch(queue.clone());
        queue.wait();

        // Flags clear right before each core parks; give the last one a moment
        while !queue.is_all_participant_through() {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(queue.is_done());
        assert!(queue.is_all_participant_through());
        // Both stay true until the next reconfiguration
        thread::sleep(Duration::from_millis(5));
        assert!(queue.is_done());
        assert!(queue.is_all_participant_through());
    }

    assert_eq!(hits.load(Ordering::SeqCst), 250);
    pool.shutdown().expect("Shutdown failed");
}

#[test]
fn test_done_jobs_monotone_and_bounded() {
    let queue = Arc::new(JobQueue::from_jobs(
        JobQueueConfig {
            num_cores: 3,
            default_granularity: 1,
        },
        (0..200).map(|_| Job::new(|_| std::hint::black_box(()))),
    ));
    queue.set_core_mask_and_wait_type(CoreIdMask::all(3), SyncType::NoWait);

    let observer = {
        let queue = queue.clone();
        thread::spawn(move || {
            let mut last = 0;
            while !queue.is_done() {
                let now = queue.done_jobs();
                assert!(now >= last, "done jobs went backwards");
                assert!(now <= queue.num_jobs());
                last = now;
            }
        })
    };

    let cores: Vec<_> = (0..3)
        .map(|i| {
            let queue = queue.clone();
            thread::spawn(move || {
                while !queue.run(u32::MAX, Some(core(i))).drained {}
                queue.finish(core(i));
            })
        })
        .collect();
    for handle in cores {
        handle.join().unwrap();
    }
    observer.join().unwrap();
    assert_eq!(queue.done_jobs(), 200);
}

#[test]
fn test_perf_queue_with_workers_and_meter() {
    let hits = Arc::new(AtomicUsize::new(0));
    let heap = Heap::new("perf", 1024);
    let mut perf = PerfJobQueue::new(JobQueue::from_jobs(
        JobQueueConfig {
            num_cores: 2,
            default_granularity: 4,
        },
        counting_jobs(32, &hits),
    ));
    perf.initialize("Frame", &heap).unwrap();

    let meter = ProcessMeter::new();
    perf.attach_process_meter(Some(&meter));
    assert_eq!(meter.attached_count(), 3);

    let perf = Arc::new(perf);
    let pool = WorkerPool::new(2);
    perf.set_core_mask_and_wait_type(CoreIdMask::all(2), SyncType::PerCore);
    assert_eq!(pool.dispatch(perf.clone()), 2);
    perf.wait();
    pool.shutdown().expect("Shutdown failed");

    assert_eq!(hits.load(Ordering::SeqCst), 32);
    // Every batch leaves a deque section and a run section on its core's bar
    let sections: usize = (0..2)
        .map(|i| perf.bar(core(i)).unwrap().sections().len())
        .sum();
    assert!(sections >= 16);
    assert!(!meter.chrome_trace_events().is_empty());

    perf.detach_process_meter(Some(&meter));
    assert_eq!(meter.attached_count(), 0);
}
