use corebarrier::{
    CoreIdMask, CoreInfo, Heap, Job, JobQueue, JobQueueConfig, PerfJobQueue, ProcessMeter,
    SyncType, WorkerPool,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

fn sum_jobs(num_jobs: usize, sum: &Arc<AtomicUsize>) -> Vec<Job> {
    (0..num_jobs)
        .map(|i| {
            let sum = sum.clone();
            Job::new(move |_| {
                // Simulate some work
                let mut local = 0usize;
                for j in 0..1000 {
                    local = local.wrapping_add(j);
                }
                std::hint::black_box(local);
                sum.fetch_add(i, Ordering::SeqCst);
            })
        })
        .collect()
}

fn main() {
    println!("corebarrier - Multi-Core Job Queue Barrier\n");

    let num_cores = CoreInfo::num_cores().min(4);
    let config = JobQueueConfig {
        num_cores,
        ..JobQueueConfig::default()
    };
    let num_jobs = 1000;
    let expected_sum: usize = (0..num_jobs).sum();

    // Example 1: Single-thread drain
    println!("Example 1: Single-thread drain");
    let sum = Arc::new(AtomicUsize::new(0));
    let queue = JobQueue::from_jobs(config.clone(), sum_jobs(num_jobs, &sum));
    queue.set_core_mask_and_wait_type(CoreIdMask::all(1), SyncType::PerCore);
    let start = Instant::now();
    let finished = queue.run_all();
    println!("  Executed {} jobs in {:?}", finished, start.elapsed());
    println!("  Sum result: {} (expected: {})\n", sum.load(Ordering::SeqCst), expected_sum);

    // Example 2: Fork/join across cores
    println!("Example 2: Fork/join across {} cores", num_cores);
    let pool = WorkerPool::new(num_cores);
    let sum = Arc::new(AtomicUsize::new(0));
    let queue = Arc::new(JobQueue::from_jobs(config.clone(), sum_jobs(num_jobs, &sum)));
    queue.set_core_mask_and_wait_type(CoreIdMask::all(num_cores), SyncType::PerCore);
    let start = Instant::now();
    pool.dispatch(queue.clone());
    queue.wait();
    println!("  Executed {} jobs in {:?}", queue.done_jobs(), start.elapsed());
    println!("  Sum result: {} (expected: {})\n", sum.load(Ordering::SeqCst), expected_sum);

    // Example 3: Instrumented run with trace export
    println!("Example 3: Instrumented run");
    let heap = Heap::new("perf", 4096);
    let sum = Arc::new(AtomicUsize::new(0));
    let mut perf = PerfJobQueue::new(JobQueue::from_jobs(config, sum_jobs(num_jobs, &sum)));
    if let Err(e) = perf.initialize("Demo", &heap) {
        eprintln!("  Failed to initialize instrumentation: {}", e);
        return;
    }
    let meter = ProcessMeter::new();
    perf.attach_process_meter(Some(&meter));

    let perf = Arc::new(perf);
    perf.set_core_mask_and_wait_type(CoreIdMask::all(num_cores), SyncType::PerCore);
    pool.dispatch(perf.clone());
    perf.wait();
    println!("  Recorded {} trace events", meter.chrome_trace_events().len());

    if let Some(path) = std::env::args().nth(1) {
        match meter.export_chrome_trace(&path) {
            Ok(()) => println!("  Trace written to {}", path),
            Err(e) => eprintln!("  Trace export failed: {}", e),
        }
    }
    perf.detach_process_meter(Some(&meter));

    println!("\nShutting down worker pool...");
    match pool.shutdown() {
        Ok(()) => println!("Done!"),
        Err(n) => eprintln!("Shutdown error: {} worker(s) panicked", n),
    }
}
