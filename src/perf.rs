//! Instrumented job queue.
//!
//! [`PerfJobQueue`] wraps a [`JobQueue`] and brackets each core's claim and
//! execution phases with markers on a per-core [`ProcessMeterBar`]. Consecutive
//! batches on a core cycle through a fixed 9-entry palette so they stay visually
//! distinct. Scheduling semantics are those of the wrapped queue.

use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::debug;

use crate::containers::RingBuffer;
use crate::core_id::{CoreId, CoreInfo};
use crate::heap::{Heap, HeapError};
use crate::job_queue::{JobQueue, RunStatus};
use crate::meter::{Color4f, ProcessMeter, ProcessMeterBar};

/// Number of colours batches rotate through.
pub const PALETTE_SIZE: u32 = 9;

static BAR_COLORS: [Color4f; PALETTE_SIZE as usize] = [
    Color4f::new(0.207_843_14, 0.831_372_56, 0.627_451, 1.0),
    Color4f::new(0.0, 0.666_666_7, 0.447_058_83, 1.0),
    Color4f::new(0.125_490_2, 0.498_039_22, 0.376_470_6, 1.0),
    Color4f::new(0.749_019_6, 0.525_490_2, 0.188_235_3, 1.0),
    Color4f::new(1.0, 0.6, 0.0, 1.0),
    Color4f::new(1.0, 0.698_039_2, 0.250_980_4, 1.0),
    Color4f::new(0.690_196_1, 0.172_549_02, 0.294_117_66, 1.0),
    Color4f::new(0.0, 0.917_647_1, 0.215_686_28, 1.0),
    Color4f::new(0.960_784_3, 0.239_215_69, 0.407_843_14, 1.0),
];

/// A [`JobQueue`] with per-core timing bars.
///
/// Bars and palette indices are allocated from a caller-supplied [`Heap`] by
/// [`initialize`](Self::initialize) and released by
/// [`finalize`](Self::finalize). While finalized, every measuring call is a
/// no-op.
pub struct PerfJobQueue {
    queue: JobQueue,
    bars: RingBuffer<Arc<ProcessMeterBar>>,
    color_indices: RingBuffer<AtomicU32>,
    process_meter_bar: Arc<ProcessMeterBar>,
}

impl PerfJobQueue {
    pub fn new(queue: JobQueue) -> Self {
        PerfJobQueue {
            queue,
            bars: RingBuffer::new(),
            color_indices: RingBuffer::new(),
            process_meter_bar: Arc::new(ProcessMeterBar::new("")),
        }
    }

    /// Allocates one bar and one palette index per core from `heap`.
    ///
    /// Bars are named after their core and the aggregate bar after `name`.
    pub fn initialize(&mut self, name: &str, heap: &Heap) -> Result<(), HeapError> {
        let num_cores = self.queue.num_cores();

        self.bars.alloc_buffer(num_cores, heap, |i| {
            Arc::new(ProcessMeterBar::new(CoreId::from_index(i).text()))
        })?;
        if let Err(err) = self
            .color_indices
            .alloc_buffer(num_cores, heap, |_| AtomicU32::new(0))
        {
            self.bars.free_buffer();
            return Err(err);
        }

        self.process_meter_bar.set_color(Color4f::YELLOW);
        self.process_meter_bar.set_name(name);

        debug!(name, num_cores, heap = heap.name(), "perf job queue initialized");
        Ok(())
    }

    /// Releases the per-core buffers. Safe to call more than once.
    pub fn finalize(&mut self) {
        self.color_indices.free_buffer();
        self.bars.free_buffer();
    }

    pub fn is_initialized(&self) -> bool {
        self.bars.is_allocated()
    }

    /// Zeroes every core's palette index without releasing memory.
    pub fn reset(&self) {
        for idx in self.color_indices.iter() {
            idx.store(0, Ordering::Relaxed);
        }
    }

    /// Palette colour for `idx`, wrapping every [`PALETTE_SIZE`] entries.
    pub fn get_bar_color(&self, idx: u32) -> &'static Color4f {
        &BAR_COLORS[(idx % PALETTE_SIZE) as usize]
    }

    pub fn measure_begin_deque(&self) {
        self.measure_begin_deque_on(CoreInfo::current_core_id());
    }

    pub fn measure_end_deque(&self) {
        self.measure_end_on(CoreInfo::current_core_id());
    }

    pub fn measure_begin_run(&self) {
        self.measure_begin_run_on(CoreInfo::current_core_id());
    }

    pub fn measure_end_run(&self) {
        self.measure_end_on(CoreInfo::current_core_id());
    }

    fn measure_begin_deque_on(&self, core: CoreId) {
        if let Some(bar) = self.bars.get(core.index()) {
            bar.measure_begin(Color4f::WHITE);
        }
    }

    fn measure_begin_run_on(&self, core: CoreId) {
        if let (Some(bar), Some(idx)) = (
            self.bars.get(core.index()),
            self.color_indices.get(core.index()),
        ) {
            let current = idx.load(Ordering::Relaxed);
            bar.measure_begin(*self.get_bar_color(current));
            idx.store((current + 1) % PALETTE_SIZE, Ordering::Relaxed);
        }
    }

    fn measure_end_on(&self, core: CoreId) {
        if let Some(bar) = self.bars.get(core.index()) {
            bar.measure_end();
        }
    }

    /// Palette index the next run marker on `core` will use.
    pub fn color_index(&self, core: CoreId) -> Option<u32> {
        self.color_indices
            .get(core.index())
            .map(|idx| idx.load(Ordering::Relaxed))
    }

    pub fn bar(&self, core: CoreId) -> Option<&Arc<ProcessMeterBar>> {
        self.bars.get(core.index())
    }

    /// The aggregate bar named at initialization.
    pub fn process_meter_bar(&self) -> &Arc<ProcessMeterBar> {
        &self.process_meter_bar
    }

    /// Registers every per-core bar and the aggregate bar with `meter`.
    pub fn attach_process_meter(&self, meter: Option<&ProcessMeter>) {
        let Some(meter) = meter else {
            return;
        };
        for bar in self.bars.iter() {
            meter.attach_bar(bar);
        }
        meter.attach_bar(&self.process_meter_bar);
    }

    pub fn detach_process_meter(&self, meter: Option<&ProcessMeter>) {
        let Some(meter) = meter else {
            return;
        };
        for bar in self.bars.iter() {
            meter.detach_bar(bar);
        }
        meter.detach_bar(&self.process_meter_bar);
    }

    /// [`JobQueue::run`] with the claim bracketed by deque markers and the
    /// execution bracketed by run markers on the worker's bar.
    pub fn run(&self, size: u32, worker: Option<CoreId>) -> RunStatus {
        let core = worker.unwrap_or_else(CoreInfo::current_core_id);

        self.measure_begin_deque_on(core);
        let batch = self.queue.claim(size, core);
        self.measure_end_on(core);

        let finished = match batch {
            Some(batch) => {
                self.measure_begin_run_on(core);
                let finished = self.queue.execute(batch, core);
                self.measure_end_on(core);
                finished
            }
            None => 0,
        };

        RunStatus {
            finished,
            drained: self.queue.is_drained(),
        }
    }

    /// [`JobQueue::run_all`], measured on the aggregate bar.
    pub fn run_all(&self) -> u32 {
        let size = self.queue.num_jobs();
        self.process_meter_bar.measure_begin_default();

        let mut finished = 0;
        loop {
            let status = self.run(size, None);
            finished += status.finished;
            if status.drained {
                break;
            }
        }

        self.process_meter_bar.measure_end();
        debug_assert_eq!(
            finished, size,
            "run_all executed {} of {} jobs",
            finished, size
        );
        finished
    }

    pub fn into_inner(self) -> JobQueue {
        self.queue
    }
}

impl Deref for PerfJobQueue {
    type Target = JobQueue;

    fn deref(&self) -> &JobQueue {
        &self.queue
    }
}

impl std::fmt::Debug for PerfJobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerfJobQueue")
            .field("queue", &self.queue)
            .field("name", &self.process_meter_bar.name())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_id::CoreIdMask;
    use crate::job::Job;
    use crate::job_queue::{JobQueueConfig, SyncType};

    fn perf_queue(num_jobs: usize) -> PerfJobQueue {
        let config = JobQueueConfig {
            num_cores: 3,
            default_granularity: 4,
        };
        PerfJobQueue::new(JobQueue::from_jobs(
            config,
            (0..num_jobs).map(|_| Job::new(|_| {})),
        ))
    }

    #[test]
    fn test_palette_wraps() {
        let perf = perf_queue(0);
        assert_eq!(perf.get_bar_color(9), perf.get_bar_color(0));
        assert_eq!(perf.get_bar_color(13), perf.get_bar_color(4));
        assert_ne!(perf.get_bar_color(0), perf.get_bar_color(1));
    }

    #[test]
    fn test_initialize_names_bars() {
        let heap = Heap::new("perf", 4096);
        let mut perf = perf_queue(0);
        perf.initialize("Physics", &heap).unwrap();

        assert!(perf.is_initialized());
        assert!(heap.used_bytes() > 0);
        assert_eq!(perf.bar(CoreId::new(2).unwrap()).unwrap().name(), "core2");
        assert!(perf.bar(CoreId::new(3).unwrap()).is_none());
        assert_eq!(perf.process_meter_bar().name(), "Physics");
        assert_eq!(perf.process_meter_bar().color(), Color4f::YELLOW);

        perf.finalize();
        assert!(!perf.is_initialized());
        assert_eq!(heap.used_bytes(), 0);
        perf.finalize();
    }

    #[test]
    fn test_initialize_fails_on_small_heap() {
        let heap = Heap::new("tiny", 8);
        let mut perf = perf_queue(0);
        assert!(matches!(
            perf.initialize("x", &heap),
            Err(HeapError::Exhausted { .. })
        ));
        assert!(!perf.is_initialized());
        assert_eq!(heap.used_bytes(), 0);
    }

    #[test]
    fn test_run_marker_rotates_palette() {
        let heap = Heap::new("perf", 4096);
        let mut perf = perf_queue(0);
        perf.initialize("rot", &heap).unwrap();
        let core = CoreId::new(1).unwrap();

        for expected in (1..=PALETTE_SIZE).chain(1..=2) {
            perf.measure_begin_run_on(core);
            perf.measure_end_on(core);
            assert_eq!(perf.color_index(core), Some(expected % PALETTE_SIZE));
        }

        let sections = perf.bar(core).unwrap().sections();
        assert_eq!(sections[0].color, *perf.get_bar_color(0));
        assert_eq!(sections[9].color, *perf.get_bar_color(0));
        assert_eq!(sections[10].color, *perf.get_bar_color(1));

        perf.reset();
        assert_eq!(perf.color_index(core), Some(0));
    }

    #[test]
    fn test_measuring_is_inert_when_finalized() {
        let perf = perf_queue(0);
        perf.measure_begin_deque();
        perf.measure_end_deque();
        perf.measure_begin_run();
        perf.measure_end_run();
        assert_eq!(perf.color_index(CoreId::MAIN), None);
    }

    #[test]
    fn test_run_brackets_claim_and_execute() {
        let heap = Heap::new("perf", 4096);
        let mut perf = perf_queue(8);
        perf.initialize("bracket", &heap).unwrap();
        perf.set_core_mask_and_wait_type(CoreIdMask::all(1), SyncType::PerCore);

        let core = CoreId::MAIN;
        let status = perf.run(8, Some(core));
        assert_eq!(status.finished, 4);

        // One deque section (white) then one run section (palette 0)
        let sections = perf.bar(core).unwrap().sections();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].color, Color4f::WHITE);
        assert_eq!(sections[1].color, *perf.get_bar_color(0));
    }

    #[test]
    fn test_run_all_measures_aggregate() {
        let heap = Heap::new("perf", 4096);
        let mut perf = perf_queue(10);
        perf.initialize("all", &heap).unwrap();
        perf.set_core_mask_and_wait_type(CoreIdMask::all(1), SyncType::PerCore);

        assert_eq!(perf.run_all(), 10);
        assert!(perf.is_done());
        assert_eq!(perf.process_meter_bar().sections().len(), 1);
    }

    #[test]
    fn test_attach_detach_process_meter() {
        let heap = Heap::new("perf", 4096);
        let mut perf = perf_queue(0);
        perf.initialize("meter", &heap).unwrap();

        // Absent monitor is not an error
        perf.attach_process_meter(None);
        perf.detach_process_meter(None);

        let meter = ProcessMeter::new();
        perf.attach_process_meter(Some(&meter));
        assert_eq!(meter.attached_count(), 4);
        assert_eq!(meter.bar_names(), vec!["core0", "core1", "core2", "meter"]);

        perf.detach_process_meter(Some(&meter));
        assert_eq!(meter.attached_count(), 0);
    }
}
