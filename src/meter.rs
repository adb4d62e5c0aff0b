//! Process meter: named timing bars and Chrome Tracing export.
//!
//! A [`ProcessMeterBar`] records closed begin/end sections, each tagged with a
//! colour. Bars are attached to a [`ProcessMeter`], which can export every
//! attached bar's history as a JSON file compatible with chrome://tracing or
//! ui.perfetto.dev. Each bar is normally written by a single core, so its lock
//! is uncontended on the measuring path.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Number of closed sections a bar keeps before dropping the oldest.
pub const BAR_HISTORY: usize = 256;

lazy_static::lazy_static! {
    static ref CLOCK_ORIGIN: Instant = Instant::now();
    static ref EPOCH_START_US: u64 = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0);
}

/// RGBA colour with components in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Color4f {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color4f {
    pub const WHITE: Color4f = Color4f::new(1.0, 1.0, 1.0, 1.0);
    pub const YELLOW: Color4f = Color4f::new(1.0, 1.0, 0.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Color4f { r, g, b, a }
    }

    /// `#rrggbb` form, alpha dropped.
    pub fn to_hex(self) -> String {
        let c = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        format!("#{:02x}{:02x}{:02x}", c(self.r), c(self.g), c(self.b))
    }
}

/// One closed measurement on a bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Section {
    pub start: Instant,
    pub duration: Duration,
    pub color: Color4f,
}

#[derive(Default)]
struct BarState {
    open: Option<(Instant, Color4f)>,
    sections: VecDeque<Section>,
}

/// A named timing track.
pub struct ProcessMeterBar {
    name: Mutex<String>,
    color: Mutex<Color4f>,
    state: Mutex<BarState>,
}

impl ProcessMeterBar {
    pub fn new(name: impl Into<String>) -> Self {
        lazy_static::initialize(&CLOCK_ORIGIN);
        ProcessMeterBar {
            name: Mutex::new(name.into()),
            color: Mutex::new(Color4f::WHITE),
            state: Mutex::new(BarState::default()),
        }
    }

    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.lock() = name.into();
    }

    /// The bar's own colour, used for sections measured without one.
    pub fn color(&self) -> Color4f {
        *self.color.lock()
    }

    pub fn set_color(&self, color: Color4f) {
        *self.color.lock() = color;
    }

    /// Opens a section. An already open section is restarted.
    pub fn measure_begin(&self, color: Color4f) {
        self.state.lock().open = Some((Instant::now(), color));
    }

    /// Opens a section in the bar's own colour.
    pub fn measure_begin_default(&self) {
        let color = self.color();
        self.measure_begin(color);
    }

    /// Closes the open section, if any.
    pub fn measure_end(&self) {
        let end = Instant::now();
        let mut state = self.state.lock();
        if let Some((start, color)) = state.open.take() {
            if state.sections.len() == BAR_HISTORY {
                state.sections.pop_front();
            }
            state.sections.push_back(Section {
                start,
                duration: end.saturating_duration_since(start),
                color,
            });
        }
    }

    pub fn is_measuring(&self) -> bool {
        self.state.lock().open.is_some()
    }

    /// Closed sections, oldest first.
    pub fn sections(&self) -> Vec<Section> {
        self.state.lock().sections.iter().copied().collect()
    }

    pub fn last_section(&self) -> Option<Section> {
        self.state.lock().sections.back().copied()
    }

    /// Drops the recorded history and any open section.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.open = None;
        state.sections.clear();
    }
}

impl std::fmt::Debug for ProcessMeterBar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessMeterBar")
            .field("name", &self.name())
            .field("sections", &self.state.lock().sections.len())
            .finish()
    }
}

/// A single trace event in Chrome Tracing format.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    pub name: String,
    pub cat: &'static str,
    pub ph: &'static str,
    pub ts: u64,
    pub dur: u64,
    pub pid: u32,
    pub tid: usize,
    pub args: TraceArgs,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceArgs {
    pub color: String,
}

/// Monitor that instrumentation bars register with.
#[derive(Default)]
pub struct ProcessMeter {
    bars: Mutex<Vec<Arc<ProcessMeterBar>>>,
}

impl ProcessMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `bar`. Attaching the same bar twice is a no-op.
    pub fn attach_bar(&self, bar: &Arc<ProcessMeterBar>) {
        let mut bars = self.bars.lock();
        if !bars.iter().any(|b| Arc::ptr_eq(b, bar)) {
            bars.push(Arc::clone(bar));
        }
    }

    /// Detaches `bar` if it is attached.
    pub fn detach_bar(&self, bar: &Arc<ProcessMeterBar>) {
        self.bars.lock().retain(|b| !Arc::ptr_eq(b, bar));
    }

    pub fn is_attached(&self, bar: &Arc<ProcessMeterBar>) -> bool {
        self.bars.lock().iter().any(|b| Arc::ptr_eq(b, bar))
    }

    pub fn attached_count(&self) -> usize {
        self.bars.lock().len()
    }

    /// Names of the attached bars in attachment order.
    pub fn bar_names(&self) -> Vec<String> {
        self.bars.lock().iter().map(|b| b.name()).collect()
    }

    /// Converts every attached bar's history into trace events, one thread
    /// lane per bar.
    pub fn chrome_trace_events(&self) -> Vec<TraceEvent> {
        let bars = self.bars.lock();
        let mut events = Vec::new();
        for (tid, bar) in bars.iter().enumerate() {
            let name = bar.name();
            for section in bar.sections() {
                let offset = section.start.saturating_duration_since(*CLOCK_ORIGIN);
                events.push(TraceEvent {
                    name: name.clone(),
                    cat: "job_queue",
                    ph: "X",
                    ts: offset.as_micros() as u64 + *EPOCH_START_US,
                    dur: section.duration.as_micros() as u64,
                    pid: 1,
                    tid,
                    args: TraceArgs {
                        color: section.color.to_hex(),
                    },
                });
            }
        }
        events
    }

    /// Writes the trace as a JSON array.
    pub fn write_chrome_trace<W: Write>(&self, writer: W) -> io::Result<()> {
        serde_json::to_writer(writer, &self.chrome_trace_events()).map_err(io::Error::from)
    }

    /// Exports all attached bars to a JSON file.
    pub fn export_chrome_trace(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.write_chrome_trace(&mut writer)?;
        writer.flush()
    }
}

impl std::fmt::Debug for ProcessMeter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessMeter")
            .field("bars", &self.bar_names())
            .finish()
    }
}
