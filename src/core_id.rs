//! Core identifiers, core masks and platform core information.
//!
//! A [`CoreId`] names one hardware execution context the queue can target.
//! Subsets of cores are expressed as a [`CoreIdMask`], which is decided by the
//! controller before each distribution cycle.

use std::cell::Cell;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of cores any per-core table is sized for.
pub const MAX_CORES: usize = 32;

/// Errors produced when constructing core identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("core index {0} is out of range [0, {max})", max = MAX_CORES)]
    OutOfRange(usize),
}

/// Index of a single hardware core in `[0, MAX_CORES)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct CoreId(u8);

impl CoreId {
    /// The first core. Threads that never registered a core run as this one.
    pub const MAIN: CoreId = CoreId(0);

    /// Creates a core id, failing if `index` does not fit the per-core tables.
    pub fn new(index: usize) -> Result<Self, CoreError> {
        if index < MAX_CORES {
            Ok(CoreId(index as u8))
        } else {
            Err(CoreError::OutOfRange(index))
        }
    }

    /// Crate-internal constructor for indices already known to be in range.
    pub(crate) fn from_index(index: usize) -> Self {
        debug_assert!(index < MAX_CORES);
        CoreId(index as u8)
    }

    /// Returns the raw index.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Human readable name used for instrumentation bars.
    pub fn text(self) -> String {
        self.to_string()
    }
}

impl TryFrom<usize> for CoreId {
    type Error = CoreError;

    fn try_from(index: usize) -> Result<Self, Self::Error> {
        CoreId::new(index)
    }
}

impl From<CoreId> for usize {
    fn from(core: CoreId) -> usize {
        core.index()
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "core{}", self.0)
    }
}

/// A set of cores stored as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct CoreIdMask(u32);

impl CoreIdMask {
    /// The empty mask.
    pub const NONE: CoreIdMask = CoreIdMask(0);

    pub const fn from_bits(bits: u32) -> Self {
        CoreIdMask(bits)
    }

    /// Mask containing cores `0..count`, saturating at `MAX_CORES`.
    pub fn all(count: usize) -> Self {
        if count >= MAX_CORES {
            CoreIdMask(u32::MAX)
        } else {
            CoreIdMask((1u32 << count) - 1)
        }
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    /// Returns a copy of the mask with `core` added.
    #[must_use]
    pub fn on(self, core: CoreId) -> Self {
        CoreIdMask(self.0 | (1 << core.index()))
    }

    /// Returns a copy of the mask with `core` removed.
    #[must_use]
    pub fn off(self, core: CoreId) -> Self {
        CoreIdMask(self.0 & !(1 << core.index()))
    }

    /// Membership test.
    pub fn is_on(self, core: CoreId) -> bool {
        self.0 & (1 << core.index()) != 0
    }

    pub fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterates the member cores in ascending order.
    pub fn iter(self) -> impl Iterator<Item = CoreId> {
        (0..MAX_CORES)
            .filter(move |&i| self.0 & (1 << i) != 0)
            .map(|i| CoreId(i as u8))
    }
}

impl FromIterator<CoreId> for CoreIdMask {
    fn from_iter<I: IntoIterator<Item = CoreId>>(iter: I) -> Self {
        iter.into_iter().fold(CoreIdMask::NONE, CoreIdMask::on)
    }
}

thread_local! {
    static CURRENT_CORE: Cell<Option<CoreId>> = const { Cell::new(None) };
}

/// Platform core information.
pub struct CoreInfo;

impl CoreInfo {
    /// Number of cores the platform exposes, clamped to `[1, MAX_CORES]`.
    pub fn num_cores() -> usize {
        num_cpus::get().clamp(1, MAX_CORES)
    }

    /// The core the calling thread is registered as, or [`CoreId::MAIN`].
    pub fn current_core_id() -> CoreId {
        CURRENT_CORE.with(|c| c.get()).unwrap_or(CoreId::MAIN)
    }

    /// Registers the calling thread as running on `core`.
    ///
    /// Worker threads call this once at startup so that `run(.., None)` and the
    /// instrumentation markers resolve to the right per-core slot.
    pub fn set_current_core_id(core: CoreId) {
        CURRENT_CORE.with(|c| c.set(Some(core)));
    }

    /// Clears the calling thread's registration.
    pub fn clear_current_core_id() {
        CURRENT_CORE.with(|c| c.set(None));
    }
}
