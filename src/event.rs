//! Completion event used to park barrier waiters.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Default)]
struct EventState {
    signaled: bool,
    /// Bumped by every reset.
    generation: u64,
}

struct InnerEvent {
    state: Mutex<EventState>,
    condvar: Condvar,
}

/// A manual-reset wait/notify primitive with no payload.
///
/// Once [`set`](Self::set) has been called every current and future waiter
/// returns immediately until [`reset`](Self::reset). A signal that lands before
/// a waiter arrives is therefore never lost. A waiter that was woken by a set
/// still returns if a reset slipped in before it reacquired the lock.
#[derive(Clone)]
pub struct CompletionEvent {
    inner: Arc<InnerEvent>,
}

impl CompletionEvent {
    pub fn new() -> Self {
        CompletionEvent {
            inner: Arc::new(InnerEvent {
                state: Mutex::new(EventState::default()),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Blocks the calling thread until the event is set.
    pub fn wait(&self) {
        let mut state = self.inner.state.lock();
        let generation = state.generation;
        while !state.signaled && state.generation == generation {
            self.inner.condvar.wait(&mut state);
        }
    }

    /// Blocks until the event is set or `timeout` elapses.
    ///
    /// Returns true if the event was observed set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut state = self.inner.state.lock();
        let generation = state.generation;
        let deadline = Instant::now() + timeout;
        while !state.signaled && state.generation == generation {
            if self.inner.condvar.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.signaled || state.generation != generation
    }

    /// Sets the event and wakes every waiter.
    pub fn set(&self) {
        let mut state = self.inner.state.lock();
        state.signaled = true;
        self.inner.condvar.notify_all();
    }

    pub fn reset(&self) {
        let mut state = self.inner.state.lock();
        if state.signaled {
            state.generation = state.generation.wrapping_add(1);
        }
        state.signaled = false;
    }

    pub fn is_set(&self) -> bool {
        self.inner.state.lock().signaled
    }
}

impl Default for CompletionEvent {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CompletionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionEvent")
            .field("signaled", &self.is_set())
            .finish()
    }
}
