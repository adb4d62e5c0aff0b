//! Job definitions and execution logic.
//!
//! Jobs are units of work registered with a [`JobQueue`](crate::JobQueue).
//! Each job is invoked exactly once per distribution cycle, on whichever core
//! claimed it, and receives that core's id.

use std::panic::{self, AssertUnwindSafe};

use crate::core_id::CoreId;

/// A unit of work executed by a participating core.
pub struct Job {
    /// The work to be executed
    work: Box<dyn Fn(CoreId) + Send + Sync + 'static>,
}

impl Job {
    /// Creates a new job with the given work function.
    pub fn new<F>(work: F) -> Self
    where
        F: Fn(CoreId) + Send + Sync + 'static,
    {
        Job {
            work: Box::new(work),
        }
    }

    /// Runs the job on `core`.
    ///
    /// A panic inside the work is caught and logged so that the job still
    /// counts as done. Returns false if the work panicked.
    pub fn execute(&self, core: CoreId) -> bool {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.work)(core))) {
            Ok(()) => true,
            Err(payload) => {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "<non-string panic payload>".to_string());
                tracing::error!(%core, "job panicked: {}", msg);
                false
            }
        }
    }
}

impl<F> From<F> for Job
where
    F: Fn(CoreId) + Send + Sync + 'static,
{
    fn from(work: F) -> Self {
        Job::new(work)
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job").finish_non_exhaustive()
    }
}
