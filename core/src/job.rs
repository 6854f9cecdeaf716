//! RefreshJob trait — the contract every node in the graph fulfills.
//!
//! RULE: A job touches shared tables only through its own Store handle,
//! and only while the scheduler holds it in the Running state. Jobs never
//! call each other; ordering is the graph's concern.

use crate::{clock::Clock, error::CoreResult, types::Wave};
use chrono::{DateTime, Utc};

/// Per-invocation execution context handed to a job by the scheduler.
#[derive(Debug, Clone, Copy)]
pub struct JobContext {
    pub wave: Wave,
    /// Wave start time; all rows written this wave carry it.
    pub now: DateTime<Utc>,
    /// Hard execution deadline. Jobs with a publish step check it before
    /// committing so an overrun wave fails without partial writes.
    pub deadline: Option<DateTime<Utc>>,
    pub clock: Clock,
}

impl JobContext {
    pub fn deadline_exceeded(&self) -> bool {
        match self.deadline {
            Some(d) => self.clock.now() > d,
            None => false,
        }
    }
}

/// What a successful run reports back to the scheduler.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub rows_written: usize,
    pub detail: String,
}

pub trait RefreshJob: Send {
    /// Unique stable name; must match the JobSpec it was registered under.
    fn name(&self) -> &'static str;

    /// Execute one refresh for the current wave. Errors are caught at the
    /// job boundary by the scheduler, recorded, and never reach readers.
    fn run(&mut self, ctx: &JobContext) -> CoreResult<JobReport>;
}
