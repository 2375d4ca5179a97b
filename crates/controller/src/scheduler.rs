//! Cooperative job scheduler.
//!
//! A fixed set of periodic jobs, each on its own interval, all run on the one
//! control task. Every second the loop collects the jobs that are due and
//! runs them one after another, oldest due first. Nothing preempts a running
//! job: a watering hold delays the leak check until the valve is closed.
//!
//! A job that returns [`JobOutcome::Shutdown`] ends the loop after it
//! finishes; jobs still queued in that pass are dropped.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info};

/// How often the loop looks for due jobs.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Job {
    Watering,
    LeakCheck,
    Diagnostics,
    Camera,
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Watering => write!(f, "watering"),
            Self::LeakCheck => write!(f, "leak-check"),
            Self::Diagnostics => write!(f, "diagnostics"),
            Self::Camera => write!(f, "camera"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Continue,
    Shutdown,
}

/// Why the scheduler stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The given job asked for a shutdown (the leak guard).
    RequestedBy(Job),
}

/// Executes jobs on behalf of the scheduler.
#[async_trait]
pub trait JobRunner: Send {
    async fn run(&mut self, job: Job) -> JobOutcome;
}

struct Entry {
    job: Job,
    every: Duration,
    next_due: Instant,
}

#[derive(Default)]
pub struct Scheduler {
    entries: Vec<Entry>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` every `every`, first one interval from now.
    pub fn every(mut self, every: Duration, job: Job) -> Self {
        self.entries.push(Entry {
            job,
            every,
            next_due: Instant::now() + every,
        });
        self
    }

    pub fn jobs(&self) -> Vec<(Job, Duration)> {
        self.entries.iter().map(|e| (e.job, e.every)).collect()
    }

    /// Indices of jobs due at `now`, oldest due first.
    fn due(&self, now: Instant) -> Vec<usize> {
        let mut due: Vec<usize> = (0..self.entries.len())
            .filter(|&i| self.entries[i].next_due <= now)
            .collect();
        due.sort_by_key(|&i| self.entries[i].next_due);
        due
    }

    /// Run every job that is currently due. Returns the job that requested
    /// a shutdown, if any.
    pub async fn run_pending<R: JobRunner>(&mut self, runner: &mut R) -> Option<Job> {
        for i in self.due(Instant::now()) {
            let job = self.entries[i].job;
            debug!(%job, "running job");
            let outcome = runner.run(job).await;

            // Next run is measured from when this one finished.
            let entry = &mut self.entries[i];
            entry.next_due = Instant::now() + entry.every;

            if outcome == JobOutcome::Shutdown {
                return Some(job);
            }
        }
        None
    }

    /// Poll forever until a job requests a shutdown.
    pub async fn run<R: JobRunner>(mut self, runner: &mut R) -> ShutdownReason {
        info!(
            jobs = ?self.jobs(),
            poll_sec = POLL_INTERVAL.as_secs(),
            "scheduler started"
        );
        loop {
            if let Some(job) = self.run_pending(runner).await {
                info!(%job, "scheduler stopping");
                return ShutdownReason::RequestedBy(job);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
