use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::job::{JobPriority, JobStatus};

/// Distinct descriptions tracked per-description before new ones share a bucket.
pub const MAX_TRACKED_DESCRIPTIONS: usize = 1024;

/// Bucket for descriptions past [`MAX_TRACKED_DESCRIPTIONS`].
pub const OTHER_DESCRIPTIONS: &str = "(other)";

/// Controller counters, exposed through [`JobController::metrics`](crate::JobController::metrics).
#[derive(Debug, Clone, Default, Serialize)]
pub struct ControllerMetrics {
    /// Jobs handed to the controller.
    pub jobs_submitted: u64,
    /// Of those, jobs routed to the high-priority pool.
    pub high_priority_submitted: u64,
    pub jobs_finished: u64,
    pub jobs_failed: u64,
    pub jobs_canceled: u64,
    /// Completed runs per description, counted for the rolling average.
    pub runs_by_description: HashMap<String, u64>,
    /// Average processing time by job description.
    pub avg_job_duration: HashMap<String, Duration>,
    /// Last terminal transition by job description.
    pub last_completed: HashMap<String, DateTime<Utc>>,
}

impl ControllerMetrics {
    pub fn record_submitted(&mut self, priority: JobPriority) {
        self.jobs_submitted += 1;
        if priority == JobPriority::High {
            self.high_priority_submitted += 1;
        }
    }

    /// Record a job reaching a terminal status. `duration` is the time spent processing,
    /// `None` for jobs that never started.
    pub fn record_outcome(&mut self, description: &str, status: JobStatus, duration: Option<Duration>) {
        match status {
            JobStatus::Finished => self.jobs_finished += 1,
            JobStatus::Error => self.jobs_failed += 1,
            JobStatus::Canceled => self.jobs_canceled += 1,
            JobStatus::Waiting | JobStatus::Processing => return,
        }
        let description = self.bucket(description);
        self.last_completed.insert(description.to_string(), Utc::now());

        let Some(duration) = duration else {
            return;
        };
        let count = self.runs_by_description.entry(description.to_string()).or_default();
        *count += 1;
        let count = *count;
        let prev_avg = self
            .avg_job_duration
            .get(description)
            .copied()
            .unwrap_or_default();

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let new_avg = if count == 1 {
            duration
        } else {
            let prev_nanos = prev_avg.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };
        self.avg_job_duration.insert(description.to_string(), new_avg);
    }

    /// Jobs submitted but not yet terminal.
    /// Descriptions already tracked keep their own entry; past the cap, new ones
    /// fold into [`OTHER_DESCRIPTIONS`].
    fn bucket<'a>(&self, description: &'a str) -> &'a str {
        if self.last_completed.contains_key(description)
            || self.last_completed.len() < MAX_TRACKED_DESCRIPTIONS
        {
            description
        } else {
            OTHER_DESCRIPTIONS
        }
    }

    pub fn in_flight(&self) -> u64 {
        self.jobs_submitted
            .saturating_sub(self.jobs_finished + self.jobs_failed + self.jobs_canceled)
    }
}
