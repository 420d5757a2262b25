use parking_lot::Mutex;

use crate::progress::ItemProgress;

use super::{Job, JobError, JobPriority, JobState};

type Body = Box<dyn Fn(&FnJobContext<'_>) -> Result<(), JobError> + Send + Sync>;

/// A [`Job`] whose body is a closure.
///
/// Handy for orchestration code that glues steps together without a dedicated type.
/// The closure receives a [`FnJobContext`] to poll cancellation, report progress and
/// update the description.
pub struct FnJob {
    state: JobState,
    description: Mutex<String>,
    priority: JobPriority,
    progress: ItemProgress,
    body: Body,
}

impl FnJob {
    pub fn new<F>(description: impl Into<String>, body: F) -> Self
    where
        F: Fn(&FnJobContext<'_>) -> Result<(), JobError> + Send + Sync + 'static,
    {
        Self {
            state: JobState::new(),
            description: Mutex::new(description.into()),
            priority: JobPriority::Normal,
            progress: ItemProgress::new(),
            body: Box::new(body),
        }
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }
}

/// View handed to an [`FnJob`] body while it runs.
pub struct FnJobContext<'a> {
    job: &'a FnJob,
}

impl FnJobContext<'_> {
    pub fn is_canceled(&self) -> bool {
        self.job.state.is_canceled()
    }

    pub fn state(&self) -> &JobState {
        &self.job.state
    }

    pub fn progress(&self) -> &ItemProgress {
        &self.job.progress
    }

    pub fn set_description(&self, description: impl Into<String>) {
        *self.job.description.lock() = description.into();
    }
}

impl Job for FnJob {
    fn state(&self) -> &JobState {
        &self.state
    }

    fn description(&self) -> String {
        self.description.lock().clone()
    }

    fn run(&self) -> Result<(), JobError> {
        (self.body)(&FnJobContext { job: self })
    }

    fn progress(&self) -> Option<f64> {
        self.progress.fraction()
    }

    fn priority(&self) -> JobPriority {
        self.priority
    }
}

impl std::fmt::Debug for FnJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnJob")
            .field("description", &*self.description.lock())
            .field("priority", &self.priority)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{run_job, JobStatus};

    #[test]
    fn body_reports_progress_and_description() {
        let job = FnJob::new("importing", |ctx| {
            ctx.progress().set_total(4);
            for _ in 0..4 {
                ctx.progress().increment();
            }
            ctx.set_description("imported 4 files");
            Ok(())
        });
        assert_eq!(job.progress(), None);
        assert_eq!(run_job(&job), JobStatus::Finished);
        assert_eq!(job.progress(), Some(1.0));
        assert_eq!(job.description(), "imported 4 files");
    }

    #[test]
    fn priority_builder() {
        let job = FnJob::new("urgent", |_| Ok(())).with_priority(JobPriority::High);
        assert_eq!(job.priority(), JobPriority::High);
    }
}
