use serde::{Deserialize, Serialize};

/// Lifecycle state of a job.
///
/// `Waiting → Processing → {Finished | Error}`; `Canceled` is reachable from
/// `Waiting` and `Processing`. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum JobStatus {
    Waiting = 0,
    Processing = 1,
    Finished = 2,
    Error = 3,
    Canceled = 4,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Error | Self::Canceled)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// `Waiting → Error` is permitted for jobs that fail before a worker ever picks
    /// them up (the scheduler could not dispatch them).
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Waiting, Processing)
                | (Waiting, Canceled)
                | (Waiting, Error)
                | (Processing, Finished)
                | (Processing, Error)
                | (Processing, Canceled)
        )
    }

    /// Severity used when folding several outcomes into one: error > canceled > finished.
    pub fn severity(self) -> u8 {
        match self {
            Self::Finished => 0,
            Self::Waiting | Self::Processing => 1,
            Self::Canceled => 2,
            Self::Error => 3,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Waiting,
            1 => Self::Processing,
            2 => Self::Finished,
            3 => Self::Error,
            _ => Self::Canceled,
        }
    }
}

/// Scheduling class. `High` work bypasses the bounded main pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub enum JobPriority {
    #[default]
    Normal,
    High,
}

/// Outcome of a job body that did not complete normally.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    /// The body failed; the message becomes the job's error message.
    #[error("{0}")]
    Failed(String),
    /// The body noticed its cancel flag and stopped early.
    #[error("canceled")]
    Canceled,
    /// The scheduler itself faulted while running the job (submission or waiting).
    #[error("internal scheduler error: {0}")]
    Internal(String),
}

impl JobError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}
