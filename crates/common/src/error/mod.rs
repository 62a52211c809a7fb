//! Errors raised by the runtime primitives
//!
//! Only the racing helpers in [`crate::time`] fail, and they fail in one of
//! two ways: the deadline passed or the caller cancelled. Higher layers map
//! these onto their own error enums.

use std::fmt;
use std::time::Duration;

pub type CommonResult<T> = Result<T, CommonError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// `operation` did not finish within `duration`.
    Timeout { operation: String, duration: Duration },

    /// `task_id` was cancelled before it finished.
    TaskCancelled { task_id: String, reason: Option<String> },
}

impl fmt::Display for CommonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { operation, duration } => {
                write!(f, "Operation '{operation}' timed out after {duration:?}")
            }
            Self::TaskCancelled { task_id, reason: Some(reason) } => {
                write!(f, "Task '{task_id}' cancelled: {reason}")
            }
            Self::TaskCancelled { task_id, reason: None } => {
                write!(f, "Task '{task_id}' cancelled")
            }
        }
    }
}

impl std::error::Error for CommonError {}

impl CommonError {
    pub fn timeout<S: Into<String>>(operation: S, duration: Duration) -> Self {
        Self::Timeout { operation: operation.into(), duration }
    }

    pub fn task_cancelled<S: Into<String>>(task_id: S) -> Self {
        Self::TaskCancelled { task_id: task_id.into(), reason: None }
    }

    pub fn task_cancelled_with_reason<S: Into<String>, R: Into<String>>(
        task_id: S,
        reason: R,
    ) -> Self {
        Self::TaskCancelled { task_id: task_id.into(), reason: Some(reason.into()) }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::TaskCancelled { .. })
    }
}
