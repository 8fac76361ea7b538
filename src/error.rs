//! Error types for planning and execution

use std::path::PathBuf;

use thiserror::Error;

use crate::driver::DriverError;

/// A malformed scenario or step, detected before anything runs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("step {index}: missing 'type'")]
    MissingType { index: usize },

    #[error("step {index}: unknown step type '{step_type}'")]
    UnknownType { index: usize, step_type: String },

    #[error("step {index} ({step_type}): required field '{field}' is missing")]
    MissingField {
        index: usize,
        step_type: String,
        field: &'static str,
    },

    #[error("step {index} ({step_type}): field '{field}' must be {expected}")]
    WrongType {
        index: usize,
        step_type: String,
        field: &'static str,
        expected: &'static str,
    },

    #[error("step {index} ({step_type}): invalid '{field}': {reason}")]
    BadValue {
        index: usize,
        step_type: String,
        field: &'static str,
        reason: String,
    },

    #[error("scenario has no steps")]
    Empty,

    #[error("scenario is malformed: {0}")]
    Malformed(String),
}

/// Why a single step failed.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("unknown step type '{0}'")]
    UnknownStepType(String),

    #[error("could not resolve {target}: {reason}")]
    ElementResolution { target: String, reason: String },

    #[error("{check} failed: expected {expected}, got {actual}")]
    Assertion {
        check: &'static str,
        expected: String,
        actual: String,
    },

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("included scenario is unreadable: {0}")]
    Include(String),
}

impl StepError {
    /// Validation problems and malformed selectors fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            StepError::Validation(_)
                | StepError::UnknownStepType(_)
                | StepError::Driver(DriverError::InvalidSelector { .. })
        )
    }
}

/// Why a whole run stopped.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// `at` is the step's position, dotted for steps inside includes (`3.2`).
    #[error("step {at} ({step_type}) failed: {source}")]
    StepFailed {
        at: String,
        step_type: String,
        #[source]
        source: StepError,
    },

    #[error("included scenario not found: {}", .0.display())]
    IncludeNotFound(PathBuf),

    #[error("browser {browser} failed to launch: {reason}")]
    Launch { browser: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl RunError {
    pub fn step(at: &str, step_type: &str, source: StepError) -> Self {
        match source {
            StepError::Validation(err) => RunError::Validation(err),
            source => RunError::StepFailed {
                at: at.to_string(),
                step_type: step_type.to_string(),
                source,
            },
        }
    }
}

pub type RunResult<T> = Result<T, RunError>;
