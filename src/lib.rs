#![allow(clippy::too_many_arguments)]

use dag::DagError;
use executor::ExecutorError;
use vds::VdsError;
use workflow::WorkflowError;

pub mod config;
pub mod dag;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod policy;
mod retries;
pub mod scheduler;
pub mod status_db;
pub mod storage;
pub mod task;
pub mod test_utils;
pub mod vdo;
pub mod vds;
pub mod workflow;

/// The top-level error type for the crate. Module-specific error enums
/// convert into this one at the boundary between a module and its callers,
/// the way `facilitator::Error` wraps `IntakeError`/`AggregationError`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    AnyhowError(#[from] anyhow::Error),
    #[error("command line parsing error: {0}")]
    Clap(#[from] clap::Error),
    #[error("missing arguments: {0}")]
    MissingArguments(&'static str),
    #[error(transparent)]
    Vds(#[from] VdsError),
    #[error(transparent)]
    Dag(#[from] DagError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error(transparent)]
    Storage(#[from] storage::StorageError),
    #[error(transparent)]
    Scheduler(#[from] scheduler::SchedulerError),
    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

/// Captures whether a given error is due to a bad input (fatal, do not retry)
/// or a transient condition (I/O, subprocess, scheduler back-end) that is
/// reasonable to retry. Mirrors `facilitator::ErrorClassification`.
pub trait ErrorClassification {
    fn is_retryable(&self) -> bool;
}

impl ErrorClassification for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::AnyhowError(_) => true,
            Error::Clap(_) | Error::MissingArguments(_) => false,
            Error::Vds(e) => e.is_retryable(),
            Error::Dag(e) => e.is_retryable(),
            Error::Executor(e) => e.is_retryable(),
            Error::Workflow(e) => e.is_retryable(),
            Error::Storage(e) => e.is_retryable(),
            Error::Scheduler(e) => e.is_retryable(),
            Error::Config(e) => e.is_retryable(),
        }
    }
}
