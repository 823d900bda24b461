//! Error types for programs and runs

use mp_core::CapabilityError;
use thiserror::Error;

/// Result type for program construction
pub type ProgramResult<T> = Result<T, ProgramError>;

/// Result type for step execution
pub type StepResult<T> = Result<T, StepFault>;

/// Result type for interpreter control calls
pub type InterpreterResult<T> = Result<T, InterpreterError>;

/// A program that cannot be run
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProgramError {
    #[error("step {index} ({id}): unknown step kind '{kind}'")]
    UnknownKind {
        index: usize,
        id: String,
        kind: String,
    },

    #[error("step {index} ({id}): invalid parameters: {message}")]
    InvalidParams {
        index: usize,
        id: String,
        message: String,
    },

    #[error("step {index}: {field} target {target} is outside 0..={len}")]
    TargetOutOfRange {
        index: usize,
        field: &'static str,
        target: usize,
        len: usize,
    },

    #[error("step {index}: loop end_step {end_step} does not come after the loop")]
    InvalidLoopEnd { index: usize, end_step: usize },

    #[error("step {index}: loop '{loop_id}' is never closed")]
    UnclosedLoop { index: usize, loop_id: String },

    #[error("step {index}: end_loop does not close any open loop")]
    UnmatchedLoopEnd { index: usize },

    #[error("step {index}: end_loop '{loop_id}' closes a loop while '{open}' is still open")]
    InterleavedLoops {
        index: usize,
        loop_id: String,
        open: String,
    },
}

/// An error that aborts the run
#[derive(Debug, Clone, Error)]
pub enum StepFault {
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error("no handler registered for custom step '{0}'")]
    UnknownHandler(String),

    #[error("handler '{handler}' failed: {message}")]
    Handler { handler: String, message: String },

    #[error("failed to load recording '{source_ref}': {message}")]
    Replay { source_ref: String, message: String },
}

/// Errors returned synchronously by interpreter control calls
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterpreterError {
    #[error("a run is already in progress")]
    Busy,
}
