//! Engine error type

use mp_config::ConfigError;
use mp_core::CapabilityError;
use mp_playback::SchedulerError;
use mp_script::{InterpreterError, ProgramError};
use thiserror::Error;

/// Result type for engine calls
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The targeted session is already active
    #[error("{0} is already active")]
    Busy(&'static str),

    #[error("invalid program: {0}")]
    Program(#[from] ProgramError),

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error("playback error: {0}")]
    Scheduler(SchedulerError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<InterpreterError> for EngineError {
    fn from(err: InterpreterError) -> Self {
        match err {
            InterpreterError::Busy => EngineError::Busy("a run"),
        }
    }
}

impl From<SchedulerError> for EngineError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Busy => EngineError::Busy("playback"),
            other => EngineError::Scheduler(other),
        }
    }
}

impl EngineError {
    pub fn is_busy(&self) -> bool {
        matches!(self, EngineError::Busy(_))
    }
}
