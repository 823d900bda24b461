//! Macropilot execution engine
//!
//! [`ExecutionController`] owns one [`StepInterpreter`](mp_script::StepInterpreter)
//! and one [`EventScheduler`](mp_playback::EventScheduler) built from the same
//! configuration and capabilities. It is the entry point for front ends:
//! start a program run or an independent playback session, and pause,
//! resume or stop whatever is active.

mod controller;
mod error;
pub mod telemetry;

pub use controller::{EngineStatus, ExecutionController, PlaybackHandle};
pub use error::{EngineError, EngineResult};

pub use mp_config::EngineConfig;
pub use mp_core::Capabilities;
pub use mp_playback::{NoopObserver, PlaybackObserver, PlaybackReport, PlaybackStatus};
pub use mp_script::{
    HandlerRegistry, NoopRunObserver, Program, RunHandle, RunObserver, RunReport, RunState,
    RunStatus,
};
