//! Step programs and the step interpreter for macropilot
//!
//! A program is a flat list of [`Step`]s. Each step has a kind (click, wait,
//! find an image, loop, replay a recording, ...), typed parameters that may
//! contain `${...}` placeholders, and an optional jump policy. The
//! [`StepInterpreter`] executes a [`Program`] on a background task, keeping
//! a variable bag and loop frames for the run.
//!
//! # Example
//!
//! ```ignore
//! use mp_script::{NoopRunObserver, Program, StepInterpreter};
//!
//! let program = Program::from_records(&records)?;
//! let interpreter = StepInterpreter::new(capabilities, config);
//! let handle = interpreter.start(program, Arc::new(NoopRunObserver))?;
//! let report = handle.wait().await;
//! ```

mod conditions;
mod error;
mod exec;
mod interpreter;
mod loops;
mod outcome;
mod program;
mod registry;
mod replay;
mod step;

pub use error::{
    InterpreterError, InterpreterResult, ProgramError, ProgramResult, StepFault, StepResult,
};
pub use interpreter::{
    Completion, NoopRunObserver, RunHandle, RunObserver, RunReport, RunState, RunStatus,
    StepInterpreter,
};
pub use loops::{LoopController, LoopFrame, LoopKind, LoopTransition};
pub use outcome::StepOutcome;
pub use program::{LoopBounds, Program};
pub use registry::{HandlerFuture, HandlerRegistry, StepCall, StepHandler};
pub use step::{
    ActivateWindowStep, ClickStep, CommentStep, Condition, ConditionStep, CustomStep,
    EndLoopStep, FindImageStep, FindTextStep, JumpPolicy, KeySpec, KeyStep, LoopMode, LoopStep,
    PointStep, PointerStep, ReplayStep, ScrollStep, SetVariableStep, Step, StepKind,
    TypeTextStep, WaitStep, STEP_KINDS,
};
