//! Core types for macropilot
//!
//! This crate provides the types shared by every other macropilot crate:
//! the record shapes exchanged with serializers ([`StepRecord`],
//! [`InputEvent`]), screen geometry, the capability traits through which
//! the engine reaches the outside world, and the cooperative run control
//! primitive used by the interpreter and the replay scheduler.

pub mod capability;
mod context;
pub mod control;
mod event;
mod geometry;
mod step;

pub use capability::{
    Capabilities, CapabilityError, CapabilityResult, ImageMatcher, InputSink, Serializer,
    TextMatcher, WindowController,
};
pub use context::RunContext;
pub use control::{Cancelled, ControlReceiver, ControlSignal, RunControl};
pub use event::{InputEvent, InputEventKind};
pub use geometry::{MouseButton, Region};
pub use step::StepRecord;

/// Values stored in the variable bag and carried by step parameters
pub type Value = serde_json::Value;

/// Default cooperative poll interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
