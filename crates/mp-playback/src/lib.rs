//! Timed replay of recorded input events
//!
//! The [`EventScheduler`] reproduces a timestamped [`InputEvent`] list
//! through the `InputSink` and `WindowController` capabilities, keeping the
//! recorded gaps between events scaled by an adjustable speed. Playback
//! runs on its own tokio task and can be paused, resumed, re-timed and
//! stopped while it runs.
//!
//! # Example
//!
//! ```ignore
//! use mp_playback::{EventScheduler, NoopObserver};
//!
//! let scheduler = EventScheduler::from_config(capabilities, &config);
//! scheduler.load(events)?;
//! scheduler.start(2.0, Arc::new(NoopObserver))?;
//! let report = scheduler.wait_for_completion().await;
//! ```
//!
//! [`InputEvent`]: mp_core::InputEvent

mod dispatch;
mod error;
mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use scheduler::{
    EventScheduler, NoopObserver, PlaybackObserver, PlaybackReport, PlaybackStatus,
};
