//! Capability interfaces
//!
//! The engine never touches the screen, the keyboard or a file format
//! itself. Everything environment-facing goes through these traits, which
//! an embedding application implements (native input APIs, an image
//! matcher, an OCR engine, a JSON serializer, ...).
//!
//! Calls are awaited on the worker task that drives a run. The engine does
//! not interrupt an in-flight call, so implementations are expected to honour
//! the `timeout` they are given.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::event::InputEvent;
use crate::geometry::{MouseButton, Region};
use crate::step::StepRecord;

/// Errors raised by capability implementations
#[derive(Debug, Clone, Error)]
pub enum CapabilityError {
    #[error("{0} is not configured")]
    Unavailable(&'static str),

    #[error("{capability} failed: {message}")]
    Failed {
        capability: &'static str,
        message: String,
    },

    #[error("{0} timed out")]
    Timeout(&'static str),
}

impl CapabilityError {
    pub fn failed(capability: &'static str, message: impl Into<String>) -> Self {
        CapabilityError::Failed {
            capability,
            message: message.into(),
        }
    }
}

/// Result type for capability calls
pub type CapabilityResult<T> = Result<T, CapabilityError>;

/// Locates a template image on screen
#[async_trait]
pub trait ImageMatcher: Send + Sync {
    /// Find `template` with at least `confidence`, searching `region` (or the
    /// whole screen) for up to `timeout`.
    async fn find(
        &self,
        template: &str,
        confidence: f64,
        region: Option<Region>,
        timeout: Option<Duration>,
    ) -> CapabilityResult<Option<Region>>;
}

/// Locates text on screen
#[async_trait]
pub trait TextMatcher: Send + Sync {
    async fn find(
        &self,
        text: &str,
        region: Option<Region>,
        timeout: Option<Duration>,
    ) -> CapabilityResult<Option<Region>>;
}

/// Injects pointer and keyboard input
#[async_trait]
pub trait InputSink: Send + Sync {
    async fn move_to(&self, x: i32, y: i32) -> CapabilityResult<()>;

    async fn click(&self, x: i32, y: i32, button: MouseButton, clicks: u32)
        -> CapabilityResult<()>;

    /// Press `key` while holding `modifiers`
    async fn key_press(&self, key: &str, modifiers: &[String]) -> CapabilityResult<()>;

    async fn key_release(&self, key: &str) -> CapabilityResult<()>;

    /// Press a key combination and release it in reverse order
    async fn hotkey(&self, keys: &[String]) -> CapabilityResult<()>;

    async fn type_text(&self, text: &str, interval: Duration) -> CapabilityResult<()>;

    async fn scroll(&self, x: Option<i32>, y: Option<i32>, delta: i32) -> CapabilityResult<()>;
}

/// Controls top-level windows
#[async_trait]
pub trait WindowController: Send + Sync {
    /// Bring the window titled `title` to the foreground; `false` if no such
    /// window exists.
    async fn activate(&self, title: &str) -> CapabilityResult<bool>;
}

/// Loads step programs and recordings from wherever they are stored
#[async_trait]
pub trait Serializer: Send + Sync {
    async fn load_steps(&self, source: &str) -> CapabilityResult<Vec<StepRecord>>;

    async fn load_events(&self, source: &str) -> CapabilityResult<Vec<InputEvent>>;
}

/// The set of capabilities available to a run
///
/// Every capability is optional; a step that needs one that is missing
/// fails with [`CapabilityError::Unavailable`].
#[derive(Clone, Default)]
pub struct Capabilities {
    image: Option<Arc<dyn ImageMatcher>>,
    text: Option<Arc<dyn TextMatcher>>,
    input: Option<Arc<dyn InputSink>>,
    window: Option<Arc<dyn WindowController>>,
    serializer: Option<Arc<dyn Serializer>>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image_matcher(mut self, matcher: Arc<dyn ImageMatcher>) -> Self {
        self.image = Some(matcher);
        self
    }

    pub fn with_text_matcher(mut self, matcher: Arc<dyn TextMatcher>) -> Self {
        self.text = Some(matcher);
        self
    }

    pub fn with_input_sink(mut self, sink: Arc<dyn InputSink>) -> Self {
        self.input = Some(sink);
        self
    }

    pub fn with_window_controller(mut self, controller: Arc<dyn WindowController>) -> Self {
        self.window = Some(controller);
        self
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    pub fn image_matcher(&self) -> CapabilityResult<&Arc<dyn ImageMatcher>> {
        self.image
            .as_ref()
            .ok_or(CapabilityError::Unavailable("image matcher"))
    }

    pub fn text_matcher(&self) -> CapabilityResult<&Arc<dyn TextMatcher>> {
        self.text
            .as_ref()
            .ok_or(CapabilityError::Unavailable("text matcher"))
    }

    pub fn input_sink(&self) -> CapabilityResult<&Arc<dyn InputSink>> {
        self.input
            .as_ref()
            .ok_or(CapabilityError::Unavailable("input sink"))
    }

    pub fn window_controller(&self) -> CapabilityResult<&Arc<dyn WindowController>> {
        self.window
            .as_ref()
            .ok_or(CapabilityError::Unavailable("window controller"))
    }

    pub fn serializer(&self) -> CapabilityResult<&Arc<dyn Serializer>> {
        self.serializer
            .as_ref()
            .ok_or(CapabilityError::Unavailable("serializer"))
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("image", &self.image.is_some())
            .field("text", &self.text.is_some())
            .field("input", &self.input.is_some())
            .field("window", &self.window.is_some())
            .field("serializer", &self.serializer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoWindows;

    #[async_trait]
    impl WindowController for NoWindows {
        async fn activate(&self, _title: &str) -> CapabilityResult<bool> {
            Ok(false)
        }
    }

    #[test]
    fn test_missing_capability_is_unavailable() {
        let caps = Capabilities::new();
        let err = caps.input_sink().err().unwrap();
        assert!(matches!(err, CapabilityError::Unavailable("input sink")));
        assert_eq!(err.to_string(), "input sink is not configured");
    }

    #[tokio::test]
    async fn test_configured_capability() {
        let caps = Capabilities::new().with_window_controller(Arc::new(NoWindows));
        let window = caps.window_controller().unwrap();
        assert!(!window.activate("Notepad").await.unwrap());
        assert!(format!("{:?}", caps).contains("window: true"));
    }
}
