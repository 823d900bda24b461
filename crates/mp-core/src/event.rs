//! Recorded input events replayed by the scheduler

use serde::{Deserialize, Serialize};

use crate::geometry::MouseButton;

/// A single recorded input event
///
/// `timestamp` is in seconds relative to the start of the recording.
/// Within one list timestamps must be non-decreasing; equal timestamps
/// replay with zero wait between them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputEvent {
    /// Seconds since the start of the recording
    pub timestamp: f64,

    /// Kind-specific payload
    #[serde(flatten)]
    pub kind: InputEventKind,
}

/// Event payload, tagged by `kind`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputEventKind {
    /// Move the pointer
    PointerMove { x: i32, y: i32 },

    /// Click a pointer button
    PointerButton {
        x: i32,
        y: i32,
        #[serde(default)]
        button: MouseButton,
        #[serde(default = "default_clicks")]
        clicks: u32,
    },

    /// Scroll the wheel, optionally at a position
    Scroll {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        x: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        y: Option<i32>,
        delta: i32,
    },

    /// Press a key, holding the listed modifiers
    KeyPress {
        key: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        modifiers: Vec<String>,
    },

    /// Release a key
    KeyRelease { key: String },

    /// Bring a window to the foreground
    WindowActivate { title: String },

    /// Explicit pause in the recording, in seconds (scaled by speed)
    Wait { duration: f64 },

    /// Hold playback until a template image is on screen
    ///
    /// `timeout` (seconds, not scaled by speed) and `confidence` fall back to
    /// the matching defaults when absent.
    WaitForImage {
        #[serde(alias = "image_path")]
        image: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<f64>,
    },
}

fn default_clicks() -> u32 {
    1
}

impl InputEventKind {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            InputEventKind::PointerMove { .. } => "pointer_move",
            InputEventKind::PointerButton { .. } => "pointer_button",
            InputEventKind::Scroll { .. } => "scroll",
            InputEventKind::KeyPress { .. } => "key_press",
            InputEventKind::KeyRelease { .. } => "key_release",
            InputEventKind::WindowActivate { .. } => "window_activate",
            InputEventKind::Wait { .. } => "wait",
            InputEventKind::WaitForImage { .. } => "wait_for_image",
        }
    }
}

impl InputEvent {
    pub fn new(timestamp: f64, kind: InputEventKind) -> Self {
        Self { timestamp, kind }
    }

    /// Check that timestamps never decrease
    ///
    /// Returns the index of the first event whose timestamp is lower than
    /// its predecessor's (or not a number).
    pub fn validate_order(events: &[InputEvent]) -> Result<(), usize> {
        if let Some(first) = events.first() {
            if first.timestamp.is_nan() {
                return Err(0);
            }
        }
        for (i, pair) in events.windows(2).enumerate() {
            if !(pair[1].timestamp >= pair[0].timestamp) {
                return Err(i + 1);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_record_shape() {
        let event: InputEvent = serde_json::from_value(json!({
            "kind": "pointer_button",
            "timestamp": 1.5,
            "x": 10,
            "y": 20
        }))
        .unwrap();

        assert_eq!(event.timestamp, 1.5);
        assert_eq!(
            event.kind,
            InputEventKind::PointerButton {
                x: 10,
                y: 20,
                button: MouseButton::Left,
                clicks: 1,
            }
        );
        assert_eq!(event.kind.name(), "pointer_button");
    }

    #[test]
    fn test_key_press_modifiers_default() {
        let event: InputEvent =
            serde_json::from_value(json!({"kind": "key_press", "timestamp": 0.0, "key": "a"}))
                .unwrap();
        match event.kind {
            InputEventKind::KeyPress { key, modifiers } => {
                assert_eq!(key, "a");
                assert!(modifiers.is_empty());
            }
            other => panic!("Expected KeyPress, got {:?}", other),
        }
    }

    #[test]
    fn test_wait_for_image_record_shape() {
        let event: InputEvent = serde_json::from_value(json!({
            "kind": "wait_for_image",
            "timestamp": 2.0,
            "image_path": "dialog.png",
            "timeout": 3.0
        }))
        .unwrap();

        assert_eq!(
            event.kind,
            InputEventKind::WaitForImage {
                image: "dialog.png".to_string(),
                timeout: Some(3.0),
                confidence: None,
            }
        );
        assert_eq!(event.kind.name(), "wait_for_image");
    }

    #[test]
    fn test_validate_order() {
        let wait = |t: f64| InputEvent::new(t, InputEventKind::Wait { duration: 0.0 });

        assert_eq!(InputEvent::validate_order(&[]), Ok(()));
        assert_eq!(
            InputEvent::validate_order(&[wait(0.0), wait(1.0), wait(1.0)]),
            Ok(())
        );
        assert_eq!(
            InputEvent::validate_order(&[wait(0.0), wait(2.0), wait(1.0)]),
            Err(2)
        );
        assert_eq!(InputEvent::validate_order(&[wait(f64::NAN)]), Err(0));
    }
}
