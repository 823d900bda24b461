//! Step record exchanged with serializers
//!
//! The record is the loosely-typed shape a serializer produces. The script
//! crate turns it into a typed step when building a program.

use serde::{Deserialize, Serialize};

/// A step as delivered by a serializer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Step ID (filled in as `step_<index>` when empty)
    #[serde(default)]
    pub id: String,

    /// Step kind, e.g. "click" or "loop"
    pub kind: String,

    /// Kind-specific parameters
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,

    /// Disabled steps are skipped
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Explicit next index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step: Option<usize>,

    /// Index to jump to when the step reports failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<usize>,

    /// Branch target when a condition holds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub then_step: Option<usize>,

    /// Branch target when a condition does not hold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub else_step: Option<usize>,
}

fn default_enabled() -> bool {
    true
}

impl StepRecord {
    /// Create an enabled record with no jump fields
    pub fn new(id: impl Into<String>, kind: impl Into<String>, params: serde_json::Value) -> Self {
        let params = match params {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Self {
            id: id.into(),
            kind: kind.into(),
            params,
            enabled: true,
            description: String::new(),
            next_step: None,
            on_failure: None,
            then_step: None,
            else_step: None,
        }
    }
}
