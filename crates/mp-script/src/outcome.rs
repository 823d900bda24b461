//! Result of executing one step

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a step reports back to the interpreter
///
/// `success == false` is a recoverable outcome handled by the step's jump
/// policy. `branch` is set by steps that choose between `then_step` and
/// `else_step`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<bool>,
}

impl StepOutcome {
    pub fn success() -> Self {
        Self {
            success: true,
            data: Value::Null,
            branch: None,
        }
    }

    pub fn failure() -> Self {
        Self {
            success: false,
            data: Value::Null,
            branch: None,
        }
    }

    /// Failed outcome carrying a reason in `data.error`
    pub fn failed_because(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            data: serde_json::json!({ "error": reason.into() }),
            branch: None,
        }
    }

    /// Successful outcome that selects a branch
    pub fn branch(holds: bool) -> Self {
        Self {
            success: true,
            data: Value::Null,
            branch: Some(holds),
        }
    }

    pub fn from_success(success: bool) -> Self {
        if success {
            Self::success()
        } else {
            Self::failure()
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}
