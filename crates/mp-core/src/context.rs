//! Run context for tracking session identity and causality

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identity of one interpreter run or playback session
///
/// Every run carries a ULID so log lines and reports from the interpreter,
/// and from any replay sub-session it spawns, can be correlated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    /// Unique identifier for this run (ULID)
    pub id: String,

    /// Run that spawned this one (set for replay sub-sessions)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl RunContext {
    /// Create a new context with a fresh ULID
    pub fn new() -> Self {
        Self {
            id: Ulid::new().to_string(),
            parent_id: None,
        }
    }

    /// Create a context with a specific ID
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
        }
    }

    /// Create a child context with this context as parent
    pub fn child(&self) -> Self {
        Self {
            id: Ulid::new().to_string(),
            parent_id: Some(self.id.clone()),
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_links_parent() {
        let parent = RunContext::with_id("run-1");
        let child = parent.child();

        assert_eq!(child.parent_id.as_deref(), Some("run-1"));
        assert_ne!(child.id, parent.id);
    }
}
