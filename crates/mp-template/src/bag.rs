//! The per-run variable store

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Named values visible to `${...}` placeholders
///
/// A bag lives for one run. It is written by `set_variable` steps and by
/// steps that declare `save_to`, and read through a
/// [`VariableResolver`](crate::VariableResolver).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableBag {
    vars: Map<String, Value>,
}

impl VariableBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Store a value, returning the previous one
    pub fn set(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.vars.insert(name.into(), value)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.vars.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn clear(&mut self) {
        self.vars.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.vars.iter()
    }

    /// Copy of the current contents as a JSON object
    pub fn snapshot(&self) -> Map<String, Value> {
        self.vars.clone()
    }
}

impl From<Map<String, Value>> for VariableBag {
    fn from(vars: Map<String, Value>) -> Self {
        Self { vars }
    }
}

impl FromIterator<(String, Value)> for VariableBag {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().collect(),
        }
    }
}
