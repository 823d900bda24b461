//! Step parameters that may be written as a literal or a placeholder string

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{TemplateError, TemplateResult};
use crate::resolver::VariableResolver;

/// A parameter of type `T`, given either directly or as a template
///
/// `x: 120` deserializes to `Literal(120)`, `x: "${pos.x}"` to
/// `Template("${pos.x}")`. Any string is read as a template, so string-like
/// targets always go through rendering. Resolving a template renders it and
/// parses the text as `T`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Templated<T> {
    Template(String),
    Literal(T),
}

impl<T> Templated<T>
where
    T: DeserializeOwned + Clone,
{
    /// Produce the concrete value, rendering templates against `resolver`
    pub fn resolve(&self, resolver: &VariableResolver<'_>) -> TemplateResult<T> {
        match self {
            Templated::Literal(value) => Ok(value.clone()),
            Templated::Template(text) => coerce(&resolver.resolve_str(text)),
        }
    }
}

impl<T> From<T> for Templated<T> {
    fn from(value: T) -> Self {
        Templated::Literal(value)
    }
}

impl<T: Default> Default for Templated<T> {
    fn default() -> Self {
        Templated::Literal(T::default())
    }
}

/// Parse rendered text as JSON, falling back to treating it as a string
fn coerce<T: DeserializeOwned>(text: &str) -> TemplateResult<T> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<T>(trimmed) {
        return Ok(value);
    }

    serde_json::from_value::<T>(Value::String(text.to_string())).map_err(|e| {
        TemplateError::Coerce {
            text: text.to_string(),
            target: std::any::type_name::<T>(),
            message: e.to_string(),
        }
    })
}
