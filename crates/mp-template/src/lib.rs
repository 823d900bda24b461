//! Runtime variables for macropilot programs
//!
//! Steps may reference variables with `${...}` placeholders:
//!
//! - `${name}` - the variable itself
//! - `${name.key}` - a key of a map variable
//! - `${name[2]}` - an element of a list variable (negative counts from the end)
//! - `${pos.points[0].x}` - any chain of the above
//!
//! A placeholder that cannot be resolved is left in the text unchanged.
//!
//! # Example
//!
//! ```ignore
//! use mp_template::{VariableBag, VariableResolver};
//!
//! let mut bag = VariableBag::new();
//! bag.set("user", serde_json::json!({"name": "ada"}));
//!
//! let resolver = VariableResolver::new(&bag);
//! assert_eq!(resolver.resolve_str("hello ${user.name}"), "hello ada");
//! ```

mod bag;
mod error;
mod resolver;
mod templated;

pub use bag::VariableBag;
pub use error::{TemplateError, TemplateResult};
pub use resolver::VariableResolver;
pub use templated::Templated;

// Re-export the value type for convenience
pub use serde_json::Value;
