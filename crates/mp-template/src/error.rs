//! Error types for parameter resolution

use thiserror::Error;

/// Result type for template operations
pub type TemplateResult<T> = Result<T, TemplateError>;

/// Errors raised while turning a rendered template into a typed value
#[derive(Debug, Clone, Error)]
pub enum TemplateError {
    /// Rendered text could not be converted to the parameter's type
    #[error("cannot use '{text}' as {target}: {message}")]
    Coerce {
        text: String,
        target: &'static str,
        message: String,
    },
}
