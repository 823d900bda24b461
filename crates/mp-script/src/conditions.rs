//! Condition evaluation for condition steps and while loops

use mp_config::EngineConfig;
use mp_core::Capabilities;
use mp_template::{VariableBag, VariableResolver};
use serde_json::Value;
use tracing::debug;

use crate::exec::StepError;
use crate::step::Condition;

/// Evaluate `condition` against the screen and the variable bag
///
/// Screen lookups are single attempts: conditions never wait for the
/// image or text to appear.
pub(crate) async fn evaluate(
    capabilities: &Capabilities,
    config: &EngineConfig,
    condition: &Condition,
    variables: &VariableBag,
) -> Result<bool, StepError> {
    let mut negate = false;
    let mut condition = condition;
    while let Condition::Not { condition: inner } = condition {
        negate = !negate;
        condition = inner;
    }

    let resolver = VariableResolver::new(variables);
    let holds = match condition {
        Condition::ImageExists {
            image,
            confidence,
            region,
        } => {
            let template = config.paths.template(&resolver.resolve_str(image));
            let confidence = match confidence {
                Some(confidence) => confidence.resolve(&resolver)?,
                None => config.matching.confidence,
            };
            capabilities
                .image_matcher()?
                .find(&template, confidence, *region, None)
                .await?
                .is_some()
        }
        Condition::TextExists { text, region } => {
            let text = resolver.resolve_str(text);
            capabilities
                .text_matcher()?
                .find(&text, *region, None)
                .await?
                .is_some()
        }
        Condition::VariableEquals { variable, value } => match resolver.lookup(variable) {
            Some(current) => loosely_equal(current, &resolver.resolve_deep(value)),
            None => false,
        },
        Condition::VariableContains { variable, value } => match resolver.lookup(variable) {
            Some(current) => contains(current, &resolver.resolve_deep(value)),
            None => false,
        },
        Condition::Not { .. } => unreachable!("negations are unwrapped above"),
    };

    debug!("Condition {:?} evaluated to {}", condition, holds != negate);
    Ok(holds != negate)
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Equal as values, or equal once both are rendered as text
///
/// Resolved placeholders are always strings, so `${n}` must compare equal
/// to the number it came from.
fn loosely_equal(a: &Value, b: &Value) -> bool {
    a == b || text_of(a) == text_of(b)
}

/// Substring for strings, element for lists, key for maps
fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => s.contains(text_of(needle).as_str()),
        Value::Array(items) => items.iter().any(|item| loosely_equal(item, needle)),
        Value::Object(map) => map.contains_key(&text_of(needle)),
        _ => false,
    }
}
