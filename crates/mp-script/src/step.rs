//! Typed steps
//!
//! A [`StepRecord`] from a serializer carries a kind string and a loose
//! parameter map. [`Step::from_record`] turns it into a [`Step`] whose
//! [`StepKind`] holds a typed payload for that kind, so the interpreter can
//! dispatch with an exhaustive `match`.

use mp_core::{MouseButton, Region, StepRecord};
use mp_template::Templated;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ProgramError, ProgramResult};

/// Where control goes after a step, in addition to its kind's own branching
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JumpPolicy {
    /// Explicit next index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<usize>,

    /// Index to continue at when the step reports failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<usize>,
}

/// One unit of a program
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub id: String,
    pub kind: StepKind,
    pub enabled: bool,
    pub description: String,
    pub jump: JumpPolicy,
    /// Seconds to wait after the step succeeds
    pub wait_after: Option<f64>,
}

/// Step payload, one variant per step kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    Click(ClickStep),
    DoubleClick(PointerStep),
    RightClick(PointStep),
    Move(PointStep),
    Key(KeyStep),
    #[serde(alias = "text")]
    TypeText(TypeTextStep),
    Scroll(ScrollStep),
    Wait(WaitStep),
    FindImage(FindImageStep),
    FindText(FindTextStep),
    ActivateWindow(ActivateWindowStep),
    Condition(ConditionStep),
    Loop(LoopStep),
    EndLoop(EndLoopStep),
    SetVariable(SetVariableStep),
    #[serde(alias = "play_recording")]
    Replay(ReplayStep),
    Custom(CustomStep),
    Comment(CommentStep),
}

/// Kind names accepted in step records
pub const STEP_KINDS: &[&str] = &[
    "click",
    "double_click",
    "right_click",
    "move",
    "key",
    "type_text",
    "text",
    "scroll",
    "wait",
    "find_image",
    "find_text",
    "activate_window",
    "condition",
    "loop",
    "end_loop",
    "set_variable",
    "replay",
    "play_recording",
    "custom",
    "comment",
];

fn one<T: From<u8>>() -> Templated<T> {
    Templated::Literal(T::from(1))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickStep {
    pub x: Templated<i32>,
    pub y: Templated<i32>,
    #[serde(default)]
    pub button: Templated<MouseButton>,
    #[serde(default = "one")]
    pub clicks: Templated<u32>,
}

/// Coordinates plus a button
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointerStep {
    pub x: Templated<i32>,
    pub y: Templated<i32>,
    #[serde(default)]
    pub button: Templated<MouseButton>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointStep {
    pub x: Templated<i32>,
    pub y: Templated<i32>,
}

/// A single key or a combination pressed together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeySpec {
    Combo(Vec<String>),
    Single(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyStep {
    pub key: KeySpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeTextStep {
    pub text: String,
    /// Seconds between characters
    #[serde(default)]
    pub interval: Templated<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrollStep {
    pub delta: Templated<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<Templated<i32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<Templated<i32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitStep {
    #[serde(alias = "duration")]
    pub seconds: Templated<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindImageStep {
    #[serde(alias = "image_path")]
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Templated<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<Region>,
    /// Seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Templated<f64>>,
    /// Click the centre of the match
    #[serde(default)]
    pub click: bool,
    /// Variable that receives the matched region
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindTextStep {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<Region>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Templated<f64>>,
    #[serde(default)]
    pub click: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivateWindowStep {
    pub title: String,
}

/// Predicate used by condition steps and while loops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    ImageExists {
        #[serde(alias = "image_path")]
        image: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<Templated<f64>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        region: Option<Region>,
    },
    TextExists {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        region: Option<Region>,
    },
    VariableEquals {
        variable: String,
        value: Value,
    },
    VariableContains {
        variable: String,
        value: Value,
    },
    Not {
        condition: Box<Condition>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionStep {
    pub condition: Condition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub then_step: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub else_step: Option<usize>,
}

/// How a loop decides whether to run its body again
#[derive(Debug, Clone, PartialEq)]
pub enum LoopMode {
    /// Run the body `count` times
    Count(Templated<i64>),
    /// Run the body while the condition holds
    While(Condition),
}

/// Start of a loop body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "LoopParams", into = "LoopParams")]
pub struct LoopStep {
    pub loop_id: Option<String>,
    pub mode: LoopMode,
    /// Index of the step that ends the body, when not paired by `end_loop`
    pub end_step: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum LoopType {
    #[default]
    Count,
    While,
}

/// Record shape of a loop step
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoopParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    loop_id: Option<String>,
    #[serde(default)]
    loop_type: LoopType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    count: Option<Templated<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    end_step: Option<usize>,
}

impl TryFrom<LoopParams> for LoopStep {
    type Error = String;

    fn try_from(params: LoopParams) -> Result<Self, Self::Error> {
        let mode = match params.loop_type {
            LoopType::Count => LoopMode::Count(params.count.unwrap_or_else(one)),
            LoopType::While => LoopMode::While(
                params
                    .condition
                    .ok_or_else(|| "while loop requires a condition".to_string())?,
            ),
        };

        Ok(LoopStep {
            loop_id: params.loop_id,
            mode,
            end_step: params.end_step,
        })
    }
}

impl From<LoopStep> for LoopParams {
    fn from(step: LoopStep) -> Self {
        let (loop_type, count, condition) = match step.mode {
            LoopMode::Count(count) => (LoopType::Count, Some(count), None),
            LoopMode::While(condition) => (LoopType::While, None, Some(condition)),
        };

        LoopParams {
            loop_id: step.loop_id,
            loop_type,
            count,
            condition,
            end_step: step.end_step,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndLoopStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetVariableStep {
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayStep {
    /// Recording reference handed to the serializer
    #[serde(alias = "file")]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<Templated<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomStep {
    pub handler: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub then_step: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub else_step: Option<usize>,
    /// Variable that receives the handler's result data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_to: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommentStep {
    #[serde(default)]
    pub text: String,
}

impl StepKind {
    /// Kind name as written in records
    pub fn name(&self) -> &'static str {
        match self {
            StepKind::Click(_) => "click",
            StepKind::DoubleClick(_) => "double_click",
            StepKind::RightClick(_) => "right_click",
            StepKind::Move(_) => "move",
            StepKind::Key(_) => "key",
            StepKind::TypeText(_) => "type_text",
            StepKind::Scroll(_) => "scroll",
            StepKind::Wait(_) => "wait",
            StepKind::FindImage(_) => "find_image",
            StepKind::FindText(_) => "find_text",
            StepKind::ActivateWindow(_) => "activate_window",
            StepKind::Condition(_) => "condition",
            StepKind::Loop(_) => "loop",
            StepKind::EndLoop(_) => "end_loop",
            StepKind::SetVariable(_) => "set_variable",
            StepKind::Replay(_) => "replay",
            StepKind::Custom(_) => "custom",
            StepKind::Comment(_) => "comment",
        }
    }

    /// `then`/`else` targets of steps that can branch
    pub fn branch_targets(&self) -> Option<(Option<usize>, Option<usize>)> {
        match self {
            StepKind::Condition(step) => Some((step.then_step, step.else_step)),
            StepKind::Custom(step) => Some((step.then_step, step.else_step)),
            _ => None,
        }
    }
}

impl Step {
    /// Enabled step with a sequential jump policy
    pub fn new(id: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            kind,
            enabled: true,
            description: String::new(),
            jump: JumpPolicy::default(),
            wait_after: None,
        }
    }

    pub fn with_next(mut self, next: usize) -> Self {
        self.jump.next = Some(next);
        self
    }

    pub fn with_on_failure(mut self, on_failure: usize) -> Self {
        self.jump.on_failure = Some(on_failure);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Build a typed step from a serializer record at `index`
    pub fn from_record(index: usize, record: &StepRecord) -> ProgramResult<Self> {
        let id = if record.id.is_empty() {
            format!("step_{}", index)
        } else {
            record.id.clone()
        };

        if !STEP_KINDS.contains(&record.kind.as_str()) {
            return Err(ProgramError::UnknownKind {
                index,
                id,
                kind: record.kind.clone(),
            });
        }

        let mut params = record.params.clone();
        let wait_after = params.remove("wait_after").and_then(|v| v.as_f64());

        if let Some(then_step) = record.then_step {
            params.insert("then_step".to_string(), then_step.into());
        }
        if let Some(else_step) = record.else_step {
            params.insert("else_step".to_string(), else_step.into());
        }
        lift_flat_condition(&mut params);
        params.insert("kind".to_string(), Value::String(record.kind.clone()));

        let kind: StepKind =
            serde_json::from_value(Value::Object(params)).map_err(|e| ProgramError::InvalidParams {
                index,
                id: id.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            id,
            kind,
            enabled: record.enabled,
            description: record.description.clone(),
            jump: JumpPolicy {
                next: record.next_step,
                on_failure: record.on_failure,
            },
            wait_after,
        })
    }
}

/// Accept `condition_type: ...` written directly among the step params
///
/// `{"condition_type": "variable_equals", "variable": "x", "value": 1}`
/// becomes `{"condition": {"type": "variable_equals", ...}}`.
fn lift_flat_condition(params: &mut Map<String, Value>) {
    if params.contains_key("condition") {
        return;
    }
    let Some(condition_type) = params.remove("condition_type") else {
        return;
    };

    let mut condition = params.clone();
    condition.insert("type".to_string(), condition_type);
    params.insert("condition".to_string(), Value::Object(condition));
}
