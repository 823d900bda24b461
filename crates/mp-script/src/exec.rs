//! Per-step execution
//!
//! [`StepExecutor`] owns the mutable state of one run (variables, loop
//! frames, the control receiver) and executes one step at a time. Jump
//! resolution stays in the interpreter.

use std::sync::Arc;
use std::time::Duration;

use mp_config::EngineConfig;
use mp_core::{CapabilityError, Capabilities, ControlReceiver, MouseButton, Region, RunContext};
use mp_template::{TemplateError, VariableBag, VariableResolver};
use serde_json::Value;
use tracing::{debug, warn};

use crate::conditions;
use crate::error::{StepFault, StepResult};
use crate::loops::{LoopController, LoopTransition};
use crate::outcome::StepOutcome;
use crate::program::Program;
use crate::registry::{HandlerRegistry, StepCall};
use crate::replay;
use crate::step::{FindImageStep, FindTextStep, KeySpec, LoopMode, LoopStep, Step, StepKind};

/// Why a step did not produce an outcome
#[derive(Debug)]
pub(crate) enum StepError {
    /// Aborts the run
    Fault(StepFault),
    /// A templated parameter could not be coerced; reported as `success == false`
    Param(TemplateError),
}

impl From<StepFault> for StepError {
    fn from(fault: StepFault) -> Self {
        StepError::Fault(fault)
    }
}

impl From<CapabilityError> for StepError {
    fn from(err: CapabilityError) -> Self {
        StepError::Fault(StepFault::Capability(err))
    }
}

impl From<TemplateError> for StepError {
    fn from(err: TemplateError) -> Self {
        StepError::Param(err)
    }
}

/// Outcome of one step plus the loop transition it caused, if any
#[derive(Debug)]
pub(crate) struct Executed {
    pub outcome: StepOutcome,
    pub transition: Option<LoopTransition>,
}

impl Executed {
    fn plain(outcome: StepOutcome) -> Self {
        Self {
            outcome,
            transition: None,
        }
    }
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::ZERO)
}

pub(crate) struct StepExecutor {
    pub capabilities: Capabilities,
    pub config: Arc<EngineConfig>,
    pub handlers: Arc<HandlerRegistry>,
    pub context: RunContext,
    pub variables: VariableBag,
    pub loops: LoopController,
    pub control: ControlReceiver,
}

impl StepExecutor {
    /// Execute the step at `index`
    ///
    /// Parameter coercion failures become a failed outcome; everything else
    /// that goes wrong is returned as a fault.
    pub async fn execute(&mut self, program: &Program, index: usize, step: &Step) -> StepResult<Executed> {
        let executed = match &step.kind {
            StepKind::Loop(loop_step) => self.visit_loop(program, index, loop_step).await,
            _ => self.run_action(&step.id, &step.kind).await.map(|outcome| {
                // Any step can close a loop through an explicit `end_step`
                let transition = program
                    .loop_start_for(index)
                    .map(|start| self.loops.visit_end(start));
                Executed { outcome, transition }
            }),
        };

        match executed {
            Ok(executed) => Ok(executed),
            Err(StepError::Fault(fault)) => Err(fault),
            Err(StepError::Param(err)) => {
                warn!("Step {} ({}): {}", index, step.id, err);
                Ok(Executed::plain(StepOutcome::failed_because(err.to_string())))
            }
        }
    }

    async fn visit_loop(
        &mut self,
        program: &Program,
        index: usize,
        step: &LoopStep,
    ) -> Result<Executed, StepError> {
        let Some(bounds) = program.loop_bounds(index) else {
            warn!("Loop at step {} has no paired end", index);
            return Ok(Executed::plain(StepOutcome::success()));
        };

        let transition = match &step.mode {
            LoopMode::Count(count) => {
                let total = match self.loops.frame(index) {
                    Some(_) => None,
                    None => match count.resolve(&VariableResolver::new(&self.variables)) {
                        Ok(total) => Some(total),
                        Err(err) => {
                            warn!("Loop {}: {}", bounds.label, err);
                            return Ok(Executed {
                                outcome: StepOutcome::failed_because(err.to_string()),
                                transition: Some(self.loops.abandon(bounds)),
                            });
                        }
                    },
                };
                self.loops.visit_count(bounds, || total.unwrap_or(0))
            }
            LoopMode::While(condition) => {
                let holds = conditions::evaluate(
                    &self.capabilities,
                    &self.config,
                    condition,
                    &self.variables,
                )
                .await?;
                self.loops.visit_while(bounds, holds)
            }
        };

        Ok(Executed {
            outcome: StepOutcome::success(),
            transition: Some(transition),
        })
    }

    async fn run_action(&mut self, step_id: &str, kind: &StepKind) -> Result<StepOutcome, StepError> {
        let resolver = VariableResolver::new(&self.variables);

        match kind {
            StepKind::Click(click) => {
                let (x, y) = (click.x.resolve(&resolver)?, click.y.resolve(&resolver)?);
                let button = click.button.resolve(&resolver)?;
                let clicks = click.clicks.resolve(&resolver)?;
                self.capabilities.input_sink()?.click(x, y, button, clicks).await?;
                Ok(StepOutcome::success())
            }
            StepKind::DoubleClick(click) => {
                let (x, y) = (click.x.resolve(&resolver)?, click.y.resolve(&resolver)?);
                let button = click.button.resolve(&resolver)?;
                self.capabilities.input_sink()?.click(x, y, button, 2).await?;
                Ok(StepOutcome::success())
            }
            StepKind::RightClick(point) => {
                let (x, y) = (point.x.resolve(&resolver)?, point.y.resolve(&resolver)?);
                self.capabilities
                    .input_sink()?
                    .click(x, y, MouseButton::Right, 1)
                    .await?;
                Ok(StepOutcome::success())
            }
            StepKind::Move(point) => {
                let (x, y) = (point.x.resolve(&resolver)?, point.y.resolve(&resolver)?);
                self.capabilities.input_sink()?.move_to(x, y).await?;
                Ok(StepOutcome::success())
            }
            StepKind::Key(key) => {
                let sink = self.capabilities.input_sink()?;
                match &key.key {
                    KeySpec::Single(key) => {
                        let key = resolver.resolve_str(key);
                        sink.key_press(&key, &[]).await?;
                        sink.key_release(&key).await?;
                    }
                    KeySpec::Combo(keys) => {
                        let keys: Vec<String> = keys.iter().map(|k| resolver.resolve_str(k)).collect();
                        sink.hotkey(&keys).await?;
                    }
                }
                Ok(StepOutcome::success())
            }
            StepKind::TypeText(text) => {
                let interval = seconds(text.interval.resolve(&resolver)?);
                let text = resolver.resolve_str(&text.text);
                self.capabilities.input_sink()?.type_text(&text, interval).await?;
                Ok(StepOutcome::success())
            }
            StepKind::Scroll(scroll) => {
                let delta = scroll.delta.resolve(&resolver)?;
                let x = scroll.x.as_ref().map(|x| x.resolve(&resolver)).transpose()?;
                let y = scroll.y.as_ref().map(|y| y.resolve(&resolver)).transpose()?;
                self.capabilities.input_sink()?.scroll(x, y, delta).await?;
                Ok(StepOutcome::success())
            }
            StepKind::Wait(wait) => {
                let duration = seconds(wait.seconds.resolve(&resolver)?);
                debug!("Waiting {:?}", duration);
                match self.control.sleep(duration).await {
                    Ok(()) => Ok(StepOutcome::success()),
                    Err(_) => Ok(StepOutcome::failed_because("stopped")),
                }
            }
            StepKind::FindImage(find) => self.find_image(find).await,
            StepKind::FindText(find) => self.find_text(find).await,
            StepKind::ActivateWindow(window) => {
                let title = resolver.resolve_str(&window.title);
                let activated = self.capabilities.window_controller()?.activate(&title).await?;
                if !activated {
                    debug!("No window matching '{}'", title);
                }
                Ok(StepOutcome::from_success(activated))
            }
            StepKind::Condition(step) => {
                let holds = conditions::evaluate(
                    &self.capabilities,
                    &self.config,
                    &step.condition,
                    &self.variables,
                )
                .await?;
                Ok(StepOutcome::branch(holds).with_data(Value::Bool(holds)))
            }
            StepKind::SetVariable(set) => {
                let value = resolver.resolve_deep(&set.value);
                debug!("Setting variable {} = {}", set.name, value);
                self.variables.set(set.name.clone(), value.clone());
                Ok(StepOutcome::success().with_data(value))
            }
            StepKind::Replay(replay) => {
                replay::run(
                    &self.capabilities,
                    &self.config,
                    &self.context,
                    replay,
                    &self.variables,
                    &mut self.control,
                )
                .await
            }
            StepKind::Custom(custom) => {
                let call = StepCall {
                    run_id: self.context.id.clone(),
                    step_id: step_id.to_string(),
                    handler: custom.handler.clone(),
                    params: resolver.resolve_deep(&custom.params),
                    variables: self.variables.snapshot(),
                };
                let outcome = self.handlers.call(call).await?;
                if let Some(name) = &custom.save_to {
                    self.variables.set(name.clone(), outcome.data.clone());
                }
                Ok(outcome)
            }
            StepKind::Comment(_) => Ok(StepOutcome::success()),
            StepKind::EndLoop(_) => Ok(StepOutcome::success()),
            StepKind::Loop(_) => Ok(StepOutcome::success()),
        }
    }

    async fn find_image(&mut self, find: &FindImageStep) -> Result<StepOutcome, StepError> {
        let resolver = VariableResolver::new(&self.variables);
        let template = self.config.paths.template(&resolver.resolve_str(&find.image));
        let confidence = match &find.confidence {
            Some(confidence) => confidence.resolve(&resolver)?,
            None => self.config.matching.confidence,
        };
        let timeout = match &find.timeout {
            Some(timeout) => seconds(timeout.resolve(&resolver)?),
            None => self.config.matching.timeout(),
        };

        let found = self
            .capabilities
            .image_matcher()?
            .find(&template, confidence, find.region, Some(timeout))
            .await?;
        self.found(found, find.click, find.save_to.as_deref()).await
    }

    async fn find_text(&mut self, find: &FindTextStep) -> Result<StepOutcome, StepError> {
        let resolver = VariableResolver::new(&self.variables);
        let text = resolver.resolve_str(&find.text);
        let timeout = match &find.timeout {
            Some(timeout) => seconds(timeout.resolve(&resolver)?),
            None => self.config.matching.timeout(),
        };

        let found = self
            .capabilities
            .text_matcher()?
            .find(&text, find.region, Some(timeout))
            .await?;
        self.found(found, find.click, find.save_to.as_deref()).await
    }

    async fn found(
        &mut self,
        region: Option<Region>,
        click: bool,
        save_to: Option<&str>,
    ) -> Result<StepOutcome, StepError> {
        let Some(region) = region else {
            return Ok(StepOutcome::failure());
        };

        if let Some(name) = save_to {
            self.variables.set(name, region.to_value());
        }
        if click {
            let (x, y) = region.center();
            self.capabilities
                .input_sink()?
                .click(x, y, MouseButton::Left, 1)
                .await?;
        }
        Ok(StepOutcome::success().with_data(region.to_value()))
    }
}
