//! Step interpreter
//!
//! Runs one [`Program`] at a time on a tokio task. The run can be paused,
//! resumed and stopped from any thread; the worker observes those requests
//! at step boundaries and inside cooperative waits.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use mp_config::EngineConfig;
use mp_core::{Capabilities, ControlReceiver, ControlSignal, RunContext};
use mp_template::VariableBag;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{InterpreterError, InterpreterResult};
use crate::exec::{Executed, StepExecutor};
use crate::loops::{LoopController, LoopTransition};
use crate::program::Program;
use crate::registry::HandlerRegistry;
use crate::step::Step;
use crate::outcome::StepOutcome;

/// How a finished run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    Success,
    Failure,
}

/// Interpreter state as seen from outside
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Paused,
    Completed(Completion),
    Stopped,
}

/// Final status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failure,
    Stopped,
}

/// Summary of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    /// Fault message for failed runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Steps that were executed, repeats included; disabled steps are not counted
    pub steps_executed: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Variable bag at the end of the run
    pub variables: Map<String, Value>,
}

impl RunReport {
    fn aborted(run_id: String, message: String) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            status: RunStatus::Failure,
            message: Some(message),
            steps_executed: 0,
            started_at: now,
            finished_at: now,
            variables: Map::new(),
        }
    }
}

/// Lifecycle callbacks, invoked on the worker task with no lock held
///
/// Calling [`StepInterpreter::stop`] from a callback is allowed.
pub trait RunObserver: Send + Sync {
    fn on_step_start(&self, _index: usize, _step: &Step) {}

    fn on_step_end(&self, _index: usize, _step: &Step, _outcome: &StepOutcome) {}

    /// Fired exactly once per run, after the interpreter is idle again
    fn on_run_complete(&self, _report: &RunReport) {}
}

/// Observer that ignores every callback
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRunObserver;

impl RunObserver for NoopRunObserver {}

/// Handle to a started run
#[derive(Debug)]
pub struct RunHandle {
    run_id: String,
    task: JoinHandle<RunReport>,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Wait for the run to finish
    pub async fn wait(self) -> RunReport {
        match self.task.await {
            Ok(report) => report,
            Err(e) => {
                error!("Run {} task failed: {}", self.run_id, e);
                RunReport::aborted(self.run_id, e.to_string())
            }
        }
    }
}

struct Shared {
    capabilities: Capabilities,
    config: Arc<EngineConfig>,
    handlers: Arc<HandlerRegistry>,
    /// Replaced for every run. Held while `active` changes, so a control
    /// call that sees a run active reaches its signal.
    control: Mutex<Arc<ControlSignal>>,
    state: watch::Sender<RunState>,
    active: AtomicBool,
    current: AtomicUsize,
    executed: AtomicUsize,
}

impl Shared {
    fn control(&self) -> MutexGuard<'_, Arc<ControlSignal>> {
        self.control.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Executes step programs, one run at a time
#[derive(Clone)]
pub struct StepInterpreter {
    shared: Arc<Shared>,
}

impl StepInterpreter {
    pub fn new(capabilities: Capabilities, config: EngineConfig) -> Self {
        Self::with_handlers(capabilities, config, Arc::new(HandlerRegistry::new()))
    }

    /// Create an interpreter that dispatches `custom` steps to `handlers`
    pub fn with_handlers(
        capabilities: Capabilities,
        config: EngineConfig,
        handlers: Arc<HandlerRegistry>,
    ) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        let control = ControlSignal::new(config.poll_interval());

        Self {
            shared: Arc::new(Shared {
                capabilities,
                config: Arc::new(config),
                handlers,
                control: Mutex::new(Arc::new(control)),
                state,
                active: AtomicBool::new(false),
                current: AtomicUsize::new(0),
                executed: AtomicUsize::new(0),
            }),
        }
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.shared.handlers
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Start running `program` with an empty variable bag
    pub fn start(&self, program: Program, observer: Arc<dyn RunObserver>) -> InterpreterResult<RunHandle> {
        self.start_with_variables(program, VariableBag::new(), observer)
    }

    /// Start running `program` with initial variables
    ///
    /// Returns [`InterpreterError::Busy`] without touching the active run if
    /// one is in progress.
    pub fn start_with_variables(
        &self,
        program: Program,
        variables: VariableBag,
        observer: Arc<dyn RunObserver>,
    ) -> InterpreterResult<RunHandle> {
        let control = {
            let mut slot = self.shared.control();
            if self.is_running() {
                warn!("Run already in progress");
                return Err(InterpreterError::Busy);
            }

            self.shared.current.store(0, Ordering::SeqCst);
            self.shared.executed.store(0, Ordering::SeqCst);
            self.shared.state.send_replace(RunState::Running);

            let signal = Arc::new(ControlSignal::new(self.shared.config.poll_interval()));
            let control = signal.subscribe();
            *slot = signal;
            self.shared.active.store(true, Ordering::SeqCst);
            control
        };

        let context = RunContext::new();
        let run_id = context.id.clone();
        info!("Starting run {} ({} steps)", run_id, program.len());

        let shared = self.shared.clone();
        let task = tokio::spawn(async move {
            let run_id = context.id.clone();
            let started_at = Utc::now();
            let worker = tokio::spawn(run(
                shared.clone(),
                context,
                Arc::new(program),
                variables,
                control,
                observer.clone(),
            ));

            let report = match worker.await {
                Ok(report) => report,
                Err(e) => RunReport {
                    steps_executed: shared.executed.load(Ordering::SeqCst),
                    started_at,
                    ..RunReport::aborted(run_id, format!("run task failed: {}", e))
                },
            };
            finish(&shared, &report);
            observer.on_run_complete(&report);
            report
        });

        Ok(RunHandle { run_id, task })
    }

    /// Pause at the next step boundary or wait slice
    pub fn pause(&self) -> bool {
        let control = self.shared.control();
        if !self.is_running() || !control.pause() {
            return false;
        }
        self.shared.state.send_if_modified(|state| {
            if *state == RunState::Running {
                *state = RunState::Paused;
                true
            } else {
                false
            }
        });
        info!("Run paused at step {}", self.current_step());
        true
    }

    pub fn resume(&self) -> bool {
        let control = self.shared.control();
        if !self.is_running() || !control.resume() {
            return false;
        }
        self.shared.state.send_if_modified(|state| {
            if *state == RunState::Paused {
                *state = RunState::Running;
                true
            } else {
                false
            }
        });
        info!("Run resumed");
        true
    }

    /// Request a stop; observed within one poll interval
    pub fn stop(&self) -> bool {
        let control = self.shared.control();
        if !self.is_running() {
            return false;
        }
        let stopped = control.stop();
        if stopped {
            info!("Run stop requested");
        }
        stopped
    }

    pub fn state(&self) -> RunState {
        *self.shared.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.shared.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Index of the step being executed (or last executed)
    pub fn current_step(&self) -> usize {
        self.shared.current.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for StepInterpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepInterpreter")
            .field("state", &self.state())
            .field("current_step", &self.current_step())
            .field("handlers", &self.shared.handlers.len())
            .finish()
    }
}

/// Index to continue at after `index` executed
///
/// Every rule yields an anchor and the uniform `+1` turns it into the next
/// index, so a jump to `t` is stored as `t - 1`.
fn next_index(index: usize, step: &Step, executed: &Executed) -> usize {
    let outcome = &executed.outcome;
    let branch_target = match (outcome.branch, step.kind.branch_targets()) {
        (Some(true), Some((then_step, _))) => then_step,
        (Some(false), Some((_, else_step))) => else_step,
        _ => None,
    };

    let anchor: isize = if let Some(target) = branch_target {
        target as isize - 1
    } else if let Some(transition) = executed
        .transition
        .filter(|t| *t != LoopTransition::FallThrough)
    {
        match transition {
            LoopTransition::Exit { end_index } => end_index as isize,
            LoopTransition::Repeat { start_index } => start_index as isize - 1,
            LoopTransition::FallThrough => index as isize,
        }
    } else if let Some(next) = step.jump.next {
        next as isize - 1
    } else if let (false, Some(target)) = (outcome.success, step.jump.on_failure) {
        target as isize - 1
    } else {
        index as isize
    };

    (anchor + 1) as usize
}

#[instrument(skip_all, fields(run = %context.id))]
async fn run(
    shared: Arc<Shared>,
    context: RunContext,
    program: Arc<Program>,
    variables: VariableBag,
    control: ControlReceiver,
    observer: Arc<dyn RunObserver>,
) -> RunReport {
    let started_at = Utc::now();
    let mut executor = StepExecutor {
        capabilities: shared.capabilities.clone(),
        config: shared.config.clone(),
        handlers: shared.handlers.clone(),
        context: context.clone(),
        variables,
        loops: LoopController::new(),
        control,
    };

    let mut cursor = 0;
    let mut steps_executed = 0;

    let (status, message) = loop {
        if executor.control.checkpoint().await.is_err() {
            break (RunStatus::Stopped, None);
        }
        let Some(step) = program.get(cursor) else {
            break (RunStatus::Success, None);
        };
        shared.current.store(cursor, Ordering::SeqCst);

        if !step.enabled {
            debug!("Skipping disabled step {} ({})", cursor, step.id);
            cursor += 1;
            continue;
        }

        debug!("Executing step {} ({}): {}", cursor, step.id, step.kind.name());
        observer.on_step_start(cursor, step);
        steps_executed += 1;
        shared.executed.store(steps_executed, Ordering::SeqCst);

        let executed = match executor.execute(&program, cursor, step).await {
            Ok(executed) => executed,
            Err(fault) => {
                error!("Step {} ({}) failed: {}", cursor, step.id, fault);
                let outcome = StepOutcome::failed_because(fault.to_string());
                observer.on_step_end(cursor, step, &outcome);
                break (
                    RunStatus::Failure,
                    Some(format!("step {} ({}): {}", cursor, step.id, fault)),
                );
            }
        };
        observer.on_step_end(cursor, step, &executed.outcome);

        if executed.outcome.success {
            if let Some(wait_after) = step.wait_after {
                let pause = Duration::try_from_secs_f64(wait_after.max(0.0)).unwrap_or(Duration::ZERO);
                if executor.control.sleep(pause).await.is_err() {
                    break (RunStatus::Stopped, None);
                }
            }
        }

        cursor = next_index(cursor, step, &executed);
    };

    RunReport {
        run_id: context.id.clone(),
        status,
        message,
        steps_executed,
        started_at,
        finished_at: Utc::now(),
        variables: executor.variables.snapshot(),
    }
}

/// Publish the final state and release the interpreter for the next run
fn finish(shared: &Shared, report: &RunReport) {
    let state = match report.status {
        RunStatus::Success => RunState::Completed(Completion::Success),
        RunStatus::Failure => RunState::Completed(Completion::Failure),
        RunStatus::Stopped => RunState::Stopped,
    };
    {
        let _slot = shared.control();
        shared.state.send_replace(state);
        shared.active.store(false, Ordering::SeqCst);
    }

    match &report.message {
        Some(message) => error!(
            "Run {} failed after {} steps: {}",
            report.run_id, report.steps_executed, message
        ),
        None => info!(
            "Run {} finished ({:?}) after {} steps",
            report.run_id, report.status, report.steps_executed
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{ConditionStep, Condition, CommentStep, StepKind};
    use serde_json::json;

    fn comment(id: &str) -> Step {
        Step::new(id, StepKind::Comment(CommentStep::default()))
    }

    fn executed(outcome: StepOutcome, transition: Option<LoopTransition>) -> Executed {
        Executed { outcome, transition }
    }

    fn condition_step(then_step: Option<usize>, else_step: Option<usize>) -> Step {
        Step::new(
            "cond",
            StepKind::Condition(ConditionStep {
                condition: Condition::VariableEquals {
                    variable: "x".to_string(),
                    value: json!(1),
                },
                then_step,
                else_step,
            }),
        )
    }

    #[test]
    fn test_sequential() {
        assert_eq!(next_index(3, &comment("a"), &executed(StepOutcome::success(), None)), 4);
    }

    #[test]
    fn test_branch_targets() {
        let step = condition_step(Some(5), Some(0));
        assert_eq!(next_index(2, &step, &executed(StepOutcome::branch(true), None)), 5);
        assert_eq!(next_index(2, &step, &executed(StepOutcome::branch(false), None)), 0);

        let missing = condition_step(None, None).with_next(7);
        assert_eq!(next_index(2, &missing, &executed(StepOutcome::branch(true), None)), 7);
    }

    #[test]
    fn test_loop_transitions() {
        let step = comment("loop");
        assert_eq!(
            next_index(
                1,
                &step,
                &executed(StepOutcome::success(), Some(LoopTransition::Exit { end_index: 4 }))
            ),
            5
        );
        assert_eq!(
            next_index(
                4,
                &step,
                &executed(StepOutcome::success(), Some(LoopTransition::Repeat { start_index: 0 }))
            ),
            0
        );
        assert_eq!(
            next_index(
                1,
                &step.clone().with_next(9),
                &executed(StepOutcome::success(), Some(LoopTransition::FallThrough))
            ),
            9
        );
    }

    #[test]
    fn test_explicit_next_beats_failure_redirect() {
        let step = comment("a").with_next(6).with_on_failure(2);
        assert_eq!(next_index(0, &step, &executed(StepOutcome::failure(), None)), 6);

        let step = comment("a").with_on_failure(2);
        assert_eq!(next_index(0, &step, &executed(StepOutcome::failure(), None)), 2);
        assert_eq!(next_index(0, &step, &executed(StepOutcome::success(), None)), 1);
    }
}
