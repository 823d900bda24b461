//! Execution controller
//!
//! Owns the interpreter and the independent playback scheduler. Control
//! calls (`pause`, `resume`, `stop`) fan out to every active session.

use std::path::Path;
use std::sync::Arc;

use mp_config::EngineConfig;
use mp_core::{Capabilities, InputEvent, RunContext, StepRecord};
use mp_playback::{EventScheduler, PlaybackObserver, PlaybackReport};
use mp_script::{
    HandlerRegistry, Program, RunHandle, RunObserver, RunState, StepInterpreter,
};
use mp_template::VariableBag;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::error::{EngineError, EngineResult};

/// Point-in-time view of both sessions
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub run: RunState,
    /// Step being executed by the active run
    pub current_step: usize,
    pub playback_playing: bool,
    pub playback_paused: bool,
    /// Index of the next event of the playback session
    pub cursor: usize,
    pub speed: f64,
}

/// Handle to an independent playback session
#[derive(Debug, Clone)]
pub struct PlaybackHandle {
    session_id: String,
    scheduler: Arc<EventScheduler>,
}

impl PlaybackHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Wait for the session to finish
    pub async fn wait(&self) -> Option<PlaybackReport> {
        self.scheduler.wait_for_completion().await
    }
}

/// Entry point for running programs and recordings
pub struct ExecutionController {
    config: EngineConfig,
    capabilities: Capabilities,
    interpreter: StepInterpreter,
    scheduler: Arc<EventScheduler>,
}

impl ExecutionController {
    pub fn new(config: EngineConfig, capabilities: Capabilities) -> Self {
        let interpreter = StepInterpreter::new(capabilities.clone(), config.clone());
        let scheduler = Arc::new(EventScheduler::from_config(capabilities.clone(), &config));

        Self {
            config,
            capabilities,
            interpreter,
            scheduler,
        }
    }

    /// Load the configuration file at `path` and build a controller
    pub fn from_config_file(path: impl AsRef<Path>, capabilities: Capabilities) -> EngineResult<Self> {
        let config = EngineConfig::load(path)?;
        Ok(Self::new(config, capabilities))
    }

    /// Dispatch `custom` steps to `handlers`
    pub fn with_handlers(mut self, handlers: Arc<HandlerRegistry>) -> Self {
        self.interpreter =
            StepInterpreter::with_handlers(self.capabilities.clone(), self.config.clone(), handlers);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        self.interpreter.handlers()
    }

    pub fn interpreter(&self) -> &StepInterpreter {
        &self.interpreter
    }

    /// Start running `program`
    pub fn run(&self, program: Program, observer: Arc<dyn RunObserver>) -> EngineResult<RunHandle> {
        self.run_with_variables(program, VariableBag::new(), observer)
    }

    /// Start running `program` with initial variables
    pub fn run_with_variables(
        &self,
        program: Program,
        variables: VariableBag,
        observer: Arc<dyn RunObserver>,
    ) -> EngineResult<RunHandle> {
        Ok(self
            .interpreter
            .start_with_variables(program, variables, observer)?)
    }

    /// Build a program from step records and start it
    pub fn run_records(
        &self,
        records: &[StepRecord],
        observer: Arc<dyn RunObserver>,
    ) -> EngineResult<RunHandle> {
        let program = Program::from_records(records)?;
        self.run(program, observer)
    }

    /// Load a program through the serializer and start it
    #[instrument(skip(self, observer))]
    pub async fn run_source(
        &self,
        source: &str,
        observer: Arc<dyn RunObserver>,
    ) -> EngineResult<RunHandle> {
        if self.interpreter.is_running() {
            return Err(EngineError::Busy("a run"));
        }

        let records = self.capabilities.serializer()?.load_steps(source).await?;
        debug!("Loaded {} steps from {}", records.len(), source);
        self.run_records(&records, observer)
    }

    /// Start an independent playback session
    pub fn play(
        &self,
        events: Vec<InputEvent>,
        speed: f64,
        observer: Arc<dyn PlaybackObserver>,
    ) -> EngineResult<PlaybackHandle> {
        self.scheduler.load(events)?;

        let context = RunContext::new();
        let session_id = context.id.clone();
        self.scheduler.start_in(context, speed, observer)?;

        Ok(PlaybackHandle {
            session_id,
            scheduler: self.scheduler.clone(),
        })
    }

    /// Load a recording through the serializer and play it
    #[instrument(skip(self, observer))]
    pub async fn play_source(
        &self,
        source: &str,
        speed: f64,
        observer: Arc<dyn PlaybackObserver>,
    ) -> EngineResult<PlaybackHandle> {
        if self.scheduler.is_playing() {
            return Err(EngineError::Busy("playback"));
        }

        let source = self.config.paths.recording(source);
        let events = self.capabilities.serializer()?.load_events(&source).await?;
        debug!("Loaded {} events from {}", events.len(), source);
        self.play(events, speed, observer)
    }

    /// Pause every active session; true if anything was paused
    pub fn pause(&self) -> bool {
        let run = self.interpreter.pause();
        let playback = self.scheduler.pause();
        if run || playback {
            info!("Paused (run: {}, playback: {})", run, playback);
        }
        run || playback
    }

    pub fn resume(&self) -> bool {
        let run = self.interpreter.resume();
        let playback = self.scheduler.resume();
        if run || playback {
            info!("Resumed (run: {}, playback: {})", run, playback);
        }
        run || playback
    }

    /// Stop every active session
    pub fn stop(&self) -> bool {
        let run = self.interpreter.stop();
        let playback = self.scheduler.stop();
        if run || playback {
            info!("Stop requested (run: {}, playback: {})", run, playback);
        }
        run || playback
    }

    /// Set the playback speed; returns the clamped value
    pub fn set_speed(&self, speed: f64) -> f64 {
        self.scheduler.set_speed(speed)
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            run: self.interpreter.state(),
            current_step: self.interpreter.current_step(),
            playback_playing: self.scheduler.is_playing(),
            playback_paused: self.scheduler.is_paused(),
            cursor: self.scheduler.cursor(),
            speed: self.scheduler.speed(),
        }
    }
}

impl std::fmt::Debug for ExecutionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionController")
            .field("interpreter", &self.interpreter)
            .field("scheduler", &self.scheduler)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}
