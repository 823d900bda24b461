//! Replay step: drives a private scheduler session from inside a run

use std::sync::Arc;

use mp_config::EngineConfig;
use mp_core::{Capabilities, ControlReceiver, RunContext};
use mp_playback::{EventScheduler, NoopObserver, PlaybackStatus};
use mp_template::{VariableBag, VariableResolver};
use serde_json::json;
use tracing::{info, instrument};

use crate::error::StepFault;
use crate::exec::StepError;
use crate::outcome::StepOutcome;
use crate::step::ReplayStep;

/// Play a recording and block until it finishes
///
/// The sub-session follows the parent's pause state. A parent stop stops
/// the sub-session, waits for it to wind down and reports `success == false`.
#[instrument(skip_all, fields(run = %context.id))]
pub(crate) async fn run(
    capabilities: &Capabilities,
    config: &EngineConfig,
    context: &RunContext,
    step: &ReplayStep,
    variables: &VariableBag,
    control: &mut ControlReceiver,
) -> Result<StepOutcome, StepError> {
    let resolver = VariableResolver::new(variables);
    let source = config.paths.recording(&resolver.resolve_str(&step.source));
    let speed = match &step.speed {
        Some(speed) => speed.resolve(&resolver)?,
        None => config.playback.default_speed,
    };

    let replay_fault = |message: String| StepFault::Replay {
        source_ref: source.clone(),
        message,
    };

    let events = capabilities
        .serializer()?
        .load_events(&source)
        .await
        .map_err(|e| replay_fault(e.to_string()))?;

    let scheduler = EventScheduler::from_config(capabilities.clone(), config);
    scheduler.load(events).map_err(|e| replay_fault(e.to_string()))?;
    scheduler
        .start_in(context.child(), speed, Arc::new(NoopObserver))
        .map_err(|e| replay_fault(e.to_string()))?;

    loop {
        if control.is_stopping() {
            scheduler.stop();
            let report = scheduler.wait_for_completion().await;
            info!("Replay of {} stopped with the run", source);
            let dispatched = report.map(|r| r.dispatched).unwrap_or(0);
            return Ok(StepOutcome::failed_because("stopped")
                .with_data(json!({ "error": "stopped", "dispatched": dispatched })));
        }
        if control.is_paused() {
            scheduler.pause();
        } else {
            scheduler.resume();
        }

        tokio::select! {
            report = scheduler.wait_for_completion() => {
                let Some(report) = report else {
                    return Ok(StepOutcome::failed_because("replay produced no report"));
                };
                info!(
                    "Replay of {} finished: {} dispatched, {} failed",
                    source, report.dispatched, report.failed
                );
                let completed = report.status == PlaybackStatus::Completed;
                return Ok(StepOutcome::from_success(completed).with_data(json!({
                    "source": source,
                    "dispatched": report.dispatched,
                    "failed": report.failed,
                })));
            }
            changed = control.changed() => {
                if changed.is_err() {
                    scheduler.stop();
                    let _ = scheduler.wait_for_completion().await;
                    return Ok(StepOutcome::failed_because("stopped"));
                }
            }
        }
    }
}
