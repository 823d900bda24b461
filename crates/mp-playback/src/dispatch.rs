//! Delivery of a single recorded event to the capabilities

use std::time::Duration;

use mp_config::{MatchingConfig, PathsConfig};
use mp_core::{
    Cancelled, Capabilities, CapabilityError, CapabilityResult, ControlReceiver, InputEvent,
    InputEventKind,
};
use tracing::{debug, trace};

/// Gap between two lookups of a `wait_for_image` event
const IMAGE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Lookup defaults for events that leave them out
#[derive(Debug, Clone, Default)]
pub(crate) struct MatchDefaults {
    pub matching: MatchingConfig,
    pub paths: PathsConfig,
}

/// Send one event to the matching capability
///
/// The outer `Err` means a stop arrived while a `wait_for_image` event was
/// still polling the screen.
pub(crate) async fn dispatch(
    capabilities: &Capabilities,
    defaults: &MatchDefaults,
    event: &InputEvent,
    control: &mut ControlReceiver,
) -> Result<CapabilityResult<()>, Cancelled> {
    trace!("Dispatching {} at {:.3}s", event.kind.name(), event.timestamp);

    if let InputEventKind::WaitForImage {
        image,
        timeout,
        confidence,
    } = &event.kind
    {
        let template = defaults.paths.template(image);
        let confidence = confidence.unwrap_or(defaults.matching.confidence);
        let timeout = Duration::try_from_secs_f64(timeout.unwrap_or(defaults.matching.timeout_secs))
            .unwrap_or(Duration::ZERO);
        return wait_for_image(capabilities, &template, confidence, timeout, control).await;
    }

    Ok(deliver(capabilities, &event.kind).await)
}

/// Events that complete in one capability call
///
/// `Wait` events have no side effect here; the scheduler performs their
/// delay itself.
async fn deliver(capabilities: &Capabilities, kind: &InputEventKind) -> CapabilityResult<()> {
    match kind {
        InputEventKind::PointerMove { x, y } => capabilities.input_sink()?.move_to(*x, *y).await,
        InputEventKind::PointerButton {
            x,
            y,
            button,
            clicks,
        } => {
            capabilities
                .input_sink()?
                .click(*x, *y, *button, *clicks)
                .await
        }
        InputEventKind::Scroll { x, y, delta } => {
            capabilities.input_sink()?.scroll(*x, *y, *delta).await
        }
        InputEventKind::KeyPress { key, modifiers } => {
            capabilities.input_sink()?.key_press(key, modifiers).await
        }
        InputEventKind::KeyRelease { key } => capabilities.input_sink()?.key_release(key).await,
        InputEventKind::WindowActivate { title } => {
            if capabilities.window_controller()?.activate(title).await? {
                Ok(())
            } else {
                Err(CapabilityError::failed(
                    "window controller",
                    format!("no window titled '{}'", title),
                ))
            }
        }
        InputEventKind::Wait { .. } | InputEventKind::WaitForImage { .. } => Ok(()),
    }
}

/// Poll the image matcher until `template` shows up or `timeout` runs out
///
/// Each lookup is a single non-waiting attempt. Time spent paused between
/// attempts does not count against the timeout.
async fn wait_for_image(
    capabilities: &Capabilities,
    template: &str,
    confidence: f64,
    timeout: Duration,
    control: &mut ControlReceiver,
) -> Result<CapabilityResult<()>, Cancelled> {
    let matcher = match capabilities.image_matcher() {
        Ok(matcher) => matcher,
        Err(e) => return Ok(Err(e)),
    };

    let mut remaining = timeout;
    loop {
        match matcher.find(template, confidence, None, None).await {
            Ok(Some(_)) => {
                debug!("Found {}", template);
                return Ok(Ok(()));
            }
            Ok(None) => {}
            Err(e) => return Ok(Err(e)),
        }

        if remaining.is_zero() {
            return Ok(Err(CapabilityError::failed(
                "image matcher",
                format!("'{}' did not appear within {:?}", template, timeout),
            )));
        }
        let slice = remaining.min(IMAGE_POLL_INTERVAL);
        control.sleep(slice).await?;
        remaining = remaining.saturating_sub(slice);
    }
}
