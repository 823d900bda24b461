//! The replay scheduler

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use mp_config::{EngineConfig, PlaybackConfig};
use mp_core::{
    Capabilities, ControlReceiver, ControlSignal, InputEvent, InputEventKind, RunContext, RunControl,
};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::dispatch::{dispatch, MatchDefaults};
use crate::error::{SchedulerError, SchedulerResult};

/// How a playback session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    /// Every event was played
    Completed,
    /// A stop request ended playback early
    Stopped,
    /// The worker panicked; the counts cover events finished before it
    Aborted,
}

/// Summary handed to [`PlaybackObserver::on_complete`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackReport {
    pub session_id: String,
    pub status: PlaybackStatus,
    /// Events delivered without error
    pub dispatched: usize,
    /// Events whose delivery failed and was skipped
    pub failed: usize,
    /// Wall time from start to finish, paused time included
    pub elapsed: Duration,
}

/// Callbacks fired on the playback task
///
/// Both methods run on the worker with no scheduler lock held, so they may
/// call back into the scheduler (for example to stop it).
pub trait PlaybackObserver: Send + Sync {
    /// Fired before event `index` is dispatched
    fn on_event(&self, _index: usize, _event: &InputEvent) {}

    /// Fired exactly once per session
    fn on_complete(&self, _report: &PlaybackReport) {}
}

/// Observer that ignores every callback
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl PlaybackObserver for NoopObserver {}

/// State shared between the scheduler handle and its worker task
struct Shared {
    capabilities: Capabilities,
    playback: PlaybackConfig,
    defaults: MatchDefaults,
    poll_interval: Duration,
    cursor: AtomicUsize,
    /// f64 bits
    speed: AtomicU64,
    playing: AtomicBool,
    /// Replaced for every session. Held while `playing` changes, so a
    /// control call that sees a session playing reaches its signal.
    control: Mutex<Arc<ControlSignal>>,
    report: watch::Sender<Option<PlaybackReport>>,
    dispatched: AtomicUsize,
    failed: AtomicUsize,
}

impl Shared {
    fn control(&self) -> MutexGuard<'_, Arc<ControlSignal>> {
        self.control.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn speed(&self) -> f64 {
        f64::from_bits(self.speed.load(Ordering::SeqCst))
    }

    fn store_speed(&self, speed: f64) -> f64 {
        let speed = self.playback.clamp_speed(speed);
        self.speed.store(speed.to_bits(), Ordering::SeqCst);
        speed
    }

    /// Recorded seconds scaled by the current speed
    fn scaled(&self, seconds: f64) -> Duration {
        Duration::try_from_secs_f64(seconds / self.speed()).unwrap_or(Duration::ZERO)
    }
}

/// Replays a loaded event list on a background task
///
/// One session runs at a time. The event list stays loaded after a session
/// ends, so the same recording can be played again.
pub struct EventScheduler {
    shared: Arc<Shared>,
    events: Mutex<Arc<[InputEvent]>>,
}

impl EventScheduler {
    /// Scheduler with default matching and path settings
    pub fn new(capabilities: Capabilities, playback: PlaybackConfig, poll_interval: Duration) -> Self {
        Self::with_defaults(capabilities, playback, MatchDefaults::default(), poll_interval)
    }

    pub fn from_config(capabilities: Capabilities, config: &EngineConfig) -> Self {
        let defaults = MatchDefaults {
            matching: config.matching.clone(),
            paths: config.paths.clone(),
        };
        Self::with_defaults(
            capabilities,
            config.playback.clone(),
            defaults,
            config.poll_interval(),
        )
    }

    fn with_defaults(
        capabilities: Capabilities,
        playback: PlaybackConfig,
        defaults: MatchDefaults,
        poll_interval: Duration,
    ) -> Self {
        let speed = playback.default_speed;
        let (report, _) = watch::channel(None);

        Self {
            shared: Arc::new(Shared {
                capabilities,
                playback,
                defaults,
                poll_interval,
                cursor: AtomicUsize::new(0),
                speed: AtomicU64::new(speed.to_bits()),
                playing: AtomicBool::new(false),
                control: Mutex::new(Arc::new(ControlSignal::new(poll_interval))),
                report,
                dispatched: AtomicUsize::new(0),
                failed: AtomicUsize::new(0),
            }),
            events: Mutex::new(Arc::from(Vec::new())),
        }
    }

    /// Replace the event list
    ///
    /// Events are played in the given order; they are never sorted.
    pub fn load(&self, events: Vec<InputEvent>) -> SchedulerResult<()> {
        if self.is_playing() {
            return Err(SchedulerError::Busy);
        }

        debug!("Loaded {} events", events.len());
        *self.events.lock().unwrap_or_else(|e| e.into_inner()) = Arc::from(events);
        self.shared.cursor.store(0, Ordering::SeqCst);
        Ok(())
    }

    /// Like [`load`](Self::load), rejecting lists whose timestamps decrease
    pub fn load_checked(&self, events: Vec<InputEvent>) -> SchedulerResult<()> {
        InputEvent::validate_order(&events).map_err(|index| SchedulerError::OutOfOrder { index })?;
        self.load(events)
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start playing the loaded events at `speed` (clamped)
    pub fn start(&self, speed: f64, observer: Arc<dyn PlaybackObserver>) -> SchedulerResult<()> {
        self.start_in(RunContext::new(), speed, observer)
    }

    /// Start a session with a caller-provided identity
    #[instrument(skip(self, context, observer), fields(session = %context.id))]
    pub fn start_in(
        &self,
        context: RunContext,
        speed: f64,
        observer: Arc<dyn PlaybackObserver>,
    ) -> SchedulerResult<()> {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner()).clone();

        let (control, speed) = {
            let mut slot = self.shared.control();
            if self.is_playing() {
                warn!("Playback already in progress");
                return Err(SchedulerError::Busy);
            }

            let speed = self.shared.store_speed(speed);
            self.shared.cursor.store(0, Ordering::SeqCst);
            self.shared.dispatched.store(0, Ordering::SeqCst);
            self.shared.failed.store(0, Ordering::SeqCst);
            self.shared.report.send_replace(None);

            let signal = Arc::new(ControlSignal::new(self.shared.poll_interval));
            let control = signal.subscribe();
            *slot = signal;
            self.shared.playing.store(true, Ordering::SeqCst);
            (control, speed)
        };

        info!("Starting playback of {} events at {}x", events.len(), speed);

        let shared = self.shared.clone();
        tokio::spawn(async move {
            let session_id = context.id.clone();
            let started = Instant::now();
            let worker = tokio::spawn(play(
                shared.clone(),
                context,
                events,
                control,
                observer.clone(),
            ));

            let report = match worker.await {
                Ok(report) => report,
                Err(e) => {
                    error!("Playback worker failed: {}", e);
                    PlaybackReport {
                        session_id,
                        status: PlaybackStatus::Aborted,
                        dispatched: shared.dispatched.load(Ordering::SeqCst),
                        failed: shared.failed.load(Ordering::SeqCst),
                        elapsed: started.elapsed(),
                    }
                }
            };

            {
                let _slot = shared.control();
                shared.playing.store(false, Ordering::SeqCst);
                shared.report.send_replace(Some(report.clone()));
            }
            observer.on_complete(&report);
        });

        Ok(())
    }

    /// Suspend playback; returns false if not playing or already paused
    pub fn pause(&self) -> bool {
        let control = self.shared.control();
        if !self.is_playing() {
            return false;
        }
        let paused = control.pause();
        if paused {
            info!("Playback paused at event {}", self.cursor());
        }
        paused
    }

    pub fn resume(&self) -> bool {
        let control = self.shared.control();
        if !self.is_playing() {
            return false;
        }
        let resumed = control.resume();
        if resumed {
            info!("Playback resumed");
        }
        resumed
    }

    /// Request a stop; the worker observes it within one poll interval
    pub fn stop(&self) -> bool {
        let control = self.shared.control();
        if !self.is_playing() {
            return false;
        }
        let stopped = control.stop();
        if stopped {
            info!("Playback stop requested");
        }
        stopped
    }

    /// Change speed for subsequent waits; returns the clamped value
    pub fn set_speed(&self, speed: f64) -> f64 {
        let speed = self.shared.store_speed(speed);
        debug!("Playback speed set to {}x", speed);
        speed
    }

    pub fn speed(&self) -> f64 {
        self.shared.speed()
    }

    /// Index of the next event to dispatch
    pub fn cursor(&self) -> usize {
        self.shared.cursor.load(Ordering::SeqCst)
    }

    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.is_playing() && self.shared.control().current() == RunControl::Paused
    }

    /// Wait for the current session to finish
    ///
    /// Returns the report of the latest session, or `None` if nothing has
    /// been played yet.
    pub async fn wait_for_completion(&self) -> Option<PlaybackReport> {
        let mut rx = {
            let _slot = self.shared.control();
            let rx = self.shared.report.subscribe();
            if !self.is_playing() {
                return rx.borrow().clone();
            }
            rx
        };

        let report = match rx.wait_for(Option::is_some).await {
            Ok(report) => report.clone(),
            Err(_) => None,
        };
        report
    }
}

impl std::fmt::Debug for EventScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventScheduler")
            .field("events", &self.len())
            .field("cursor", &self.cursor())
            .field("speed", &self.speed())
            .field("playing", &self.is_playing())
            .finish()
    }
}

/// Worker loop for one session
///
/// Counts are mirrored into `shared` as they change so a report can still
/// be built if this task dies.
async fn play(
    shared: Arc<Shared>,
    context: RunContext,
    events: Arc<[InputEvent]>,
    mut control: ControlReceiver,
    observer: Arc<dyn PlaybackObserver>,
) -> PlaybackReport {
    let started = Instant::now();
    let mut dispatched = 0;
    let mut failed = 0;
    let mut status = PlaybackStatus::Completed;

    for (index, event) in events.iter().enumerate() {
        if index > 0 {
            let gap = shared.scaled(event.timestamp - events[index - 1].timestamp);
            if control.sleep(gap).await.is_err() {
                status = PlaybackStatus::Stopped;
                break;
            }
        }
        if control.checkpoint().await.is_err() {
            status = PlaybackStatus::Stopped;
            break;
        }

        shared.cursor.store(index, Ordering::SeqCst);
        observer.on_event(index, event);

        match dispatch(&shared.capabilities, &shared.defaults, event, &mut control).await {
            Ok(Ok(())) => {
                dispatched += 1;
                shared.dispatched.store(dispatched, Ordering::SeqCst);
            }
            Ok(Err(e)) => {
                warn!("Event {} ({}) failed: {}", index, event.kind.name(), e);
                failed += 1;
                shared.failed.store(failed, Ordering::SeqCst);
            }
            Err(_) => {
                status = PlaybackStatus::Stopped;
                break;
            }
        }
        shared.cursor.store(index + 1, Ordering::SeqCst);

        if let InputEventKind::Wait { duration } = event.kind {
            if control.sleep(shared.scaled(duration)).await.is_err() {
                status = PlaybackStatus::Stopped;
                break;
            }
        }
    }

    let report = PlaybackReport {
        session_id: context.id,
        status,
        dispatched,
        failed,
        elapsed: started.elapsed(),
    };

    info!(
        "Playback {:?}: {} dispatched, {} failed in {:?}",
        report.status, report.dispatched, report.failed, report.elapsed
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> EventScheduler {
        EventScheduler::new(
            Capabilities::new(),
            PlaybackConfig::default(),
            Duration::from_millis(100),
        )
    }

    fn wait(t: f64) -> InputEvent {
        InputEvent::new(t, InputEventKind::Wait { duration: 0.0 })
    }

    #[test]
    fn test_set_speed_clamps() {
        let scheduler = scheduler();
        assert_eq!(scheduler.speed(), 1.0);
        assert_eq!(scheduler.set_speed(50.0), 10.0);
        assert_eq!(scheduler.set_speed(0.0), 0.1);
        assert_eq!(scheduler.speed(), 0.1);
    }

    #[test]
    fn test_load_checked_rejects_unsorted() {
        let scheduler = scheduler();
        let err = scheduler
            .load_checked(vec![wait(0.0), wait(2.0), wait(1.5)])
            .unwrap_err();
        assert_eq!(err, SchedulerError::OutOfOrder { index: 2 });
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_controls_ignored_when_idle() {
        let scheduler = scheduler();
        assert!(!scheduler.pause());
        assert!(!scheduler.resume());
        assert!(!scheduler.stop());
        assert!(!scheduler.is_paused());
    }

    #[tokio::test]
    async fn test_wait_before_any_session() {
        let scheduler = scheduler();
        assert_eq!(scheduler.wait_for_completion().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_list_completes_immediately() {
        let scheduler = scheduler();
        scheduler.start(1.0, Arc::new(NoopObserver)).unwrap();

        let report = scheduler.wait_for_completion().await.unwrap();
        assert_eq!(report.status, PlaybackStatus::Completed);
        assert_eq!(report.dispatched, 0);
        assert_eq!(report.elapsed, Duration::ZERO);
        assert!(!scheduler.is_playing());

        // a finished session keeps answering with its report
        assert_eq!(scheduler.wait_for_completion().await, Some(report));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_right_after_start_is_kept() {
        let scheduler = scheduler();
        scheduler.load(vec![wait(0.0), wait(30.0)]).unwrap();

        scheduler.start(1.0, Arc::new(NoopObserver)).unwrap();
        assert!(scheduler.stop());

        let report = scheduler.wait_for_completion().await.unwrap();
        assert_eq!(report.status, PlaybackStatus::Stopped);
        assert_eq!(report.dispatched, 0);

        // the next session starts from a clean signal
        scheduler.start(1.0, Arc::new(NoopObserver)).unwrap();
        assert!(scheduler.is_playing());
        assert!(!scheduler.is_paused());
        assert!(scheduler.stop());
        scheduler.wait_for_completion().await.unwrap();
    }
}
