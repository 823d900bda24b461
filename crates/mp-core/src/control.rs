//! Cooperative run control
//!
//! A [`ControlSignal`] is held by whoever starts a session and publishes the
//! requested state (running, paused, stopping) over a `watch` channel. The
//! worker task holds a [`ControlReceiver`] and checks it at every step or
//! event boundary and inside every wait.
//!
//! Waiting is notification driven: a paused worker sleeps until the signal
//! changes. Each wait is additionally bounded by the poll interval, so a
//! missed notification costs at most one interval. Sleeps are cut into
//! slices of at most one poll interval for the same reason.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

/// Requested state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunControl {
    Running,
    Paused,
    Stopping,
}

/// Returned by waits that observed a stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cancelled")]
pub struct Cancelled;

/// Publishing side of the run control channel
#[derive(Debug)]
pub struct ControlSignal {
    tx: watch::Sender<RunControl>,
    poll_interval: Duration,
}

impl ControlSignal {
    pub fn new(poll_interval: Duration) -> Self {
        let (tx, _) = watch::channel(RunControl::Running);
        Self {
            tx,
            poll_interval,
        }
    }

    /// Current requested state
    pub fn current(&self) -> RunControl {
        *self.tx.borrow()
    }

    /// Back to `Running` for a fresh session
    pub fn reset(&self) {
        self.tx.send_replace(RunControl::Running);
    }

    /// Running → Paused. Returns whether the state changed.
    pub fn pause(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == RunControl::Running {
                *state = RunControl::Paused;
                true
            } else {
                false
            }
        })
    }

    /// Paused → Running. Returns whether the state changed.
    pub fn resume(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == RunControl::Paused {
                *state = RunControl::Running;
                true
            } else {
                false
            }
        })
    }

    /// Running or Paused → Stopping. Returns whether the state changed.
    pub fn stop(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == RunControl::Stopping {
                false
            } else {
                *state = RunControl::Stopping;
                true
            }
        })
    }

    pub fn subscribe(&self) -> ControlReceiver {
        ControlReceiver {
            rx: self.tx.subscribe(),
            poll_interval: self.poll_interval,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

/// Worker side of the run control channel
#[derive(Debug, Clone)]
pub struct ControlReceiver {
    rx: watch::Receiver<RunControl>,
    poll_interval: Duration,
}

impl ControlReceiver {
    pub fn current(&self) -> RunControl {
        *self.rx.borrow()
    }

    pub fn is_stopping(&self) -> bool {
        self.current() == RunControl::Stopping
    }

    pub fn is_paused(&self) -> bool {
        self.current() == RunControl::Paused
    }

    /// Wait for the next state change, bounded by one poll interval
    ///
    /// Returns `Err(Cancelled)` if the publishing side is gone.
    pub async fn changed(&mut self) -> Result<(), Cancelled> {
        match tokio::time::timeout(self.poll_interval, self.rx.changed()).await {
            Ok(Err(_)) => Err(Cancelled),
            _ => Ok(()),
        }
    }

    /// Block while paused
    ///
    /// Returns immediately when running and `Err(Cancelled)` as soon as a
    /// stop is requested.
    pub async fn checkpoint(&mut self) -> Result<(), Cancelled> {
        loop {
            match *self.rx.borrow_and_update() {
                RunControl::Running => return Ok(()),
                RunControl::Stopping => return Err(Cancelled),
                RunControl::Paused => {}
            }
            self.changed().await?;
        }
    }

    /// Sleep for `duration` of running time
    ///
    /// Time spent paused does not count. Returns `Err(Cancelled)` within one
    /// poll interval of a stop request.
    pub async fn sleep(&mut self, duration: Duration) -> Result<(), Cancelled> {
        let mut remaining = duration;
        while !remaining.is_zero() {
            self.checkpoint().await?;

            let slice = remaining.min(self.poll_interval);
            let started = Instant::now();
            tokio::select! {
                _ = tokio::time::sleep(slice) => {
                    remaining = remaining.saturating_sub(slice);
                }
                changed = self.rx.changed() => {
                    remaining = remaining.saturating_sub(started.elapsed());
                    if changed.is_err() {
                        return Err(Cancelled);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal() -> ControlSignal {
        ControlSignal::new(Duration::from_millis(100))
    }

    #[test]
    fn test_transitions() {
        let signal = signal();
        assert_eq!(signal.current(), RunControl::Running);

        assert!(!signal.resume());
        assert!(signal.pause());
        assert!(!signal.pause());
        assert_eq!(signal.current(), RunControl::Paused);

        assert!(signal.resume());
        assert!(signal.stop());
        assert!(!signal.stop());
        assert!(!signal.pause());
        assert_eq!(signal.current(), RunControl::Stopping);

        signal.reset();
        assert_eq!(signal.current(), RunControl::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_runs_full_duration() {
        let signal = signal();
        let mut rx = signal.subscribe();

        let started = Instant::now();
        rx.sleep(Duration::from_millis(350)).await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_excludes_paused_time() {
        let signal = std::sync::Arc::new(signal());
        let mut rx = signal.subscribe();

        let controller = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            controller.pause();
            tokio::time::sleep(Duration::from_secs(2)).await;
            controller.resume();
        });

        let started = Instant::now();
        rx.sleep(Duration::from_secs(1)).await.unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(2900), "{:?}", elapsed);
        assert!(elapsed <= Duration::from_millis(3150), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_sleep_within_one_slice() {
        let signal = std::sync::Arc::new(signal());
        let mut rx = signal.subscribe();

        let controller = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(430)).await;
            controller.stop();
        });

        let started = Instant::now();
        let result = rx.sleep(Duration::from_secs(60)).await;
        assert_eq!(result, Err(Cancelled));
        assert!(started.elapsed() <= Duration::from_millis(530));
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkpoint_blocks_while_paused() {
        let signal = std::sync::Arc::new(signal());
        signal.pause();
        let mut rx = signal.subscribe();

        let controller = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            controller.resume();
        });

        let started = Instant::now();
        rx.checkpoint().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_checkpoint_cancelled_when_stopping() {
        let signal = signal();
        signal.stop();
        let mut rx = signal.subscribe();
        assert_eq!(rx.checkpoint().await, Err(Cancelled));
        assert!(rx.is_stopping());
    }
}
