use crate::error::{Error, Result};
use tokio::sync::watch;

/// Where a synchronizer's background loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotStarted,
    /// Listing and reconciling; the cache may not reflect the remote state yet
    Listing,
    /// Watch stream attached, events are being applied
    Watching,
    Stopping,
    Stopped,
}

impl Phase {
    const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopping | Self::Stopped)
    }
}

/// Readiness latch and phase tracker shared between a synchronizer's loop
/// and the tasks waiting on it
#[derive(Debug)]
pub struct Lifecycle {
    phase: watch::Sender<Phase>,
    ready: watch::Sender<bool>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    #[must_use]
    pub fn new() -> Self {
        let (phase, _) = watch::channel(Phase::NotStarted);
        let (ready, _) = watch::channel(false);
        Self { phase, ready }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Moves to `next` unless shutdown already began; only `Stopped` may
    /// follow `Stopping`
    pub(crate) fn advance(&self, next: Phase) {
        self.phase.send_if_modified(|current| {
            if *current == next || (current.is_terminal() && next != Phase::Stopped) {
                return false;
            }
            *current = next;
            true
        });
    }

    /// Latches readiness; returns `true` only for the first call
    pub(crate) fn mark_ready(&self) -> bool {
        self.ready.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        })
    }

    /// Resolves once the first reconciliation finished. Fails with
    /// `Error::Stopped` if the loop ends before that.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotStarted` if the loop was never started
    pub async fn wait_ready(&self) -> Result<()> {
        let mut ready = self.ready.subscribe();
        let mut phase = self.phase.subscribe();

        loop {
            if *ready.borrow_and_update() {
                return Ok(());
            }
            match *phase.borrow_and_update() {
                Phase::NotStarted => return Err(Error::NotStarted),
                Phase::Stopped => return Err(Error::Stopped),
                _ => {}
            }

            tokio::select! {
                changed = ready.changed() => changed.map_err(|_| Error::Stopped)?,
                changed = phase.changed() => changed.map_err(|_| Error::Stopped)?,
            }
        }
    }

    /// Resolves once the loop reached `Stopped`
    pub async fn wait_stopped(&self) {
        let mut phase = self.phase.subscribe();
        // The sender lives as long as `self`, so this only returns on a match
        let _ = phase.wait_for(|phase| *phase == Phase::Stopped).await;
    }
}

/// Marks the lifecycle `Stopped` when the loop exits, including by panic
pub(crate) struct StoppedGuard<'a>(pub(crate) &'a Lifecycle);

impl Drop for StoppedGuard<'_> {
    fn drop(&mut self) {
        self.0.advance(Phase::Stopped);
    }
}
