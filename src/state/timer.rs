//! The single background timer owned by the current game phase.
//!
//! Timers never touch game state themselves: when they elapse they post a
//! [`ControlEvent::Timer`] back into the game's event queue, tagged with the
//! epoch they were installed under. The game ignores firings whose epoch is no
//! longer current, which makes cancellation safe even when a firing is already
//! queued.

use std::time::Duration;

use tokio::{sync::mpsc, task::JoinHandle, time::MissedTickBehavior};

use crate::state::game::ControlEvent;

/// What the game should do when a timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Move the pre-game invitation to another station.
    PregameCycle,
    /// Remind the stations still held after a round to release.
    HoldReminder,
    /// Nobody pressed for too long: abandon the round.
    AllReleasedTimeout,
    /// Abandon animation finished: return to pre-game.
    AllReleasedReset,
    /// Win animation shown with no button held: return to pre-game.
    WinDisplay,
}

/// Delivery of an elapsed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    /// Epoch the timer was installed under.
    pub epoch: u64,
    /// Action requested.
    pub kind: TimerKind,
}

/// Handle to a running timer task; dropping it cancels the task.
#[derive(Debug)]
pub struct PhaseTimer {
    epoch: u64,
    kind: TimerKind,
    handle: JoinHandle<()>,
}

impl PhaseTimer {
    /// Fire once after `delay`.
    pub fn once(
        epoch: u64,
        kind: TimerKind,
        delay: Duration,
        events: mpsc::UnboundedSender<ControlEvent>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(ControlEvent::Timer(TimerFired { epoch, kind }));
        });
        Self {
            epoch,
            kind,
            handle,
        }
    }

    /// Fire every `period`, the first time one period from now.
    pub fn every(
        epoch: u64,
        kind: TimerKind,
        period: Duration,
        events: mpsc::UnboundedSender<ControlEvent>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticks = tokio::time::interval_at(start, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                if events
                    .send(ControlEvent::Timer(TimerFired { epoch, kind }))
                    .is_err()
                {
                    break;
                }
            }
        });
        Self {
            epoch,
            kind,
            handle,
        }
    }

    /// Action this timer requests.
    pub fn kind(&self) -> TimerKind {
        self.kind
    }

    /// Whether a firing belongs to this timer.
    pub fn matches(&self, fired: &TimerFired) -> bool {
        self.epoch == fired.epoch && self.kind == fired.kind
    }
}

impl Drop for PhaseTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
