//! The game state machine.
//!
//! Every mutation happens through [`Game::handle`] (or the per-event methods it
//! dispatches to), called from a single task. Background work is limited to the
//! one [`PhaseTimer`] owned by the current phase, which reports back through the
//! same event queue.

use std::{collections::HashSet, sync::Arc, time::Duration};

use indexmap::IndexMap;
use rand::{SeedableRng, rngs::StdRng};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::{
    config::GameConfig,
    dto::station::Effect,
    error::GameError,
    state::{
        station::{ConnectionId, StationId, StationSession},
        timer::{PhaseTimer, TimerFired, TimerKind},
        turns::{Role, TurnSelector},
    },
};

/// Button color shown when a station is pressed while waiting for releases.
const HOLD_COLOR: (u8, u8, u8) = (0xFF, 0xA5, 0x00);

/// Phases of the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No station connected.
    NoStations,
    /// A single idle station blinking an invitation.
    PreGameSingle,
    /// Several idle stations; the invitation moves between them.
    PreGameMultiple,
    /// A round is running.
    Playing,
    /// A round is running but nobody holds a button.
    PlayingAllReleased,
    /// The round ended; waiting for every button to be released.
    WaitRelease,
}

/// Inputs consumed by the game, all processed one at a time.
#[derive(Debug)]
pub enum ControlEvent {
    /// A station identified itself.
    Register(StationSession),
    /// A station left or its connection dropped.
    Unregister {
        /// Departing station.
        id: StationId,
        /// Connection the departure was observed on.
        connection: ConnectionId,
    },
    /// A station's button went down.
    ButtonPressed {
        /// Station pressed.
        id: StationId,
        /// Connection the event arrived on.
        connection: ConnectionId,
    },
    /// A station's button went up.
    ButtonReleased {
        /// Station released.
        id: StationId,
        /// Connection the event arrived on.
        connection: ConnectionId,
    },
    /// The phase timer elapsed.
    Timer(TimerFired),
    /// Request a copy of the current state.
    Snapshot(oneshot::Sender<GameSnapshot>),
}

/// Observable copy of the game state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSnapshot {
    /// Current phase.
    pub phase: Phase,
    /// Registered stations, sorted.
    pub stations: Vec<StationId>,
    /// Remaining turn order, front first.
    pub turn_order: Vec<StationId>,
    /// Stations already pressed as correct this round, sorted.
    pub previous_correct: Vec<StationId>,
    /// Station to press.
    pub correct: Option<StationId>,
    /// Station to avoid.
    pub wrong: Option<StationId>,
    /// Stations currently held, sorted.
    pub pressed: Vec<StationId>,
}

/// Central authority over connected stations, phases and turns.
pub struct Game {
    phase: Phase,
    active: IndexMap<StationId, StationSession>,
    turns: TurnSelector,
    pressed: HashSet<StationId>,
    timer: Option<PhaseTimer>,
    epoch: u64,
    events: mpsc::UnboundedSender<ControlEvent>,
    rng: StdRng,
    config: Arc<GameConfig>,
}

impl Game {
    /// Create a game in [`Phase::NoStations`]; timers report through `events`.
    pub fn new(config: Arc<GameConfig>, events: mpsc::UnboundedSender<ControlEvent>) -> Self {
        Self::with_rng(config, events, StdRng::from_os_rng())
    }

    /// Same as [`Game::new`] with a caller-provided random source.
    pub fn with_rng(
        config: Arc<GameConfig>,
        events: mpsc::UnboundedSender<ControlEvent>,
        rng: StdRng,
    ) -> Self {
        Self {
            phase: Phase::NoStations,
            active: IndexMap::new(),
            turns: TurnSelector::default(),
            pressed: HashSet::new(),
            timer: None,
            epoch: 0,
            events,
            rng,
            config,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> GameSnapshot {
        let mut stations: Vec<_> = self.active.keys().copied().collect();
        stations.sort();
        let mut previous_correct: Vec<_> = self.turns.previous_correct().iter().copied().collect();
        previous_correct.sort();
        let mut pressed: Vec<_> = self.pressed.iter().copied().collect();
        pressed.sort();
        GameSnapshot {
            phase: self.phase,
            stations,
            turn_order: self.turns.order().collect(),
            previous_correct,
            correct: self.turns.correct(),
            wrong: self.turns.wrong(),
            pressed,
        }
    }

    /// Process one event.
    pub fn handle(&mut self, event: ControlEvent) -> Result<(), GameError> {
        match event {
            ControlEvent::Register(session) => self.register(session),
            ControlEvent::Unregister { id, connection } => self.unregister(id, connection),
            ControlEvent::ButtonPressed { id, connection } => self.button_pressed(id, connection),
            ControlEvent::ButtonReleased { id, connection } => {
                self.button_released(id, connection)
            }
            ControlEvent::Timer(fired) => self.on_timer(fired),
            ControlEvent::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
                Ok(())
            }
        }
    }

    /// Add (or replace) a station and clear its actuators.
    pub fn register(&mut self, mut session: StationSession) -> Result<(), GameError> {
        let id = session.id();
        session.set_pressed(false);
        match self.active.insert(id, session) {
            Some(previous) => {
                info!(station = %id, previous = %previous.connection(), "station re-registered; replacing session");
                self.pressed.remove(&id);
            }
            None => info!(station = %id, "station registered"),
        }

        if let Some(session) = self.active.get(&id) {
            session.stop_all();
        }

        match self.phase {
            Phase::NoStations => {
                if self.timer.is_some() {
                    return Err(GameError::InvariantViolation(
                        "phase timer running while no station is connected".into(),
                    ));
                }
                self.enter_pregame();
            }
            Phase::PreGameSingle => self.enter_pregame(),
            Phase::PreGameMultiple => self.relight_role(id),
            Phase::Playing | Phase::PlayingAllReleased => {
                if !self.abandoning() {
                    self.relight_role(id);
                }
                if self.phase == Phase::Playing && self.pressed.is_empty() {
                    self.transition(Phase::PlayingAllReleased);
                }
            }
            Phase::WaitRelease => {
                if self.pressed.is_empty() && !self.showing_win() {
                    self.finish_round();
                }
            }
        }

        self.check_invariants()
    }

    /// Remove a station; ignored when `connection` is not the station's current one.
    pub fn unregister(
        &mut self,
        id: StationId,
        connection: ConnectionId,
    ) -> Result<(), GameError> {
        let current = self
            .active
            .get(&id)
            .is_some_and(|session| session.connection() == connection);
        if !current {
            debug!(station = %id, %connection, "ignoring unregister from stale connection");
            return Ok(());
        }

        self.active.shift_remove(&id);
        self.pressed.remove(&id);
        let role = self.turns.remove(id);
        info!(station = %id, ?role, remaining = self.active.len(), "station unregistered");

        if self.active.is_empty() {
            self.turns.clear();
            self.transition(Phase::NoStations);
            return self.check_invariants();
        }

        match self.phase {
            Phase::NoStations => {
                return Err(GameError::InvariantViolation(format!(
                    "station {id} was active while no station was registered"
                )));
            }
            Phase::PreGameSingle => self.enter_pregame(),
            Phase::PreGameMultiple => {
                if self.active.len() == 1 {
                    self.enter_pregame();
                } else if role == Role::Correct {
                    self.invite();
                }
            }
            Phase::PlayingAllReleased if self.abandoning() => {}
            Phase::Playing | Phase::PlayingAllReleased => {
                if self.active.len() == 1 {
                    self.win_round();
                } else {
                    match role {
                        Role::Correct => self.advance_turn(),
                        Role::Wrong => self.next_wrong(),
                        Role::None => {}
                    }
                    if self.turns.correct().is_none() {
                        self.win_round();
                    } else if self.phase == Phase::Playing && self.pressed.is_empty() {
                        self.transition(Phase::PlayingAllReleased);
                    }
                }
            }
            Phase::WaitRelease => {
                if self.pressed.is_empty() && !self.showing_win() {
                    self.finish_round();
                }
            }
        }

        self.check_invariants()
    }

    /// Handle a button press.
    pub fn button_pressed(
        &mut self,
        id: StationId,
        connection: ConnectionId,
    ) -> Result<(), GameError> {
        let Some(session) = self
            .active
            .get_mut(&id)
            .filter(|session| session.connection() == connection)
        else {
            debug!(station = %id, "ignoring press from unknown station");
            return Ok(());
        };
        if session.is_pressed() {
            debug!(station = %id, "ignoring duplicate press");
            return Ok(());
        }
        session.set_pressed(true);
        self.pressed.insert(id);
        info!(station = %id, phase = ?self.phase, "button pressed");

        match self.phase {
            Phase::NoStations => {}
            Phase::PreGameSingle => {
                let sound = self.config.sounds.win.pick(&mut self.rng);
                if let Some(session) = self.active.get(&id) {
                    session.win(&sound);
                }
                self.transition(Phase::WaitRelease);
            }
            Phase::PreGameMultiple => {
                if self.turns.correct() == Some(id) {
                    self.start_round(id);
                }
            }
            Phase::Playing => {
                self.round_press(id);
            }
            Phase::PlayingAllReleased if self.abandoning() => {
                debug!(station = %id, "press ignored: round abandoned");
            }
            Phase::PlayingAllReleased => {
                // Any held button suspends the watchdog until everyone lets go again.
                self.round_press(id);
                if self.phase == Phase::PlayingAllReleased {
                    self.transition(Phase::Playing);
                }
            }
            Phase::WaitRelease => {
                if let Some(session) = self.active.get(&id) {
                    session.start_button_light(HOLD_COLOR);
                }
            }
        }

        self.check_invariants()
    }

    /// Handle a button release.
    pub fn button_released(
        &mut self,
        id: StationId,
        connection: ConnectionId,
    ) -> Result<(), GameError> {
        let Some(session) = self
            .active
            .get_mut(&id)
            .filter(|session| session.connection() == connection)
        else {
            debug!(station = %id, "ignoring release from unknown station");
            return Ok(());
        };
        if !session.is_pressed() {
            debug!(station = %id, "ignoring release of a button that is not pressed");
            return Ok(());
        }
        session.set_pressed(false);
        self.pressed.remove(&id);
        info!(station = %id, phase = ?self.phase, "button released");

        match self.phase {
            Phase::Playing => {
                if self.pressed.is_empty() {
                    self.transition(Phase::PlayingAllReleased);
                }
            }
            Phase::WaitRelease => {
                if let Some(session) = self.active.get(&id) {
                    session.stop_all();
                }
                self.turns.forget_correct(id);
                if self.pressed.is_empty() && !self.showing_win() {
                    self.finish_round();
                }
            }
            Phase::NoStations
            | Phase::PreGameSingle
            | Phase::PreGameMultiple
            | Phase::PlayingAllReleased => {}
        }

        self.check_invariants()
    }

    /// Handle an elapsed phase timer; firings of replaced timers are ignored.
    pub fn on_timer(&mut self, fired: TimerFired) -> Result<(), GameError> {
        if !self.timer.as_ref().is_some_and(|timer| timer.matches(&fired)) {
            debug!(?fired, "ignoring stale timer");
            return Ok(());
        }

        match fired.kind {
            TimerKind::PregameCycle => {
                if self.phase == Phase::PreGameMultiple {
                    self.invite();
                }
            }
            TimerKind::HoldReminder => {
                if self.phase == Phase::WaitRelease && !self.pressed.is_empty() {
                    info!(stations = ?self.snapshot().pressed, "buttons still held");
                    for id in &self.pressed {
                        if let Some(session) = self.active.get(id) {
                            session.start_button_light(Effect::FlashBlue);
                        }
                    }
                }
            }
            TimerKind::AllReleasedTimeout => {
                if self.phase == Phase::PlayingAllReleased {
                    info!("nobody pressed in time; abandoning round");
                    let sound = self.config.sounds.lose.pick(&mut self.rng);
                    for session in self.active.values() {
                        session.lose(&sound);
                    }
                    let delay = self.config.timings.all_released_reset;
                    self.replace_timer(TimerKind::AllReleasedReset, delay);
                }
            }
            TimerKind::AllReleasedReset => {
                if self.phase == Phase::PlayingAllReleased {
                    self.finish_round();
                }
            }
            TimerKind::WinDisplay => {
                if self.phase == Phase::WaitRelease {
                    if self.pressed.is_empty() {
                        self.finish_round();
                    } else {
                        let delay = self.config.timings.hold_reminder;
                        self.replace_timer(TimerKind::HoldReminder, delay);
                    }
                }
            }
        }

        self.check_invariants()
    }

    /// Cancel the current timer, install the next phase's timer, then switch phase.
    fn transition(&mut self, next: Phase) {
        self.timer = None;
        let timings = self.config.timings;
        self.timer = match next {
            Phase::PreGameMultiple => Some(PhaseTimer::every(
                self.next_epoch(),
                TimerKind::PregameCycle,
                timings.pregame_cycle,
                self.events.clone(),
            )),
            Phase::PlayingAllReleased => Some(PhaseTimer::once(
                self.next_epoch(),
                TimerKind::AllReleasedTimeout,
                timings.all_released,
                self.events.clone(),
            )),
            Phase::WaitRelease => Some(PhaseTimer::once(
                self.next_epoch(),
                TimerKind::HoldReminder,
                timings.hold_reminder,
                self.events.clone(),
            )),
            Phase::NoStations | Phase::PreGameSingle | Phase::Playing => None,
        };

        info!(from = ?self.phase, to = ?next, "phase transition");
        self.phase = next;
        debug!(snapshot = ?self.snapshot(), "game state");
    }

    /// Swap the current phase's timer without changing phase.
    fn replace_timer(&mut self, kind: TimerKind, delay: Duration) {
        self.timer = None;
        let epoch = self.next_epoch();
        self.timer = Some(PhaseTimer::once(epoch, kind, delay, self.events.clone()));
    }

    fn next_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    fn timer_kind(&self) -> Option<TimerKind> {
        self.timer.as_ref().map(PhaseTimer::kind)
    }

    /// The abandon animation is playing; the round only waits for its reset.
    fn abandoning(&self) -> bool {
        self.timer_kind() == Some(TimerKind::AllReleasedReset)
    }

    /// A win is on display with nobody holding a button.
    fn showing_win(&self) -> bool {
        self.timer_kind() == Some(TimerKind::WinDisplay)
    }

    /// Enter the idle phase matching the number of connected stations.
    fn enter_pregame(&mut self) {
        match self.active.len() {
            0 => self.transition(Phase::NoStations),
            1 => {
                self.transition(Phase::PreGameSingle);
                self.invite();
            }
            _ => {
                self.transition(Phase::PreGameMultiple);
                self.invite();
            }
        }
    }

    /// Move the pre-game invitation to a (different, when possible) station.
    fn invite(&mut self) {
        if let Some(previous) = self.turns.correct().and_then(|id| self.active.get(&id)) {
            previous.stop_all();
        }
        let candidates: Vec<StationId> = self.active.keys().copied().collect();
        if let Some(next) = self.turns.pick_pregame(&candidates, &mut self.rng) {
            if let Some(session) = self.active.get(&next) {
                session.correct();
            }
            info!(station = %next, "next correct");
        }
    }

    fn start_round(&mut self, id: StationId) {
        let sound = self.config.sounds.correct_press.pick(&mut self.rng);
        if let Some(session) = self.active.get(&id) {
            session.correct_pressed(&sound);
        }

        let stations: Vec<StationId> = self.active.keys().copied().collect();
        self.turns.start_round(stations, &mut self.rng);
        info!(order = ?self.turns.order().collect::<Vec<_>>(), "round started");

        self.advance_turn();
        self.transition(Phase::Playing);
    }

    /// Return the wrong station to the queue and pick the next correct/wrong pair.
    fn advance_turn(&mut self) {
        if let Some(previous) = self.turns.release_wrong() {
            if let Some(session) = self.active.get(&previous) {
                session.stop_all();
            }
        }
        match self.turns.next_correct() {
            Some(correct) => {
                if let Some(session) = self.active.get(&correct) {
                    session.correct();
                }
                info!(station = %correct, "next correct");
            }
            None => info!("next correct: none"),
        }
        self.next_wrong();
    }

    fn next_wrong(&mut self) {
        match self.turns.next_wrong(&mut self.rng) {
            Some(wrong) => {
                if let Some(session) = self.active.get(&wrong) {
                    session.wrong();
                }
                info!(station = %wrong, "next wrong");
            }
            None => info!("next wrong: none"),
        }
    }

    fn relight_role(&self, id: StationId) {
        let Some(session) = self.active.get(&id) else {
            return;
        };
        if self.turns.correct() == Some(id) {
            session.correct();
        } else if self.turns.wrong() == Some(id) {
            session.wrong();
        }
    }

    fn round_press(&mut self, id: StationId) {
        if self.turns.was_correct(id) {
            let sound = self.config.sounds.correct_press.pick(&mut self.rng);
            if let Some(session) = self.active.get(&id) {
                session.correct_pressed(&sound);
            }
        } else if self.turns.wrong() == Some(id) {
            self.lose_round();
        } else if self.turns.correct() == Some(id) {
            self.turns.mark_correct_pressed();
            if self.turns.order_is_empty() {
                self.win_round();
            } else {
                let sound = self.config.sounds.correct_press.pick(&mut self.rng);
                if let Some(session) = self.active.get(&id) {
                    session.correct_pressed(&sound);
                }
                self.advance_turn();
            }
        } else {
            debug!(station = %id, "press ignored: station has no role this turn");
        }
    }

    fn lose_round(&mut self) {
        let sound = self.config.sounds.lose.pick(&mut self.rng);
        let mut losers: Vec<StationId> = self.pressed.iter().copied().collect();
        losers.sort();
        info!(stations = ?losers, "round lost");
        for id in losers {
            if let Some(session) = self.active.get(&id) {
                session.lose(&sound);
            }
        }
        self.transition(Phase::WaitRelease);
    }

    fn win_round(&mut self) {
        let sound = self.config.sounds.win.pick(&mut self.rng);
        info!("round won");
        for session in self.active.values() {
            session.win(&sound);
        }
        self.transition(Phase::WaitRelease);
        if self.pressed.is_empty() {
            let delay = self.config.timings.win_display;
            self.replace_timer(TimerKind::WinDisplay, delay);
        }
    }

    /// Clear every station and go back to pre-game.
    fn finish_round(&mut self) {
        info!("round finished");
        for session in self.active.values() {
            session.stop_all();
        }
        self.turns.clear();
        self.enter_pregame();
    }

    fn check_invariants(&self) -> Result<(), GameError> {
        let violation = |message: String| Err(GameError::InvariantViolation(message));

        if (self.phase == Phase::NoStations) != self.active.is_empty() {
            return violation(format!(
                "phase {:?} with {} stations",
                self.phase,
                self.active.len()
            ));
        }
        if self.phase == Phase::NoStations && self.timer.is_some() {
            return violation("phase timer running while no station is connected".into());
        }
        if let Some(id) = self.pressed.iter().find(|id| !self.active.contains_key(*id)) {
            return violation(format!("pressed station {id} is not registered"));
        }
        self.turns.check().map_err(GameError::InvariantViolation)?;

        let roles = self
            .turns
            .correct()
            .into_iter()
            .chain(self.turns.wrong())
            .chain(self.turns.order())
            .chain(self.turns.previous_correct().iter().copied());
        for id in roles {
            if !self.active.contains_key(&id) {
                return violation(format!("turn state refers to departed station {id}"));
            }
        }
        Ok(())
    }
}
