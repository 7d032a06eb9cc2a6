//! One connected client: its character, its transient protocol state, and
//! the single-slot gate that serializes every mutation path touching them.
//!
//! The tick thread and the per-connection I/O threads both mutate session
//! state (movement echo during a map transition, autosave on keep-alive).
//! All of it goes through [`Session::with_state`], so at most one mutator
//! is in flight per session at any instant. The gate is deliberately
//! per-session; unrelated sessions never contend.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use vale_types::{Character, Serial};

use crate::dialog::Interpreter;
use crate::trade::{TradeSide, TradeState};

// ---------------------------------------------------------------------------
// Transport seam
// ---------------------------------------------------------------------------

/// Outbound capability handed to the core by the transport layer. The core
/// never sees the wire encoding.
pub trait SessionSender: Send + Sync {
    /// Pushes a text line to the session.
    fn send(&self, serial: Serial, message: &str);

    /// Severs the session. `reason` is shown to the player.
    fn disconnect(&self, serial: Serial, reason: &str);
}

/// Sender that records everything. For tests and offline tooling.
#[derive(Default)]
pub struct RecordingSender {
    messages: Mutex<Vec<(Serial, String)>>,
    disconnects: Mutex<Vec<(Serial, String)>>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(Serial, String)> {
        self.messages.lock().clone()
    }

    pub fn disconnects(&self) -> Vec<(Serial, String)> {
        self.disconnects.lock().clone()
    }
}

impl SessionSender for RecordingSender {
    fn send(&self, serial: Serial, message: &str) {
        self.messages.lock().push((serial, message.to_string()));
    }

    fn disconnect(&self, serial: Serial, reason: &str) {
        self.disconnects.lock().push((serial, reason.to_string()));
    }
}

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// Everything behind the session gate.
pub struct SessionState {
    /// The authoritative character record.
    pub character: Character,
    /// Live dialog interpreter, at most one.
    pub dialog: Option<Interpreter>,
    /// This side of a linked trade, at most one.
    pub trade: Option<TradeState>,
    /// When the character was last persisted.
    pub last_save: Instant,
    /// Mid-map-transition: full update is skipped, location is re-echoed.
    pub warping: bool,
    /// Next location echo is due at or after this instant.
    pub next_location_echo: Instant,
    /// The character moved since the last warp evaluation.
    pub moved: bool,
    /// Tick time accumulated toward the next regeneration pulse.
    pub regen_accum: Duration,
}

impl SessionState {
    pub fn new(character: Character, now: Instant) -> Self {
        Self {
            character,
            dialog: None,
            trade: None,
            last_save: now,
            warping: false,
            next_location_echo: now,
            moved: true,
            regen_accum: Duration::ZERO,
        }
    }

    /// This side of the trade, as the protocol functions see it.
    pub fn trade_side(&mut self) -> TradeSide<'_> {
        TradeSide {
            character: &mut self.character,
            trade: &mut self.trade,
        }
    }

    /// Movement invalidates the dialog and interrupts any cast.
    pub fn on_movement(&mut self) {
        self.dialog = None;
        self.character.interrupt_cast();
        self.moved = true;
    }

    /// Combat activation invalidates the dialog.
    pub fn on_combat(&mut self) {
        self.dialog = None;
    }

    /// Sleep or freeze onset interrupts the cast and closes the dialog.
    pub fn on_debilitated(&mut self) {
        self.dialog = None;
        self.character.interrupt_cast();
    }

    /// Run after every script hook: a hook that put the character to
    /// sleep or froze them also tears down the dialog and pending cast.
    pub fn check_interrupts(&mut self) {
        if self.character.flags.interrupts() {
            self.on_debilitated();
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A logged-in client, shared between the tick thread, the watchdog-spawned
/// replacement workers, and the connection's I/O path.
pub struct Session {
    /// Login-unique serial; matches `character.serial`.
    pub serial: Serial,
    /// Character name, fixed for the session's lifetime.
    pub name: String,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(serial: Serial, character: Character, now: Instant) -> Self {
        let name = character.name.clone();
        Self {
            serial,
            name,
            state: Mutex::new(SessionState::new(character, now)),
        }
    }

    /// Runs `f` holding this session's gate. Blocks until the gate is free.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        f(&mut self.state.lock())
    }

    /// Exposes the raw gate so two sessions can be locked in a fixed order.
    pub(crate) fn state_lock(&self) -> &Mutex<SessionState> {
        &self.state
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
