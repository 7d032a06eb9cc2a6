//! The authoritative world simulation: session lifecycle, the fixed-rate
//! tick scheduler and its watchdog, and the interaction protocols (dialog,
//! trade, ability use) players drive through the command router.

pub mod ability;
pub mod dialog;
pub mod dispatch;
pub mod error;
pub mod manager;
pub mod persist;
pub mod scheduler;
pub mod scripting;
pub mod session;
pub mod trade;

pub use ability::{activate_assails, can_use, execute, Book};
pub use dialog::{
    Answer, Checkpoint, CheckpointRegistry, DialogEvent, DialogLibrary, Interpreter,
    MemoryDialogLibrary, Step, StepGraph, StepId,
};
pub use dispatch::{Command, CommandRouter};
pub use error::SimError;
pub use manager::SessionManager;
pub use persist::{CharacterStore, MemoryStore, PersistError};
pub use scheduler::{TickHandler, TickScheduler};
pub use scripting::{AbilityScript, ItemScript, MundaneScript, ScriptContext, ScriptRegistry};
pub use session::{RecordingSender, Session, SessionSender, SessionState};
pub use trade::{TradeSide, TradeState};
