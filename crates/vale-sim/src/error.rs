//! Simulation error types.
//!
//! Most player-facing failures are not errors at all: impossible commands
//! are rejected silently before any mutation. What remains here is the
//! small set of faults that must be logged or surfaced.

use vale_types::Serial;

use crate::persist::PersistError;

/// Errors raised inside the simulation core.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// The persistence collaborator failed a load or save.
    #[error("persistence failure: {0}")]
    Persist(#[from] PersistError),

    /// A single session's per-tick update failed. Caught by the phase
    /// wrapper; never aborts the tick.
    #[error("session {serial} update failed: {reason}")]
    SessionUpdate { serial: Serial, reason: String },

    /// A loaded character record failed sanity bounds. The one fault a
    /// player is shown before being disconnected.
    #[error("character record for {0} failed sanity checks")]
    CorruptRecord(String),
}
