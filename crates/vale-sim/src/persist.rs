//! Character persistence boundary.
//!
//! The core loads and saves characters through [`CharacterStore`] and never
//! sees the on-disk format. Both calls are synchronous and may block the
//! calling thread.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use vale_types::Character;

/// Errors from the persistence collaborator.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// Underlying storage I/O failed.
    #[error("storage i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// The stored record could not be decoded.
    #[error("stored record for {0} is unreadable")]
    Unreadable(String),
}

/// Synchronous load/save of character records, keyed by character name.
pub trait CharacterStore: Send + Sync {
    /// Loads the named character, or `None` if no record exists.
    fn load(&self, name: &str) -> Result<Option<Character>, PersistError>;

    /// Persists the character's current state.
    fn save(&self, character: &Character) -> Result<(), PersistError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Map-backed store. The default for tests and single-shard tooling.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<FxHashMap<String, Character>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a record directly, bypassing the save path.
    pub fn seed(&self, character: Character) {
        self.records
            .write()
            .insert(character.name.clone(), character);
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl CharacterStore for MemoryStore {
    fn load(&self, name: &str) -> Result<Option<Character>, PersistError> {
        Ok(self.records.read().get(name).cloned())
    }

    fn save(&self, character: &Character) -> Result<(), PersistError> {
        self.records
            .write()
            .insert(character.name.clone(), character.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
