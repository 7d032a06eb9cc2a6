//! Script registration and resolution.
//!
//! Content scripts (item effects, mundane behavior, ability effects) are
//! trusted, synchronous, in-process callables. They are registered once by
//! string key before the scheduler starts and resolved from a fixed table,
//! never re-resolved per call. A missing key means "no script", not a fault.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use vale_config::GameplayConfig;
use vale_types::{Character, Serial};

// ---------------------------------------------------------------------------
// Script context
// ---------------------------------------------------------------------------

/// Everything a script may touch while its hook runs: the acting character
/// (under that session's gate), tuning constants, and an outbox of text
/// lines the host flushes to the client afterwards.
pub struct ScriptContext<'a> {
    /// The character the hook acts on.
    pub character: &'a mut Character,
    /// Gameplay tuning constants.
    pub config: &'a GameplayConfig,
    /// Serial of the clicked/targeted entity, when the hook has one.
    pub target: Option<Serial>,
    /// Text lines to send to the session once the hook returns.
    pub messages: Vec<String>,
}

impl<'a> ScriptContext<'a> {
    pub fn new(character: &'a mut Character, config: &'a GameplayConfig) -> Self {
        Self {
            character,
            config,
            target: None,
            messages: Vec::new(),
        }
    }

    /// Queues a text line for the session.
    pub fn say(&mut self, line: impl Into<String>) {
        self.messages.push(line.into());
    }
}

// ---------------------------------------------------------------------------
// Effect-hook traits
// ---------------------------------------------------------------------------

/// Hooks for usable inventory items.
pub trait ItemScript: Send + Sync {
    /// The item in `slot` was used.
    fn on_use(&self, ctx: &mut ScriptContext<'_>, slot: u8);
}

/// Hooks for mundanes (quest givers, vendors).
pub trait MundaneScript: Send + Sync {
    /// The mundane was clicked.
    fn on_click(&self, ctx: &mut ScriptContext<'_>);

    /// A free-text line was said near the mundane. Default: ignore.
    fn on_gossip(&self, _ctx: &mut ScriptContext<'_>, _line: &str) {}

    /// A dialog answer routed to this mundane. Default: ignore.
    fn on_response(&self, _ctx: &mut ScriptContext<'_>, _answer: &str) {}
}

/// Hooks for skills and spells.
pub trait AbilityScript: Send + Sync {
    /// The ability's effect. Runs once per accepted use, inside the
    /// re-entrancy guard.
    fn on_use(&self, ctx: &mut ScriptContext<'_>);

    /// The effect landed. Default: nothing.
    fn on_success(&self, _ctx: &mut ScriptContext<'_>) {}

    /// The effect fizzled or missed. Default: nothing.
    fn on_failed(&self, _ctx: &mut ScriptContext<'_>) {}
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// The fixed key -> script table. Built once at startup; shared read-only
/// afterwards.
#[derive(Default)]
pub struct ScriptRegistry {
    items: FxHashMap<String, Arc<dyn ItemScript>>,
    mundanes: FxHashMap<String, Arc<dyn MundaneScript>>,
    abilities: FxHashMap<String, Arc<dyn AbilityScript>>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_item(&mut self, key: impl Into<String>, script: Arc<dyn ItemScript>) {
        self.items.insert(key.into(), script);
    }

    pub fn register_mundane(&mut self, key: impl Into<String>, script: Arc<dyn MundaneScript>) {
        self.mundanes.insert(key.into(), script);
    }

    pub fn register_ability(&mut self, key: impl Into<String>, script: Arc<dyn AbilityScript>) {
        self.abilities.insert(key.into(), script);
    }

    /// Resolves an item script. `None` means the item has no effect.
    pub fn item(&self, key: &str) -> Option<Arc<dyn ItemScript>> {
        self.items.get(key).cloned()
    }

    /// Resolves a mundane script. `None` means the mundane is inert.
    pub fn mundane(&self, key: &str) -> Option<Arc<dyn MundaneScript>> {
        self.mundanes.get(key).cloned()
    }

    /// Resolves an ability script. `None` means use still applies its
    /// cooldown, with no effect.
    pub fn ability(&self, key: &str) -> Option<Arc<dyn AbilityScript>> {
        self.abilities.get(key).cloned()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
