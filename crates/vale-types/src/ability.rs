//! Skill and spell records: cooldown bookkeeping and the re-entrancy guard.
//!
//! Cooldowns are wall-clock (`Instant`) timestamps, never persisted; a
//! freshly loaded character has every ability ready.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// Broad category of an ability. Assails share cooldown semantics across
/// siblings on the same character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbilityCategory {
    /// Basic always-available combat ability (space-bar).
    Assail,
    /// Learned physical skill.
    Skill,
    /// Castable spell (goes through chant lines).
    Spell,
}

/// Static definition of a skill or spell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbilityTemplate {
    /// Display name; also the registry key for its script.
    pub name: String,
    /// Category, governing assail sibling synchronization.
    pub category: AbilityCategory,
    /// Cooldown after use. `None` means the global base delay applies.
    pub cooldown: Option<Duration>,
    /// Chant lines a cast takes before resolving; zero resolves at once.
    /// Only meaningful for spells.
    #[serde(default)]
    pub cast_lines: u8,
    /// Key into the script registry for the effect hooks.
    pub script_key: String,
}

// ---------------------------------------------------------------------------
// Ability instance
// ---------------------------------------------------------------------------

/// One learned skill or spell on a character.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ability {
    /// The static template.
    pub template: AbilityTemplate,
    /// Trained level.
    pub level: u32,
    /// Earliest instant the ability may be used again. `None` = ready now.
    #[serde(skip)]
    pub next_available: Option<Instant>,
    /// Re-entrancy guard: set while the effect script is running.
    #[serde(skip)]
    pub in_use: bool,
}

impl Ability {
    /// Creates a level-`level` instance of `template`, ready for use.
    pub fn new(template: AbilityTemplate, level: u32) -> Self {
        Self {
            template,
            level,
            next_available: None,
            in_use: false,
        }
    }

    /// True once the cooldown window has elapsed.
    pub fn ready(&self, now: Instant) -> bool {
        match self.next_available {
            Some(t) => now >= t,
            None => true,
        }
    }

    /// Starts the cooldown window: the template's own cooldown, or
    /// `base_delay` when the template defines none.
    pub fn apply_cooldown(&mut self, now: Instant, base_delay: Duration) {
        let span = self.template.cooldown.unwrap_or(base_delay);
        self.next_available = Some(now + span);
    }
}

// ---------------------------------------------------------------------------
// Cast state
// ---------------------------------------------------------------------------

/// An in-progress spell cast. At most one per character; cleared on
/// interrupt (sleep/freeze/paralysis/movement/logout) or on resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct CastState {
    /// Spell book slot being cast.
    pub slot: u8,
    /// Target serial, if the spell is targeted.
    pub target: Option<u32>,
    /// Chant lines the cast requires before resolving.
    pub lines: u8,
    /// When the cast began.
    pub started: Instant,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
