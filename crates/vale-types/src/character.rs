//! The player character: identity, position, vitals, stats, flags, and the
//! collections (inventory, skill book, spell book, quest log) the simulation
//! mutates each tick.

use std::time::Duration;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::ability::{Ability, AbilityCategory, CastState};
use crate::item::Inventory;
use crate::position::{Direction, MapId, Position, Serial};

// ---------------------------------------------------------------------------
// Status flags
// ---------------------------------------------------------------------------

/// Debuff and lifecycle states gating what a character may do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusFlags {
    /// Asleep: cannot act, cast interrupts.
    pub asleep: bool,
    /// Frozen: cannot act, cast interrupts.
    pub frozen: bool,
    /// Paralyzed: cannot move.
    pub paralyzed: bool,
    /// Dead.
    pub dead: bool,
    /// Dead and awaiting respawn or reaping.
    pub skulled: bool,
}

impl StatusFlags {
    /// Whether any state blocks deliberate action (ability use, trade,
    /// dialog interaction).
    pub fn blocks_action(self) -> bool {
        self.asleep || self.frozen || self.paralyzed || self.dead || self.skulled
    }

    /// Whether sleep or freeze is active; these interrupt casts and menus.
    pub fn interrupts(self) -> bool {
        self.asleep || self.frozen
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Named primary stat, for point allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stat {
    Str,
    Int,
    Wis,
    Con,
    Dex,
}

/// The five primary stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stats {
    pub strength: i32,
    pub intellect: i32,
    pub wisdom: i32,
    pub constitution: i32,
    pub dexterity: i32,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            strength: 3,
            intellect: 3,
            wisdom: 3,
            constitution: 3,
            dexterity: 3,
        }
    }
}

impl Stats {
    /// Adds `amount` to `stat`, then re-clamps every stat against `cap`.
    pub fn add(&mut self, stat: Stat, amount: i32, cap: i32) {
        *self.get_mut(stat) += amount;
        self.clamp_all(cap);
    }

    fn get_mut(&mut self, stat: Stat) -> &mut i32 {
        match stat {
            Stat::Str => &mut self.strength,
            Stat::Int => &mut self.intellect,
            Stat::Wis => &mut self.wisdom,
            Stat::Con => &mut self.constitution,
            Stat::Dex => &mut self.dexterity,
        }
    }

    /// Clamps every stat to `cap`. A stat at or below zero is raised back
    /// to the cap, not floored: compatibility with the original server,
    /// which treats underflow as wrap-around. Likely unintended upstream,
    /// preserved deliberately.
    pub fn clamp_all(&mut self, cap: i32) {
        for v in [
            &mut self.strength,
            &mut self.intellect,
            &mut self.wisdom,
            &mut self.constitution,
            &mut self.dexterity,
        ] {
            if *v > cap {
                *v = cap;
            }
            if *v <= 0 {
                *v = cap;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Vitals
// ---------------------------------------------------------------------------

/// Hit points and mana, with per-tick regeneration bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vitals {
    pub hp: i32,
    pub max_hp: i32,
    pub mp: i32,
    pub max_mp: i32,
}

impl Default for Vitals {
    fn default() -> Self {
        Self {
            hp: 60,
            max_hp: 60,
            mp: 30,
            max_mp: 30,
        }
    }
}

impl Vitals {
    /// Restores a fraction of max hp/mp; called by the regen timer.
    pub fn regenerate(&mut self, hp_gain: i32, mp_gain: i32) {
        self.hp = (self.hp + hp_gain).min(self.max_hp);
        self.mp = (self.mp + mp_gain).min(self.max_mp);
    }

    /// Fully restores hp and mp.
    pub fn recover(&mut self) {
        self.hp = self.max_hp;
        self.mp = self.max_mp;
    }
}

// ---------------------------------------------------------------------------
// Character
// ---------------------------------------------------------------------------

/// The authoritative server-side state of one player character.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Character {
    /// Account-unique character name.
    pub name: String,
    /// Serial assigned at login; unique per login, not persisted.
    #[serde(skip)]
    pub serial: Serial,
    /// Map the character currently occupies.
    pub map: MapId,
    /// Tile position on that map.
    pub position: Position,
    /// Facing.
    pub facing: Direction,
    /// Hit points and mana.
    pub vitals: Vitals,
    /// Primary stats.
    pub stats: Stats,
    /// Unspent stat points.
    pub stat_points: u32,
    /// Carried gold.
    pub gold: u32,
    /// Experience level.
    pub level: u32,
    /// Armor class; sanity-bounded on load.
    pub armor_class: i32,
    /// Debuff and lifecycle flags.
    pub flags: StatusFlags,
    /// Fixed-slot inventory.
    pub inventory: Inventory,
    /// Learned skills, slot-ordered.
    pub skills: Vec<Ability>,
    /// Learned spells, slot-ordered.
    pub spells: Vec<Ability>,
    /// Quest log: name -> completed.
    pub quests: FxHashMap<String, bool>,
    /// Active spell cast, if any. Ephemeral.
    #[serde(skip)]
    pub cast: Option<CastState>,
}

impl Default for Character {
    fn default() -> Self {
        Self {
            name: String::new(),
            serial: 0,
            map: 0,
            position: Position::default(),
            facing: Direction::default(),
            vitals: Vitals::default(),
            stats: Stats::default(),
            stat_points: 0,
            gold: 0,
            level: 1,
            armor_class: 0,
            flags: StatusFlags::default(),
            inventory: Inventory::default(),
            skills: Vec::new(),
            spells: Vec::new(),
            quests: FxHashMap::default(),
            cast: None,
        }
    }
}

impl Character {
    /// A fresh level-1 character named `name`.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Maximum carry weight, derived from strength.
    pub fn max_weight(&self, weight_per_str: i32) -> i32 {
        self.stats.strength * weight_per_str
    }

    /// Current carried weight.
    pub fn current_weight(&self) -> i32 {
        self.inventory.total_weight()
    }

    /// Adds gold if the result stays under `max_carry`; returns whether
    /// the gold was accepted.
    pub fn give_gold(&mut self, amount: u32, max_carry: u32) -> bool {
        if self.gold.saturating_add(amount) < max_carry {
            self.gold += amount;
            true
        } else {
            false
        }
    }

    /// Adds gold unconditionally, clamping the total at `max_carry`.
    /// Used by the trade commit/cancel paths, which cap rather than refuse.
    pub fn give_gold_clamped(&mut self, amount: u32, max_carry: u32) {
        self.gold = self.gold.saturating_add(amount).min(max_carry);
    }

    /// Skill-book entries in the assail category.
    pub fn assail_indices(&self) -> Vec<usize> {
        self.skills
            .iter()
            .enumerate()
            .filter(|(_, s)| s.template.category == AbilityCategory::Assail)
            .map(|(i, _)| i)
            .collect()
    }

    /// Whether the named quest is in the log.
    pub fn has_quest(&self, name: &str) -> bool {
        self.quests.contains_key(name)
    }

    /// Whether the named quest is logged and completed.
    pub fn has_completed_quest(&self, name: &str) -> bool {
        self.quests.get(name).copied().unwrap_or(false)
    }

    /// Marks the named quest completed if it is in the log; returns whether
    /// anything changed.
    pub fn complete_quest(&mut self, name: &str) -> bool {
        match self.quests.get_mut(name) {
            Some(done) if !*done => {
                *done = true;
                true
            }
            _ => false,
        }
    }

    /// Clears any in-progress cast. Safe to call when none is active.
    pub fn interrupt_cast(&mut self) {
        self.cast = None;
    }

    /// Sanity bounds applied when a character is loaded from storage.
    /// Failing these means the on-disk data is corrupt; the session must
    /// be disconnected with an explicit message.
    pub fn passes_load_sanity(&self) -> bool {
        self.stats.strength > 0 && self.armor_class <= 200 && self.level <= 99
    }

    /// Applies regeneration for `elapsed` of wall time. Dead characters do
    /// not regenerate.
    pub fn regenerate(&mut self, elapsed: Duration) {
        if self.flags.dead || self.flags.skulled {
            return;
        }
        // ~1% of max per second, minimum 1 point, scaled by elapsed time.
        let secs = elapsed.as_secs_f64();
        let hp_gain = ((f64::from(self.vitals.max_hp) * 0.01 * secs).round() as i32).max(0);
        let mp_gain = ((f64::from(self.vitals.max_mp) * 0.01 * secs).round() as i32).max(0);
        self.vitals.regenerate(hp_gain, mp_gain);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
