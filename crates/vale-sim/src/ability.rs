//! Ability use: precondition gating, cooldown application, and assail
//! sibling synchronization.
//!
//! Every failed precondition is a silent no-op. Players mash these
//! constantly; rejection is the normal case, not an error.

use std::time::{Duration, Instant};

use vale_config::GameplayConfig;
use vale_types::{Ability, AbilityCategory, Character};

use crate::scripting::{ScriptContext, ScriptRegistry};

/// Which ability collection an index refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Book {
    Skill,
    Spell,
}

fn book<'a>(character: &'a Character, which: Book) -> &'a [Ability] {
    match which {
        Book::Skill => &character.skills,
        Book::Spell => &character.spells,
    }
}

fn book_mut<'a>(character: &'a mut Character, which: Book) -> &'a mut Vec<Ability> {
    match which {
        Book::Skill => &mut character.skills,
        Book::Spell => &mut character.spells,
    }
}

/// Whether the ability at `index` may be used right now: the character can
/// act, the cooldown has elapsed, and the effect is not already running.
pub fn can_use(character: &Character, which: Book, index: usize, now: Instant) -> bool {
    if character.flags.blocks_action() {
        return false;
    }
    match book(character, which).get(index) {
        Some(ability) => ability.ready(now) && !ability.in_use,
        None => false,
    }
}

/// Executes the ability at `index`: runs its effect script inside the
/// re-entrancy guard, then starts the cooldown (the template's own, or the
/// configured base delay). Executing an assail also restarts the cooldown
/// of every sibling assail without re-running their scripts, keeping the
/// set synchronized.
///
/// Returns the script's queued messages, or `None` when a precondition
/// failed and nothing changed.
pub fn execute(
    character: &mut Character,
    which: Book,
    index: usize,
    now: Instant,
    registry: &ScriptRegistry,
    config: &GameplayConfig,
) -> Option<Vec<String>> {
    if !can_use(character, which, index, now) {
        return None;
    }

    let (script_key, category) = {
        let ability = &mut book_mut(character, which)[index];
        ability.in_use = true;
        (ability.template.script_key.clone(), ability.template.category)
    };

    let mut messages = Vec::new();
    if let Some(script) = registry.ability(&script_key) {
        let mut ctx = ScriptContext::new(character, config);
        script.on_use(&mut ctx);
        script.on_success(&mut ctx);
        messages = ctx.messages;
    }

    let base_delay = Duration::from_millis(config.base_ability_delay_ms);
    // The script may have reshaped the book; re-resolve before unwinding
    // the guard.
    if let Some(ability) = book_mut(character, which).get_mut(index) {
        ability.apply_cooldown(now, base_delay);
        ability.in_use = false;
    }

    if category == AbilityCategory::Assail {
        sync_assail_siblings(character, index, now, base_delay);
    }

    Some(messages)
}

/// Executes the first ready assail in the skill book (space-bar). The
/// sibling sync inside [`execute`] puts the rest on cooldown with it.
pub fn activate_assails(
    character: &mut Character,
    now: Instant,
    registry: &ScriptRegistry,
    config: &GameplayConfig,
) -> Option<Vec<String>> {
    let index = character
        .assail_indices()
        .into_iter()
        .find(|&i| can_use(character, Book::Skill, i, now))?;
    execute(character, Book::Skill, index, now, registry, config)
}

fn sync_assail_siblings(character: &mut Character, used: usize, now: Instant, base: Duration) {
    for i in character.assail_indices() {
        if i == used {
            continue;
        }
        character.skills[i].apply_cooldown(now, base);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
