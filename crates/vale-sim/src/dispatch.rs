//! Inbound command routing.
//!
//! The transport layer decodes packets into [`Command`] values and hands
//! them here with the originating session's serial. Every handler opens
//! with precondition checks; an impossible command (stale reference,
//! out-of-range slot, acting while dead or asleep) is dropped silently
//! with a debug log, exactly like a mistimed click deserves.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;
use vale_config::GameplayConfig;
use vale_types::{CastState, Direction, MapId, Position, Serial, Stat};
use vale_world::{EntityKind, WorldEntity};

use crate::ability::{self, Book};
use crate::dialog::{CheckpointRegistry, DialogLibrary, Interpreter};
use crate::manager::SessionManager;
use crate::scripting::ScriptContext;
use crate::session::{Session, SessionState};
use crate::trade;

/// A decoded player command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Walk { direction: Direction },
    Turn { direction: Direction },
    ClickEntity { target: Serial },
    /// Pick up the ground entity `target` without the click interaction.
    Pickup { target: Serial },
    DropItem { slot: u8, at: Position },
    DropGold { amount: u32, at: Position },
    UseItem { slot: u8 },
    UseSkill { slot: u8 },
    CastSpell { slot: u8, target: Option<Serial> },
    Assail,
    /// Free-text line said aloud; mundanes in hearing range react.
    Gossip { line: String },
    BeginDialog { key: String },
    DialogAnswer { label: String },
    TradeRequest { target: Serial },
    TradeStageItem { slot: u8 },
    TradeStageGold { amount: u32 },
    TradeConfirm,
    TradeCancel,
    AddStatPoint { stat: Stat },
    /// Client finished loading the destination map after a warp.
    MapLoaded,
    /// Client asked for a fresh location echo.
    Refresh,
    KeepAlive,
    Logout,
}

/// Routes commands to their handlers. One instance serves every session.
pub struct CommandRouter {
    manager: Arc<SessionManager>,
    checkpoints: Arc<CheckpointRegistry>,
    dialogs: Arc<dyn DialogLibrary>,
}

impl CommandRouter {
    pub fn new(
        manager: Arc<SessionManager>,
        checkpoints: Arc<CheckpointRegistry>,
        dialogs: Arc<dyn DialogLibrary>,
    ) -> Self {
        Self {
            manager,
            checkpoints,
            dialogs,
        }
    }

    /// Handles one command from `serial`. Runs on the connection's I/O
    /// thread; every state touch goes through the session gate.
    pub fn dispatch(&self, serial: Serial, command: Command) {
        let Some(session) = self.manager.get(serial) else {
            debug!(serial, "command from unknown session dropped");
            return;
        };

        match command {
            Command::Walk { direction } => self.walk(&session, direction),
            Command::Turn { direction } => self.turn(&session, direction),
            Command::ClickEntity { target } => self.click_entity(&session, target),
            Command::Pickup { target } => self.pickup(&session, target),
            Command::DropItem { slot, at } => self.drop_item(&session, slot, at),
            Command::DropGold { amount, at } => self.drop_gold(&session, amount, at),
            Command::UseItem { slot } => self.use_item(&session, slot),
            Command::UseSkill { slot } => self.use_ability(&session, Book::Skill, slot),
            Command::CastSpell { slot, target } => self.cast_spell(&session, slot, target),
            Command::Assail => self.assail(&session),
            Command::Gossip { line } => self.gossip(&session, &line),
            Command::BeginDialog { key } => self.begin_dialog(&session, &key),
            Command::DialogAnswer { label } => self.dialog_answer(&session, &label),
            Command::TradeRequest { target } => self.trade_request(&session, target),
            Command::TradeStageItem { slot } => {
                self.with_trade_partner(&session, |a, b, config| {
                    trade::stage_item(a, b, slot, config);
                });
            }
            Command::TradeStageGold { amount } => {
                self.with_trade_partner(&session, |a, b, _config| {
                    trade::stage_gold(a, b, amount);
                });
            }
            Command::TradeConfirm => {
                self.with_trade_partner(&session, |a, b, config| {
                    trade::confirm(a, b, config);
                });
            }
            Command::TradeCancel => {
                self.with_trade_partner(&session, |a, b, _config| {
                    trade::cancel(a, b);
                });
            }
            Command::AddStatPoint { stat } => self.add_stat_point(&session, stat),
            Command::MapLoaded => self.manager.complete_warp(serial),
            Command::Refresh => self.refresh(&session),
            Command::KeepAlive => {
                if let Err(e) = self.manager.auto_save(&session, Instant::now()) {
                    debug!(serial, error = %e, "keep-alive autosave failed");
                }
            }
            Command::Logout => self.manager.disconnect(serial),
        }
    }

    // -----------------------------------------------------------------------
    // Movement and world interaction
    // -----------------------------------------------------------------------

    fn walk(&self, session: &Session, direction: Direction) {
        session.with_state(|state| {
            let flags = state.character.flags;
            if state.warping || flags.paralyzed || flags.asleep || flags.frozen || flags.dead {
                debug!(serial = session.serial, "walk rejected");
                return;
            }
            state.on_movement();
            state.character.facing = direction;
            state.character.position = state.character.position.stepped(direction);
            self.manager.area().reposition(
                state.character.map,
                session.serial,
                state.character.position,
            );
        });
    }

    fn turn(&self, session: &Session, direction: Direction) {
        session.with_state(|state| {
            if state.warping || state.character.flags.blocks_action() {
                return;
            }
            state.character.facing = direction;
        });
    }

    fn click_entity(&self, session: &Session, target: Serial) {
        let config = &self.manager.config().gameplay;
        session.with_state(|state| {
            if state.character.flags.blocks_action() {
                return;
            }
            let map = state.character.map;
            let Some(entity) = self.manager.area().with_area(map, |a| a.get(target).cloned())
            else {
                debug!(serial = session.serial, target, "click on unknown entity");
                return;
            };

            if let EntityKind::Mundane(ref key) = entity.kind {
                let Some(script) = self.manager.registry().mundane(key) else {
                    return; // inert mundane
                };
                let mut ctx = ScriptContext::new(&mut state.character, config);
                ctx.target = Some(target);
                script.on_click(&mut ctx);
                self.flush(session.serial, ctx.messages);
                state.check_interrupts();
            } else {
                self.loot(state, map, entity, config);
            }
        });
    }

    fn pickup(&self, session: &Session, target: Serial) {
        let config = &self.manager.config().gameplay;
        session.with_state(|state| {
            if state.character.flags.blocks_action() {
                return;
            }
            let map = state.character.map;
            let Some(entity) = self.manager.area().with_area(map, |a| a.get(target).cloned())
            else {
                debug!(serial = session.serial, target, "pickup of unknown entity");
                return;
            };
            self.loot(state, map, entity, config);
        });
    }

    /// Moves a ground item or money pile into the character's possession,
    /// subject to reach, slot, and carry limits.
    fn loot(
        &self,
        state: &mut SessionState,
        map: MapId,
        entity: WorldEntity,
        config: &GameplayConfig,
    ) {
        if !vale_types::within(
            state.character.position,
            entity.position,
            config.click_loot_distance,
        ) {
            return;
        }
        match entity.kind {
            EntityKind::GroundItem(ref item) => {
                let load = state.character.current_weight();
                let max = state.character.max_weight(config.weight_per_str);
                if !state.character.inventory.can_fit(item, load, max) {
                    return;
                }
                if let Some(EntityKind::GroundItem(taken)) =
                    self.manager.area().remove(map, entity.serial).map(|e| e.kind)
                {
                    state.character.inventory.insert(taken);
                }
            }
            EntityKind::Money(amount) => {
                if self.manager.area().remove(map, entity.serial).is_some()
                    && !state.character.give_gold(amount, config.max_carry_gold)
                {
                    // Purse full: the pile goes back where it was.
                    self.manager.area().insert(map, entity);
                }
            }
            EntityKind::Mundane(_) | EntityKind::Character | EntityKind::Monster => {}
        }
    }

    fn drop_item(&self, session: &Session, slot: u8, at: Position) {
        let config = &self.manager.config().gameplay;
        session.with_state(|state| {
            if state.character.flags.blocks_action() || state.trade.is_some() {
                return;
            }
            if !vale_types::within(state.character.position, at, config.drop_distance) {
                return;
            }
            let Some(item) = state.character.inventory.find_in_slot(slot) else {
                debug!(serial = session.serial, slot, "drop from empty slot");
                return;
            };
            if !item.template.dropable {
                self.manager.sender().send(session.serial, "You cannot drop that.");
                return;
            }
            if let Some(item) = state.character.inventory.remove(slot) {
                self.manager.area().insert(
                    state.character.map,
                    WorldEntity {
                        serial: self.manager.allocate_serial(),
                        kind: EntityKind::GroundItem(item),
                        position: at,
                    },
                );
            }
        });
    }

    fn drop_gold(&self, session: &Session, amount: u32, at: Position) {
        let config = &self.manager.config().gameplay;
        session.with_state(|state| {
            if state.character.flags.blocks_action() || state.trade.is_some() {
                return;
            }
            if amount == 0 || amount > state.character.gold {
                return;
            }
            if !vale_types::within(state.character.position, at, config.drop_distance) {
                return;
            }
            state.character.gold -= amount;
            self.manager.area().insert(
                state.character.map,
                WorldEntity {
                    serial: self.manager.allocate_serial(),
                    kind: EntityKind::Money(amount),
                    position: at,
                },
            );
        });
    }

    fn refresh(&self, session: &Session) {
        session.with_state(|state| self.manager.send_location(state));
    }

    fn use_item(&self, session: &Session, slot: u8) {
        let config = &self.manager.config().gameplay;
        session.with_state(|state| {
            if state.character.flags.blocks_action() {
                return;
            }
            let Some(item) = state.character.inventory.find_in_slot(slot).cloned() else {
                debug!(serial = session.serial, slot, "use of empty slot");
                return;
            };
            let Some(key) = item.template.script_key.clone() else {
                return;
            };
            let Some(script) = self.manager.registry().item(&key) else {
                return;
            };

            if item.template.consumable {
                state.character.inventory.remove(slot);
            }
            let mut ctx = ScriptContext::new(&mut state.character, config);
            script.on_use(&mut ctx, slot);
            self.flush(session.serial, ctx.messages);
            state.check_interrupts();
        });
    }

    fn use_ability(&self, session: &Session, book: Book, slot: u8) {
        let config = &self.manager.config().gameplay;
        let Some(index) = (slot as usize).checked_sub(1) else {
            return;
        };
        session.with_state(|state| {
            state.on_combat();
            let messages = ability::execute(
                &mut state.character,
                book,
                index,
                Instant::now(),
                self.manager.registry(),
                config,
            );
            if let Some(messages) = messages {
                self.flush(session.serial, messages);
            }
            state.check_interrupts();
        });
    }

    fn cast_spell(&self, session: &Session, slot: u8, target: Option<Serial>) {
        let config = &self.manager.config().gameplay;
        let Some(index) = (slot as usize).checked_sub(1) else {
            return;
        };
        session.with_state(|state| {
            let now = Instant::now();
            if !ability::can_use(&state.character, Book::Spell, index, now) {
                return;
            }

            // A targeted spell whose target has despawned fizzles: the
            // script's failure hook runs, no cooldown is spent.
            if let Some(t) = target {
                let map = state.character.map;
                let present = self.manager.area().with_area(map, |a| a.get(t).is_some());
                if !present {
                    let key = state.character.spells[index].template.script_key.clone();
                    if let Some(script) = self.manager.registry().ability(&key) {
                        let mut ctx = ScriptContext::new(&mut state.character, config);
                        ctx.target = Some(t);
                        script.on_failed(&mut ctx);
                        self.flush(session.serial, ctx.messages);
                    }
                    return;
                }
            }

            state.on_combat();

            // Spells with chant lines resolve later, in the tick's
            // client-work phase; the pending cast survives until then
            // unless something interrupts it.
            let lines = state.character.spells[index].template.cast_lines;
            if lines > 0 {
                state.character.cast = Some(CastState {
                    slot,
                    target,
                    lines,
                    started: now,
                });
                return;
            }

            let messages =
                ability::execute(&mut state.character, Book::Spell, index, now, self.manager.registry(), config);
            if let Some(messages) = messages {
                self.flush(session.serial, messages);
            }
            state.check_interrupts();
        });
    }

    /// Hearing range for gossip, in tiles.
    const GOSSIP_RADIUS: f64 = 12.0;

    fn gossip(&self, session: &Session, line: &str) {
        let config = &self.manager.config().gameplay;
        session.with_state(|state| {
            if state.character.flags.blocks_action() {
                return;
            }
            let (map, pos) = (state.character.map, state.character.position);
            let keys: Vec<String> = self.manager.area().with_area(map, |area| {
                area.within_radius(pos, Self::GOSSIP_RADIUS)
                    .filter_map(|e| match &e.kind {
                        EntityKind::Mundane(key) => Some(key.clone()),
                        _ => None,
                    })
                    .collect()
            });
            for key in keys {
                if let Some(script) = self.manager.registry().mundane(&key) {
                    let mut ctx = ScriptContext::new(&mut state.character, config);
                    script.on_gossip(&mut ctx, line);
                    self.flush(session.serial, ctx.messages);
                }
            }
            state.check_interrupts();
        });
    }

    fn assail(&self, session: &Session) {
        let config = &self.manager.config().gameplay;
        session.with_state(|state| {
            state.on_combat();
            let messages = ability::activate_assails(
                &mut state.character,
                Instant::now(),
                self.manager.registry(),
                config,
            );
            if let Some(messages) = messages {
                self.flush(session.serial, messages);
            }
            state.check_interrupts();
        });
    }

    // -----------------------------------------------------------------------
    // Dialogs
    // -----------------------------------------------------------------------

    fn begin_dialog(&self, session: &Session, key: &str) {
        session.with_state(|state| {
            if state.dialog.is_some() {
                // One interpreter per session; the old one must be cleared
                // by movement, combat, or completion first.
                return;
            }
            if state.character.flags.blocks_action() {
                return;
            }
            let Some(graph) = self.dialogs.step_graph(key) else {
                debug!(serial = session.serial, key, "no dialog defined");
                return;
            };
            // The dialog key doubles as the acting mundane's script key.
            let mut interpreter = Interpreter::new(graph).with_actor(key);
            if let Some(step) = interpreter.start() {
                self.manager.sender().send(session.serial, &step.prompt);
                state.dialog = Some(interpreter);
            }
        });
    }

    fn dialog_answer(&self, session: &Session, label: &str) {
        let config = &self.manager.config().gameplay;
        session.with_state(|state| {
            let Some(interpreter) = state.dialog.as_mut() else {
                debug!(serial = session.serial, "dialog answer with no dialog");
                return;
            };
            let actor = interpreter.actor().map(str::to_string);
            let prompt = interpreter
                .move_to(label, &mut state.character, &self.checkpoints)
                .map(|step| step.prompt.clone());
            match prompt {
                Some(prompt) => self.manager.sender().send(session.serial, &prompt),
                None => state.dialog = None, // finished; discard
            }

            // The acting mundane hears every answer given.
            if let Some(key) = actor
                && let Some(script) = self.manager.registry().mundane(&key)
            {
                let mut ctx = ScriptContext::new(&mut state.character, config);
                script.on_response(&mut ctx, label);
                self.flush(session.serial, ctx.messages);
            }
            state.check_interrupts();
        });
    }

    // -----------------------------------------------------------------------
    // Trade
    // -----------------------------------------------------------------------

    fn trade_request(&self, session: &Session, target: Serial) {
        self.manager.with_pair(session.serial, target, |a, b| {
            if trade::propose(&mut a.trade_side(), &mut b.trade_side()) {
                self.manager.sender().send(a.character.serial, "trade opened");
                self.manager.sender().send(b.character.serial, "trade opened");
            }
        });
    }

    /// Runs a trade operation with both gates held in canonical order.
    /// The acting session is always passed as the first side.
    fn with_trade_partner(
        &self,
        session: &Session,
        f: impl FnOnce(&mut trade::TradeSide<'_>, &mut trade::TradeSide<'_>, &GameplayConfig),
    ) {
        let Some(partner) = session.with_state(|s| s.trade.as_ref().map(|t| t.partner)) else {
            debug!(serial = session.serial, "trade command with no trade");
            return;
        };
        let config = &self.manager.config().gameplay;
        let paired = self.manager.with_pair(session.serial, partner, |a, b| {
            f(&mut a.trade_side(), &mut b.trade_side(), config);
        });
        if paired.is_none() {
            // Partner session vanished between commands.
            session.with_state(|s| trade::cancel_solo(&mut s.trade_side()));
        }
    }

    // -----------------------------------------------------------------------
    // Stats
    // -----------------------------------------------------------------------

    fn add_stat_point(&self, session: &Session, stat: Stat) {
        let cap = self.manager.config().gameplay.stat_cap;
        session.with_state(|state| {
            if state.character.stat_points == 0 {
                debug!(serial = session.serial, "stat point spend with none unspent");
                return;
            }
            state.character.stat_points -= 1;
            state.character.stats.add(stat, 1, cap);
        });
    }

    fn flush(&self, serial: Serial, messages: Vec<String>) {
        for message in messages {
            self.manager.sender().send(serial, &message);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use vale_config::ServerConfig;
    use vale_types::{Ability, AbilityCategory, AbilityTemplate, Item, ItemTemplate, Position};
    use vale_world::{AreaIndex, WarpRegistry, WorldEntity};

    use crate::dialog::{MemoryDialogLibrary, StepGraph};
    use crate::persist::{CharacterStore, MemoryStore};
    use crate::scripting::{ItemScript, ScriptRegistry};
    use crate::session::{RecordingSender, SessionSender};

    struct Harness {
        router: CommandRouter,
        manager: Arc<SessionManager>,
        sender: Arc<RecordingSender>,
    }

    fn harness(dialogs: MemoryDialogLibrary) -> Harness {
        harness_scripted(dialogs, ScriptRegistry::new())
    }

    fn harness_scripted(dialogs: MemoryDialogLibrary, registry: ScriptRegistry) -> Harness {
        let sender = Arc::new(RecordingSender::new());
        let manager = Arc::new(SessionManager::new(
            Arc::new(MemoryStore::new()) as Arc<dyn CharacterStore>,
            Arc::clone(&sender) as Arc<dyn SessionSender>,
            Arc::new(AreaIndex::new()),
            Arc::new(WarpRegistry::default()),
            Arc::new(registry),
            ServerConfig::default(),
        ));
        let router = CommandRouter::new(
            Arc::clone(&manager),
            Arc::new(CheckpointRegistry::with_builtins()),
            Arc::new(dialogs),
        );
        Harness {
            router,
            manager,
            sender,
        }
    }

    #[test]
    fn test_walk_moves_and_clears_dialog() {
        let h = harness(MemoryDialogLibrary::new());
        let session = h.manager.connect("ida").unwrap();
        session.with_state(|s| {
            s.dialog = Some(Interpreter::new(StepGraph::linear(&["hi"])));
        });

        h.router.dispatch(
            session.serial,
            Command::Walk {
                direction: Direction::East,
            },
        );

        session.with_state(|s| {
            assert_eq!(s.character.position, Position::new(1, 0));
            assert_eq!(s.character.facing, Direction::East);
            assert!(s.dialog.is_none(), "movement clears the dialog");
        });
    }

    #[test]
    fn test_turn_changes_facing_without_moving() {
        let h = harness(MemoryDialogLibrary::new());
        let session = h.manager.connect("ida").unwrap();

        h.router.dispatch(
            session.serial,
            Command::Turn {
                direction: Direction::West,
            },
        );
        session.with_state(|s| {
            assert_eq!(s.character.facing, Direction::West);
            assert_eq!(s.character.position, Position::new(0, 0));
        });

        session.with_state(|s| s.character.flags.frozen = true);
        h.router.dispatch(
            session.serial,
            Command::Turn {
                direction: Direction::East,
            },
        );
        session.with_state(|s| assert_eq!(s.character.facing, Direction::West));
    }

    #[test]
    fn test_drop_and_pickup_round_trip() {
        let h = harness(MemoryDialogLibrary::new());
        let session = h.manager.connect("ida").unwrap();
        let map = h.manager.config().gameplay.starting_map;
        let too_far = h.manager.config().gameplay.drop_distance + 1.0;
        session.with_state(|s| {
            s.character.inventory.insert(Item::of(ItemTemplate::simple("ruby", 1)));
        });

        h.router.dispatch(
            session.serial,
            Command::DropItem {
                slot: 1,
                at: Position::new(too_far as i32, 0),
            },
        );
        session.with_state(|s| assert_eq!(s.character.inventory.len(), 1, "too far to drop"));

        h.router.dispatch(
            session.serial,
            Command::DropItem {
                slot: 1,
                at: Position::new(1, 0),
            },
        );
        session.with_state(|s| assert!(s.character.inventory.is_empty()));
        let dropped = h
            .manager
            .area()
            .with_area(map, |a| {
                a.entities()
                    .find(|e| matches!(e.kind, EntityKind::GroundItem(_)))
                    .map(|e| e.serial)
            })
            .expect("dropped item on the ground");

        h.router.dispatch(session.serial, Command::Pickup { target: dropped });
        session.with_state(|s| assert_eq!(s.character.inventory.len(), 1));
        assert!(h.manager.area().with_area(map, |a| a.get(dropped).is_none()));
    }

    #[test]
    fn test_drop_gold_spawns_money_pile() {
        let h = harness(MemoryDialogLibrary::new());
        let session = h.manager.connect("ida").unwrap();
        let map = h.manager.config().gameplay.starting_map;
        session.with_state(|s| s.character.gold = 100);

        h.router.dispatch(
            session.serial,
            Command::DropGold {
                amount: 500,
                at: Position::new(0, 0),
            },
        );
        session.with_state(|s| assert_eq!(s.character.gold, 100, "cannot drop more than held"));

        h.router.dispatch(
            session.serial,
            Command::DropGold {
                amount: 40,
                at: Position::new(0, 0),
            },
        );
        session.with_state(|s| assert_eq!(s.character.gold, 60));
        let pile = h.manager.area().with_area(map, |a| {
            a.entities()
                .find_map(|e| match e.kind {
                    EntityKind::Money(amount) => Some(amount),
                    _ => None,
                })
        });
        assert_eq!(pile, Some(40));
    }

    #[test]
    fn test_refresh_echoes_location() {
        let h = harness(MemoryDialogLibrary::new());
        let session = h.manager.connect("ida").unwrap();
        let map = h.manager.config().gameplay.starting_map;

        h.router.dispatch(session.serial, Command::Refresh);
        let lines: Vec<_> = h.sender.messages().into_iter().map(|(_, m)| m).collect();
        assert_eq!(lines, vec![format!("location {map} 0 0")]);
    }

    #[test]
    fn test_walk_rejected_while_paralyzed() {
        let h = harness(MemoryDialogLibrary::new());
        let session = h.manager.connect("ida").unwrap();
        session.with_state(|s| s.character.flags.paralyzed = true);

        h.router.dispatch(
            session.serial,
            Command::Walk {
                direction: Direction::East,
            },
        );

        session.with_state(|s| assert_eq!(s.character.position, Position::new(0, 0)));
    }

    #[test]
    fn test_dialog_flow_through_router() {
        let mut dialogs = MemoryDialogLibrary::new();
        dialogs.insert("greeter", StepGraph::linear(&["hello", "goodbye"]));
        let h = harness(dialogs);
        let session = h.manager.connect("ida").unwrap();

        h.router.dispatch(
            session.serial,
            Command::BeginDialog {
                key: "greeter".to_string(),
            },
        );
        h.router.dispatch(
            session.serial,
            Command::DialogAnswer {
                label: "next".to_string(),
            },
        );
        h.router.dispatch(
            session.serial,
            Command::DialogAnswer {
                label: "next".to_string(),
            },
        );

        let prompts: Vec<_> = h.sender.messages().into_iter().map(|(_, m)| m).collect();
        assert_eq!(prompts, vec!["hello".to_string(), "goodbye".to_string()]);
        session.with_state(|s| assert!(s.dialog.is_none(), "finished dialog discarded"));
    }

    #[test]
    fn test_begin_dialog_noop_when_one_active() {
        let mut dialogs = MemoryDialogLibrary::new();
        dialogs.insert("a", StepGraph::linear(&["first"]));
        dialogs.insert("b", StepGraph::linear(&["second"]));
        let h = harness(dialogs);
        let session = h.manager.connect("ida").unwrap();

        h.router.dispatch(session.serial, Command::BeginDialog { key: "a".to_string() });
        h.router.dispatch(session.serial, Command::BeginDialog { key: "b".to_string() });

        let prompts: Vec<_> = h.sender.messages().into_iter().map(|(_, m)| m).collect();
        assert_eq!(prompts, vec!["first".to_string()], "second dialog refused");
    }

    #[test]
    fn test_undefined_dialog_is_silent() {
        let h = harness(MemoryDialogLibrary::new());
        let session = h.manager.connect("ida").unwrap();

        h.router.dispatch(
            session.serial,
            Command::BeginDialog {
                key: "missing".to_string(),
            },
        );
        assert!(h.sender.messages().is_empty());
        session.with_state(|s| assert!(s.dialog.is_none()));
    }

    #[test]
    fn test_gossip_and_response_reach_mundane_script() {
        use crate::scripting::MundaneScript;

        struct Greeter;
        impl MundaneScript for Greeter {
            fn on_click(&self, ctx: &mut ScriptContext<'_>) {
                ctx.say("Well met.");
            }
            fn on_gossip(&self, ctx: &mut ScriptContext<'_>, line: &str) {
                if line.contains("mines") {
                    ctx.say("Aye, the mines reopened last week.");
                }
            }
            fn on_response(&self, ctx: &mut ScriptContext<'_>, answer: &str) {
                if answer == "next" {
                    ctx.say("Safe travels.");
                }
            }
        }

        let mut dialogs = MemoryDialogLibrary::new();
        dialogs.insert("greeter", StepGraph::linear(&["anything else?"]));
        let mut registry = ScriptRegistry::new();
        registry.register_mundane("greeter", Arc::new(Greeter));
        let h = harness_scripted(dialogs, registry);
        let session = h.manager.connect("ida").unwrap();
        let map = h.manager.config().gameplay.starting_map;
        h.manager.area().insert(
            map,
            WorldEntity {
                serial: 700,
                kind: EntityKind::Mundane("greeter".to_string()),
                position: Position::new(2, 0),
            },
        );

        h.router.dispatch(
            session.serial,
            Command::Gossip {
                line: "heard anything about the mines?".to_string(),
            },
        );
        let lines: Vec<_> = h.sender.messages().into_iter().map(|(_, m)| m).collect();
        assert_eq!(lines, vec!["Aye, the mines reopened last week.".to_string()]);

        // Out of hearing range the line goes unanswered.
        h.manager.area().reposition(map, 700, Position::new(40, 0));
        h.router.dispatch(
            session.serial,
            Command::Gossip {
                line: "the mines, I said!".to_string(),
            },
        );
        assert_eq!(h.sender.messages().len(), 1, "distant mundane hears nothing");

        // A dialog answer also routes to the acting mundane's script.
        h.router.dispatch(
            session.serial,
            Command::BeginDialog {
                key: "greeter".to_string(),
            },
        );
        h.router.dispatch(
            session.serial,
            Command::DialogAnswer {
                label: "next".to_string(),
            },
        );
        let lines: Vec<_> = h.sender.messages().into_iter().map(|(_, m)| m).collect();
        assert_eq!(
            lines[1..],
            ["anything else?".to_string(), "Safe travels.".to_string()]
        );
    }

    #[test]
    fn test_trade_round_trip_through_router() {
        let h = harness(MemoryDialogLibrary::new());
        let sa = h.manager.connect("ida").unwrap();
        let sb = h.manager.connect("bran").unwrap();
        sa.with_state(|s| {
            s.character.gold = 100;
            s.character.inventory.insert(Item::of(ItemTemplate::simple("ruby", 1)));
        });

        h.router.dispatch(sa.serial, Command::TradeRequest { target: sb.serial });
        h.router.dispatch(sa.serial, Command::TradeStageItem { slot: 1 });
        h.router.dispatch(sa.serial, Command::TradeStageGold { amount: 100 });
        h.router.dispatch(sa.serial, Command::TradeConfirm);
        h.router.dispatch(sb.serial, Command::TradeConfirm);

        sa.with_state(|s| {
            assert_eq!(s.character.gold, 0);
            assert!(s.character.inventory.is_empty());
            assert!(s.trade.is_none());
        });
        sb.with_state(|s| {
            assert_eq!(s.character.gold, 100);
            assert_eq!(s.character.inventory.len(), 1);
            assert!(s.trade.is_none());
        });
    }

    #[test]
    fn test_sleep_inflicting_script_closes_dialog() {
        struct Brew;
        impl ItemScript for Brew {
            fn on_use(&self, ctx: &mut ScriptContext<'_>, _slot: u8) {
                ctx.character.flags.asleep = true;
                ctx.say("You drift off.");
            }
        }

        let mut registry = ScriptRegistry::new();
        registry.register_item("sleep_brew", Arc::new(Brew));
        let mut dialogs = MemoryDialogLibrary::new();
        dialogs.insert("greeter", StepGraph::linear(&["hello", "goodbye"]));
        let h = harness_scripted(dialogs, registry);
        let session = h.manager.connect("ida").unwrap();
        session.with_state(|s| {
            let mut template = ItemTemplate::simple("strange brew", 1);
            template.script_key = Some("sleep_brew".to_string());
            s.character.inventory.insert(Item::of(template));
        });

        h.router.dispatch(
            session.serial,
            Command::BeginDialog {
                key: "greeter".to_string(),
            },
        );
        session.with_state(|s| assert!(s.dialog.is_some()));

        h.router.dispatch(session.serial, Command::UseItem { slot: 1 });
        session.with_state(|s| {
            assert!(s.character.flags.asleep);
            assert!(s.dialog.is_none(), "sleep onset closes the dialog");
        });
    }

    #[test]
    fn test_chanted_spell_becomes_pending_cast() {
        let h = harness(MemoryDialogLibrary::new());
        let session = h.manager.connect("ida").unwrap();
        session.with_state(|s| {
            s.character.spells.push(Ability::new(
                AbilityTemplate {
                    name: "Zap".to_string(),
                    category: AbilityCategory::Spell,
                    cooldown: None,
                    cast_lines: 2,
                    script_key: "zap".to_string(),
                },
                1,
            ));
        });

        h.router.dispatch(session.serial, Command::CastSpell { slot: 1, target: None });
        session.with_state(|s| {
            let cast = s.character.cast.as_ref().expect("pending cast");
            assert_eq!(cast.lines, 2);
            assert!(s.character.spells[0].ready(Instant::now()), "no cooldown until resolution");
            assert!(!s.character.spells[0].in_use);
        });
    }

    #[test]
    fn test_stat_point_spend_requires_points() {
        let h = harness(MemoryDialogLibrary::new());
        let session = h.manager.connect("ida").unwrap();

        h.router.dispatch(session.serial, Command::AddStatPoint { stat: Stat::Str });
        session.with_state(|s| assert_eq!(s.character.stats.strength, 3, "no points, no change"));

        session.with_state(|s| s.character.stat_points = 2);
        h.router.dispatch(session.serial, Command::AddStatPoint { stat: Stat::Str });
        h.router.dispatch(session.serial, Command::AddStatPoint { stat: Stat::Str });
        session.with_state(|s| {
            assert_eq!(s.character.stats.strength, 5);
            assert_eq!(s.character.stat_points, 0);
        });
    }

    #[test]
    fn test_click_loot_respects_distance() {
        let h = harness(MemoryDialogLibrary::new());
        let session = h.manager.connect("ida").unwrap();
        let map = h.manager.config().gameplay.starting_map;
        let far = h.manager.config().gameplay.click_loot_distance + 1.0;

        h.manager.area().insert(
            map,
            WorldEntity {
                serial: 900,
                kind: EntityKind::GroundItem(Item::of(ItemTemplate::simple("apple", 1))),
                position: Position::new(far as i32, 0),
            },
        );
        h.router.dispatch(session.serial, Command::ClickEntity { target: 900 });
        session.with_state(|s| assert!(s.character.inventory.is_empty(), "too far to loot"));

        h.manager.area().reposition(map, 900, Position::new(1, 0));
        h.router.dispatch(session.serial, Command::ClickEntity { target: 900 });
        session.with_state(|s| assert_eq!(s.character.inventory.len(), 1));
        assert!(
            h.manager.area().with_area(map, |a| a.get(900).is_none()),
            "looted item leaves the ground"
        );
    }

    #[test]
    fn test_logout_disconnects() {
        let h = harness(MemoryDialogLibrary::new());
        let session = h.manager.connect("ida").unwrap();
        h.router.dispatch(session.serial, Command::Logout);
        assert_eq!(h.manager.session_count(), 0);
    }

    #[test]
    fn test_character_connect_places_in_area() {
        let h = harness(MemoryDialogLibrary::new());
        let session = h.manager.connect("ida").unwrap();
        let map = h.manager.config().gameplay.starting_map;
        assert!(h.manager.area().with_area(map, |a| {
            matches!(a.get(session.serial).map(|e| &e.kind), Some(EntityKind::Character))
        }));
    }
}
