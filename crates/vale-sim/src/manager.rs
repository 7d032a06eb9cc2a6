//! The connected-session list and the per-tick update pipeline.
//!
//! `update_all` walks the session list under the list lock and runs each
//! session's update inside that session's gate. A fault in one session's
//! update is logged and never stops the rest of the tick. Autosave and the
//! disconnect-triggered save contend on a writer-preferring lock so the
//! two can never overlap on the same record.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use vale_config::ServerConfig;
use vale_types::{Character, Position, Serial};
use vale_world::{AreaIndex, EntityKind, WarpRegistry, WarpTarget, WorldEntity};

use crate::ability::{self, Book};
use crate::error::SimError;
use crate::persist::CharacterStore;
use crate::scripting::{ScriptContext, ScriptRegistry};
use crate::session::{Session, SessionSender, SessionState};
use crate::trade;

/// Owns every live session and the shared world collaborators they touch.
pub struct SessionManager {
    sessions: Mutex<Vec<Arc<Session>>>,
    /// Autosave takes this as a reader, disconnect-save as a writer.
    save_lock: RwLock<()>,
    store: Arc<dyn CharacterStore>,
    sender: Arc<dyn SessionSender>,
    area: Arc<AreaIndex>,
    warps: Arc<WarpRegistry>,
    registry: Arc<ScriptRegistry>,
    config: ServerConfig,
    next_serial: AtomicU32,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn CharacterStore>,
        sender: Arc<dyn SessionSender>,
        area: Arc<AreaIndex>,
        warps: Arc<WarpRegistry>,
        registry: Arc<ScriptRegistry>,
        config: ServerConfig,
    ) -> Self {
        Self {
            sessions: Mutex::new(Vec::new()),
            save_lock: RwLock::new(()),
            store,
            sender,
            area,
            warps,
            registry,
            config,
            next_serial: AtomicU32::new(1),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Allocates a world-unique serial, for sessions and spawned entities
    /// alike.
    pub fn allocate_serial(&self) -> Serial {
        self.next_serial.fetch_add(1, Ordering::Relaxed)
    }

    pub fn area(&self) -> &AreaIndex {
        &self.area
    }

    pub fn sender(&self) -> &dyn SessionSender {
        self.sender.as_ref()
    }

    pub fn registry(&self) -> &ScriptRegistry {
        &self.registry
    }

    // -----------------------------------------------------------------------
    // Login / logout
    // -----------------------------------------------------------------------

    /// Binds a session to the named character, loading it (or creating a
    /// fresh one) from the store. A record failing sanity bounds gets the
    /// session disconnected with an explicit message; this is the one
    /// player-visible error path.
    pub fn connect(&self, name: &str) -> Result<Arc<Session>, SimError> {
        let serial = self.allocate_serial();
        let mut character = match self.store.load(name)? {
            Some(c) => c,
            None => {
                let mut c = Character::new(name);
                c.map = self.config.gameplay.starting_map;
                c
            }
        };

        if !character.passes_load_sanity() {
            warn!(name, serial, "character record failed sanity bounds");
            self.sender
                .disconnect(serial, &self.config.gameplay.corrupt_save_message);
            return Err(SimError::CorruptRecord(name.to_string()));
        }

        character.serial = serial;
        let session = Arc::new(Session::new(serial, character.clone(), Instant::now()));
        self.area.insert(
            character.map,
            WorldEntity {
                serial,
                kind: EntityKind::Character,
                position: character.position,
            },
        );
        self.sessions.lock().push(Arc::clone(&session));
        info!(name, serial, "session connected");
        Ok(session)
    }

    /// Tears a session down: cancels any trade (escrow back to owners),
    /// persists the character under the writer side of the save lock, and
    /// removes it from the list and the area index.
    pub fn disconnect(&self, serial: Serial) {
        let Some(session) = self.get(serial) else {
            return;
        };

        // The pair cancel must run while both sessions are still listed;
        // `with_pair` resolves its serials through the session list.
        let partner = session.with_state(|s| s.trade.as_ref().map(|t| t.partner));
        if let Some(partner_serial) = partner {
            self.with_pair(serial, partner_serial, |a, b| {
                trade::cancel(&mut a.trade_side(), &mut b.trade_side());
            });
            // Partner already gone: unwind this side alone.
            session.with_state(|s| {
                if s.trade.is_some() {
                    trade::cancel_solo(&mut s.trade_side());
                }
            });
        }
        self.remove_from_list(serial);

        let _write = self.save_lock.write();
        session.with_state(|s| {
            s.dialog = None;
            s.character.interrupt_cast();
            if let Err(e) = self.store.save(&s.character) {
                error!(serial, error = %e, "save on disconnect failed");
            }
            self.area.remove(s.character.map, serial);
        });
        info!(serial, "session disconnected");
    }

    fn remove_from_list(&self, serial: Serial) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.lock();
        let index = sessions.iter().position(|s| s.serial == serial)?;
        Some(sessions.swap_remove(index))
    }

    pub fn get(&self, serial: Serial) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .iter()
            .find(|s| s.serial == serial)
            .cloned()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    // -----------------------------------------------------------------------
    // Per-tick update
    // -----------------------------------------------------------------------

    /// Visits every connected session once. A failing visit is logged with
    /// its serial and does not stop the walk.
    pub fn for_each_session(&self, mut f: impl FnMut(&Arc<Session>) -> Result<(), SimError>) {
        let snapshot: Vec<_> = self.sessions.lock().clone();
        for session in &snapshot {
            if let Err(e) = f(session) {
                error!(serial = session.serial, error = %e, "session update failed");
            }
        }
    }

    /// The client-work phase: per-session movement effects, regeneration,
    /// warp evaluation, and transition echoes.
    pub fn update_all(&self, elapsed: Duration) {
        let now = Instant::now();
        self.for_each_session(|session| self.update_session(session, elapsed, now));
    }

    fn update_session(
        &self,
        session: &Arc<Session>,
        elapsed: Duration,
        now: Instant,
    ) -> Result<(), SimError> {
        session.with_state(|state| {
            if state.warping {
                // Mid-transition: skip the full update, re-echo location
                // until the client confirms the map load.
                if now >= state.next_location_echo {
                    self.send_location(state);
                    state.next_location_echo = now + Duration::from_secs(1);
                }
                return Ok(());
            }

            // Regen pulses once per accumulated second; per-tick slices
            // round to nothing on their own.
            state.regen_accum += elapsed;
            if state.regen_accum >= Duration::from_secs(1) {
                state.character.regenerate(state.regen_accum);
                state.regen_accum = Duration::ZERO;
            }

            if state.character.vitals.hp <= 0 && !state.character.flags.dead {
                state.character.flags.dead = true;
                state.character.flags.skulled = true;
                state.on_debilitated();
                self.sender
                    .send(session.serial, &self.config.gameplay.reap_message);
                // The reaped go to the death map and await the client's
                // map-load confirmation like any other warp.
                self.begin_warp(state, self.config.gameplay.death_map, Position::new(0, 0));
                return Ok(());
            }

            self.progress_cast(state, now);

            if state.moved {
                state.moved = false;
                self.evaluate_warps(state);
            }
            Ok(())
        })
    }

    /// Resolves a pending spell cast once its chant window has elapsed.
    /// A target that despawned during the chant fizzles the cast: the
    /// failure hook runs and no cooldown is spent.
    fn progress_cast(&self, state: &mut SessionState, now: Instant) {
        let Some(cast) = state.character.cast.take() else {
            return;
        };
        if now.duration_since(cast.started) < Duration::from_secs(u64::from(cast.lines)) {
            state.character.cast = Some(cast);
            return;
        }
        let Some(index) = (cast.slot as usize).checked_sub(1) else {
            return;
        };
        let config = &self.config.gameplay;
        let serial = state.character.serial;

        if let Some(target) = cast.target {
            let map = state.character.map;
            let present = self.area.with_area(map, |a| a.get(target).is_some());
            if !present {
                let key = state
                    .character
                    .spells
                    .get(index)
                    .map(|a| a.template.script_key.clone());
                if let Some(key) = key
                    && let Some(script) = self.registry.ability(&key)
                {
                    let mut ctx = ScriptContext::new(&mut state.character, config);
                    ctx.target = Some(target);
                    script.on_failed(&mut ctx);
                    self.flush(serial, ctx.messages);
                    state.check_interrupts();
                }
                return;
            }
        }

        if let Some(messages) =
            ability::execute(&mut state.character, Book::Spell, index, now, &self.registry, config)
        {
            self.flush(serial, messages);
            state.check_interrupts();
        }
    }

    fn flush(&self, serial: Serial, messages: Vec<String>) {
        for message in messages {
            self.sender.send(serial, &message);
        }
    }

    pub(crate) fn send_location(&self, state: &SessionState) {
        let c = &state.character;
        self.sender.send(
            c.serial,
            &format!("location {} {} {}", c.map, c.position.x, c.position.y),
        );
    }

    /// First-match warp evaluation for the character's current tile.
    fn evaluate_warps(&self, state: &mut SessionState) {
        let (map, pos) = (state.character.map, state.character.position);
        let Some(warp) = self.warps.evaluate(map, pos) else {
            return;
        };
        match &warp.target {
            WarpTarget::Map { to_map, to_pos } => {
                debug!(serial = state.character.serial, from = map, to = to_map, "warp fired");
                self.begin_warp(state, *to_map, *to_pos);
            }
            WarpTarget::World { portal_key } => {
                debug!(serial = state.character.serial, portal = %portal_key, "world portal fired");
                self.sender
                    .send(state.character.serial, &format!("worldmap {portal_key}"));
            }
        }
    }

    /// Moves the character to a new map position and enters the warping
    /// window during which only location echoes are sent.
    pub fn begin_warp(&self, state: &mut SessionState, to_map: u32, to_pos: Position) {
        let serial = state.character.serial;
        let from = state.character.map;
        state.dialog = None;
        state.character.interrupt_cast();
        if !self.area.transfer(serial, from, to_map, to_pos) {
            self.area.insert(
                to_map,
                WorldEntity {
                    serial,
                    kind: EntityKind::Character,
                    position: to_pos,
                },
            );
        }
        state.character.map = to_map;
        state.character.position = to_pos;
        state.warping = true;
        state.next_location_echo = Instant::now();
        self.send_location(state);
    }

    /// The client confirmed the map load; resume full updates.
    pub fn complete_warp(&self, serial: Serial) {
        if let Some(session) = self.get(serial) {
            session.with_state(|state| {
                state.warping = false;
                state.moved = false;
            });
        }
    }

    // -----------------------------------------------------------------------
    // Autosave
    // -----------------------------------------------------------------------

    /// Persists the session's character when the configured interval has
    /// elapsed since the last save. Reader side of the save lock, so a
    /// concurrent disconnect-save of the same session is never overlapped.
    pub fn auto_save(&self, session: &Session, now: Instant) -> Result<(), SimError> {
        let interval = Duration::from_secs(self.config.save.autosave_interval_secs);
        let _read = self.save_lock.read();
        session.with_state(|state| {
            if now.duration_since(state.last_save) < interval {
                return Ok(());
            }
            self.store.save(&state.character)?;
            state.last_save = now;
            debug!(serial = session.serial, "autosaved");
            Ok(())
        })
    }

    /// The component-work phase: autosave sweep over every session.
    pub fn auto_save_all(&self) {
        let now = Instant::now();
        self.for_each_session(|session| self.auto_save(session, now));
    }

    /// The object/area phase: mirror authoritative character positions
    /// into the per-map index under each map's lock.
    pub fn refresh_area_mirror(&self) {
        self.for_each_session(|session| {
            session.with_state(|state| {
                self.area.reposition(
                    state.character.map,
                    session.serial,
                    state.character.position,
                );
                Ok(())
            })
        });
    }

    // -----------------------------------------------------------------------
    // Cross-session locking
    // -----------------------------------------------------------------------

    /// Locks two sessions' gates in ascending-serial order and runs `f`.
    /// Every two-session path (trade) goes through here, so lock order is
    /// fixed process-wide. Returns `None` if either session is gone.
    pub fn with_pair<R>(
        &self,
        a: Serial,
        b: Serial,
        f: impl FnOnce(&mut SessionState, &mut SessionState) -> R,
    ) -> Option<R> {
        if a == b {
            return None;
        }
        let sa = self.get(a)?;
        let sb = self.get(b)?;
        let (first, second) = if a < b { (&sa, &sb) } else { (&sb, &sa) };
        let mut g1 = first.state_lock().lock();
        let mut g2 = second.state_lock().lock();
        let result = if a < b {
            f(&mut g1, &mut g2)
        } else {
            f(&mut g2, &mut g1)
        };
        Some(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::persist::MemoryStore;
    use crate::scripting::AbilityScript;
    use crate::session::RecordingSender;
    use vale_types::{Ability, AbilityCategory, AbilityTemplate, CastState, Item, ItemTemplate};
    use vale_world::WarpTemplate;

    fn manager_with(warps: Vec<WarpTemplate>) -> (Arc<SessionManager>, Arc<MemoryStore>, Arc<RecordingSender>) {
        let store = Arc::new(MemoryStore::new());
        let sender = Arc::new(RecordingSender::new());
        let manager = Arc::new(SessionManager::new(
            Arc::clone(&store) as Arc<dyn CharacterStore>,
            Arc::clone(&sender) as Arc<dyn SessionSender>,
            Arc::new(AreaIndex::new()),
            Arc::new(WarpRegistry::new(warps)),
            Arc::new(ScriptRegistry::new()),
            ServerConfig::default(),
        ));
        (manager, store, sender)
    }

    fn manager() -> (Arc<SessionManager>, Arc<MemoryStore>, Arc<RecordingSender>) {
        manager_with(Vec::new())
    }

    #[test]
    fn test_every_session_visited_despite_failure() {
        let (manager, _store, _sender) = manager();
        for name in ["a", "b", "c", "d"] {
            manager.connect(name).unwrap();
        }

        let visited = AtomicUsize::new(0);
        manager.for_each_session(|session| {
            visited.fetch_add(1, Ordering::SeqCst);
            if session.name == "b" {
                return Err(SimError::SessionUpdate {
                    serial: session.serial,
                    reason: "injected".to_string(),
                });
            }
            Ok(())
        });

        assert_eq!(visited.load(Ordering::SeqCst), 4, "failure must not stop the walk");
    }

    #[test]
    fn test_connect_rejects_corrupt_record() {
        let (manager, store, sender) = manager();
        let mut bad = Character::new("ida");
        bad.stats.strength = 0;
        store.seed(bad);

        let result = manager.connect("ida");
        assert!(matches!(result, Err(SimError::CorruptRecord(_))));
        assert_eq!(manager.session_count(), 0);

        let disconnects = sender.disconnects();
        assert_eq!(disconnects.len(), 1);
        assert!(disconnects[0].1.contains("corrupt"));
    }

    #[test]
    fn test_autosave_respects_interval() {
        let (manager, store, _sender) = manager();
        let session = manager.connect("ida").unwrap();

        let now = Instant::now();
        manager.auto_save(&session, now).unwrap();
        assert!(store.is_empty(), "interval not elapsed, no save");

        let later = now + Duration::from_secs(manager.config().save.autosave_interval_secs + 1);
        manager.auto_save(&session, later).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_chanted_cast_resolves_after_lines_elapse() {
        struct Zap;
        impl AbilityScript for Zap {
            fn on_use(&self, ctx: &mut ScriptContext<'_>) {
                ctx.say("Zap!");
            }
        }

        let store = Arc::new(MemoryStore::new());
        let sender = Arc::new(RecordingSender::new());
        let mut registry = ScriptRegistry::new();
        registry.register_ability("zap", Arc::new(Zap));
        let manager = Arc::new(SessionManager::new(
            Arc::clone(&store) as Arc<dyn CharacterStore>,
            Arc::clone(&sender) as Arc<dyn SessionSender>,
            Arc::new(AreaIndex::new()),
            Arc::new(WarpRegistry::new(Vec::new())),
            Arc::new(registry),
            ServerConfig::default(),
        ));
        let session = manager.connect("ida").unwrap();
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
            s.character.cast = Some(CastState {
                slot: 1,
                target: None,
                lines: 2,
                started: Instant::now() - Duration::from_secs(1),
            });
        });

        // Chant window still open: the cast stays pending.
        manager.update_all(Duration::from_millis(33));
        session.with_state(|s| assert!(s.character.cast.is_some()));

        session.with_state(|s| {
            if let Some(cast) = s.character.cast.as_mut() {
                cast.started = Instant::now() - Duration::from_secs(3);
            }
        });
        manager.update_all(Duration::from_millis(33));
        session.with_state(|s| {
            assert!(s.character.cast.is_none(), "resolved cast cleared");
            assert!(!s.character.spells[0].ready(Instant::now()), "cooldown applied");
        });
        assert!(sender.messages().iter().any(|(_, m)| m == "Zap!"));
    }

    #[test]
    fn test_death_reaps_to_death_map() {
        let (manager, _store, sender) = manager();
        let session = manager.connect("ida").unwrap();
        session.with_state(|s| s.character.vitals.hp = 0);

        manager.update_all(Duration::from_millis(33));

        let death_map = manager.config().gameplay.death_map;
        session.with_state(|s| {
            assert!(s.character.flags.dead);
            assert!(s.character.flags.skulled);
            assert_eq!(s.character.map, death_map);
            assert!(s.warping, "awaiting the client's map load");
        });
        let reap = &manager.config().gameplay.reap_message;
        assert!(sender.messages().iter().any(|(_, m)| m == reap));
        manager.area().with_area(death_map, |area| {
            assert!(area.get(session.serial).is_some(), "mirrored onto the death map");
        });
    }

    #[test]
    fn test_disconnect_saves_and_clears_area() {
        let (manager, store, _sender) = manager();
        let session = manager.connect("ida").unwrap();
        session.with_state(|s| s.character.gold = 77);

        let map = manager.config().gameplay.starting_map;
        manager.disconnect(session.serial);

        assert_eq!(manager.session_count(), 0);
        assert_eq!(store.load("ida").unwrap().unwrap().gold, 77);
        assert!(manager.area().with_area(map, |a| a.get(session.serial).is_none()));
    }

    #[test]
    fn test_disconnect_returns_escrow_to_owner() {
        let (manager, store, _sender) = manager();
        let sa = manager.connect("ida").unwrap();
        let sb = manager.connect("bran").unwrap();
        sa.with_state(|s| {
            s.character.gold = 100;
            s.character.inventory.insert(Item::of(ItemTemplate::simple("ruby", 1)));
        });
        sb.with_state(|s| {
            s.character.gold = 50;
            s.character.inventory.insert(Item::of(ItemTemplate::simple("fern", 1)));
        });

        let config = manager.config().gameplay.clone();
        manager.with_pair(sa.serial, sb.serial, |a, b| {
            assert!(trade::propose(&mut a.trade_side(), &mut b.trade_side()));
            assert!(trade::stage_item(&mut a.trade_side(), &mut b.trade_side(), 1, &config));
            assert!(trade::stage_gold(&mut a.trade_side(), &mut b.trade_side(), 100));
            assert!(trade::stage_item(&mut b.trade_side(), &mut a.trade_side(), 1, &config));
            assert!(trade::stage_gold(&mut b.trade_side(), &mut a.trade_side(), 50));
            // Only bran confirms; no commit can have happened.
            assert!(!trade::confirm(&mut b.trade_side(), &mut a.trade_side(), &config));
        });

        manager.disconnect(sa.serial);

        let saved = store.load("ida").unwrap().unwrap();
        assert_eq!(saved.gold, 100, "escrowed gold back with its owner");
        assert_eq!(saved.inventory.len(), 1);
        sb.with_state(|s| {
            assert!(s.trade.is_none(), "partner side fully unwound");
            assert_eq!(s.character.gold, 50, "partner's escrowed gold returned");
            assert_eq!(s.character.inventory.len(), 1, "partner's escrowed item returned");
        });
    }

    #[test]
    fn test_warp_fires_on_movement() {
        let warp = WarpTemplate {
            activation_map: 1,
            points: vec![Position::new(5, 5)],
            radius: 1.0,
            target: WarpTarget::Map {
                to_map: 2,
                to_pos: Position::new(0, 0),
            },
        };
        let (manager, _store, sender) = manager_with(vec![warp]);
        let session = manager.connect("ida").unwrap();
        session.with_state(|s| {
            s.character.position = Position::new(5, 6); // within radius 1
            s.moved = true;
        });

        manager.update_all(Duration::from_millis(33));

        session.with_state(|s| {
            assert_eq!(s.character.map, 2);
            assert_eq!(s.character.position, Position::new(0, 0));
            assert!(s.warping);
        });
        assert!(
            sender.messages().iter().any(|(_, m)| m.starts_with("location 2")),
            "location echo sent for the destination map"
        );

        // While warping, updates only re-echo location.
        manager.update_all(Duration::from_millis(33));
        manager.complete_warp(session.serial);
        session.with_state(|s| assert!(!s.warping));
    }
}
