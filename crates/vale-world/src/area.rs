//! Per-map entity registry and the proximity queries built on it.
//!
//! Every live world entity (player character, mundane, monster, ground item,
//! dropped money) is registered here by serial, keyed by the map it occupies.
//! All mutation and iteration for one map happens under that map's entry
//! lock, so spawn and despawn can never race a live iteration.

use dashmap::DashMap;
use rustc_hash::FxHashMap;
use vale_types::{within, Item, MapId, Position, Serial};

// ---------------------------------------------------------------------------
// WorldEntity
// ---------------------------------------------------------------------------

/// Category (and per-category payload) of a registered entity.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityKind {
    /// A player character. State lives with its session; only position is
    /// mirrored here.
    Character,
    /// A non-player, non-hostile world entity (quest giver, vendor). The key
    /// resolves its script in the registry.
    Mundane(String),
    /// A hostile spawn.
    Monster,
    /// An item lying on the ground.
    GroundItem(Item),
    /// A pile of dropped gold.
    Money(u32),
}

impl EntityKind {
    /// Discriminant-only comparison, for filtered queries.
    pub fn same_category(&self, other: &EntityKind) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// One entry in the area index.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldEntity {
    /// Login-session-unique serial.
    pub serial: Serial,
    /// Category and payload.
    pub kind: EntityKind,
    /// Tile position on the owning map.
    pub position: Position,
}

// ---------------------------------------------------------------------------
// AreaIndex
// ---------------------------------------------------------------------------

/// The live entity set of one map.
#[derive(Debug, Default)]
pub struct Area {
    entities: FxHashMap<Serial, WorldEntity>,
}

impl Area {
    /// All entities on the map.
    pub fn entities(&self) -> impl Iterator<Item = &WorldEntity> {
        self.entities.values()
    }

    /// The entity with `serial`, if present.
    pub fn get(&self, serial: Serial) -> Option<&WorldEntity> {
        self.entities.get(&serial)
    }

    /// Entities in the same category as `kind`.
    pub fn of_kind<'a>(&'a self, kind: &'a EntityKind) -> impl Iterator<Item = &'a WorldEntity> {
        self.entities.values().filter(move |e| e.kind.same_category(kind))
    }

    /// Entities within `radius` tiles of `center`, ties included.
    pub fn within_radius(
        &self,
        center: Position,
        radius: f64,
    ) -> impl Iterator<Item = &WorldEntity> {
        self.entities
            .values()
            .filter(move |e| within(e.position, center, radius))
    }

    /// Number of registered entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// True when the map holds no entities.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Map id -> live entity set, the authoritative world-space registry.
///
/// Per-map operations take the map's entry lock for their full duration;
/// the tick's object/area phase iterates under the same lock.
#[derive(Debug, Default)]
pub struct AreaIndex {
    maps: DashMap<MapId, Area>,
}

impl AreaIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `entity` on `map`, replacing any entry with the same serial.
    pub fn insert(&self, map: MapId, entity: WorldEntity) {
        self.maps
            .entry(map)
            .or_default()
            .entities
            .insert(entity.serial, entity);
    }

    /// Removes `serial` from `map`, returning the entry if it existed.
    pub fn remove(&self, map: MapId, serial: Serial) -> Option<WorldEntity> {
        self.maps
            .get_mut(&map)
            .and_then(|mut area| area.entities.remove(&serial))
    }

    /// Updates the mirrored position of `serial` on `map`; no-op when the
    /// entity is not registered there.
    pub fn reposition(&self, map: MapId, serial: Serial, position: Position) {
        if let Some(mut area) = self.maps.get_mut(&map)
            && let Some(entity) = area.entities.get_mut(&serial)
        {
            entity.position = position;
        }
    }

    /// Moves `serial` from `from` to `to`, placing it at `position`.
    /// Returns whether the entity was found on the source map.
    pub fn transfer(&self, serial: Serial, from: MapId, to: MapId, position: Position) -> bool {
        match self.remove(from, serial) {
            Some(mut entity) => {
                entity.position = position;
                self.insert(to, entity);
                true
            }
            None => false,
        }
    }

    /// Runs `f` against the map's entity set under its entry lock. The map
    /// is materialized if it was empty, so iteration and later inserts
    /// agree on which lock covers it.
    pub fn with_area<R>(&self, map: MapId, f: impl FnOnce(&Area) -> R) -> R {
        f(&self.maps.entry(map).or_default())
    }

    /// Loaded map count.
    pub fn map_count(&self) -> usize {
        self.maps.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
