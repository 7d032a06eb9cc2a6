//! Core data types shared by every simulation crate: positions, items,
//! abilities, and the player character record itself.

pub mod ability;
pub mod character;
pub mod item;
pub mod position;

pub use ability::{Ability, AbilityCategory, AbilityTemplate, CastState};
pub use character::{Character, Stat, Stats, StatusFlags, Vitals};
pub use item::{Inventory, Item, ItemTemplate, INVENTORY_SLOTS};
pub use position::{within, Direction, MapId, Position, Serial};
