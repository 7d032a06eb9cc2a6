//! Items and the fixed-slot inventory.
//!
//! The inventory is a fixed array of numbered slots (1-based, matching the
//! client's panes). Capacity is governed by two things: a free slot must
//! exist, and the owner's carry weight must not be exceeded.

use serde::{Deserialize, Serialize};

/// Number of inventory slots every character has.
pub const INVENTORY_SLOTS: usize = 59;

// ---------------------------------------------------------------------------
// Item template
// ---------------------------------------------------------------------------

/// Static definition an item instance is stamped from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemTemplate {
    /// Display name; also the template's registry key.
    pub name: String,
    /// Carry weight of one unit.
    pub carry_weight: i32,
    /// Whether the item may be dropped on the ground.
    pub dropable: bool,
    /// Whether multiple units share one slot.
    pub stackable: bool,
    /// Whether using the item consumes one unit.
    pub consumable: bool,
    /// Cursed items can only be looted by their authenticated owner.
    pub cursed: bool,
    /// Key into the script registry for the on-use effect, if any.
    pub script_key: Option<String>,
}

impl ItemTemplate {
    /// A plain, dropable, non-stacking template. Convenient for tests and
    /// content defaults.
    pub fn simple(name: &str, carry_weight: i32) -> Self {
        Self {
            name: name.to_string(),
            carry_weight,
            dropable: true,
            stackable: false,
            consumable: false,
            cursed: false,
            script_key: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Item instance
// ---------------------------------------------------------------------------

/// One inventory or ground item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// The static template this item was stamped from.
    pub template: ItemTemplate,
    /// Units in the stack (1 for non-stackable items).
    pub stacks: u8,
    /// Inventory slot the item occupies, 1-based; 0 when not held.
    pub slot: u8,
}

impl Item {
    /// Creates a single-unit instance of `template`.
    pub fn of(template: ItemTemplate) -> Self {
        Self {
            template,
            stacks: 1,
            slot: 0,
        }
    }

    /// Total carry weight of this stack.
    pub fn weight(&self) -> i32 {
        self.template.carry_weight * i32::from(self.stacks.max(1))
    }
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

/// Fixed-slot item container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inventory {
    slots: Vec<Option<Item>>,
}

impl Default for Inventory {
    fn default() -> Self {
        Self {
            slots: vec![None; INVENTORY_SLOTS],
        }
    }
}

impl Inventory {
    /// Returns the item in `slot` (1-based), if any.
    pub fn find_in_slot(&self, slot: u8) -> Option<&Item> {
        self.index(slot).and_then(|i| self.slots[i].as_ref())
    }

    /// First unoccupied slot number, or `None` when the inventory is full.
    pub fn first_empty(&self) -> Option<u8> {
        self.slots
            .iter()
            .position(Option::is_none)
            .map(|i| (i + 1) as u8)
    }

    /// Places `item` into its first free slot, stamping `item.slot`.
    /// Returns `false` (item unchanged, not inserted) when full.
    pub fn insert(&mut self, mut item: Item) -> bool {
        match self.first_empty() {
            Some(slot) => {
                item.slot = slot;
                self.slots[(slot - 1) as usize] = Some(item);
                true
            }
            None => false,
        }
    }

    /// Removes and returns the item in `slot`, if any.
    pub fn remove(&mut self, slot: u8) -> Option<Item> {
        let i = self.index(slot)?;
        self.slots[i].take()
    }

    /// Writes `item` back into the slot it claims to occupy.
    pub fn set(&mut self, item: Item) {
        if let Some(i) = self.index(item.slot) {
            self.slots[i] = Some(item);
        }
    }

    /// All held items.
    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    /// Sum of the carry weight of everything held.
    pub fn total_weight(&self) -> i32 {
        self.items().map(Item::weight).sum()
    }

    /// Number of items held.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// True when nothing is held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `item` can be accepted: a free slot exists and adding its
    /// weight to `current_weight` stays within `max_weight`.
    pub fn can_fit(&self, item: &Item, current_weight: i32, max_weight: i32) -> bool {
        self.first_empty().is_some() && current_weight + item.weight() < max_weight
    }

    fn index(&self, slot: u8) -> Option<usize> {
        if slot == 0 || slot as usize > self.slots.len() {
            return None;
        }
        Some((slot - 1) as usize)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
