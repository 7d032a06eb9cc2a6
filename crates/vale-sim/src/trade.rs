//! Two-party trade (exchange) protocol.
//!
//! States: none -> proposed -> staging -> confirmed-one-side -> committed
//! or cancelled. Each participant holds a [`TradeState`] naming the other;
//! a mutation is accepted only while both states still reference each other.
//! Across every path, the total gold and item multiset held by the pair is
//! conserved: escrow returns to its original owner on cancel and swaps
//! sides atomically on commit.
//!
//! The caller is responsible for holding both session gates before
//! invoking anything here; see `SessionManager::with_pair`.

use tracing::warn;
use vale_config::GameplayConfig;
use vale_types::{Character, Item, Serial};

/// One side's half of a linked trade.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeState {
    /// Serial of the counterpart character.
    pub partner: Serial,
    /// Items this side has escrowed (removed from its inventory).
    pub items: Vec<Item>,
    /// Gold this side has escrowed (removed from its purse).
    pub gold: u32,
    /// Gold may be set at most once per side.
    pub gold_set: bool,
    /// This side has locked in the deal.
    pub confirmed: bool,
}

impl TradeState {
    fn new(partner: Serial) -> Self {
        Self {
            partner,
            items: Vec::new(),
            gold: 0,
            gold_set: false,
            confirmed: false,
        }
    }

    fn escrow_weight(&self) -> i32 {
        self.items.iter().map(Item::weight).sum()
    }
}

/// Mutable view of one participant: its character plus its trade slot.
/// Constructed by the session layer from a locked session state.
pub struct TradeSide<'a> {
    pub character: &'a mut Character,
    pub trade: &'a mut Option<TradeState>,
}

// ---------------------------------------------------------------------------
// Protocol operations
// ---------------------------------------------------------------------------

/// Both halves still reference each other. Stale or one-sided pairs fail.
fn linked(a: &TradeSide<'_>, b: &TradeSide<'_>) -> bool {
    let a_names_b = a.trade.as_ref().is_some_and(|t| t.partner == b.character.serial);
    let b_names_a = b.trade.as_ref().is_some_and(|t| t.partner == a.character.serial);
    a_names_b && b_names_a
}

/// Opens a linked trade between `a` and `b`. Rejected (returning `false`,
/// no state change) if either side already trades, or is in a state that
/// blocks action.
pub fn propose(a: &mut TradeSide<'_>, b: &mut TradeSide<'_>) -> bool {
    if a.trade.is_some() || b.trade.is_some() {
        return false;
    }
    if a.character.flags.blocks_action() || b.character.flags.blocks_action() {
        return false;
    }
    *a.trade = Some(TradeState::new(b.character.serial));
    *b.trade = Some(TradeState::new(a.character.serial));
    true
}

/// Moves the item in `slot` of `owner`'s inventory into escrow.
///
/// Rejected silently when: the pair is not linked, either side already
/// confirmed, the slot is empty, the item is not dropable, or the partner
/// lacks spare carry capacity for it (counting what is already escrowed
/// toward them).
pub fn stage_item(
    owner: &mut TradeSide<'_>,
    partner: &mut TradeSide<'_>,
    slot: u8,
    config: &GameplayConfig,
) -> bool {
    if !linked(owner, partner) || sides_locked(owner, partner) {
        return false;
    }
    let Some(item) = owner.character.inventory.find_in_slot(slot).cloned() else {
        return false;
    };
    if !item.template.dropable {
        return false;
    }

    let pending = owner.trade.as_ref().map_or(0, TradeState::escrow_weight);
    let partner_load = partner.character.current_weight() + pending;
    let partner_max = partner.character.max_weight(config.weight_per_str);
    if !partner
        .character
        .inventory
        .can_fit(&item, partner_load, partner_max)
    {
        return false;
    }

    let Some(removed) = owner.character.inventory.remove(slot) else {
        return false;
    };
    if let Some(trade) = owner.trade.as_mut() {
        trade.items.push(removed);
    }
    true
}

/// Escrows `amount` gold from `owner`. Each side may set gold exactly once;
/// an amount exceeding the purse is rejected.
pub fn stage_gold(owner: &mut TradeSide<'_>, partner: &mut TradeSide<'_>, amount: u32) -> bool {
    if !linked(owner, partner) || sides_locked(owner, partner) {
        return false;
    }
    let Some(trade) = owner.trade.as_mut() else {
        return false;
    };
    if trade.gold_set || amount > owner.character.gold {
        return false;
    }
    owner.character.gold -= amount;
    trade.gold = amount;
    trade.gold_set = true;
    true
}

/// Locks in `owner`'s side. When both sides have confirmed, the escrows
/// swap: each participant receives the other's items and gold (clamped to
/// the carry cap) and both trade states detach in the same step.
///
/// Returns `true` only when the trade committed.
pub fn confirm(
    owner: &mut TradeSide<'_>,
    partner: &mut TradeSide<'_>,
    config: &GameplayConfig,
) -> bool {
    if !linked(owner, partner) {
        return false;
    }
    if let Some(trade) = owner.trade.as_mut() {
        trade.confirmed = true;
    }

    let both = owner.trade.as_ref().is_some_and(|t| t.confirmed)
        && partner.trade.as_ref().is_some_and(|t| t.confirmed);
    if !both {
        return false;
    }

    // Both locked in: swap escrows atomically under the two held gates.
    let owner_escrow = owner.trade.take();
    let partner_escrow = partner.trade.take();
    if let Some(escrow) = partner_escrow {
        deliver(owner.character, partner.character, escrow, config);
    }
    if let Some(escrow) = owner_escrow {
        deliver(partner.character, owner.character, escrow, config);
    }
    true
}

/// Cancels a linked trade: every escrowed item and all gold return to
/// their original owner, never to the counterpart, and both states detach.
pub fn cancel(a: &mut TradeSide<'_>, b: &mut TradeSide<'_>) {
    if !linked(a, b) {
        return;
    }
    return_escrow(a);
    return_escrow(b);
}

/// Cancels one side whose partner is already gone (disconnect teardown).
pub fn cancel_solo(side: &mut TradeSide<'_>) {
    return_escrow(side);
}

fn return_escrow(side: &mut TradeSide<'_>) {
    let Some(trade) = side.trade.take() else {
        return;
    };
    for item in trade.items {
        if !side.character.inventory.insert(item) {
            warn!(
                character = %side.character.name,
                "escrow return found a full inventory; item lost"
            );
        }
    }
    // Returned gold bypasses the cap check; it was the owner's to begin with.
    side.character.gold = side.character.gold.saturating_add(trade.gold);
}

/// After either confirmation no further staging is accepted.
fn sides_locked(a: &TradeSide<'_>, b: &TradeSide<'_>) -> bool {
    a.trade.as_ref().is_some_and(|t| t.confirmed)
        || b.trade.as_ref().is_some_and(|t| t.confirmed)
}

fn deliver(to: &mut Character, from: &mut Character, escrow: TradeState, config: &GameplayConfig) {
    for item in escrow.items {
        if !to.inventory.insert(item.clone()) {
            // Recipient filled up since staging; the original owner keeps it.
            warn!(
                recipient = %to.name,
                item = %item.template.name,
                "trade delivery found a full inventory; returning to owner"
            );
            if !from.inventory.insert(item) {
                warn!(owner = %from.name, "owner inventory also full; item lost");
            }
        }
    }
    to.give_gold_clamped(escrow.gold, config.max_carry_gold);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
