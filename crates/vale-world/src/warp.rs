//! Warp templates: proximity-triggered map transitions.
//!
//! Templates are held in a fixed order and evaluated first-match-wins, so a
//! tile covered by two overlapping warps always fires the same one.

use serde::{Deserialize, Serialize};
use vale_types::{within, MapId, Position};

/// Where a triggered warp sends the character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WarpTarget {
    /// Transition to a position on another (or the same) map.
    Map { to_map: MapId, to_pos: Position },
    /// Transition to the world-map overlay, keyed by portal field.
    World { portal_key: String },
}

/// One warp definition: a set of activation tiles on one map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarpTemplate {
    /// Map on which the warp activates.
    pub activation_map: MapId,
    /// Tiles whose proximity triggers the warp.
    pub points: Vec<Position>,
    /// Activation radius in tiles, ties included.
    pub radius: f64,
    /// Destination.
    pub target: WarpTarget,
}

impl WarpTemplate {
    /// Whether `pos` is within activation range of any of this warp's tiles.
    pub fn activates_at(&self, map: MapId, pos: Position) -> bool {
        self.activation_map == map && self.points.iter().any(|&p| within(p, pos, self.radius))
    }
}

/// The ordered warp list for the whole world. Read-mostly; built once at
/// startup from content definitions.
#[derive(Debug, Default)]
pub struct WarpRegistry {
    templates: Vec<WarpTemplate>,
}

impl WarpRegistry {
    pub fn new(templates: Vec<WarpTemplate>) -> Self {
        Self { templates }
    }

    /// Appends a template at the end of the evaluation order.
    pub fn register(&mut self, template: WarpTemplate) {
        self.templates.push(template);
    }

    /// First template (in registration order) activated by standing at
    /// `pos` on `map`. At most one warp fires per movement.
    pub fn evaluate(&self, map: MapId, pos: Position) -> Option<&WarpTemplate> {
        self.templates.iter().find(|w| w.activates_at(map, pos))
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn warp(map: MapId, x: i32, y: i32, radius: f64, to_map: MapId) -> WarpTemplate {
        WarpTemplate {
            activation_map: map,
            points: vec![Position::new(x, y)],
            radius,
            target: WarpTarget::Map {
                to_map,
                to_pos: Position::new(0, 0),
            },
        }
    }

    #[test]
    fn test_exact_radius_activates() {
        let reg = WarpRegistry::new(vec![warp(1, 0, 0, 2.0, 5)]);
        assert!(reg.evaluate(1, Position::new(0, 2)).is_some());
        assert!(reg.evaluate(1, Position::new(0, 3)).is_none());
        assert!(reg.evaluate(2, Position::new(0, 0)).is_none(), "wrong map");
    }

    #[test]
    fn test_first_match_wins_on_overlap() {
        // Both warps cover (0, 1); registration order decides.
        let reg = WarpRegistry::new(vec![warp(1, 0, 0, 2.0, 5), warp(1, 0, 1, 2.0, 9)]);
        let fired = reg.evaluate(1, Position::new(0, 1)).unwrap();
        assert_eq!(
            fired.target,
            WarpTarget::Map {
                to_map: 5,
                to_pos: Position::new(0, 0)
            }
        );
    }

    #[test]
    fn test_world_portal_target() {
        let reg = WarpRegistry::new(vec![WarpTemplate {
            activation_map: 3,
            points: vec![Position::new(10, 10)],
            radius: 0.0,
            target: WarpTarget::World {
                portal_key: "mileth_field".to_string(),
            },
        }]);

        // Zero radius means the exact tile only.
        assert!(reg.evaluate(3, Position::new(10, 10)).is_some());
        assert!(reg.evaluate(3, Position::new(10, 11)).is_none());
    }
}
