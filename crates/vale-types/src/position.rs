//! Tile positions, facing directions, and the planar distance check used by
//! every proximity trigger (warp activation, click-loot, drop placement).

use serde::{Deserialize, Serialize};

/// Unique identifier assigned to every live entity for one login session.
pub type Serial = u32;

/// Identifier of a loaded map.
pub type MapId = u32;

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

/// Facing of a character or NPC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Facing up (negative y).
    #[default]
    North,
    /// Facing right (positive x).
    East,
    /// Facing down (positive y).
    South,
    /// Facing left (negative x).
    West,
}

impl Direction {
    /// The (dx, dy) step one walk in this direction produces.
    pub fn step(self) -> (i32, i32) {
        match self {
            Direction::North => (0, -1),
            Direction::East => (1, 0),
            Direction::South => (0, 1),
            Direction::West => (-1, 0),
        }
    }
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// A tile coordinate on a map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    /// Tile column.
    pub x: i32,
    /// Tile row.
    pub y: i32,
}

impl Position {
    /// Creates a new position.
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Planar Euclidean distance to `other`.
    ///
    /// All radius triggers in the engine use this metric, chosen once so
    /// warp and loot proximity can never disagree.
    pub fn distance(self, other: Position) -> f64 {
        let dx = f64::from(self.x - other.x);
        let dy = f64::from(self.y - other.y);
        (dx * dx + dy * dy).sqrt()
    }

    /// Returns the position one step in `dir` from here.
    pub fn stepped(self, dir: Direction) -> Position {
        let (dx, dy) = dir.step();
        Position::new(self.x + dx, self.y + dy)
    }
}

/// Returns `true` if `a` and `b` are within `radius` tiles of each other,
/// ties included. Squared-distance comparison avoids the square root.
pub fn within(a: Position, b: Position, radius: f64) -> bool {
    let dx = f64::from(a.x - b.x);
    let dy = f64::from(a.y - b.y);
    dx * dx + dy * dy <= radius * radius
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_is_euclidean() {
        let a = Position::new(0, 0);
        let b = Position::new(3, 4);
        assert!((a.distance(b) - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_within_includes_ties() {
        let a = Position::new(0, 0);
        let b = Position::new(0, 2);
        assert!(within(a, b, 2.0), "exact radius must activate");
        assert!(!within(a, b, 1.9));
    }

    #[test]
    fn test_step_round_trip() {
        let p = Position::new(5, 5);
        assert_eq!(p.stepped(Direction::North).stepped(Direction::South), p);
        assert_eq!(p.stepped(Direction::East).stepped(Direction::West), p);
    }
}
