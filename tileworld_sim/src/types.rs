// Core types shared across the tile world.
//
// Defines spatial coordinates (`Position`), entity identifiers, occupancy
// layers, entity categories, the closed set of terrain types, and the
// `Affordances` tag set. All types derive `Serialize` and `Deserialize` for
// save/load.
//
// `Position` serializes as a compact `[x, y, z]` array and additionally has a
// canonical `"x,y,z"` string form (`to_key()` / `from_key()`), which the grid
// snapshot uses for JSON map keys (serde_json requires string keys).
//
// See also: `terrain.rs` for per-terrain default properties, `grid.rs` for
// the bounds that positions are checked against, `pathfinding.rs` for the
// neighbor offsets used during search.
//
// **Critical constraint: determinism.** Everything here has a total order so
// it can key a `BTreeMap`. Affordances are a `BTreeSet` so derived sets
// compare and iterate identically on every run.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;
use std::ops::{Add, Sub};

/// Maximum summed entity volume on one (tile, layer) pair.
pub const MAX_LAYER_SIZE: u8 = 4;

// ---------------------------------------------------------------------------
// Spatial types
// ---------------------------------------------------------------------------

/// A position in the 3D tile grid. Each component is in tile units.
///
/// `x`/`y` span the ground plane, `z` is the vertical level. Pathfinding
/// works within a single `z` plane; vertical movement is a caller concern.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(from = "[i32; 3]", into = "[i32; 3]")]
pub struct Position {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

/// Planar offsets for 4-connected movement, in a fixed order.
pub(crate) const CARDINAL_OFFSETS: [(i32, i32); 4] = [(0, -1), (1, 0), (0, 1), (-1, 0)];

/// Planar offsets for the four diagonal moves.
pub(crate) const DIAGONAL_OFFSETS: [(i32, i32); 4] = [(1, -1), (1, 1), (-1, 1), (-1, -1)];

impl Position {
    pub const ORIGIN: Self = Self::new(0, 0, 0);

    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Straight-line distance including the vertical axis.
    pub fn euclidean_distance(self, other: Self) -> f32 {
        let dx = self.x.abs_diff(other.x) as f32;
        let dy = self.y.abs_diff(other.y) as f32;
        let dz = self.z.abs_diff(other.z) as f32;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Straight-line distance in the ground plane, ignoring `z`.
    pub fn euclidean_distance_2d(self, other: Self) -> f32 {
        let dx = self.x.abs_diff(other.x) as f32;
        let dy = self.y.abs_diff(other.y) as f32;
        (dx * dx + dy * dy).sqrt()
    }

    /// Manhattan distance between two positions, saturating at `u32::MAX`.
    pub fn manhattan_distance(self, other: Self) -> u32 {
        self.x
            .abs_diff(other.x)
            .saturating_add(self.y.abs_diff(other.y))
            .saturating_add(self.z.abs_diff(other.z))
    }

    /// Chebyshev (king-move) distance between two positions.
    pub fn chebyshev_distance(self, other: Self) -> u32 {
        self.x
            .abs_diff(other.x)
            .max(self.y.abs_diff(other.y))
            .max(self.z.abs_diff(other.z))
    }

    /// Whether `other` is one step away. With `diagonal`, any position at
    /// Chebyshev distance 1 counts; otherwise only face-sharing neighbors.
    pub fn is_adjacent(self, other: Self, diagonal: bool) -> bool {
        if diagonal {
            self.chebyshev_distance(other) == 1
        } else {
            self.manhattan_distance(other) == 1
        }
    }

    /// Whether a step from `self` to `other` changes both `x` and `y`.
    pub fn is_diagonal_step(self, other: Self) -> bool {
        self.x != other.x && self.y != other.y
    }

    /// Enumerate neighbors. The planar 4 (or 8 with `diagonal`) come first in
    /// a fixed order, followed by the level above and below when `vertical`
    /// is set. No bounds checking; see `TileGrid::adjacent`.
    pub fn neighbors(self, diagonal: bool, vertical: bool) -> Vec<Position> {
        let mut out = Vec::with_capacity(10);
        for (dx, dy) in CARDINAL_OFFSETS {
            out.push(Position::new(self.x + dx, self.y + dy, self.z));
        }
        if diagonal {
            for (dx, dy) in DIAGONAL_OFFSETS {
                out.push(Position::new(self.x + dx, self.y + dy, self.z));
            }
        }
        if vertical {
            out.push(Position::new(self.x, self.y, self.z + 1));
            out.push(Position::new(self.x, self.y, self.z - 1));
        }
        out
    }

    /// Canonical `"x,y,z"` key used by the serialized grid.
    pub fn to_key(self) -> String {
        format!("{},{},{}", self.x, self.y, self.z)
    }

    /// Parse a `"x,y,z"` key. Whitespace around components is tolerated.
    pub fn from_key(key: &str) -> Option<Self> {
        let mut parts = key.split(',').map(|p| p.trim().parse::<i32>());
        let x = parts.next()?.ok()?;
        let y = parts.next()?.ok()?;
        let z = parts.next()?.ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(x, y, z))
    }
}

impl From<[i32; 3]> for Position {
    fn from([x, y, z]: [i32; 3]) -> Self {
        Self::new(x, y, z)
    }
}

impl From<Position> for [i32; 3] {
    fn from(p: Position) -> Self {
        [p.x, p.y, p.z]
    }
}

impl Add for Position {
    type Output = Position;
    fn add(self, rhs: Position) -> Position {
        Position::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Position {
    type Output = Position;
    fn sub(self, rhs: Position) -> Position {
        Position::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

// ---------------------------------------------------------------------------
// Entity identity and classification
// ---------------------------------------------------------------------------

/// Identifier of an entity in the grid's registry. Tiles and events hold
/// these keys, never the entity itself.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for EntityId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Occupancy plane within a tile. Each layer has independent capacity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Layer {
    Ground = 0,
    Object = 1,
    Ceiling = 2,
}

impl Layer {
    pub const ALL: [Layer; 3] = [Layer::Ground, Layer::Object, Layer::Ceiling];
}

/// Broad category of an entity. Placement rules key off `Character`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    /// A named, story-bearing actor (player, suspect, witness).
    Character,
    Creature,
    Item,
    Furniture,
    /// Static interactable fixture (door, lever, painting).
    Feature,
    Structure,
}

// ---------------------------------------------------------------------------
// Terrain
// ---------------------------------------------------------------------------

/// The base material of a tile. Default physical properties per type live in
/// the `TerrainCatalog` (see `terrain.rs`).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerrainType {
    Rock,
    Soil,
    Sand,
    Grass,
    Water,
    Ice,
    Wood,
    Metal,
    Glass,
    #[default]
    Floor,
    Void,
}

impl TerrainType {
    pub const ALL: [TerrainType; 11] = [
        TerrainType::Rock,
        TerrainType::Soil,
        TerrainType::Sand,
        TerrainType::Grass,
        TerrainType::Water,
        TerrainType::Ice,
        TerrainType::Wood,
        TerrainType::Metal,
        TerrainType::Glass,
        TerrainType::Floor,
        TerrainType::Void,
    ];
}

// ---------------------------------------------------------------------------
// Affordances
// ---------------------------------------------------------------------------

/// A set of affordance tags ("climbable", "flammable", ...).
pub type Affordances = BTreeSet<String>;

/// Build an `Affordances` set from string-like items.
pub fn affordance_set<I, S>(items: I) -> Affordances
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_metrics() {
        let a = Position::new(0, 0, 0);
        let b = Position::new(3, 4, 12);
        assert_eq!(a.manhattan_distance(b), 19);
        assert_eq!(a.chebyshev_distance(b), 12);
        assert!((a.euclidean_distance(b) - 13.0).abs() < 1e-5);
        assert!((a.euclidean_distance_2d(b) - 5.0).abs() < 1e-5);
    }

    #[test]
    fn distances_span_the_full_coordinate_range() {
        let lo = Position::new(i32::MIN, 0, 0);
        let hi = Position::new(i32::MAX, 0, 0);
        assert_eq!(lo.chebyshev_distance(hi), u32::MAX);
        assert_eq!(lo.manhattan_distance(hi), u32::MAX);
        let far = Position::new(i32::MAX, i32::MAX, i32::MAX);
        assert_eq!(lo.manhattan_distance(far), u32::MAX);
        assert!(!lo.is_adjacent(hi, true));
        assert!(!lo.is_adjacent(hi, false));
        assert!(lo.euclidean_distance(hi).is_finite());
        assert!(lo.euclidean_distance_2d(hi) > 4.0e9);
    }

    #[test]
    fn arithmetic() {
        let a = Position::new(1, 2, 3);
        let b = Position::new(4, 6, 8);
        assert_eq!(a + b, Position::new(5, 8, 11));
        assert_eq!(b - a, Position::new(3, 4, 5));
    }

    #[test]
    fn adjacency() {
        let a = Position::new(5, 5, 0);
        assert!(a.is_adjacent(Position::new(5, 6, 0), false));
        assert!(!a.is_adjacent(Position::new(6, 6, 0), false));
        assert!(a.is_adjacent(Position::new(6, 6, 0), true));
        assert!(!a.is_adjacent(a, true));
        assert!(!a.is_adjacent(Position::new(7, 5, 0), true));
    }

    #[test]
    fn neighbor_counts() {
        let p = Position::new(2, 2, 2);
        assert_eq!(p.neighbors(false, false).len(), 4);
        assert_eq!(p.neighbors(true, false).len(), 8);
        assert_eq!(p.neighbors(true, true).len(), 10);
        assert!(p.neighbors(false, true).contains(&Position::new(2, 2, 1)));
        for n in p.neighbors(true, true) {
            assert!(p.is_adjacent(n, true));
        }
    }

    #[test]
    fn key_roundtrip_and_rejects_garbage() {
        let p = Position::new(-3, 14, 2);
        assert_eq!(p.to_key(), "-3,14,2");
        assert_eq!(Position::from_key("-3,14,2"), Some(p));
        assert_eq!(Position::from_key(" 1, 2 ,3"), Some(Position::new(1, 2, 3)));
        assert_eq!(Position::from_key("1,2"), None);
        assert_eq!(Position::from_key("1,2,3,4"), None);
        assert_eq!(Position::from_key("a,b,c"), None);
    }

    #[test]
    fn position_serializes_as_array() {
        let json = serde_json::to_string(&Position::new(1, -2, 3)).unwrap();
        assert_eq!(json, "[1,-2,3]");
        let back: Position = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Position::new(1, -2, 3));
    }

    #[test]
    fn layers_are_strictly_ordered() {
        assert!(Layer::Ground < Layer::Object);
        assert!(Layer::Object < Layer::Ceiling);
    }

    #[test]
    fn terrain_serializes_screaming_case() {
        assert_eq!(serde_json::to_string(&TerrainType::Water).unwrap(), "\"WATER\"");
        let t: TerrainType = serde_json::from_str("\"GLASS\"").unwrap();
        assert_eq!(t, TerrainType::Glass);
    }

    #[test]
    fn entity_id_is_transparent_string() {
        let id = EntityId::new("lamp_1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"lamp_1\"");
        assert_eq!(id.to_string(), "lamp_1");
    }
}
