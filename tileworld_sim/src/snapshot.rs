// Serialized form of a `TileGrid`.
//
// JSON layout:
//
//   {
//     "dimensions": {"width": 10, "height": 10, "depth": 1},
//     "default_terrain": "SOIL",
//     "tiles": {"x,y,z": <tile>, ...},
//     "entities": {"<id>": <entity>, ...},
//     "entity_positions": {"<id>": [x, y, z], ...}
//   }
//
// Only materialized tiles are written. The event bus (subscribers, history,
// clock) and `GridStats` are runtime state and are not part of the
// snapshot; the config is supplied by the loader.
//
// Loading re-validates everything the live grid guarantees by construction:
// tile keys parse, match their tile's position and lie in bounds; tile and
// entity field ranges; every occupant id appears once per tile, resolves,
// and agrees with the position index; every registered entity has exactly
// one position.
//
// See also: `grid.rs` for the live structure, `types.rs` for the `"x,y,z"`
// key format.

use crate::config::GridConfig;
use crate::entity::Entity;
use crate::error::GridError;
use crate::grid::TileGrid;
use crate::tile::Tile;
use crate::types::{EntityId, Position, TerrainType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridSnapshot {
    pub dimensions: Dimensions,
    pub default_terrain: TerrainType,
    /// Keyed by `Position::to_key()`.
    pub tiles: BTreeMap<String, Tile>,
    pub entities: BTreeMap<EntityId, Entity>,
    pub entity_positions: BTreeMap<EntityId, Position>,
}

impl TileGrid {
    pub fn to_snapshot(&self) -> GridSnapshot {
        GridSnapshot {
            dimensions: Dimensions {
                width: self.width,
                height: self.height,
                depth: self.depth,
            },
            default_terrain: self.default_terrain,
            tiles: self
                .tiles
                .iter()
                .map(|(pos, tile)| (pos.to_key(), tile.clone()))
                .collect(),
            entities: self.entities.clone(),
            entity_positions: self.entity_positions.clone(),
        }
    }

    /// Rebuild a grid from a snapshot, validating its consistency.
    pub fn from_snapshot(snapshot: GridSnapshot, config: GridConfig) -> Result<Self, GridError> {
        let Dimensions {
            width,
            height,
            depth,
        } = snapshot.dimensions;
        let mut grid = Self::with_config(width, height, depth, snapshot.default_terrain, config)?;

        for (key, tile) in snapshot.tiles {
            let pos =
                Position::from_key(&key).ok_or_else(|| GridError::InvalidTileKey(key.clone()))?;
            if tile.position() != pos {
                return Err(GridError::TileKeyMismatch {
                    key,
                    position: tile.position(),
                });
            }
            if !grid.contains(pos) {
                return Err(GridError::TileOutOfBounds(pos));
            }
            tile.validate()?;
            grid.tiles.insert(pos, tile);
        }

        for (key, entity) in snapshot.entities {
            if key != entity.id {
                return Err(GridError::EntityKeyMismatch { key, id: entity.id });
            }
            entity.validate()?;
            grid.entities.insert(key, entity);
        }

        for (id, pos) in &snapshot.entity_positions {
            if !grid.entities.contains_key(id) {
                return Err(GridError::UnknownEntity(id.clone()));
            }
            if !grid.tiles.get(pos).is_some_and(|t| t.has_entity(id)) {
                return Err(GridError::OccupancyMismatch {
                    id: id.clone(),
                    position: *pos,
                });
            }
        }

        for (pos, tile) in &grid.tiles {
            let ids = tile.entity_ids();
            for (i, id) in ids.iter().enumerate() {
                if ids[..i].contains(id) {
                    return Err(GridError::DuplicateOccupant {
                        id: id.clone(),
                        position: *pos,
                    });
                }
                if !grid.entities.contains_key(id) {
                    return Err(GridError::DanglingEntity {
                        id: id.clone(),
                        position: *pos,
                    });
                }
                if snapshot.entity_positions.get(id) != Some(pos) {
                    return Err(GridError::OccupancyMismatch {
                        id: id.clone(),
                        position: *pos,
                    });
                }
            }
        }

        if let Some(id) = grid
            .entities
            .keys()
            .find(|id| !snapshot.entity_positions.contains_key(*id))
        {
            return Err(GridError::UnplacedEntity(id.clone()));
        }
        grid.entity_positions = snapshot.entity_positions;

        debug!(
            tiles = grid.tiles.len(),
            entities = grid.entities.len(),
            "grid loaded from snapshot"
        );
        Ok(grid)
    }

    /// The JSON-compatible dictionary form.
    pub fn to_value(&self) -> Result<serde_json::Value, GridError> {
        Ok(serde_json::to_value(self.to_snapshot())?)
    }

    /// Load from the dictionary form with the default configuration.
    pub fn from_value(value: serde_json::Value) -> Result<Self, GridError> {
        let snapshot: GridSnapshot = serde_json::from_value(value)?;
        Self::from_snapshot(snapshot, GridConfig::default())
    }

    pub fn to_json(&self) -> Result<String, GridError> {
        Ok(serde_json::to_string(&self.to_snapshot())?)
    }

    /// Load from a JSON string with the default configuration.
    pub fn from_json(json: &str) -> Result<Self, GridError> {
        let snapshot: GridSnapshot = serde_json::from_str(json)?;
        Self::from_snapshot(snapshot, GridConfig::default())
    }
}
