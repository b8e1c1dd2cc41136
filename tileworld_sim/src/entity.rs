// Entities: anything that occupies a tile layer (characters, creatures,
// items, furniture, fixtures).
//
// Entities are owned exclusively by the grid's registry (`TileGrid`). Tiles
// and events only ever hold the `EntityId`. Construction goes through
// `Entity::new` or one of the `create_*` factories, all of which validate;
// the builder methods are infallible and `validate()` is re-run by the grid
// on placement and by snapshot loading, so an entity edited through its
// public fields cannot slip into the world unchecked.
//
// See also: `tile.rs` for placement rules that read `layer`, `size`,
// `passable` and `requires_passable`; `pathfinding.rs` for how
// `movement_modifiers` scale traversal cost.

use crate::error::EntityError;
use crate::types::{Affordances, EntityId, EntityType, Layer, MAX_LAYER_SIZE, TerrainType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    pub entity_type: EntityType,
    pub layer: Layer,
    /// Volume taken from the layer's capacity, 1..=`MAX_LAYER_SIZE`.
    pub size: u8,
    /// Whether other entities may share this entity's layer. Two impassable
    /// entities never share a (tile, layer).
    pub passable: bool,
    pub opaque: bool,
    /// Affordances this entity contributes to the tile it stands on.
    #[serde(default)]
    pub affordances: Affordances,
    /// Affordances this entity suppresses on its tile.
    #[serde(default)]
    pub blocked_affordances: Affordances,
    /// Per-terrain movement cost multipliers. Missing terrain means 1.0.
    #[serde(default)]
    pub movement_modifiers: BTreeMap<TerrainType, f32>,
    /// Whether the entity may only be placed on passable tiles.
    pub requires_passable: bool,
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl Entity {
    /// Create a validated entity with no affordances. Features and
    /// structures may sit inside walls; everything else needs a passable
    /// tile.
    pub fn new(
        id: impl Into<EntityId>,
        name: impl Into<String>,
        entity_type: EntityType,
        layer: Layer,
        size: u8,
    ) -> Result<Self, EntityError> {
        let entity = Self {
            id: id.into(),
            name: name.into(),
            entity_type,
            layer,
            size,
            passable: true,
            opaque: false,
            affordances: Affordances::new(),
            blocked_affordances: Affordances::new(),
            movement_modifiers: BTreeMap::new(),
            requires_passable: !matches!(entity_type, EntityType::Feature | EntityType::Structure),
            properties: BTreeMap::new(),
        };
        entity.validate()?;
        Ok(entity)
    }

    pub fn validate(&self) -> Result<(), EntityError> {
        if self.id.is_empty() {
            return Err(EntityError::EmptyId);
        }
        if self.size == 0 || self.size > MAX_LAYER_SIZE {
            return Err(EntityError::InvalidSize {
                id: self.id.clone(),
                size: self.size,
                max: MAX_LAYER_SIZE,
            });
        }
        for &value in self.movement_modifiers.values() {
            if !value.is_finite() || value <= 0.0 {
                return Err(EntityError::InvalidMovementMultiplier {
                    id: self.id.clone(),
                    value,
                });
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn with_passable(mut self, passable: bool) -> Self {
        self.passable = passable;
        self
    }

    #[must_use]
    pub fn with_opaque(mut self, opaque: bool) -> Self {
        self.opaque = opaque;
        self
    }

    #[must_use]
    pub fn with_requires_passable(mut self, requires_passable: bool) -> Self {
        self.requires_passable = requires_passable;
        self
    }

    #[must_use]
    pub fn with_affordances<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.affordances.extend(items.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_blocked_affordances<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blocked_affordances
            .extend(items.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_movement_modifier(mut self, terrain: TerrainType, multiplier: f32) -> Self {
        self.movement_modifiers.insert(terrain, multiplier);
        self
    }

    #[must_use]
    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Cost multiplier for moving onto `terrain`.
    pub fn movement_multiplier(&self, terrain: TerrainType) -> f32 {
        self.movement_modifiers.get(&terrain).copied().unwrap_or(1.0)
    }

    /// Smallest multiplier this entity applies to any terrain, capped at 1.0.
    pub fn min_movement_multiplier(&self) -> f32 {
        self.movement_modifiers
            .values()
            .copied()
            .fold(1.0, f32::min)
    }

    pub fn has_affordance(&self, affordance: &str) -> bool {
        self.affordances.contains(affordance)
    }

    pub fn is_character(&self) -> bool {
        self.entity_type == EntityType::Character
    }
}

// ---------------------------------------------------------------------------
// Factories
// ---------------------------------------------------------------------------

/// A small portable object on the object layer.
pub fn create_item(
    id: impl Into<EntityId>,
    name: impl Into<String>,
) -> Result<Entity, EntityError> {
    Ok(Entity::new(id, name, EntityType::Item, Layer::Object, 1)?
        .with_affordances(["pickupable", "examinable"]))
}

/// Furniture blocks its layer and takes `size` units of volume.
pub fn create_furniture(
    id: impl Into<EntityId>,
    name: impl Into<String>,
    size: u8,
) -> Result<Entity, EntityError> {
    Ok(Entity::new(id, name, EntityType::Furniture, Layer::Object, size)?
        .with_passable(false)
        .with_affordances(["examinable", "movable"]))
}

pub fn create_creature(
    id: impl Into<EntityId>,
    name: impl Into<String>,
) -> Result<Entity, EntityError> {
    Ok(Entity::new(id, name, EntityType::Creature, Layer::Ground, 2)?
        .with_passable(false)
        .with_affordances(["examinable"]))
}

pub fn create_character(
    id: impl Into<EntityId>,
    name: impl Into<String>,
) -> Result<Entity, EntityError> {
    Ok(Entity::new(id, name, EntityType::Character, Layer::Ground, 2)?
        .with_passable(false)
        .with_affordances(["examinable", "talkable"]))
}

/// A static fixture (door, lever, painting). May be mounted on impassable
/// tiles.
pub fn create_feature(
    id: impl Into<EntityId>,
    name: impl Into<String>,
) -> Result<Entity, EntityError> {
    Ok(Entity::new(id, name, EntityType::Feature, Layer::Object, 1)?
        .with_affordances(["examinable", "interactable"]))
}
