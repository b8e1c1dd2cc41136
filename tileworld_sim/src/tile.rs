// A single grid cell: terrain, overrides, environment, modifiers and the ids
// of the entities standing on it.
//
// Everything observable about a tile (passability, opacity, affordances,
// movement cost) is *derived* on demand from its stored fields plus the
// injected `TerrainCatalog`. Nothing derived is cached, so the tile can never
// disagree with itself after a mutation.
//
// Occupancy is stored as ids only. The entities themselves live in the
// grid's registry; methods that need entity data take the resolved
// occupants as an iterator from the caller.
//
// Placement is all-or-nothing: `check_placement` runs every rule first and
// `add_entity` mutates only if it passes. Rules, per (tile, layer):
//   - entities that require passability need a passable tile,
//   - summed volume never exceeds `MAX_LAYER_SIZE`,
//   - two impassable entities never share a layer,
//   - at most one passability-requiring character per tile (any layer).
//
// See also: `terrain.rs` for defaults and modifiers, `environment.rs` for
// readings, `grid.rs` which resolves occupants and emits events,
// `pathfinding.rs` which adds the diagonal factor on top of
// `movement_cost`.

use crate::entity::Entity;
use crate::environment::{FluidType, TileEnvironment};
use crate::error::{EntityError, TileError};
use crate::terrain::{ModifierKind, TerrainCatalog, TerrainModifier};
use crate::types::{Affordances, EntityId, Layer, MAX_LAYER_SIZE, Position, TerrainType};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;
use tracing::debug;

/// A per-tile override of a terrain-derived flag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Override {
    /// Use the terrain default.
    #[default]
    Inherited,
    Overridden(bool),
}

impl Override {
    pub fn resolve(self, inherited: bool) -> bool {
        match self {
            Override::Inherited => inherited,
            Override::Overridden(value) => value,
        }
    }
}

impl From<Option<bool>> for Override {
    fn from(value: Option<bool>) -> Self {
        value.map_or(Override::Inherited, Override::Overridden)
    }
}

/// Why a placement was refused. Not an error: the `bool` entry points log it
/// and return `false`; the `try_` variants on `TileGrid` hand it back.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum PlacementRejection {
    #[error(transparent)]
    InvalidEntity(#[from] EntityError),
    #[error("{0} lies outside the grid")]
    OutOfBounds(Position),
    #[error("entity `{0}` is already registered")]
    Duplicate(EntityId),
    #[error("entity `{0}` is not in the grid")]
    UnknownEntity(EntityId),
    #[error("tile at {0} is impassable")]
    Impassable(Position),
    #[error("entity `{0}` is already on this tile")]
    AlreadyPresent(EntityId),
    #[error("{layer:?} layer would hold {needed} units, capacity is {max}")]
    LayerFull { layer: Layer, needed: u32, max: u8 },
    #[error("character `{0}` already occupies this tile")]
    CharacterPresent(EntityId),
    #[error("impassable entity `{0}` already blocks this layer")]
    Blocked(EntityId),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    position: Position,
    pub terrain_type: TerrainType,
    #[serde(default)]
    pub passable: Override,
    #[serde(default)]
    pub opaque: Override,
    height: f32,
    stability: f32,
    #[serde(default)]
    modifiers: Vec<TerrainModifier>,
    #[serde(default)]
    pub environment: TileEnvironment,
    #[serde(default)]
    entity_ids: SmallVec<[EntityId; 4]>,
    #[serde(default)]
    feature_ids: Vec<String>,
}

impl Tile {
    /// A flat, fully stable tile with default environment and no occupants.
    pub fn new(position: Position, terrain_type: TerrainType) -> Self {
        Self {
            position,
            terrain_type,
            passable: Override::Inherited,
            opaque: Override::Inherited,
            height: 0.0,
            stability: 1.0,
            modifiers: Vec::new(),
            environment: TileEnvironment::default(),
            entity_ids: SmallVec::new(),
            feature_ids: Vec::new(),
        }
    }

    /// Check field ranges. Run on snapshot load, since deserialization
    /// bypasses the setters.
    pub fn validate(&self) -> Result<(), TileError> {
        if !(0.0..=1.0).contains(&self.stability) {
            return Err(TileError::StabilityOutOfRange(self.stability));
        }
        if !self.height.is_finite() {
            return Err(TileError::InvalidHeight(self.height));
        }
        Ok(())
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn set_height(&mut self, height: f32) -> Result<(), TileError> {
        if !height.is_finite() {
            return Err(TileError::InvalidHeight(height));
        }
        self.height = height;
        Ok(())
    }

    pub fn stability(&self) -> f32 {
        self.stability
    }

    pub fn set_stability(&mut self, stability: f32) -> Result<(), TileError> {
        if !(0.0..=1.0).contains(&stability) {
            return Err(TileError::StabilityOutOfRange(stability));
        }
        self.stability = stability;
        Ok(())
    }

    /// Lower stability by `amount`, clamping at zero. Returns the new value.
    pub fn reduce_stability(&mut self, amount: f32) -> f32 {
        self.stability = (self.stability - amount.max(0.0)).clamp(0.0, 1.0);
        self.stability
    }

    // -----------------------------------------------------------------------
    // Derived properties
    // -----------------------------------------------------------------------

    pub fn is_passable(&self, catalog: &TerrainCatalog) -> bool {
        let defaults = catalog.default_properties(self.terrain_type);
        if self.passable.resolve(defaults.passable) {
            return true;
        }
        if self.modifiers.iter().any(TerrainModifier::forces_passable) {
            return true;
        }
        // Flooded water is swum through even where the terrain says no.
        self.terrain_type == TerrainType::Water && self.environment.fluid() == FluidType::Water
    }

    pub fn is_opaque(&self, catalog: &TerrainCatalog) -> bool {
        if self.terrain_type == TerrainType::Glass {
            return false;
        }
        self.opaque
            .resolve(catalog.default_properties(self.terrain_type).opaque)
    }

    /// Affordances of this tile given its current occupants.
    ///
    /// Terrain defaults plus every modifier's additions, minus every
    /// modifier's removals; then environment adjustments; then occupant
    /// affordances, minus anything an occupant blocks.
    pub fn affordances<'a>(
        &self,
        catalog: &TerrainCatalog,
        occupants: impl IntoIterator<Item = &'a Entity>,
    ) -> Affordances {
        let rules = catalog.rules();
        let mut set = catalog.default_properties(self.terrain_type).affordances.clone();

        for m in &self.modifiers {
            set.extend(m.adds().iter().cloned());
        }
        for m in &self.modifiers {
            for removed in m.removes() {
                set.remove(removed);
            }
        }

        let env = &self.environment;
        if env.moisture() > rules.wet_moisture_threshold {
            set.insert("slippery".to_string());
            set.remove("flammable");
        }
        if env.temperature() < rules.freezing_temperature {
            set.insert("freezing".to_string());
        }
        if env.light() < rules.dark_light_threshold {
            set.insert("dark".to_string());
            set.insert("hideable".to_string());
        }

        let mut blocked = Affordances::new();
        for entity in occupants {
            set.extend(entity.affordances.iter().cloned());
            blocked.extend(entity.blocked_affordances.iter().cloned());
        }
        set.retain(|a| !blocked.contains(a));
        set
    }

    /// Cost of entering this tile, optionally from a neighbor (for the
    /// height penalty) and for a specific entity. Infinite if impassable.
    pub fn movement_cost(
        &self,
        catalog: &TerrainCatalog,
        from: Option<&Tile>,
        entity: Option<&Entity>,
    ) -> f32 {
        if !self.is_passable(catalog) {
            return f32::INFINITY;
        }
        let rules = catalog.rules();
        let defaults = catalog.default_properties(self.terrain_type);
        let mut cost = if defaults.passable {
            defaults.base_cost
        } else {
            rules.forced_passage_cost
        };

        if let Some(from) = from {
            cost += rules.height_cost_factor * (self.height - from.height).abs();
        }
        if self.environment.moisture() > rules.wet_moisture_threshold {
            cost *= rules.wet_cost_multiplier;
        }
        if self.environment.light() < rules.dim_light_threshold {
            cost *= rules.dim_cost_multiplier;
        }
        for m in &self.modifiers {
            cost *= m.effective_cost_multiplier();
        }
        if let Some(entity) = entity {
            cost *= entity.movement_multiplier(self.terrain_type);
        }
        cost
    }

    // -----------------------------------------------------------------------
    // Modifiers
    // -----------------------------------------------------------------------

    pub fn modifiers(&self) -> &[TerrainModifier] {
        &self.modifiers
    }

    pub fn modifier(&self, kind: &ModifierKind) -> Option<&TerrainModifier> {
        self.modifiers.iter().find(|m| m.kind() == kind)
    }

    pub fn has_modifier(&self, kind: &ModifierKind) -> bool {
        self.modifier(kind).is_some()
    }

    /// Apply a modifier, replacing (in place) any existing one of the same
    /// kind. Stability drops by the modifier's effective reduction and is
    /// not restored when the modifier is later removed.
    pub fn add_modifier(&mut self, modifier: TerrainModifier) -> Option<TerrainModifier> {
        self.reduce_stability(modifier.effective_stability_reduction());
        match self.modifiers.iter().position(|m| m.kind() == modifier.kind()) {
            Some(index) => Some(std::mem::replace(&mut self.modifiers[index], modifier)),
            None => {
                self.modifiers.push(modifier);
                None
            }
        }
    }

    pub fn remove_modifier(&mut self, kind: &ModifierKind) -> Option<TerrainModifier> {
        let index = self.modifiers.iter().position(|m| m.kind() == kind)?;
        Some(self.modifiers.remove(index))
    }

    // -----------------------------------------------------------------------
    // Occupancy
    // -----------------------------------------------------------------------

    pub fn entity_ids(&self) -> &[EntityId] {
        &self.entity_ids
    }

    pub fn has_entity(&self, id: &EntityId) -> bool {
        self.entity_ids.contains(id)
    }

    pub fn is_occupied(&self) -> bool {
        !self.entity_ids.is_empty()
    }

    /// Run every placement rule for `entity` against `occupants` (the
    /// resolved entities for `entity_ids()`).
    pub fn check_placement<'a>(
        &self,
        entity: &Entity,
        catalog: &TerrainCatalog,
        occupants: impl IntoIterator<Item = &'a Entity>,
    ) -> Result<(), PlacementRejection> {
        if self.has_entity(&entity.id) {
            return Err(PlacementRejection::AlreadyPresent(entity.id.clone()));
        }
        if entity.requires_passable && !self.is_passable(catalog) {
            return Err(PlacementRejection::Impassable(self.position));
        }

        let mut layer_volume = u32::from(entity.size);
        for other in occupants {
            if entity.is_character()
                && entity.requires_passable
                && other.is_character()
                && other.requires_passable
            {
                return Err(PlacementRejection::CharacterPresent(other.id.clone()));
            }
            if other.layer != entity.layer {
                continue;
            }
            if !other.passable && !entity.passable {
                return Err(PlacementRejection::Blocked(other.id.clone()));
            }
            layer_volume += u32::from(other.size);
        }
        if layer_volume > u32::from(MAX_LAYER_SIZE) {
            return Err(PlacementRejection::LayerFull {
                layer: entity.layer,
                needed: layer_volume,
                max: MAX_LAYER_SIZE,
            });
        }
        Ok(())
    }

    /// Place `entity` if every rule passes. Nothing changes on rejection.
    pub fn add_entity<'a>(
        &mut self,
        entity: &Entity,
        catalog: &TerrainCatalog,
        occupants: impl IntoIterator<Item = &'a Entity>,
    ) -> bool {
        match self.check_placement(entity, catalog, occupants) {
            Ok(()) => {
                self.push_entity_id(entity.id.clone());
                true
            }
            Err(reason) => {
                debug!(
                    entity = %entity.id,
                    position = %self.position,
                    %reason,
                    "placement rejected"
                );
                false
            }
        }
    }

    pub fn remove_entity(&mut self, id: &EntityId) -> bool {
        match self.entity_ids.iter().position(|e| e == id) {
            Some(index) => {
                self.entity_ids.remove(index);
                true
            }
            None => false,
        }
    }

    /// Record an occupant whose placement the caller has already checked.
    pub(crate) fn push_entity_id(&mut self, id: EntityId) {
        self.entity_ids.push(id);
    }

    /// Take over another tile's occupant list (used when a tile is replaced
    /// wholesale; occupancy belongs to the registry, not the tile value).
    pub(crate) fn set_entity_ids(&mut self, ids: SmallVec<[EntityId; 4]>) {
        self.entity_ids = ids;
    }

    pub(crate) fn take_entity_ids(&mut self) -> SmallVec<[EntityId; 4]> {
        std::mem::take(&mut self.entity_ids)
    }

    // -----------------------------------------------------------------------
    // Static features
    // -----------------------------------------------------------------------

    pub fn feature_ids(&self) -> &[String] {
        &self.feature_ids
    }

    /// Returns false if the feature was already listed.
    pub fn add_feature(&mut self, feature_id: impl Into<String>) -> bool {
        let feature_id = feature_id.into();
        if self.feature_ids.contains(&feature_id) {
            return false;
        }
        self.feature_ids.push(feature_id);
        true
    }

    pub fn remove_feature(&mut self, feature_id: &str) -> bool {
        let before = self.feature_ids.len();
        self.feature_ids.retain(|f| f != feature_id);
        self.feature_ids.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{create_character, create_feature, create_furniture, create_item};
    use crate::types::affordance_set;

    const NONE: [&Entity; 0] = [];

    fn catalog() -> TerrainCatalog {
        TerrainCatalog::standard()
    }

    fn tile(terrain: TerrainType) -> Tile {
        Tile::new(Position::new(1, 1, 0), terrain)
    }

    #[test]
    fn override_resolution() {
        assert!(Override::Inherited.resolve(true));
        assert!(!Override::Overridden(false).resolve(true));
        assert_eq!(Override::from(Some(true)), Override::Overridden(true));
        assert_eq!(Override::from(None), Override::Inherited);
    }

    #[test]
    fn passability_follows_terrain_and_overrides() {
        let cat = catalog();
        assert!(tile(TerrainType::Soil).is_passable(&cat));
        assert!(!tile(TerrainType::Rock).is_passable(&cat));

        let mut t = tile(TerrainType::Rock);
        t.passable = Override::Overridden(true);
        assert!(t.is_passable(&cat));

        let mut t = tile(TerrainType::Soil);
        t.passable = Override::Overridden(false);
        assert!(!t.is_passable(&cat));
    }

    #[test]
    fn frozen_forces_passage() {
        let cat = catalog();
        let mut deep = tile(TerrainType::Water);
        deep.passable = Override::Overridden(false);
        assert!(!deep.is_passable(&cat));
        deep.add_modifier(cat.modifier("frozen", 1.0).unwrap());
        assert!(deep.is_passable(&cat));
        assert!((deep.movement_cost(&cat, None, None) - 2.0 * 1.3).abs() < 1e-5);
    }

    #[test]
    fn flooded_water_stays_traversable() {
        let cat = catalog();
        let mut t = tile(TerrainType::Water);
        t.passable = Override::Overridden(false);
        t.environment = t.environment.with_fluid(FluidType::Water);
        assert!(t.is_passable(&cat));
    }

    #[test]
    fn glass_is_never_opaque() {
        let cat = catalog();
        let mut glass = tile(TerrainType::Glass);
        glass.opaque = Override::Overridden(true);
        assert!(!glass.is_opaque(&cat));
        assert!(!glass.is_passable(&cat));
        assert!(tile(TerrainType::Rock).is_opaque(&cat));
    }

    #[test]
    fn wet_wood_loses_flammable() {
        let cat = catalog();
        let mut wood = tile(TerrainType::Wood);
        assert!(wood.affordances(&cat, NONE).contains("flammable"));

        wood.environment = wood.environment.with_moisture(0.9).unwrap();
        let a = wood.affordances(&cat, NONE);
        assert!(!a.contains("flammable"));
        assert!(a.contains("slippery"));
    }

    #[test]
    fn cold_and_dark_readings_add_affordances() {
        let cat = catalog();
        let mut t = tile(TerrainType::Floor);
        t.environment = t
            .environment
            .with_temperature(-40.0)
            .unwrap()
            .with_light(0.05)
            .unwrap();
        let a = t.affordances(&cat, NONE);
        for tag in ["walkable", "freezing", "dark", "hideable"] {
            assert!(a.contains(tag), "missing {tag}");
        }
    }

    #[test]
    fn modifier_removals_win_over_additions() {
        let cat = catalog();
        let mut grass = tile(TerrainType::Grass);
        grass.add_modifier(cat.modifier("overgrown", 1.0).unwrap());
        assert!(grass.affordances(&cat, NONE).contains("hideable"));
        grass.add_modifier(cat.modifier("scorched", 1.0).unwrap());
        let a = grass.affordances(&cat, NONE);
        assert!(!a.contains("flammable"));
        assert!(a.contains("charred"));
    }

    #[test]
    fn occupants_contribute_and_block_affordances() {
        let cat = catalog();
        let t = tile(TerrainType::Floor);
        let chair = create_furniture("chair", "Chair", 1)
            .unwrap()
            .with_affordances(["sittable"]);
        let rug = create_item("rug", "Rug")
            .unwrap()
            .with_blocked_affordances(["walkable"]);
        let a = t.affordances(&cat, [&chair, &rug]);
        assert!(a.contains("sittable"));
        assert!(!a.contains("walkable"));
    }

    #[test]
    fn affordances_are_pure() {
        let cat = catalog();
        let mut t = tile(TerrainType::Ice);
        t.add_modifier(cat.modifier("cracked", 0.5).unwrap());
        assert_eq!(t.affordances(&cat, NONE), t.affordances(&cat, NONE));
    }

    #[test]
    fn readding_modifier_replaces() {
        let cat = catalog();
        let mut t = tile(TerrainType::Soil);
        assert!(t.add_modifier(cat.modifier("wet", 0.3).unwrap()).is_none());
        let old = t.add_modifier(cat.modifier("wet", 0.8).unwrap());
        assert_eq!(old.map(|m| m.intensity()), Some(0.3));
        assert_eq!(t.modifiers().len(), 1);
        assert_eq!(t.modifier(&ModifierKind::Wet).unwrap().intensity(), 0.8);
    }

    #[test]
    fn stability_reduction_clamps_and_is_not_restored() {
        let cat = catalog();
        let mut t = tile(TerrainType::Floor);
        t.add_modifier(cat.modifier("collapsed", 1.0).unwrap());
        assert!((t.stability() - 0.5).abs() < 1e-6);
        t.add_modifier(cat.modifier("collapsed", 1.0).unwrap());
        t.add_modifier(cat.modifier("cracked", 1.0).unwrap());
        assert_eq!(t.stability(), 0.0);
        t.remove_modifier(&ModifierKind::Cracked);
        assert_eq!(t.stability(), 0.0);
    }

    #[test]
    fn movement_cost_formula() {
        let cat = catalog();
        let mut from = tile(TerrainType::Soil);
        from.set_height(1.0).unwrap();
        let mut to = tile(TerrainType::Sand);
        to.set_height(3.0).unwrap();
        to.environment = to
            .environment
            .with_moisture(0.8)
            .unwrap()
            .with_light(0.15)
            .unwrap();
        to.add_modifier(cat.modifier("mossy", 0.5).unwrap());

        // (1.5 + 0.5 * 2) * 1.5 * 1.2 * 1.05
        let expected = 2.5 * 1.5 * 1.2 * 1.05;
        let cost = to.movement_cost(&cat, Some(&from), None);
        assert!((cost - expected).abs() < 1e-4, "{cost} vs {expected}");

        let strider = create_item("strider", "Strider")
            .unwrap()
            .with_movement_modifier(TerrainType::Sand, 0.5);
        let cost = to.movement_cost(&cat, Some(&from), Some(&strider));
        assert!((cost - expected * 0.5).abs() < 1e-4);
    }

    #[test]
    fn impassable_cost_is_infinite() {
        let cat = catalog();
        assert_eq!(tile(TerrainType::Metal).movement_cost(&cat, None, None), f32::INFINITY);
    }

    #[test]
    fn layer_capacity_is_a_volume_sum() {
        let cat = catalog();
        let mut t = tile(TerrainType::Floor);
        let crate_a = create_item("a", "Crate").unwrap();
        let crate_b = create_furniture("b", "Chest", 2).unwrap().with_passable(true);
        let crate_c = create_furniture("c", "Trunk", 2).unwrap().with_passable(true);

        assert!(t.add_entity(&crate_a, &cat, NONE));
        assert!(t.add_entity(&crate_b, &cat, [&crate_a]));
        assert_eq!(
            t.check_placement(&crate_c, &cat, [&crate_a, &crate_b]),
            Err(PlacementRejection::LayerFull {
                layer: Layer::Object,
                needed: 5,
                max: MAX_LAYER_SIZE
            })
        );
        assert!(!t.add_entity(&crate_c, &cat, [&crate_a, &crate_b]));
        assert_eq!(t.entity_ids().len(), 2);
    }

    #[test]
    fn one_character_per_tile() {
        let cat = catalog();
        let mut t = tile(TerrainType::Floor);
        let alice = create_character("alice", "Alice").unwrap();
        let bob = create_character("bob", "Bob").unwrap();
        assert!(t.add_entity(&alice, &cat, NONE));
        assert!(matches!(
            t.check_placement(&bob, &cat, [&alice]),
            Err(PlacementRejection::CharacterPresent(_))
        ));
    }

    #[test]
    fn impassable_entities_do_not_share_a_layer() {
        let cat = catalog();
        let t = tile(TerrainType::Floor);
        let table = create_furniture("table", "Table", 1).unwrap();
        let desk = create_furniture("desk", "Desk", 1).unwrap();
        assert_eq!(
            t.check_placement(&desk, &cat, [&table]),
            Err(PlacementRejection::Blocked("table".into()))
        );
        let cup = create_item("cup", "Cup").unwrap();
        assert!(t.check_placement(&cup, &cat, [&table]).is_ok());
    }

    #[test]
    fn passability_requirement() {
        let cat = catalog();
        let mut wall = tile(TerrainType::Rock);
        let key = create_item("key", "Key").unwrap();
        assert_eq!(
            wall.check_placement(&key, &cat, NONE),
            Err(PlacementRejection::Impassable(wall.position()))
        );
        let torch = create_feature("torch", "Wall torch").unwrap();
        assert!(wall.add_entity(&torch, &cat, NONE));
        assert!(!wall.add_entity(&torch, &cat, [&torch]));
        assert!(wall.remove_entity(&torch.id));
        assert!(!wall.remove_entity(&torch.id));
    }

    #[test]
    fn features_are_a_set() {
        let mut t = tile(TerrainType::Floor);
        assert!(t.add_feature("fireplace"));
        assert!(!t.add_feature("fireplace"));
        assert!(t.remove_feature("fireplace"));
        assert!(t.feature_ids().is_empty());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut t = tile(TerrainType::Floor);
        assert!(t.set_stability(1.5).is_err());
        assert!(t.set_height(f32::NAN).is_err());
        assert!(t.validate().is_ok());
        let mut json = serde_json::to_value(&t).unwrap();
        json["stability"] = serde_json::json!(2.0);
        let bad: Tile = serde_json::from_value(json).unwrap();
        assert_eq!(bad.validate(), Err(TileError::StabilityOutOfRange(2.0)));
    }

    #[test]
    fn serde_keeps_occupants_and_modifiers() {
        let cat = catalog();
        let mut t = tile(TerrainType::Soil);
        t.add_modifier(cat.modifier("wet", 0.5).unwrap());
        let item = create_item("coin", "Coin").unwrap();
        assert!(t.add_entity(&item, &cat, NONE));
        t.opaque = Override::Overridden(true);
        let json = serde_json::to_string(&t).unwrap();
        let back: Tile = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
        assert_eq!(
            back.affordances(&cat, [&item]),
            affordance_set([
                "diggable",
                "plantable",
                "walkable",
                "slippery",
                "pickupable",
                "examinable",
            ])
        );
    }
}
