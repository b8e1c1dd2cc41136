// The tile grid: aggregate root of the world model.
//
// `TileGrid` owns three indices that must always agree:
//   - `tiles`: sparse `Position -> Tile` storage. A tile materializes the
//     first time it is requested mutably (`get_tile`) or mutated through a
//     grid method. Read-only queries go through `tile()`, which hands back
//     either the stored tile or an unmaterialized default without caching.
//   - `entities`: the registry, `EntityId -> Entity`. The only owner of
//     entity data.
//   - `entity_positions`: `EntityId -> Position`.
// Every occupant id on a tile is registered, and every registered entity is
// listed on exactly the tile its position says.
//
// Placement and movement validate completely before touching any index, so
// a rejected `add_entity` / `move_entity` leaves the grid exactly as it was
// (not even a tile is materialized). The `bool` entry points log the
// rejection at `debug`; the `try_` variants return it.
//
// Every mutator emits a `TileEvent` through the owned `EventBus`. Handler
// failures are counted in `GridStats::handler_failures` and otherwise
// ignored.
//
// Coordinates: `x` spans `width`, `y` spans `height`, `z` spans `depth`.
// All three are `[0, n)`.
//
// See also: `tile.rs` for per-tile derivation and placement rules,
// `pathfinding.rs` for the search algorithms wrapped by `find_path`,
// `snapshot.rs` for the serialized form.
//
// **Critical constraint: determinism.** All three indices are `BTreeMap`s so
// iteration order (entity listings, snapshots, tile scans) is stable.

use crate::config::{GridConfig, SearchLimits};
use crate::entity::Entity;
use crate::environment::TileEnvironment;
use crate::error::{GridError, HandlerError};
use crate::event::{EventBus, SubscriptionId, TileEvent, TileEventType};
use crate::pathfinding::{self, PathResult};
use crate::terrain::{ModifierKind, TerrainCatalog, TerrainModifier};
use crate::tile::{PlacementRejection, Tile};
use crate::types::{Affordances, EntityId, EntityType, Position, TerrainType};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use tracing::debug;

/// Running counters kept by the grid. Not part of snapshots.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridStats {
    pub placements: u64,
    pub removals: u64,
    pub moves: u64,
    pub rejections: u64,
    pub handler_failures: u64,
}

#[derive(Debug)]
pub struct TileGrid {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) depth: u32,
    pub(crate) default_terrain: TerrainType,
    pub(crate) config: GridConfig,
    pub(crate) tiles: BTreeMap<Position, Tile>,
    pub(crate) entities: BTreeMap<EntityId, Entity>,
    pub(crate) entity_positions: BTreeMap<EntityId, Position>,
    pub(crate) events: EventBus,
    pub(crate) stats: GridStats,
}

/// Resolve a tile's occupant ids against the registry.
fn occupants_of<'a>(entities: &'a BTreeMap<EntityId, Entity>, tile: &Tile) -> Vec<&'a Entity> {
    tile.entity_ids()
        .iter()
        .filter_map(|id| entities.get(id))
        .collect()
}

/// 3D Bresenham line from `from` to `to`, both endpoints included.
fn bresenham(from: Position, to: Position) -> Vec<Position> {
    let start: [i32; 3] = from.into();
    let end: [i32; 3] = to.into();
    let delta = [
        (end[0] - start[0]).abs(),
        (end[1] - start[1]).abs(),
        (end[2] - start[2]).abs(),
    ];
    let step = [
        (end[0] - start[0]).signum(),
        (end[1] - start[1]).signum(),
        (end[2] - start[2]).signum(),
    ];

    // Drive along the axis with the largest extent.
    let major = if delta[0] >= delta[1] && delta[0] >= delta[2] {
        0
    } else if delta[1] >= delta[2] {
        1
    } else {
        2
    };
    let (a, b) = match major {
        0 => (1, 2),
        1 => (0, 2),
        _ => (0, 1),
    };

    let mut point = start;
    let mut out = Vec::with_capacity(delta[major] as usize + 1);
    out.push(from);
    let mut err_a = 2 * delta[a] - delta[major];
    let mut err_b = 2 * delta[b] - delta[major];
    for _ in 0..delta[major] {
        point[major] += step[major];
        if err_a >= 0 {
            point[a] += step[a];
            err_a -= 2 * delta[major];
        }
        if err_b >= 0 {
            point[b] += step[b];
            err_b -= 2 * delta[major];
        }
        err_a += 2 * delta[a];
        err_b += 2 * delta[b];
        out.push(Position::from(point));
    }
    out
}

impl TileGrid {
    /// Create an empty grid with the default configuration.
    pub fn new(
        width: u32,
        height: u32,
        depth: u32,
        default_terrain: TerrainType,
    ) -> Result<Self, GridError> {
        Self::with_config(width, height, depth, default_terrain, GridConfig::default())
    }

    pub fn with_config(
        width: u32,
        height: u32,
        depth: u32,
        default_terrain: TerrainType,
        config: GridConfig,
    ) -> Result<Self, GridError> {
        let valid = |n: u32| n > 0 && n <= i32::MAX as u32;
        if !(valid(width) && valid(height) && valid(depth)) {
            return Err(GridError::InvalidDimensions {
                width,
                height,
                depth,
            });
        }
        debug!(width, height, depth, ?default_terrain, "grid created");
        Ok(Self {
            width,
            height,
            depth,
            default_terrain,
            events: EventBus::new(config.event_history_limit),
            config,
            tiles: BTreeMap::new(),
            entities: BTreeMap::new(),
            entity_positions: BTreeMap::new(),
            stats: GridStats::default(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn default_terrain(&self) -> TerrainType {
        self.default_terrain
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn catalog(&self) -> &TerrainCatalog {
        &self.config.catalog
    }

    pub fn stats(&self) -> GridStats {
        self.stats
    }

    pub fn contains(&self, pos: Position) -> bool {
        pos.x >= 0
            && pos.y >= 0
            && pos.z >= 0
            && (pos.x as u32) < self.width
            && (pos.y as u32) < self.height
            && (pos.z as u32) < self.depth
    }

    // -----------------------------------------------------------------------
    // Tile storage
    // -----------------------------------------------------------------------

    /// Caller guarantees `pos` is in bounds.
    fn materialize(&mut self, pos: Position) -> &mut Tile {
        let terrain = self.default_terrain;
        self.tiles
            .entry(pos)
            .or_insert_with(|| Tile::new(pos, terrain))
    }

    /// Mutable access to a tile, creating a default-terrain tile on first
    /// access. `None` outside the grid.
    pub fn get_tile(&mut self, pos: Position) -> Option<&mut Tile> {
        if !self.contains(pos) {
            return None;
        }
        Some(self.materialize(pos))
    }

    /// Read-only view of a tile. Unmaterialized positions yield a default
    /// tile that is not stored.
    pub fn tile(&self, pos: Position) -> Option<Cow<'_, Tile>> {
        if !self.contains(pos) {
            return None;
        }
        Some(match self.tiles.get(&pos) {
            Some(tile) => Cow::Borrowed(tile),
            None => Cow::Owned(Tile::new(pos, self.default_terrain)),
        })
    }

    /// Store `tile` at its own position. The tile's occupant list is
    /// replaced by whatever currently stands there. Returns false when the
    /// position is outside the grid.
    pub fn set_tile(&mut self, mut tile: Tile) -> bool {
        let pos = tile.position();
        if !self.contains(pos) {
            return false;
        }
        let occupants = self
            .tiles
            .get_mut(&pos)
            .map(Tile::take_entity_ids)
            .unwrap_or_default();
        tile.set_entity_ids(occupants);
        self.tiles.insert(pos, tile);
        true
    }

    /// Whether a tile has been materialized at `pos`.
    pub fn has_tile(&self, pos: Position) -> bool {
        self.tiles.contains_key(&pos)
    }

    /// Drop a materialized tile. Occupied tiles are kept; remove their
    /// entities first.
    pub fn remove_tile(&mut self, pos: Position) -> Option<Tile> {
        if self.tiles.get(&pos)?.is_occupied() {
            debug!(position = %pos, "refusing to remove occupied tile");
            return None;
        }
        self.tiles.remove(&pos)
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// Materialized tiles in position order.
    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.values()
    }

    // -----------------------------------------------------------------------
    // Spatial queries
    // -----------------------------------------------------------------------

    pub fn adjacent(&self, pos: Position, diagonal: bool, vertical: bool) -> Vec<Position> {
        pos.neighbors(diagonal, vertical)
            .into_iter()
            .filter(|&p| self.contains(p))
            .collect()
    }

    /// In-bounds positions within Euclidean `radius` of `center`.
    pub fn in_radius(&self, center: Position, radius: f32) -> Vec<Position> {
        if radius.is_nan() || radius < 0.0 {
            return Vec::new();
        }
        // Any two i32 coordinates are less than 2^32 apart, so the box is
        // computed in i64 with the radius capped there and clamped back.
        let r = radius.floor().min(4_294_967_296.0) as i64;
        let lo = |c: i32| (i64::from(c) - r).max(i64::from(i32::MIN)) as i32;
        let hi = |c: i32| (i64::from(c) + r).min(i64::from(i32::MAX)) as i32;
        let min = Position::new(lo(center.x), lo(center.y), lo(center.z));
        let max = Position::new(hi(center.x), hi(center.y), hi(center.z));
        self.in_rect(min, max)
            .into_iter()
            .filter(|&p| center.euclidean_distance(p) <= radius)
            .collect()
    }

    /// In-bounds positions in the inclusive box spanned by two corners.
    pub fn in_rect(&self, a: Position, b: Position) -> Vec<Position> {
        let clamp = |lo: i32, hi: i32, size: u32| (lo.max(0), hi.min(size as i32 - 1));
        let (x0, x1) = clamp(a.x.min(b.x), a.x.max(b.x), self.width);
        let (y0, y1) = clamp(a.y.min(b.y), a.y.max(b.y), self.height);
        let (z0, z1) = clamp(a.z.min(b.z), a.z.max(b.z), self.depth);

        let mut out = Vec::new();
        for x in x0..=x1 {
            for y in y0..=y1 {
                for z in z0..=z1 {
                    out.push(Position::new(x, y, z));
                }
            }
        }
        out
    }

    /// Bresenham line between two in-bounds positions (empty otherwise).
    /// With `stop_at_opaque`, the line ends at the first opaque tile strictly
    /// between the endpoints, which is included as the last element.
    pub fn line_of_sight(
        &self,
        from: Position,
        to: Position,
        stop_at_opaque: bool,
    ) -> Vec<Position> {
        if !self.contains(from) || !self.contains(to) {
            return Vec::new();
        }
        let line = bresenham(from, to);
        if !stop_at_opaque {
            return line;
        }
        let mut out = Vec::with_capacity(line.len());
        for p in line {
            out.push(p);
            if p != from && p != to && self.is_opaque(p) {
                break;
            }
        }
        out
    }

    /// Clear iff no tile strictly between the endpoints is opaque. The
    /// endpoints themselves may be opaque (looking at a wall).
    pub fn has_line_of_sight(&self, from: Position, to: Position) -> bool {
        if !self.contains(from) || !self.contains(to) {
            return false;
        }
        bresenham(from, to)
            .into_iter()
            .filter(|&p| p != from && p != to)
            .all(|p| !self.is_opaque(p))
    }

    // -----------------------------------------------------------------------
    // Derived per-position queries
    // -----------------------------------------------------------------------

    /// False outside the grid.
    pub fn is_passable(&self, pos: Position) -> bool {
        self.tile(pos)
            .is_some_and(|t| t.is_passable(&self.config.catalog))
    }

    /// True outside the grid: nothing is seen past the edge.
    pub fn is_opaque(&self, pos: Position) -> bool {
        self.tile(pos)
            .is_none_or(|t| t.is_opaque(&self.config.catalog))
    }

    /// Affordances at `pos` including its occupants. Empty outside the grid.
    pub fn affordances_at(&self, pos: Position) -> Affordances {
        match self.tile(pos) {
            Some(tile) => {
                tile.affordances(&self.config.catalog, occupants_of(&self.entities, &tile))
            }
            None => Affordances::new(),
        }
    }

    /// Cost of stepping from `from` to `to`, diagonal factor included.
    pub fn movement_cost_between(
        &self,
        from: Position,
        to: Position,
        entity: Option<&Entity>,
    ) -> f32 {
        match (self.tile(from), self.tile(to)) {
            (Some(a), Some(b)) => pathfinding::movement_cost(&self.config.catalog, &a, &b, entity),
            _ => f32::INFINITY,
        }
    }

    // -----------------------------------------------------------------------
    // Pathfinding
    // -----------------------------------------------------------------------

    /// A* from `start` to `goal` under the configured search budget, with
    /// `max_cost` (if given) replacing the configured cost cap.
    pub fn find_path(
        &self,
        start: Position,
        goal: Position,
        entity: Option<&Entity>,
        max_cost: Option<f32>,
    ) -> Option<PathResult> {
        let limits = self
            .config
            .search
            .with_max_cost(max_cost.or(self.config.search.max_cost));
        pathfinding::find_path_with_limits(self, start, goal, entity, &limits)
    }

    pub fn find_path_with_limits(
        &self,
        start: Position,
        goal: Position,
        entity: Option<&Entity>,
        limits: &SearchLimits,
    ) -> Option<PathResult> {
        pathfinding::find_path_with_limits(self, start, goal, entity, limits)
    }

    // -----------------------------------------------------------------------
    // Entities
    // -----------------------------------------------------------------------

    /// Check `entity` against the tile at `pos` without changing anything.
    fn placement_check(&self, entity: &Entity, pos: Position) -> Result<(), PlacementRejection> {
        let tile = self.tile(pos).ok_or(PlacementRejection::OutOfBounds(pos))?;
        tile.check_placement(entity, &self.config.catalog, occupants_of(&self.entities, &tile))
    }

    fn reject(&mut self, id: &EntityId, pos: Position, reason: &PlacementRejection) {
        self.stats.rejections += 1;
        debug!(entity = %id, position = %pos, %reason, "placement rejected");
    }

    /// Register `entity` and place it at `pos`.
    pub fn try_add_entity(
        &mut self,
        entity: Entity,
        pos: Position,
    ) -> Result<(), PlacementRejection> {
        let checked = entity
            .validate()
            .map_err(PlacementRejection::from)
            .and_then(|()| {
                if self.entities.contains_key(&entity.id) {
                    Err(PlacementRejection::Duplicate(entity.id.clone()))
                } else {
                    self.placement_check(&entity, pos)
                }
            });
        if let Err(reason) = checked {
            self.reject(&entity.id, pos, &reason);
            return Err(reason);
        }

        let id = entity.id.clone();
        self.materialize(pos).push_entity_id(id.clone());
        self.entity_positions.insert(id.clone(), pos);
        self.entities.insert(id.clone(), entity);
        self.stats.placements += 1;
        debug!(entity = %id, position = %pos, "entity placed");
        self.emit(TileEvent::new(TileEventType::EntityEntered, pos).with_cause(id));
        Ok(())
    }

    /// Register `entity` and place it at `pos`. False (and no change) if any
    /// placement rule fails.
    pub fn add_entity(&mut self, entity: Entity, pos: Position) -> bool {
        self.try_add_entity(entity, pos).is_ok()
    }

    /// Remove an entity from its tile and the registry.
    pub fn remove_entity(&mut self, id: &EntityId) -> Option<Entity> {
        let entity = self.entities.remove(id)?;
        let pos = self.entity_positions.remove(id);
        if let Some(tile) = pos.and_then(|p| self.tiles.get_mut(&p)) {
            tile.remove_entity(id);
        }
        self.stats.removals += 1;
        debug!(entity = %id, "entity removed");
        if let Some(pos) = pos {
            self.emit(TileEvent::new(TileEventType::EntityExited, pos).with_cause(id.clone()));
        }
        Some(entity)
    }

    /// Move a placed entity. The destination is fully validated before the
    /// source tile is touched. Moving onto the current position is a no-op.
    pub fn try_move_entity(
        &mut self,
        id: &EntityId,
        to: Position,
    ) -> Result<(), PlacementRejection> {
        let checked = match (self.entities.get(id), self.entity_positions.get(id)) {
            (Some(_), Some(&from)) if from == to => Ok(from),
            (Some(entity), Some(&from)) => self.placement_check(entity, to).map(|()| from),
            _ => Err(PlacementRejection::UnknownEntity(id.clone())),
        };
        let from = match checked {
            Ok(from) => from,
            Err(reason) => {
                self.reject(id, to, &reason);
                return Err(reason);
            }
        };
        if from == to {
            return Ok(());
        }

        if let Some(tile) = self.tiles.get_mut(&from) {
            tile.remove_entity(id);
        }
        self.materialize(to).push_entity_id(id.clone());
        self.entity_positions.insert(id.clone(), to);
        self.stats.moves += 1;
        debug!(entity = %id, from = %from, to = %to, "entity moved");

        self.emit(
            TileEvent::new(TileEventType::EntityExited, from)
                .with_cause(id.clone())
                .with_movement(from, to),
        );
        self.emit(
            TileEvent::new(TileEventType::EntityEntered, to)
                .with_cause(id.clone())
                .with_movement(from, to),
        );
        Ok(())
    }

    pub fn move_entity(&mut self, id: &EntityId, to: Position) -> bool {
        self.try_move_entity(id, to).is_ok()
    }

    pub fn entity(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn entity_position(&self, id: &EntityId) -> Option<Position> {
        self.entity_positions.get(id).copied()
    }

    /// Entities on the tile at `pos`, in placement order.
    pub fn entities_at(&self, pos: Position) -> Vec<&Entity> {
        match self.tiles.get(&pos) {
            Some(tile) => occupants_of(&self.entities, tile),
            None => Vec::new(),
        }
    }

    /// All registered entities in id order.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn find_entities_by_type(&self, entity_type: EntityType) -> Vec<&Entity> {
        self.entities
            .values()
            .filter(|e| e.entity_type == entity_type)
            .collect()
    }

    pub fn find_entities_with_affordance(&self, affordance: &str) -> Vec<&Entity> {
        self.entities
            .values()
            .filter(|e| e.has_affordance(affordance))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Terrain and environment mutation
    // -----------------------------------------------------------------------

    /// Change a tile's terrain. False outside the grid.
    pub fn set_terrain(&mut self, pos: Position, terrain: TerrainType) -> bool {
        let Some(tile) = self.get_tile(pos) else {
            return false;
        };
        let old = std::mem::replace(&mut tile.terrain_type, terrain);
        self.emit(
            TileEvent::new(TileEventType::TerrainChanged, pos)
                .with_data("old_terrain", serde_json::to_value(old).unwrap_or_default())
                .with_data("new_terrain", serde_json::to_value(terrain).unwrap_or_default()),
        );
        true
    }

    /// Apply a modifier, replacing any existing one of the same kind.
    pub fn add_modifier(&mut self, pos: Position, modifier: TerrainModifier) -> bool {
        let kind = modifier.kind().to_string();
        let intensity = modifier.intensity();
        let Some(tile) = self.get_tile(pos) else {
            return false;
        };
        let replaced = tile.add_modifier(modifier).is_some();
        self.emit(
            TileEvent::new(TileEventType::ModifierAdded, pos)
                .with_data("modifier", kind)
                .with_data("intensity", intensity)
                .with_data("replaced", replaced),
        );
        true
    }

    pub fn remove_modifier(
        &mut self,
        pos: Position,
        kind: &ModifierKind,
    ) -> Option<TerrainModifier> {
        let removed = self.tiles.get_mut(&pos)?.remove_modifier(kind)?;
        self.emit(
            TileEvent::new(TileEventType::ModifierRemoved, pos).with_data("modifier", kind.name()),
        );
        Some(removed)
    }

    pub fn set_environment(&mut self, pos: Position, environment: TileEnvironment) -> bool {
        let Some(tile) = self.get_tile(pos) else {
            return false;
        };
        tile.environment = environment;
        self.emit(TileEvent::new(TileEventType::EnvironmentChanged, pos));
        true
    }

    /// Reduce a tile's stability by `amount`. A tile driven to zero stability
    /// collapses (gains the `collapsed` modifier) if it has not already.
    /// Returns the new stability, or `None` outside the grid.
    pub fn damage_tile(
        &mut self,
        pos: Position,
        amount: f32,
        damage_type: &str,
        cause: Option<EntityId>,
    ) -> Option<f32> {
        let collapse_modifier = self.config.catalog.modifier("collapsed", 1.0);
        let tile = self.get_tile(pos)?;
        let stability = tile.reduce_stability(amount);
        let collapsing = stability <= 0.0 && !tile.has_modifier(&ModifierKind::Collapsed);
        let collapsed = match collapse_modifier {
            Ok(m) if collapsing => {
                tile.add_modifier(m);
                true
            }
            Err(err) if collapsing => {
                debug!(position = %pos, %err, "catalog has no collapse modifier");
                false
            }
            _ => false,
        };

        let mut event = TileEvent::new(TileEventType::TileDamaged, pos)
            .with_damage(amount, damage_type)
            .with_data("stability", stability);
        if let Some(cause) = &cause {
            event = event.with_cause(cause.clone());
        }
        self.emit(event);

        if collapsed {
            let mut event = TileEvent::new(TileEventType::ModifierAdded, pos)
                .with_data("modifier", ModifierKind::Collapsed.name())
                .with_data("intensity", 1.0)
                .with_data("replaced", false);
            if let Some(cause) = cause {
                event = event.with_cause(cause);
            }
            self.emit(event);
        }
        Some(stability)
    }

    /// Emit a `Triggered` event at `pos` (pressure plates, levers, scripted
    /// narrative hooks). False outside the grid.
    pub fn trigger(
        &mut self,
        pos: Position,
        cause: Option<EntityId>,
        data: serde_json::Map<String, serde_json::Value>,
    ) -> bool {
        if !self.contains(pos) {
            return false;
        }
        let mut event = TileEvent::new(TileEventType::Triggered, pos);
        event.cause = cause;
        event.data = data;
        self.emit(event);
        true
    }

    // -----------------------------------------------------------------------
    // Events and clock
    // -----------------------------------------------------------------------

    fn emit(&mut self, event: TileEvent) {
        let report = self.events.emit(event);
        self.stats.handler_failures += report.failures.len() as u64;
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    pub fn subscribe<F>(&mut self, event_type: TileEventType, handler: F) -> SubscriptionId
    where
        F: FnMut(&TileEvent) -> Result<(), HandlerError> + Send + 'static,
    {
        self.events.subscribe(event_type, handler)
    }

    pub fn subscribe_all<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&TileEvent) -> Result<(), HandlerError> + Send + 'static,
    {
        self.events.subscribe_all(handler)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    pub fn tick(&self) -> u64 {
        self.events.tick()
    }

    pub fn set_tick(&mut self, tick: u64) {
        self.events.set_tick(tick);
    }

    pub fn advance_tick(&mut self, ticks: u64) -> u64 {
        self.events.advance(ticks)
    }
}
