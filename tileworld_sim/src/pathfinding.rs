// Pathfinding and visibility over a `TileGrid`.
//
// All functions here are stateless computations over `&TileGrid`:
//   - `movement_cost`: the step cost model shared with `TileGrid`.
//   - `find_path` / `find_path_with_limits`: A* over the 8-connected plane
//     of the start position.
//   - `line_of_sight` / `has_line_of_sight`: thin wrappers over the grid's
//     Bresenham implementation.
//   - `flood_fill`: bounded 4-connected BFS.
//   - `reachable_tiles`: Dijkstra under a movement budget, for "where can I
//     get to this turn" queries with no single target.
//   - `path_cost`: re-cost an existing path.
//
// A* uses a `BinaryHeap` open set (min-heap via reversed ordering), with
// `f32::total_cmp` for scores and an insertion sequence number as the tie
// break, so equal-f nodes pop first-in-first-out. Only the optimal total
// cost is guaranteed; which of several equal-cost paths comes back is not.
//
// The heuristic is 2D Euclidean distance scaled by the cheapest possible
// step on the grid (capped at 1.0), so it never overestimates, whatever the
// catalog, modifiers, environment rules or entity multipliers. Height
// differences only ever add cost and are left out of the heuristic.
//
// Diagonal steps cost `SQRT_2` times the destination tile's cost. Corner
// cutting between two impassable orthogonal neighbors is allowed.
//
// See also: `tile.rs` for the per-tile cost, `grid.rs` which wraps
// `find_path` with the configured `SearchLimits`.
//
// **Critical constraint: determinism.** Results are a pure function of the
// grid. Neighbor order is fixed (`CARDINAL_OFFSETS` then
// `DIAGONAL_OFFSETS`), and hash maps are only used for lookups, never
// iterated.

use crate::config::SearchLimits;
use crate::entity::Entity;
use crate::grid::TileGrid;
use crate::terrain::TerrainCatalog;
use crate::tile::Tile;
use crate::types::{CARDINAL_OFFSETS, DIAGONAL_OFFSETS, Position, TerrainType};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, VecDeque};
use std::f32::consts::SQRT_2;
use tracing::trace;

/// The result of a successful A* search.
#[derive(Clone, Debug, PartialEq)]
pub struct PathResult {
    /// Positions from start to goal, both inclusive.
    pub positions: Vec<Position>,
    pub total_cost: f32,
    /// Nodes expanded (popped and closed) during the search.
    pub expansions: usize,
}

/// Entry in the open set (min-heap via reversed ordering).
struct OpenEntry {
    pos: Position,
    score: f32,
    sequence: u64,
}

impl PartialEq for OpenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OpenEntry {}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: smallest score, then earliest insertion, is "greatest".
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Planar 8-connected neighbors, cardinals first.
fn planar_neighbors(pos: Position) -> impl Iterator<Item = Position> {
    CARDINAL_OFFSETS
        .into_iter()
        .chain(DIAGONAL_OFFSETS)
        .map(move |(dx, dy)| Position::new(pos.x + dx, pos.y + dy, pos.z))
}

/// Cost of stepping from `from` onto `to`. Infinite if `to` is impassable.
pub fn movement_cost(
    catalog: &TerrainCatalog,
    from: &Tile,
    to: &Tile,
    entity: Option<&Entity>,
) -> f32 {
    let cost = to.movement_cost(catalog, Some(from), entity);
    if from.position().is_diagonal_step(to.position()) {
        cost * SQRT_2
    } else {
        cost
    }
}

/// Lower bound on the cost of a single orthogonal step anywhere on `grid`.
///
/// Every factor of `Tile::movement_cost` that can go below 1.0 contributes
/// its smallest possible value: the cheapest passable base cost, the
/// environment multipliers, the cheapest modifier stack on any materialized
/// tile, and the entity's smallest terrain multiplier.
fn heuristic_scale(grid: &TileGrid, entity: Option<&Entity>) -> f32 {
    let catalog = grid.catalog();
    let rules = catalog.rules();
    let cheapest_terrain = TerrainType::ALL
        .into_iter()
        .map(|t| catalog.default_properties(t))
        .filter(|p| p.passable)
        .map(|p| p.base_cost)
        .fold(rules.forced_passage_cost, f32::min);
    let environment = rules.wet_cost_multiplier.min(1.0) * rules.dim_cost_multiplier.min(1.0);
    let cheapest_modifiers = grid
        .tiles()
        .map(|tile| {
            tile.modifiers()
                .iter()
                .map(|m| m.effective_cost_multiplier().min(1.0))
                .product::<f32>()
        })
        .fold(1.0, f32::min);
    let entity_factor = entity.map_or(1.0, Entity::min_movement_multiplier);
    let scale = cheapest_terrain * environment * cheapest_modifiers * entity_factor;
    if scale.is_nan() { 0.0 } else { scale.clamp(0.0, 1.0) }
}

/// A* with the grid's configured budget and an optional cost cap.
pub fn find_path(
    grid: &TileGrid,
    start: Position,
    goal: Position,
    entity: Option<&Entity>,
    max_cost: Option<f32>,
) -> Option<PathResult> {
    grid.find_path(start, goal, entity, max_cost)
}

/// A* from `start` to `goal` within the plane `start.z`.
///
/// Returns `None` when either endpoint is out of bounds, the endpoints lie
/// on different planes, the goal is impassable, no path exists, or the
/// search exceeds `limits`.
pub fn find_path_with_limits(
    grid: &TileGrid,
    start: Position,
    goal: Position,
    entity: Option<&Entity>,
    limits: &SearchLimits,
) -> Option<PathResult> {
    if !grid.contains(start) || start.z != goal.z {
        return None;
    }
    let catalog = grid.catalog();
    if !grid.tile(goal)?.is_passable(catalog) {
        return None;
    }
    if start == goal {
        return Some(PathResult {
            positions: vec![start],
            total_cost: 0.0,
            expansions: 0,
        });
    }

    let scale = heuristic_scale(grid, entity);
    let heuristic = |p: Position| p.euclidean_distance_2d(goal) * scale;

    let mut g_score: FxHashMap<Position, f32> = FxHashMap::default();
    let mut came_from: FxHashMap<Position, Position> = FxHashMap::default();
    let mut closed: FxHashSet<Position> = FxHashSet::default();
    let mut open = BinaryHeap::new();
    let mut sequence = 0u64;
    let mut expansions = 0usize;

    g_score.insert(start, 0.0);
    open.push(OpenEntry {
        pos: start,
        score: heuristic(start),
        sequence,
    });

    while let Some(current) = open.pop() {
        if closed.contains(&current.pos) {
            continue;
        }
        let Some(&current_g) = g_score.get(&current.pos) else {
            continue;
        };
        if current.pos == goal {
            trace!(%start, %goal, cost = current_g, expansions, "path found");
            return Some(PathResult {
                positions: reconstruct_path(&came_from, start, goal),
                total_cost: current_g,
                expansions,
            });
        }

        closed.insert(current.pos);
        expansions += 1;
        if limits.max_expansions.is_some_and(|max| expansions > max) {
            trace!(%start, %goal, expansions, "search budget exhausted");
            return None;
        }

        let Some(current_tile) = grid.tile(current.pos) else {
            continue;
        };
        for next in planar_neighbors(current.pos) {
            if closed.contains(&next) {
                continue;
            }
            let Some(next_tile) = grid.tile(next) else {
                continue;
            };
            let step = movement_cost(catalog, &current_tile, &next_tile, entity);
            if !step.is_finite() {
                continue;
            }
            let tentative = current_g + step;
            if limits.max_cost.is_some_and(|max| tentative > max) {
                continue;
            }
            if tentative < g_score.get(&next).copied().unwrap_or(f32::INFINITY) {
                g_score.insert(next, tentative);
                came_from.insert(next, current.pos);
                sequence += 1;
                open.push(OpenEntry {
                    pos: next,
                    score: tentative + heuristic(next),
                    sequence,
                });
            }
        }
    }

    trace!(%start, %goal, expansions, "no path");
    None
}

fn reconstruct_path(
    came_from: &FxHashMap<Position, Position>,
    start: Position,
    goal: Position,
) -> Vec<Position> {
    let mut positions = vec![goal];
    let mut current = goal;
    while current != start {
        match came_from.get(&current) {
            Some(&prev) => {
                positions.push(prev);
                current = prev;
            }
            None => break,
        }
    }
    positions.reverse();
    positions
}

/// The Bresenham line from `from` to `to`. Unless `ignore_opacity` is set,
/// the line stops at the first opaque tile between the endpoints.
pub fn line_of_sight(
    grid: &TileGrid,
    from: Position,
    to: Position,
    ignore_opacity: bool,
) -> Vec<Position> {
    grid.line_of_sight(from, to, !ignore_opacity)
}

pub fn has_line_of_sight(grid: &TileGrid, from: Position, to: Position) -> bool {
    grid.has_line_of_sight(from, to)
}

/// 4-connected breadth-first region growth from `start` within its plane.
/// Stops at tiles failing `predicate` and after `max_tiles` results.
pub fn flood_fill<F>(
    grid: &TileGrid,
    start: Position,
    mut predicate: F,
    max_tiles: usize,
) -> Vec<Position>
where
    F: FnMut(Position, &Tile) -> bool,
{
    let mut region = Vec::new();
    if max_tiles == 0 || !grid.tile(start).is_some_and(|tile| predicate(start, &tile)) {
        return region;
    }

    let mut seen: FxHashSet<Position> = FxHashSet::default();
    let mut queue = VecDeque::new();
    seen.insert(start);
    queue.push_back(start);

    while let Some(pos) = queue.pop_front() {
        region.push(pos);
        if region.len() >= max_tiles {
            break;
        }
        for (dx, dy) in CARDINAL_OFFSETS {
            let next = Position::new(pos.x + dx, pos.y + dy, pos.z);
            if !seen.insert(next) {
                continue;
            }
            if grid.tile(next).is_some_and(|tile| predicate(next, &tile)) {
                queue.push_back(next);
            }
        }
    }
    region
}

/// Every position in the start's plane reachable within `max_movement`,
/// with its cheapest cost. The start is included at cost 0.
pub fn reachable_tiles(
    grid: &TileGrid,
    start: Position,
    max_movement: f32,
    entity: Option<&Entity>,
) -> BTreeMap<Position, f32> {
    let mut best: BTreeMap<Position, f32> = BTreeMap::new();
    if !grid.contains(start) || max_movement.is_nan() || max_movement < 0.0 {
        return best;
    }
    let catalog = grid.catalog();

    let mut open = BinaryHeap::new();
    let mut sequence = 0u64;
    best.insert(start, 0.0);
    open.push(OpenEntry {
        pos: start,
        score: 0.0,
        sequence,
    });

    while let Some(current) = open.pop() {
        if best.get(&current.pos).is_some_and(|&c| current.score > c) {
            continue;
        }
        let Some(current_tile) = grid.tile(current.pos) else {
            continue;
        };
        for next in planar_neighbors(current.pos) {
            let Some(next_tile) = grid.tile(next) else {
                continue;
            };
            let cost = current.score + movement_cost(catalog, &current_tile, &next_tile, entity);
            if cost.is_nan() || cost > max_movement {
                continue;
            }
            if cost < best.get(&next).copied().unwrap_or(f32::INFINITY) {
                best.insert(next, cost);
                sequence += 1;
                open.push(OpenEntry {
                    pos: next,
                    score: cost,
                    sequence,
                });
            }
        }
    }
    best
}

/// Sum of step costs along `path`. Infinite if any step is impassable, out
/// of bounds, or not between planar neighbors on the same level; zero for
/// paths of fewer than two positions.
pub fn path_cost(grid: &TileGrid, path: &[Position], entity: Option<&Entity>) -> f32 {
    path.windows(2)
        .map(|pair| {
            if pair[0].z == pair[1].z && pair[0].is_adjacent(pair[1], true) {
                grid.movement_cost_between(pair[0], pair[1], entity)
            } else {
                f32::INFINITY
            }
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GridConfig;
    use crate::entity::create_creature;
    use crate::environment::TileEnvironment;
    use crate::terrain::{EnvironmentRules, ModifierOverrides};
    use crate::types::affordance_set;

    fn open_grid(size: u32) -> TileGrid {
        TileGrid::new(size, size, 1, TerrainType::Floor).unwrap()
    }

    fn p(x: i32, y: i32) -> Position {
        Position::new(x, y, 0)
    }

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn trivial_path() {
        let g = open_grid(5);
        let path = find_path(&g, p(2, 2), p(2, 2), None, None).unwrap();
        assert_eq!(path.positions, vec![p(2, 2)]);
        assert_eq!(path.total_cost, 0.0);
    }

    #[test]
    fn straight_and_diagonal_paths_are_optimal() {
        let g = open_grid(10);
        let straight = find_path(&g, p(0, 0), p(5, 0), None, None).unwrap();
        assert!(approx(straight.total_cost, 5.0));
        assert_eq!(straight.positions.len(), 6);

        let diagonal = find_path(&g, p(0, 0), p(3, 3), None, None).unwrap();
        assert!(approx(diagonal.total_cost, 3.0 * SQRT_2));
        assert_eq!(diagonal.positions.len(), 4);

        let mixed = find_path(&g, p(0, 0), p(5, 2), None, None).unwrap();
        assert!(approx(mixed.total_cost, 2.0 * SQRT_2 + 3.0));
        assert_eq!(mixed.positions.first(), Some(&p(0, 0)));
        assert_eq!(mixed.positions.last(), Some(&p(5, 2)));
        for pair in mixed.positions.windows(2) {
            assert!(pair[0].is_adjacent(pair[1], true));
        }
    }

    #[test]
    fn returned_cost_matches_path_cost() {
        let mut g = open_grid(10);
        g.set_terrain(p(3, 3), TerrainType::Sand);
        g.set_terrain(p(4, 4), TerrainType::Water);
        g.get_tile(p(5, 5)).unwrap().set_height(2.0).unwrap();
        let path = find_path(&g, p(0, 0), p(9, 9), None, None).unwrap();
        assert!(approx(path.total_cost, path_cost(&g, &path.positions, None)));
    }

    #[test]
    fn enclosed_goal_has_no_path() {
        let mut g = open_grid(10);
        for pos in g.adjacent(p(5, 5), true, false) {
            g.set_terrain(pos, TerrainType::Rock);
        }
        assert!(find_path(&g, p(0, 0), p(5, 5), None, None).is_none());
    }

    #[test]
    fn unreachable_endpoints() {
        let mut g = open_grid(10);
        g.set_terrain(p(9, 9), TerrainType::Metal);
        assert!(find_path(&g, p(0, 0), p(9, 9), None, None).is_none());
        assert!(find_path(&g, p(0, 0), p(10, 9), None, None).is_none());
        assert!(find_path(&g, p(-1, 0), p(3, 3), None, None).is_none());

        let tall = TileGrid::new(5, 5, 2, TerrainType::Floor).unwrap();
        assert!(find_path(&tall, p(0, 0), Position::new(0, 0, 1), None, None).is_none());
    }

    #[test]
    fn max_cost_prunes() {
        let g = open_grid(10);
        assert!(find_path(&g, p(0, 0), p(5, 0), None, Some(4.0)).is_none());
        assert!(find_path(&g, p(0, 0), p(5, 0), None, Some(5.0)).is_some());
    }

    #[test]
    fn expansion_budget_stops_search() {
        let g = open_grid(30);
        let tight = SearchLimits {
            max_cost: None,
            max_expansions: Some(3),
        };
        assert!(find_path_with_limits(&g, p(0, 0), p(29, 29), None, &tight).is_none());
        let path =
            find_path_with_limits(&g, p(0, 0), p(29, 29), None, &SearchLimits::UNBOUNDED).unwrap();
        assert!(path.expansions >= 29);
    }

    #[test]
    fn entity_multiplier_lowers_water_cost() {
        let mut g = open_grid(10);
        for x in 0..10 {
            for y in 0..10 {
                g.set_terrain(p(x, y), TerrainType::Water);
            }
        }
        let otter = create_creature("otter", "Otter")
            .unwrap()
            .with_movement_modifier(TerrainType::Water, 0.5);
        let plain = create_creature("dog", "Dog").unwrap();
        let swim = find_path(&g, p(0, 0), p(9, 0), Some(&otter), None).unwrap();
        let wade = find_path(&g, p(0, 0), p(9, 0), Some(&plain), None).unwrap();
        assert!(swim.total_cost < wade.total_cost);
        assert!(approx(swim.total_cost, 9.0));
        assert!(approx(wade.total_cost, 18.0));
    }

    #[test]
    fn cheap_entities_still_get_optimal_paths() {
        let mut g = open_grid(12);
        for y in 0..11 {
            g.set_terrain(p(6, y), TerrainType::Rock);
        }
        let glider = create_creature("glider", "Glider")
            .unwrap()
            .with_movement_modifier(TerrainType::Floor, 0.25);
        let path = find_path(&g, p(0, 0), p(11, 0), Some(&glider), None).unwrap();
        assert!(approx(path.total_cost, path_cost(&g, &path.positions, Some(&glider))));
        assert!(path.positions.iter().all(|q| g.is_passable(*q)));
    }

    /// A 12x6 floor grid whose goal is straight along y=0 but whose cheapest
    /// route detours through a fast row at y=3.
    fn detour_grid(config: GridConfig) -> TileGrid {
        TileGrid::with_config(12, 6, 1, TerrainType::Floor, config).unwrap()
    }

    #[test]
    fn cheap_modifiers_keep_the_heuristic_admissible() {
        let mut g = detour_grid(GridConfig::default());
        let paved = g
            .catalog()
            .create_modifier(
                "paved",
                ModifierOverrides {
                    adds: Some(affordance_set(["paved"])),
                    cost_multiplier: Some(0.1),
                    ..ModifierOverrides::default()
                },
            )
            .unwrap();
        for x in 0..12 {
            assert!(g.add_modifier(p(x, 3), paved.clone()));
        }

        let path = find_path(&g, p(0, 0), p(11, 0), None, None).unwrap();
        let best = reachable_tiles(&g, p(0, 0), 100.0, None)[&p(11, 0)];
        assert!(best < 8.0);
        assert!(approx(path.total_cost, best));
        assert!(path.positions.iter().any(|q| q.y == 3));
    }

    #[test]
    fn cheap_environment_rules_keep_the_heuristic_admissible() {
        let rules = EnvironmentRules {
            wet_cost_multiplier: 0.5,
            ..EnvironmentRules::default()
        };
        let config = GridConfig {
            catalog: TerrainCatalog::standard().with_rules(rules),
            ..GridConfig::default()
        };
        let mut g = detour_grid(config);
        let soaked = TileEnvironment::default().with_moisture(0.9).unwrap();
        for x in 0..12 {
            assert!(g.set_environment(p(x, 3), soaked));
        }

        let path = find_path(&g, p(0, 0), p(11, 0), None, None).unwrap();
        let best = reachable_tiles(&g, p(0, 0), 100.0, None)[&p(11, 0)];
        assert!(best < 11.0);
        assert!(approx(path.total_cost, best));
    }

    #[test]
    fn diagonal_movement_cost() {
        let g = open_grid(5);
        let a = g.tile(p(1, 1)).unwrap();
        let b = g.tile(p(2, 2)).unwrap();
        let c = g.tile(p(2, 1)).unwrap();
        assert!(approx(movement_cost(g.catalog(), &a, &b, None), SQRT_2));
        assert!(approx(movement_cost(g.catalog(), &a, &c, None), 1.0));
        assert!(approx(g.movement_cost_between(p(1, 1), p(2, 2), None), SQRT_2));
    }

    #[test]
    fn path_cost_edge_cases() {
        let mut g = open_grid(5);
        assert_eq!(path_cost(&g, &[], None), 0.0);
        assert_eq!(path_cost(&g, &[p(1, 1)], None), 0.0);
        assert!(approx(path_cost(&g, &[p(0, 0), p(1, 0), p(2, 1)], None), 1.0 + SQRT_2));

        g.set_terrain(p(2, 0), TerrainType::Rock);
        assert_eq!(path_cost(&g, &[p(0, 0), p(1, 0), p(2, 0), p(3, 0)], None), f32::INFINITY);
        assert_eq!(path_cost(&g, &[p(0, 0), p(3, 3)], None), f32::INFINITY);
    }

    #[test]
    fn path_cost_rejects_level_changes() {
        let g = TileGrid::new(4, 4, 2, TerrainType::Floor).unwrap();
        let up = Position::new(1, 1, 1);
        assert!(path_cost(&g, &[p(1, 1), up], None).is_infinite());
        assert!(path_cost(&g, &[p(1, 1), Position::new(2, 2, 1)], None).is_infinite());
        assert!(approx(path_cost(&g, &[up, Position::new(2, 1, 1)], None), 1.0));
    }

    #[test]
    fn reachable_tiles_respects_budget() {
        let g = open_grid(9);
        let zero = reachable_tiles(&g, p(4, 4), 0.0, None);
        assert_eq!(zero.len(), 1);
        assert_eq!(zero[&p(4, 4)], 0.0);

        let one = reachable_tiles(&g, p(4, 4), 1.0, None);
        assert_eq!(one.len(), 5);

        let two = reachable_tiles(&g, p(4, 4), 2.0, None);
        assert!(approx(two[&p(5, 5)], SQRT_2));
        assert!(!two.contains_key(&p(6, 6)));
        assert_eq!(two[&p(6, 4)], 2.0);
        assert!(two.values().all(|&c| c <= 2.0));

        assert!(reachable_tiles(&g, p(40, 4), 3.0, None).is_empty());
        assert!(reachable_tiles(&g, p(4, 4), -1.0, None).is_empty());
    }

    #[test]
    fn reachable_tiles_stop_at_walls() {
        let mut g = open_grid(5);
        for y in 0..5 {
            g.set_terrain(p(2, y), TerrainType::Rock);
        }
        let reach = reachable_tiles(&g, p(0, 0), 100.0, None);
        assert_eq!(reach.len(), 10);
        assert!(reach.keys().all(|q| q.x < 2));
    }

    #[test]
    fn flood_fill_is_bounded() {
        let mut g = open_grid(6);
        for y in 0..6 {
            g.set_terrain(p(3, y), TerrainType::Rock);
        }
        let catalog = g.catalog().clone();
        let left = flood_fill(&g, p(0, 0), |_, t| t.is_passable(&catalog), 100);
        assert_eq!(left.len(), 18);
        assert_eq!(left[0], p(0, 0));

        let capped = flood_fill(&g, p(0, 0), |_, t| t.is_passable(&catalog), 5);
        assert_eq!(capped.len(), 5);

        assert!(flood_fill(&g, p(3, 0), |_, t| t.is_passable(&catalog), 100).is_empty());
        assert_eq!(flood_fill(&g, p(0, 0), |pos, _| pos.x == 0, 100).len(), 6);
    }

    #[test]
    fn line_of_sight_wrappers() {
        let mut g = open_grid(8);
        g.set_terrain(p(3, 0), TerrainType::Rock);
        assert!(!has_line_of_sight(&g, p(0, 0), p(6, 0)));
        assert_eq!(line_of_sight(&g, p(0, 0), p(6, 0), true).len(), 7);
        assert_eq!(line_of_sight(&g, p(0, 0), p(6, 0), false).last(), Some(&p(3, 0)));
    }

    #[test]
    fn search_is_deterministic() {
        let mut g = open_grid(12);
        g.set_terrain(p(5, 5), TerrainType::Rock);
        g.set_terrain(p(5, 6), TerrainType::Rock);
        let a = find_path(&g, p(0, 5), p(11, 6), None, None).unwrap();
        let b = find_path(&g, p(0, 5), p(11, 6), None, None).unwrap();
        assert_eq!(a, b);
    }
}
