// Data-driven grid configuration.
//
// Every tunable the grid reads lives in `GridConfig`: the event history
// size, the default pathfinding budget, and the terrain catalog (terrain
// defaults, modifier templates and environment thresholds). The grid never
// hard-codes these; a host can ship a JSON file, and tests build catalogs
// with the `TerrainCatalog::with_*` builders.
//
// All fields fall back to their defaults when absent from the JSON, so a
// config file only needs to name what it changes.
//
// See also: `grid.rs` which owns the `GridConfig`, `terrain.rs` for the
// catalog, `pathfinding.rs` which consumes `SearchLimits`.

use crate::event::DEFAULT_HISTORY_LIMIT;
use crate::terrain::TerrainCatalog;
use serde::{Deserialize, Serialize};

/// Budget for a single A* search.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchLimits {
    /// Nodes whose accumulated cost exceeds this are never expanded.
    pub max_cost: Option<f32>,
    /// Maximum number of nodes popped from the open set before giving up.
    pub max_expansions: Option<usize>,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            max_cost: None,
            max_expansions: Some(100_000),
        }
    }
}

impl SearchLimits {
    /// No budget at all. Searches run until the open set is exhausted.
    pub const UNBOUNDED: Self = Self {
        max_cost: None,
        max_expansions: None,
    };

    #[must_use]
    pub fn with_max_cost(mut self, max_cost: Option<f32>) -> Self {
        self.max_cost = max_cost;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Events retained by the bus.
    pub event_history_limit: usize,
    /// Budget used by `TileGrid::find_path`.
    pub search: SearchLimits,
    pub catalog: TerrainCatalog,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            event_history_limit: DEFAULT_HISTORY_LIMIT,
            search: SearchLimits::default(),
            catalog: TerrainCatalog::standard(),
        }
    }
}

impl GridConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
