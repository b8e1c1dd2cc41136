// tileworld_sim: tile-grid world model library.
//
// This crate holds the spatial model of a tile-based world: a bounded 3D
// grid of tiles, each with terrain, modifiers, environment readings and the
// entities standing on it. Rendering, input, AI and turn orchestration live
// in the host; this crate only answers questions about the world and applies
// the mutations it is asked to.
//
// Module overview:
// - `types.rs`:       Position, EntityId, Layer, EntityType, TerrainType, affordance sets.
// - `error.rs`:       Error enums for every fallible constructor and loader.
// - `terrain.rs`:     TerrainCatalog: per-terrain defaults, modifier templates, environment rules.
// - `environment.rs`: TileEnvironment: fluid, temperature, sound, light, moisture.
// - `entity.rs`:      Entity record, validation, and the factory helpers.
// - `tile.rs`:        Tile: derived passability/opacity/affordances/cost and placement rules.
// - `event.rs`:       EventBus: typed subscriptions, bounded history, logical clock.
// - `config.rs`:      GridConfig + SearchLimits: all tunables, loadable from JSON.
// - `grid.rs`:        TileGrid: sparse tile storage, entity index, spatial queries, mutators.
// - `snapshot.rs`:    GridSnapshot: JSON (de)serialization with consistency checks.
// - `pathfinding.rs`: A*, line of sight, flood fill, reachable tiles, path cost.
//
// **Critical constraint: determinism.** Every query is a pure function of
// the grid's contents. Ordered collections are `BTreeMap`/`BTreeSet`; hash
// maps appear only as internal lookup tables that are never iterated. Event
// timestamps come from the grid's logical tick, never from system time.

pub mod config;
pub mod entity;
pub mod environment;
pub mod error;
pub mod event;
pub mod grid;
pub mod pathfinding;
pub mod snapshot;
pub mod terrain;
pub mod tile;
pub mod types;

pub use config::{GridConfig, SearchLimits};
pub use entity::Entity;
pub use error::GridError;
pub use event::{EventBus, TileEvent, TileEventType};
pub use grid::TileGrid;
pub use pathfinding::PathResult;
pub use terrain::TerrainCatalog;
pub use tile::Tile;
pub use types::{EntityId, Position, TerrainType};
