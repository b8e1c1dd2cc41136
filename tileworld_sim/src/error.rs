// Error types for construction validation and snapshot loading.
//
// Only invalid *inputs* are errors here: out-of-range modifier intensity or
// environment readings, unknown modifier names, malformed entities, bad grid
// dimensions, and inconsistent snapshots. Ordinary negative outcomes (out of
// bounds, no path, placement rejected) are `Option`/`bool` returns on the
// operations themselves and never surface as these types.
//
// `HandlerError` is the exception: it is what an event subscriber returns,
// and the bus logs and collects it instead of passing it on.
//
// See also: `tile.rs` for `PlacementRejection`, the non-error reason a
// placement was refused; `event.rs` for `EmitReport`.

use crate::types::{EntityId, Position};
use thiserror::Error;

/// Invalid terrain modifier construction.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum TerrainError {
    #[error("unknown modifier type `{0}` (supply explicit affordance lists for custom modifiers)")]
    UnknownModifier(String),
    #[error("modifier intensity {0} is outside [0, 1]")]
    IntensityOutOfRange(f32),
    #[error("modifier movement cost multiplier {0} must be finite and positive")]
    InvalidCostMultiplier(f32),
    #[error("modifier stability reduction {0} is outside [0, 1]")]
    StabilityReductionOutOfRange(f32),
}

/// An environment reading outside its allowed range.
#[derive(Clone, Debug, PartialEq, Error)]
#[error("environment {field} = {value} is outside [{min}, {max}]")]
pub struct EnvironmentError {
    pub field: &'static str,
    pub value: f32,
    pub min: f32,
    pub max: f32,
}

/// Invalid entity construction.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum EntityError {
    #[error("entity id must not be empty")]
    EmptyId,
    #[error("entity `{id}` has size {size}, expected 1..={max}")]
    InvalidSize { id: EntityId, size: u8, max: u8 },
    #[error("entity `{id}` has invalid movement multiplier {value}")]
    InvalidMovementMultiplier { id: EntityId, value: f32 },
}

/// Invalid tile field values.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum TileError {
    #[error("tile stability {0} is outside [0, 1]")]
    StabilityOutOfRange(f32),
    #[error("tile height {0} must be finite")]
    InvalidHeight(f32),
}

/// Failure reported by an event handler. Collected by the bus, never
/// propagated to the code that emitted the event.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Grid construction and snapshot-loading failures.
#[derive(Debug, Error)]
pub enum GridError {
    #[error("grid dimensions must be non-zero, got {width}x{height}x{depth}")]
    InvalidDimensions { width: u32, height: u32, depth: u32 },
    #[error("malformed tile key `{0}`")]
    InvalidTileKey(String),
    #[error("tile stored under `{key}` reports position {position}")]
    TileKeyMismatch { key: String, position: Position },
    #[error("tile at {0} lies outside the grid")]
    TileOutOfBounds(Position),
    #[error("entity stored under `{key}` has id `{id}`")]
    EntityKeyMismatch { key: EntityId, id: EntityId },
    #[error("entity `{0}` has no recorded position")]
    UnplacedEntity(EntityId),
    #[error("position recorded for unknown entity `{0}`")]
    UnknownEntity(EntityId),
    #[error("tile at {position} references unregistered entity `{id}`")]
    DanglingEntity { id: EntityId, position: Position },
    #[error("tile at {position} lists entity `{id}` more than once")]
    DuplicateOccupant { id: EntityId, position: Position },
    #[error("entity `{id}` is recorded at {position} but that tile does not list it")]
    OccupancyMismatch { id: EntityId, position: Position },
    #[error(transparent)]
    Tile(#[from] TileError),
    #[error(transparent)]
    Entity(#[from] EntityError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
