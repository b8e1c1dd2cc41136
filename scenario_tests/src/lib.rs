// Test-only harness for end-to-end tile-world scenarios.
//
// Wraps a real `TileGrid` with an event recorder and a few painting helpers
// so scenario tests read as "build the map, act, check what happened". All
// queries and mutations go through the same `TileGrid` API a host would use;
// the only test-specific code here is map construction and event capture.
//
// See also: `tests/scenarios.rs` for the scenarios themselves.

use std::sync::{Arc, Mutex, Once};

use tileworld_sim::entity::Entity;
use tileworld_sim::event::{SubscriptionId, TileEvent, TileEventType};
use tileworld_sim::grid::TileGrid;
use tileworld_sim::types::{Position, TerrainType};
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Install a fmt subscriber once per test binary. Output is governed by
/// `RUST_LOG` and captured by the test harness.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .compact()
            .try_init();
    });
}

/// A grid plus every event it has emitted since construction.
pub struct Scenario {
    pub grid: TileGrid,
    events: Arc<Mutex<Vec<TileEvent>>>,
    recorder: SubscriptionId,
}

impl Scenario {
    /// A single-level `width` x `height` grid of `terrain`.
    pub fn flat(width: u32, height: u32, terrain: TerrainType) -> Self {
        Self::new(TileGrid::new(width, height, 1, terrain).expect("valid dimensions"))
    }

    pub fn new(mut grid: TileGrid) -> Self {
        init_tracing();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let recorder = grid.subscribe_all(move |event| {
            sink.lock().expect("event log poisoned").push(event.clone());
            Ok(())
        });
        Self {
            grid,
            events,
            recorder,
        }
    }

    /// Set every tile in the inclusive rectangle spanned by `a` and `b` (in
    /// the plane `a.z`) to `terrain`.
    pub fn paint(&mut self, a: Position, b: Position, terrain: TerrainType) {
        for pos in self.grid.in_rect(a, Position::new(b.x, b.y, a.z)) {
            self.grid.set_terrain(pos, terrain);
        }
    }

    /// Place an entity, panicking with the rejection if placement fails.
    pub fn place(&mut self, entity: Entity, pos: Position) {
        let id = entity.id.clone();
        if let Err(reason) = self.grid.try_add_entity(entity, pos) {
            panic!("could not place {id} at {pos}: {reason}");
        }
    }

    /// Snapshot of every recorded event, oldest first.
    pub fn events(&self) -> Vec<TileEvent> {
        self.events.lock().expect("event log poisoned").clone()
    }

    pub fn events_of(&self, event_type: TileEventType) -> Vec<TileEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }

    pub fn clear_events(&self) {
        self.events.lock().expect("event log poisoned").clear();
    }

    /// Stop recording. Returns false if the recorder was already removed.
    pub fn stop_recording(&mut self) -> bool {
        self.grid.unsubscribe(self.recorder)
    }

    /// Render the plane `z` as one character per tile: `#` impassable, `~`
    /// passable water, `@` occupied, `.` everything else. Rows are `y`.
    pub fn render(&self, z: i32) -> String {
        let mut out = String::new();
        for y in 0..self.grid.height() as i32 {
            for x in 0..self.grid.width() as i32 {
                let pos = Position::new(x, y, z);
                let glyph = match self.grid.tile(pos) {
                    Some(tile) if !tile.is_passable(self.grid.catalog()) => '#',
                    Some(tile) if tile.is_occupied() => '@',
                    Some(tile) if tile.terrain_type == TerrainType::Water => '~',
                    _ => '.',
                };
                out.push(glyph);
            }
            out.push('\n');
        }
        out
    }
}
