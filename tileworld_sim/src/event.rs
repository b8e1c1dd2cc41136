// Tile events and the publish/subscribe bus that delivers them.
//
// Grid mutators build a `TileEvent` and hand it to `EventBus::emit`. The bus
// stamps it with its logical clock, appends it to a bounded ring history,
// and calls every matching subscriber in subscription order. Subscribers
// either filter on one `TileEventType` or receive everything.
//
// Handler failures are isolated. A handler that returns `Err` or panics is
// logged at `warn`, recorded in the returned `EmitReport`, and dispatch
// carries on with the next handler. Nothing a handler does can abort the
// mutation that emitted the event.
//
// See also: `grid.rs` which owns the bus and emits from every mutator.
//
// **Critical constraint: determinism.** Timestamps are logical ticks set by
// the host (`set_tick` / `advance`), never wall-clock time, so the same
// sequence of mutations always produces the same history.

use crate::error::HandlerError;
use crate::types::{EntityId, Position};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::{trace, warn};

/// Default number of events retained in the history ring.
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TileEventType {
    EntityEntered,
    EntityExited,
    TileDamaged,
    TerrainChanged,
    ModifierAdded,
    ModifierRemoved,
    EnvironmentChanged,
    Triggered,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Damage {
    pub amount: f32,
    pub damage_type: String,
}

/// Something that happened on a tile.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TileEvent {
    pub event_type: TileEventType,
    pub position: Position,
    /// The entity that caused or underwent the event.
    pub cause: Option<EntityId>,
    pub from: Option<Position>,
    pub to: Option<Position>,
    pub damage: Option<Damage>,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
    /// Logical tick at which the bus received the event.
    pub timestamp: u64,
}

impl TileEvent {
    pub fn new(event_type: TileEventType, position: Position) -> Self {
        Self {
            event_type,
            position,
            cause: None,
            from: None,
            to: None,
            damage: None,
            data: serde_json::Map::new(),
            timestamp: 0,
        }
    }

    #[must_use]
    pub fn with_cause(mut self, cause: EntityId) -> Self {
        self.cause = Some(cause);
        self
    }

    #[must_use]
    pub fn with_movement(mut self, from: Position, to: Position) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    #[must_use]
    pub fn with_damage(mut self, amount: f32, damage_type: impl Into<String>) -> Self {
        self.damage = Some(Damage {
            amount,
            damage_type: damage_type.into(),
        });
        self
    }

    #[must_use]
    pub fn with_data(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

pub type EventHandler = Box<dyn FnMut(&TileEvent) -> Result<(), HandlerError> + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    /// `None` receives every event.
    filter: Option<TileEventType>,
    handler: EventHandler,
}

/// One handler that failed during an `emit`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerFailure {
    pub subscription: SubscriptionId,
    pub message: String,
}

/// Outcome of a single `emit`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EmitReport {
    /// Handlers that ran to completion.
    pub delivered: usize,
    pub failures: Vec<HandlerFailure>,
}

impl EmitReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct EventBus {
    subscriptions: Vec<Subscription>,
    history: VecDeque<TileEvent>,
    history_limit: usize,
    next_subscription: u64,
    tick: u64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriptions", &self.subscriptions.len())
            .field("history", &self.history.len())
            .field("history_limit", &self.history_limit)
            .field("tick", &self.tick)
            .finish()
    }
}

impl EventBus {
    pub fn new(history_limit: usize) -> Self {
        Self {
            subscriptions: Vec::new(),
            history: VecDeque::with_capacity(history_limit.min(DEFAULT_HISTORY_LIMIT)),
            history_limit,
            next_subscription: 0,
            tick: 0,
        }
    }

    fn add_subscription(
        &mut self,
        filter: Option<TileEventType>,
        handler: EventHandler,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscriptions.push(Subscription {
            id,
            filter,
            handler,
        });
        id
    }

    /// Receive events of one type.
    pub fn subscribe<F>(&mut self, event_type: TileEventType, handler: F) -> SubscriptionId
    where
        F: FnMut(&TileEvent) -> Result<(), HandlerError> + Send + 'static,
    {
        self.add_subscription(Some(event_type), Box::new(handler))
    }

    /// Receive every event.
    pub fn subscribe_all<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&TileEvent) -> Result<(), HandlerError> + Send + 'static,
    {
        self.add_subscription(None, Box::new(handler))
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        self.subscriptions.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Stamp, record and dispatch an event.
    pub fn emit(&mut self, mut event: TileEvent) -> EmitReport {
        event.timestamp = self.tick;
        trace!(event = ?event.event_type, position = %event.position, tick = self.tick, "emit");

        let mut report = EmitReport::default();
        for sub in &mut self.subscriptions {
            if sub.filter.is_some_and(|f| f != event.event_type) {
                continue;
            }
            let handler = &mut sub.handler;
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(&event)));
            let message = match outcome {
                Ok(Ok(())) => {
                    report.delivered += 1;
                    continue;
                }
                Ok(Err(err)) => err.to_string(),
                Err(payload) => panic_message(payload.as_ref()),
            };
            warn!(
                subscription = sub.id.0,
                event = ?event.event_type,
                position = %event.position,
                error = %message,
                "event handler failed"
            );
            report.failures.push(HandlerFailure {
                subscription: sub.id,
                message,
            });
        }

        self.record(event);
        report
    }

    fn record(&mut self, event: TileEvent) {
        if self.history_limit == 0 {
            return;
        }
        while self.history.len() >= self.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(event);
    }

    // -----------------------------------------------------------------------
    // History
    // -----------------------------------------------------------------------

    /// All retained events, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &TileEvent> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// The last `n` events, oldest first.
    pub fn recent(&self, n: usize) -> Vec<&TileEvent> {
        let skip = self.history.len().saturating_sub(n);
        self.history.iter().skip(skip).collect()
    }

    pub fn history_at(&self, position: Position) -> Vec<&TileEvent> {
        self.history
            .iter()
            .filter(|e| e.position == position)
            .collect()
    }

    pub fn history_of(&self, event_type: TileEventType) -> Vec<&TileEvent> {
        self.history
            .iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    // -----------------------------------------------------------------------
    // Clock
    // -----------------------------------------------------------------------

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn set_tick(&mut self, tick: u64) {
        self.tick = tick;
    }

    /// Advance the clock by `ticks`, returning the new tick.
    pub fn advance(&mut self, ticks: u64) -> u64 {
        self.tick = self.tick.saturating_add(ticks);
        self.tick
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}
