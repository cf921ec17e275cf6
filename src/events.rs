// =============================================================================
// Structured Event Sink
// =============================================================================
//
// The core never formats an alert. Every notable occurrence is emitted as
// a structured `Event` onto an unbounded `mpsc` channel; `main` wires a
// default logging subscriber (every event is also traced at `info!`/
// `warn!`). An external transport (Telegram, webhook, ...) is expected to
// take its own receiver — see `EventSink::subscribe`.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum EventKind {
    PhaseChanged,
    ScanTickCompleted,
    SignalAccepted,
    SignalRejected,
    OrderPlaced,
    OrderFilled,
    OrderRejected,
    PositionOpened,
    StopAdjusted,
    PositionClosed,
    PartialExit,
    TokenRotated,
    TokenRenewalFailed,
    ProviderFailover,
    EndOfDaySummary,
    FatalError,
    PositionAdopted,
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_id: Option<String>,
    pub payload: Value,
}

impl Event {
    pub fn new(kind: EventKind, payload: Value) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            symbol: None,
            position_id: None,
            payload,
        }
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn with_position(mut self, position_id: impl Into<String>) -> Self {
        self.position_id = Some(position_id.into());
        self
    }
}

/// Shared event sink. Every component holds a clone of the `Sender`;
/// external subscribers call `subscribe()` to get their own receiver.
#[derive(Clone)]
pub struct EventSink {
    tx: broadcast::Sender<Event>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Emit an event. Always traces it locally regardless of whether any
    /// external subscriber is attached — the event log is not solely a
    /// function of subscriber presence.
    pub fn emit(&self, event: Event) {
        match &event.kind {
            EventKind::FatalError | EventKind::TokenRenewalFailed | EventKind::OrderRejected => {
                warn!(kind = ?event.kind, symbol = ?event.symbol, position_id = ?event.position_id, payload = %event.payload, "event");
            }
            _ => {
                info!(kind = ?event.kind, symbol = ?event.symbol, position_id = ?event.position_id, payload = %event.payload, "event");
            }
        }
        // A send error only occurs when there are zero receivers; that is
        // expected whenever no external transport has subscribed yet.
        let _ = self.tx.send(event);
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(1024)
    }
}
