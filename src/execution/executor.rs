// =============================================================================
// Order Executor (§4.8 entry + exit path)
// =============================================================================

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::broker::BrokerClient;
use crate::error::CoreError;
use crate::events::{Event, EventKind, EventSink};
use crate::position::{entries_permitted, Position, PositionStore};
use crate::price::Price;
use crate::sizer::OrderIntent;
use crate::trailing::{ExitHandler, ExitReason};
use crate::types::{OrderStatus, Phase, Side};

const DEFAULT_POLL_INTERVAL: StdDuration = StdDuration::from_secs(2);
const MAX_POLL_ATTEMPTS: u32 = 150; // 5 minutes at the default cadence.

fn parse_status(raw: &str) -> OrderStatus {
    match raw.to_uppercase().as_str() {
        "PENDING" => OrderStatus::Pending,
        "PREVIEWED" => OrderStatus::Previewed,
        "PLACED" | "OPEN" | "WORKING" => OrderStatus::Placed,
        "PARTIALLY_FILLED" | "PARTIALLYFILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "CANCELLED" | "CANCELED" => OrderStatus::Cancelled,
        "REJECTED" => OrderStatus::Rejected,
        _ => OrderStatus::Placed,
    }
}

pub struct OrderExecutor {
    broker: Arc<BrokerClient>,
    positions: Arc<PositionStore>,
    events: EventSink,
    poll_interval: StdDuration,
}

impl OrderExecutor {
    pub fn new(broker: Arc<BrokerClient>, positions: Arc<PositionStore>, events: EventSink) -> Self {
        Self { broker, positions, events, poll_interval: DEFAULT_POLL_INTERVAL }
    }

    /// §4.8 entry path. Rejects outright (no broker call) if entries
    /// aren't currently permitted or the symbol already has an
    /// open strategy-owned position — "no stacking in core".
    pub async fn enter(&self, intent: &OrderIntent, signal_confidence: f64, phase: Phase) -> Result<(), CoreError> {
        if !entries_permitted(phase) {
            self.reject(&intent.symbol, "phase_not_open");
            return Err(CoreError::Precondition(format!("phase {phase} does not permit entries")));
        }
        if self.positions.has_open_position(&intent.symbol) {
            self.reject(&intent.symbol, "position_already_open");
            return Err(CoreError::Precondition("symbol already has an open strategy-owned position".into()));
        }

        let idempotency_key = Uuid::new_v4().to_string();
        let quantity = intent.quantity as f64;

        let preview = self
            .with_transport_retry(|| self.broker.preview_order(&intent.symbol, "BUY", quantity, intent.max_price))
            .await;
        let preview = match preview {
            Ok(body) => body,
            Err(err) => {
                self.reject(&intent.symbol, &format!("preview_failed: {err}"));
                return Err(CoreError::TransientIo(err.to_string()));
            }
        };
        if preview.get("errors").map(|e| !e.is_null()).unwrap_or(false) {
            self.reject(&intent.symbol, "preview_rejected");
            return Err(CoreError::Precondition("broker preview rejected the order".into()));
        }

        let placed = self
            .with_transport_retry(|| {
                self.broker.place_order(&intent.symbol, "BUY", quantity, intent.max_price, &idempotency_key)
            })
            .await;
        let placed = match placed {
            Ok(body) => body,
            Err(err) => {
                self.reject(&intent.symbol, &format!("place_failed: {err}"));
                return Err(CoreError::TransientIo(err.to_string()));
            }
        };
        let order_id = placed["orderId"].as_str().unwrap_or_default().to_string();
        self.events.emit(
            Event::new(EventKind::OrderPlaced, serde_json::json!({"orderId": order_id, "quantity": intent.quantity}))
                .with_symbol(&intent.symbol),
        );

        let (status, final_body) = self.poll_until_terminal(&order_id).await;
        match status {
            OrderStatus::Filled => {
                let fill_price = final_body["fillPrice"].as_f64().map(Price::from_f64).unwrap_or(intent.max_price);
                let position = Position::open(intent.symbol.clone(), Side::Buy, intent.quantity, fill_price, signal_confidence);
                self.events.emit(
                    Event::new(EventKind::OrderFilled, serde_json::json!({"orderId": order_id, "fillPrice": fill_price.as_f64()}))
                        .with_symbol(&intent.symbol)
                        .with_position(&position.id),
                );
                self.events.emit(
                    Event::new(EventKind::PositionOpened, serde_json::json!({"symbol": intent.symbol, "quantity": intent.quantity}))
                        .with_symbol(&intent.symbol)
                        .with_position(&position.id),
                );
                self.positions.insert(position);
                Ok(())
            }
            OrderStatus::Rejected | OrderStatus::Cancelled => {
                self.events.emit(
                    Event::new(EventKind::OrderRejected, serde_json::json!({"orderId": order_id, "status": status.to_string()}))
                        .with_symbol(&intent.symbol),
                );
                Err(CoreError::Precondition(format!("order ended in {status}")))
            }
            other => {
                warn!(symbol = %intent.symbol, order_id, status = %other, "order polling gave up before a terminal state");
                Err(CoreError::TransientIo(format!("order stuck in {other} after max poll attempts")))
            }
        }
    }

    async fn poll_until_terminal(&self, order_id: &str) -> (OrderStatus, Value) {
        let mut last = serde_json::json!({});
        for _ in 0..MAX_POLL_ATTEMPTS {
            tokio::time::sleep(self.poll_interval).await;
            match self.broker.get_order_status(order_id).await {
                Ok(body) => {
                    let status = parse_status(body["status"].as_str().unwrap_or(""));
                    last = body;
                    if status.is_terminal() {
                        return (status, last);
                    }
                }
                Err(err) => {
                    warn!(order_id, error = %err, "order status poll failed, retrying");
                }
            }
        }
        (OrderStatus::Placed, last)
    }

    /// Retries exactly once on a transport-level failure, reusing the
    /// same request (the caller's idempotency key, where applicable) —
    /// the broker is relied on to deduplicate (§4.8). This is NOT the
    /// §4.3 renew-on-401 path: `BrokerClient::authed_get`/`authed_post`
    /// already detect a 401 and renew the OAuth session before a failure
    /// ever reaches here, so this wrapper only ever sees transport-level
    /// (network, timeout, malformed-response) failures.
    async fn with_transport_retry<F, Fut>(&self, call: F) -> anyhow::Result<Value>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<Value>>,
    {
        match call().await {
            Ok(body) => Ok(body),
            Err(first_err) => {
                warn!(error = %first_err, "transport call failed, retrying once");
                call().await.map_err(|second_err| {
                    error!(error = %second_err, "transport call failed again, giving up");
                    second_err
                })
            }
        }
    }

    fn reject(&self, symbol: &str, reason: &str) {
        self.events.emit(
            Event::new(EventKind::SignalRejected, serde_json::json!({"reason": reason}))
                .with_symbol(symbol),
        );
    }
}

#[async_trait]
impl ExitHandler for OrderExecutor {
    /// §4.8 exit path. The trailing engine has already marked
    /// `exit_order_in_flight` before calling this, so a redelivered
    /// `ExitIntent` for the same position is a no-op here too.
    async fn request_exit(&self, position: &Position, reason: ExitReason) {
        let Some(current) = self.positions.snapshot(&position.id) else {
            return;
        };

        let quantity = current.quantity as f64;
        let sell_price = current.current_price;
        let body = self
            .with_transport_retry(|| self.broker.place_order(&current.symbol, "SELL", quantity, sell_price, &current.id))
            .await;

        let body = match body {
            Ok(body) => body,
            Err(err) => {
                error!(symbol = %current.symbol, position_id = %current.id, error = %err, "exit order placement failed");
                self.positions.update(&current.id, |p| p.exit_order_in_flight = false);
                return;
            }
        };

        let order_id = body["orderId"].as_str().unwrap_or_default().to_string();
        let (status, final_body) = self.poll_until_terminal(&order_id).await;
        if status != OrderStatus::Filled {
            warn!(symbol = %current.symbol, position_id = %current.id, status = %status, "exit order did not fill");
            self.positions.update(&current.id, |p| p.exit_order_in_flight = false);
            return;
        }

        let fill_price = final_body["fillPrice"].as_f64().map(Price::from_f64).unwrap_or(sell_price);
        let realized_pnl = (fill_price.as_f64() - current.entry_price.as_f64()) * current.quantity as f64;

        if let Some(closed) = self.positions.close(&current.id) {
            info!(symbol = %closed.symbol, position_id = %closed.id, reason = %reason, realized_pnl, "position closed");
            self.events.emit(
                Event::new(
                    EventKind::PositionClosed,
                    serde_json::json!({"reason": reason.to_string(), "realizedPnl": realized_pnl, "exitPrice": fill_price.as_f64()}),
                )
                .with_symbol(&closed.symbol)
                .with_position(&closed.id),
            );
        }
    }
}
