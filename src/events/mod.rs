use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::entities::order::OrderStatus;
use crate::entities::payment::PaymentStatus;

/// Domain events emitted after state changes commit. Consumers run off the
/// request path; delivery is best effort.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        user_id: Uuid,
        restaurant_id: Uuid,
    },
    OrderStatusChanged {
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    },
    OrderCancelled {
        order_id: Uuid,
        cancelled_by: Uuid,
    },
    PaymentInitialized {
        payment_id: Uuid,
        order_id: Uuid,
    },
    PaymentStatusChanged {
        payment_id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
    },
    RefundRequested {
        payment_id: Uuid,
        order_id: Uuid,
    },
    RefundProcessed {
        payment_id: Uuid,
        refund_id: Option<String>,
    },
    RefundFailed {
        payment_id: Uuid,
    },
}

/// Cloneable handle for publishing events.
#[derive(Clone, Debug)]
pub struct EventSender {
    tx: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(tx: mpsc::Sender<Event>) -> Self {
        Self { tx }
    }

    /// Publish without blocking the caller. A full or closed channel is
    /// logged and dropped; events are advisory, not part of the txn.
    pub fn send(&self, event: Event) {
        if let Err(e) = self.tx.try_send(event) {
            error!(error = %e, "dropping domain event");
        }
    }
}

/// Create the event channel plus the handle services publish through.
pub fn event_channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

/// Drains the event channel, logging each event. Notification fan-out and
/// analytics hang off this loop in deployments that need them.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("event processor started");
    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderStatusChanged { order_id, from, to } => {
                info!(%order_id, %from, %to, "order status changed");
            }
            Event::PaymentStatusChanged {
                payment_id,
                from,
                to,
            } => {
                info!(%payment_id, %from, %to, "payment status changed");
            }
            other => debug!(event = ?other, "domain event"),
        }
        metrics::counter!("events.processed", 1);
    }
    info!("event processor stopped");
}
