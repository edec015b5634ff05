use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::entities::{OrderStatus, ReturnStatus, SubOrderStatus};
use crate::services::shipments::ShipmentDispatcher;

pub mod outbox;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends after a commit; the write already happened, so a closed channel is only logged.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "event dropped");
        }
    }
}

/// Domain events emitted after a unit of work commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        order_number: String,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    OrderCancelled(Uuid),
    SubOrderStatusChanged {
        order_id: Uuid,
        sub_order_id: Uuid,
        old_status: SubOrderStatus,
        new_status: SubOrderStatus,
    },
    PaymentCaptured {
        order_id: Uuid,
        transaction_id: Option<String>,
    },
    PaymentFailed {
        order_id: Uuid,
        reason: String,
    },
    ShipmentPackageCreated {
        sub_order_id: Uuid,
        tracking_id: String,
    },
    ReturnRequested {
        return_id: Uuid,
        order_id: Uuid,
        sub_order_id: Uuid,
        refund_amount: Decimal,
    },
    ReturnStatusChanged {
        return_id: Uuid,
        old_status: ReturnStatus,
        new_status: ReturnStatus,
    },
}

/// Consumes events until every sender is dropped. New orders kick the shipment
/// dispatcher so packaging starts without waiting for the next outbox poll.
pub async fn process_events(
    mut rx: mpsc::Receiver<Event>,
    shipment_dispatcher: Option<Arc<ShipmentDispatcher>>,
) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        info!("Received event: {:?}", event);

        match event {
            Event::OrderCreated {
                order_id,
                order_number,
            } => {
                let Some(dispatcher) = shipment_dispatcher.clone() else {
                    continue;
                };
                // Packaging is slow and best-effort; never block the event loop on it.
                tokio::spawn(async move {
                    match dispatcher.dispatch_order(order_id).await {
                        Ok(stats) => info!(
                            %order_id,
                            %order_number,
                            packaged = stats.delivered,
                            retrying = stats.retried,
                            "shipment dispatch finished"
                        ),
                        Err(e) => error!(
                            %order_id,
                            error = %e,
                            "shipment dispatch failed; outbox worker will retry"
                        ),
                    }
                });
            }
            Event::PaymentCaptured {
                order_id,
                transaction_id,
            } => {
                info!(%order_id, ?transaction_id, "payment success notification queued");
            }
            Event::PaymentFailed { order_id, reason } => {
                info!(%order_id, %reason, "payment failure notification queued");
            }
            Event::OrderCancelled(order_id) => {
                info!(%order_id, "order cancelled");
            }
            other => {
                tracing::debug!(event = ?other, "no handler registered");
            }
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_fails_once_receiver_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        let sender = EventSender::new(tx);
        drop(rx);
        assert!(sender.send(Event::OrderCancelled(Uuid::new_v4())).await.is_err());
        // logged, not propagated
        sender.send_or_log(Event::OrderCancelled(Uuid::new_v4())).await;
    }

    #[tokio::test]
    async fn loop_drains_and_exits_when_senders_drop() {
        let (tx, rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);
        sender
            .send(Event::PaymentFailed {
                order_id: Uuid::new_v4(),
                reason: "card declined".into(),
            })
            .await
            .unwrap();
        drop(sender);
        process_events(rx, None).await;
    }
}
