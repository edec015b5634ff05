//! Payment gateway webhook reconciliation.
//!
//! Applies gateway outcomes to orders exactly once. Every write is a
//! conditional update keyed on the current payment status, so a replayed or
//! out-of-order delivery degrades to a no-op instead of regressing the order.

use std::sync::Arc;

use chrono::Utc;
use hmac::{Hmac, Mac};
use metrics::counter;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set,
};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{info, instrument, warn};

use crate::db::UnitOfWork;
use crate::entities::{order, payment_webhook_event, OrderStatus, PaymentStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::order_status::{cascade_cancel_sub_orders, is_valid_order_transition};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-signature";
pub const RAZORPAY_SIGNATURE_HEADER: &str = "x-razorpay-signature";
pub const EVENT_ID_HEADER: &str = "x-event-id";

const DEFAULT_FAILURE_REASON: &str = "Payment failed";

/// How a delivery was handled. Every variant is acknowledged with 200 so the
/// gateway stops redelivering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookAck {
    Applied,
    AlreadyApplied,
    Duplicate,
    Ignored,
    OrderNotFound,
}

impl WebhookAck {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookAck::Applied => "applied",
            WebhookAck::AlreadyApplied => "already_applied",
            WebhookAck::Duplicate => "duplicate",
            WebhookAck::Ignored => "ignored",
            WebhookAck::OrderNotFound => "order_not_found",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GatewayOutcome {
    Captured,
    Failed,
}

impl GatewayOutcome {
    fn from_event(event: &str) -> Option<Self> {
        match event {
            "payment.captured" | "order.paid" => Some(Self::Captured),
            "payment.failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub id: Option<String>,
    pub event: String,
    #[serde(default)]
    pub payload: WebhookBody,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookBody {
    #[serde(default)]
    pub payment: Option<Wrapped<PaymentEntity>>,
    #[serde(default)]
    pub order: Option<Wrapped<OrderEntity>>,
}

#[derive(Debug, Deserialize)]
pub struct Wrapped<T> {
    pub entity: T,
}

#[derive(Debug, Default, Deserialize)]
pub struct PaymentEntity {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default)]
    pub error_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OrderEntity {
    #[serde(default)]
    pub id: Option<String>,
}

impl WebhookPayload {
    fn payment(&self) -> Option<&PaymentEntity> {
        self.payload.payment.as_ref().map(|p| &p.entity)
    }

    pub fn gateway_order_id(&self) -> Option<&str> {
        self.payment()
            .and_then(|p| p.order_id.as_deref())
            .or_else(|| {
                self.payload
                    .order
                    .as_ref()
                    .and_then(|o| o.entity.id.as_deref())
            })
            .filter(|id| !id.is_empty())
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.payment().and_then(|p| p.id.as_deref())
    }

    pub fn failure_reason(&self) -> String {
        self.payment()
            .and_then(|p| {
                p.error_description
                    .as_deref()
                    .filter(|s| !s.trim().is_empty())
                    .or(p.error_reason.as_deref().filter(|s| !s.trim().is_empty()))
            })
            .unwrap_or(DEFAULT_FAILURE_REASON)
            .to_string()
    }
}

/// Hex HMAC-SHA256 of `body` under `secret`.
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a hex signature over the raw body.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(provided) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&provided).is_ok()
}

#[derive(Clone)]
pub struct PaymentGatewayReconciler {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    secret: Option<String>,
}

impl PaymentGatewayReconciler {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        secret: Option<String>,
    ) -> Self {
        Self {
            db,
            event_sender,
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    /// Verifies, parses and applies one gateway delivery.
    ///
    /// `event_id` comes from the delivery header and falls back to the
    /// payload's `id`. Signature failures touch nothing.
    #[instrument(skip(self, raw_payload, signature), fields(event_id = ?event_id))]
    pub async fn handle_webhook(
        &self,
        raw_payload: &[u8],
        signature: Option<&str>,
        event_id: Option<&str>,
    ) -> Result<WebhookAck, ServiceError> {
        let Some(secret) = self.secret.as_deref() else {
            warn!("webhook received but no signing secret is configured");
            counter!("payment_webhooks_total", 1, "outcome" => "invalid_signature");
            return Err(ServiceError::InvalidSignature);
        };
        let signature_ok = signature
            .map(|sig| verify_signature(secret, raw_payload, sig))
            .unwrap_or(false);
        if !signature_ok {
            warn!("payment webhook signature verification failed");
            counter!("payment_webhooks_total", 1, "outcome" => "invalid_signature");
            return Err(ServiceError::InvalidSignature);
        }

        let payload: WebhookPayload = serde_json::from_slice(raw_payload)
            .map_err(|e| ServiceError::BadRequest(format!("invalid webhook payload: {}", e)))?;

        let event_id = event_id
            .map(str::to_string)
            .or_else(|| payload.id.clone())
            .filter(|id| !id.trim().is_empty());

        let ack = self.apply(&payload, event_id).await?;
        counter!("payment_webhooks_total", 1, "outcome" => ack.as_str());
        Ok(ack)
    }

    async fn apply(
        &self,
        payload: &WebhookPayload,
        event_id: Option<String>,
    ) -> Result<WebhookAck, ServiceError> {
        let Some(outcome) = GatewayOutcome::from_event(&payload.event) else {
            info!(event = %payload.event, "ignoring unhandled payment webhook event");
            return Ok(WebhookAck::Ignored);
        };

        let uow = UnitOfWork::begin(&*self.db).await?;

        if let Some(id) = &event_id {
            let seen = payment_webhook_event::Entity::find_by_id(id.clone())
                .one(uow.conn())
                .await
                .map_err(ServiceError::db_error)?;
            if seen.is_some() {
                info!(event_id = %id, "duplicate webhook delivery");
                return Ok(WebhookAck::Duplicate);
            }
        }

        let gateway_order_id = payload.gateway_order_id();
        let order = match gateway_order_id {
            Some(gid) => order::Entity::find()
                .filter(order::Column::GatewayOrderId.eq(gid))
                .one(uow.conn())
                .await
                .map_err(ServiceError::db_error)?,
            None => None,
        };

        let mut events = Vec::new();
        let ack = match order {
            None => {
                warn!(
                    gateway_order_id = ?gateway_order_id,
                    event = %payload.event,
                    "webhook references no known order"
                );
                WebhookAck::OrderNotFound
            }
            Some(order) => match outcome {
                GatewayOutcome::Captured => {
                    apply_capture(uow.conn(), &order, payload, &mut events).await?
                }
                GatewayOutcome::Failed => {
                    apply_failure(uow.conn(), &order, payload, &mut events).await?
                }
            },
        };

        if let Some(id) = event_id {
            match record_event(uow.conn(), id, &payload.event, gateway_order_id, ack).await {
                Ok(()) => {}
                // A concurrent delivery of the same event id won the insert.
                Err(e) if e.is_unique_violation() => return Ok(WebhookAck::Duplicate),
                Err(e) => return Err(e),
            }
        }

        uow.commit().await?;

        for event in events {
            self.event_sender.send_or_log(event).await;
        }
        Ok(ack)
    }
}

async fn apply_capture<C>(
    conn: &C,
    order: &order::Model,
    payload: &WebhookPayload,
    events: &mut Vec<Event>,
) -> Result<WebhookAck, ServiceError>
where
    C: ConnectionTrait,
{
    let transaction_id = payload.transaction_id().map(str::to_string);
    let now = Utc::now();

    // Paid is final for this handler; refunded never regresses to paid.
    let result = order::Entity::update_many()
        .col_expr(order::Column::PaymentStatus, Expr::value(PaymentStatus::Paid))
        .col_expr(
            order::Column::PaymentTransactionId,
            Expr::value(transaction_id.clone()),
        )
        .col_expr(
            order::Column::PaymentFailureReason,
            Expr::value(Option::<String>::None),
        )
        .col_expr(order::Column::UpdatedAt, Expr::value(now))
        .filter(order::Column::Id.eq(order.id))
        .filter(order::Column::PaymentStatus.is_not_in([PaymentStatus::Paid, PaymentStatus::Refunded]))
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;

    if result.rows_affected == 0 {
        info!(order_id = %order.id, "payment already captured");
        return Ok(WebhookAck::AlreadyApplied);
    }

    let confirmed = order::Entity::update_many()
        .col_expr(order::Column::Status, Expr::value(OrderStatus::Confirmed))
        .filter(order::Column::Id.eq(order.id))
        .filter(order::Column::Status.eq(OrderStatus::Pending))
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;

    info!(
        order_id = %order.id,
        transaction_id = ?transaction_id,
        confirmed = confirmed.rows_affected > 0,
        "payment captured"
    );

    if confirmed.rows_affected > 0 {
        events.push(Event::OrderStatusChanged {
            order_id: order.id,
            old_status: OrderStatus::Pending,
            new_status: OrderStatus::Confirmed,
        });
    }
    events.push(Event::PaymentCaptured {
        order_id: order.id,
        transaction_id,
    });
    Ok(WebhookAck::Applied)
}

async fn apply_failure<C>(
    conn: &C,
    order: &order::Model,
    payload: &WebhookPayload,
    events: &mut Vec<Event>,
) -> Result<WebhookAck, ServiceError>
where
    C: ConnectionTrait,
{
    let reason = payload.failure_reason();
    let now = Utc::now();

    // Only a pending payment can fail; a late failure after capture is stale.
    let result = order::Entity::update_many()
        .col_expr(order::Column::PaymentStatus, Expr::value(PaymentStatus::Failed))
        .col_expr(
            order::Column::PaymentFailureReason,
            Expr::value(Some(reason.clone())),
        )
        .col_expr(order::Column::UpdatedAt, Expr::value(now))
        .filter(order::Column::Id.eq(order.id))
        .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;

    if result.rows_affected == 0 {
        info!(
            order_id = %order.id,
            payment_status = ?order.payment_status,
            "payment failure ignored for settled payment"
        );
        return Ok(WebhookAck::AlreadyApplied);
    }

    if is_valid_order_transition(order.status, OrderStatus::Cancelled) {
        let cancelled = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Cancelled))
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::Status.eq(order.status))
            .exec(conn)
            .await
            .map_err(ServiceError::db_error)?;
        if cancelled.rows_affected > 0 {
            let sub_orders = cascade_cancel_sub_orders(conn, order.id).await?;
            info!(order_id = %order.id, sub_orders, "order cancelled after payment failure");
            events.push(Event::OrderStatusChanged {
                order_id: order.id,
                old_status: order.status,
                new_status: OrderStatus::Cancelled,
            });
            events.push(Event::OrderCancelled(order.id));
        }
    }

    warn!(order_id = %order.id, %reason, "payment failed");
    events.push(Event::PaymentFailed {
        order_id: order.id,
        reason,
    });
    Ok(WebhookAck::Applied)
}

async fn record_event<C>(
    conn: &C,
    event_id: String,
    event_type: &str,
    gateway_order_id: Option<&str>,
    ack: WebhookAck,
) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    payment_webhook_event::ActiveModel {
        event_id: Set(event_id),
        event_type: Set(event_type.to_string()),
        gateway_order_id: Set(gateway_order_id.map(str::to_string)),
        outcome: Set(ack.as_str().to_string()),
        received_at: Set(Utc::now()),
    }
    .insert(conn)
    .await
    .map_err(ServiceError::db_error)?;
    Ok(())
}
