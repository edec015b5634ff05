//! Return requests against delivered sub-orders.
//!
//! A request is accepted only inside the configured window after delivery and
//! only when no other request for the same sub-order is still in flight. The
//! statuses a request displaced are kept on it so a rejection can put them back.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::config::AppConfig;
use crate::db::UnitOfWork;
use crate::entities::{
    order, return_request, sub_order, OrderStatus, ReturnHistoryEntry, ReturnStatus,
    SubOrderStatus,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

const BUYER_ACTOR: &str = "buyer";

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReturnRequestInput {
    pub order_id: Uuid,
    pub sub_order_id: Uuid,
    pub user_id: Uuid,
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdateReturnStatusInput {
    pub status: ReturnStatus,
    #[validate(length(min = 1, max = 100))]
    pub actor: String,
    #[serde(default)]
    #[validate(length(max = 1000))]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct ReturnPolicy {
    pub enabled: bool,
    pub window_days: i64,
}

impl From<&AppConfig> for ReturnPolicy {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            enabled: cfg.returns_enabled,
            window_days: cfg.return_window_days,
        }
    }
}

/// `pending → approved | rejected`, `approved → processing | rejected`,
/// `processing → completed`.
pub fn is_valid_return_transition(from: ReturnStatus, to: ReturnStatus) -> bool {
    use ReturnStatus::*;
    matches!(
        (from, to),
        (Pending, Approved)
            | (Pending, Rejected)
            | (Approved, Processing)
            | (Approved, Rejected)
            | (Processing, Completed)
    )
}

/// Delivery time used for the window: actual delivery, else the last update.
/// Never earlier than the order date.
pub fn delivery_reference(sub: &sub_order::Model, order: &order::Model) -> DateTime<Utc> {
    sub.delivered_at
        .unwrap_or(sub.updated_at)
        .max(order.order_date)
}

/// True while `now` is no later than `window_days` full days after `delivered`.
pub fn within_window(delivered: DateTime<Utc>, now: DateTime<Utc>, window_days: i64) -> bool {
    now - delivered <= Duration::days(window_days.max(0))
}

pub fn refund_amount(sub: &sub_order::Model) -> Decimal {
    if sub.total_amount > Decimal::ZERO {
        return sub.total_amount;
    }
    sub.line_items().iter().map(|l| l.line_total).sum()
}

#[derive(Clone)]
pub struct ReturnWindowManager {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    policy: ReturnPolicy,
}

impl ReturnWindowManager {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender, policy: ReturnPolicy) -> Self {
        Self {
            db,
            event_sender,
            policy,
        }
    }

    /// Opens a return for a delivered sub-order and flips it (and its order,
    /// when delivered) to `returned` in one unit of work.
    #[instrument(skip(self, input), fields(order_id = %input.order_id, sub_order_id = %input.sub_order_id))]
    pub async fn request_return(
        &self,
        input: ReturnRequestInput,
    ) -> Result<return_request::Model, ServiceError> {
        if !self.policy.enabled {
            return Err(ServiceError::ReturnsDisabled);
        }
        input.validate()?;
        if input.reason.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "return reason is required".into(),
            ));
        }

        let uow = UnitOfWork::begin(&*self.db).await?;
        let now = Utc::now();

        let sub = sub_order::Entity::find_by_id(input.sub_order_id)
            .filter(sub_order::Column::OrderId.eq(input.order_id))
            .one(uow.conn())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or(ServiceError::SubOrderNotFound(input.sub_order_id))?;

        let order = order::Entity::find_by_id(input.order_id)
            .one(uow.conn())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or(ServiceError::SubOrderNotFound(input.sub_order_id))?;
        if order.buyer_id != input.user_id {
            warn!(user_id = %input.user_id, "return requested by someone other than the buyer");
            return Err(ServiceError::SubOrderNotFound(input.sub_order_id));
        }

        if let Some(active) = find_active(uow.conn(), sub.id).await? {
            return Err(ServiceError::DuplicateActiveRequest(active.id));
        }

        if sub.status != SubOrderStatus::Delivered {
            return Err(ServiceError::InvalidStatus(format!(
                "Sub-order must be delivered to request a return, currently '{:?}'",
                sub.status
            )));
        }

        let delivered = delivery_reference(&sub, &order);
        if !within_window(delivered, now, self.policy.window_days) {
            info!(%delivered, window_days = self.policy.window_days, "return window expired");
            return Err(ServiceError::ReturnWindowExpired(self.policy.window_days));
        }

        // Guarded so two concurrent requests cannot both take the sub-order.
        let flipped = sub_order::Entity::update_many()
            .col_expr(
                sub_order::Column::Status,
                Expr::value(SubOrderStatus::Returned),
            )
            .col_expr(sub_order::Column::UpdatedAt, Expr::value(now))
            .filter(sub_order::Column::Id.eq(sub.id))
            .filter(sub_order::Column::Status.eq(SubOrderStatus::Delivered))
            .exec(uow.conn())
            .await
            .map_err(ServiceError::db_error)?;
        if flipped.rows_affected == 0 {
            return Err(match find_active(uow.conn(), sub.id).await? {
                Some(active) => ServiceError::DuplicateActiveRequest(active.id),
                None => ServiceError::InvalidStatus("Sub-order changed status concurrently".into()),
            });
        }

        let order_flipped = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Returned))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::Status.eq(OrderStatus::Delivered))
            .exec(uow.conn())
            .await
            .map_err(ServiceError::db_error)?
            .rows_affected
            > 0;

        let history = vec![ReturnHistoryEntry {
            status: ReturnStatus::Pending,
            actor: BUYER_ACTOR.to_string(),
            note: None,
            at: now,
        }];
        let refund = refund_amount(&sub);

        let created = return_request::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            sub_order_id: Set(sub.id),
            user_id: Set(input.user_id),
            seller_id: Set(sub.seller_id),
            reason: Set(input.reason.trim().to_string()),
            description: Set(input.description.filter(|d| !d.trim().is_empty())),
            items: Set(sub.items.clone()),
            refund_amount: Set(refund),
            return_window_days: Set(self.policy.window_days),
            original_sub_order_status: Set(sub.status),
            original_order_status: Set(order.status),
            status: Set(ReturnStatus::Pending),
            history: Set(to_json(&history)?),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(uow.conn())
        .await
        .map_err(ServiceError::db_error)?;

        uow.commit().await?;

        info!(return_id = %created.id, %refund, "return requested");

        self.event_sender
            .send_or_log(Event::ReturnRequested {
                return_id: created.id,
                order_id: order.id,
                sub_order_id: sub.id,
                refund_amount: refund,
            })
            .await;
        self.event_sender
            .send_or_log(Event::SubOrderStatusChanged {
                order_id: order.id,
                sub_order_id: sub.id,
                old_status: SubOrderStatus::Delivered,
                new_status: SubOrderStatus::Returned,
            })
            .await;
        if order_flipped {
            self.event_sender
                .send_or_log(Event::OrderStatusChanged {
                    order_id: order.id,
                    old_status: OrderStatus::Delivered,
                    new_status: OrderStatus::Returned,
                })
                .await;
        }

        Ok(created)
    }

    pub async fn get_return(&self, return_id: Uuid) -> Result<return_request::Model, ServiceError> {
        return_request::Entity::find_by_id(return_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Return request {} not found", return_id)))
    }

    pub async fn list_returns_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<return_request::Model>, ServiceError> {
        return_request::Entity::find()
            .filter(return_request::Column::OrderId.eq(order_id))
            .order_by_asc(return_request::Column::CreatedAt)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Moves a return through its lifecycle and appends to its history.
    /// Rejection restores the statuses the request displaced.
    #[instrument(skip(self, input), fields(new_status = ?input.status))]
    pub async fn update_return_status(
        &self,
        return_id: Uuid,
        input: UpdateReturnStatusInput,
    ) -> Result<return_request::Model, ServiceError> {
        input.validate()?;

        let uow = UnitOfWork::begin(&*self.db).await?;
        let now = Utc::now();

        let current = return_request::Entity::find_by_id(return_id)
            .one(uow.conn())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Return request {} not found", return_id)))?;

        let old_status = current.status;
        if !is_valid_return_transition(old_status, input.status) {
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot transition return from '{:?}' to '{:?}'",
                old_status, input.status
            )));
        }

        let mut history = current.history_entries();
        history.push(ReturnHistoryEntry {
            status: input.status,
            actor: input.actor.clone(),
            note: input.note.clone(),
            at: now,
        });

        let result = return_request::Entity::update_many()
            .col_expr(return_request::Column::Status, Expr::value(input.status))
            .col_expr(return_request::Column::History, Expr::value(to_json(&history)?))
            .col_expr(return_request::Column::UpdatedAt, Expr::value(now))
            .filter(return_request::Column::Id.eq(return_id))
            .filter(return_request::Column::Status.eq(old_status))
            .exec(uow.conn())
            .await
            .map_err(ServiceError::db_error)?;
        if result.rows_affected == 0 {
            return Err(ServiceError::InvalidStatus(format!(
                "Return request {} changed status concurrently",
                return_id
            )));
        }

        if input.status == ReturnStatus::Rejected {
            restore_statuses(uow.conn(), &current, now).await?;
        }

        let updated = return_request::Entity::find_by_id(return_id)
            .one(uow.conn())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Return request {} not found", return_id)))?;

        uow.commit().await?;

        info!(
            %return_id,
            actor = %input.actor,
            "Return status updated from '{:?}' to '{:?}'", old_status, input.status
        );
        self.event_sender
            .send_or_log(Event::ReturnStatusChanged {
                return_id,
                old_status,
                new_status: input.status,
            })
            .await;

        Ok(updated)
    }
}

async fn find_active<C>(
    conn: &C,
    sub_order_id: Uuid,
) -> Result<Option<return_request::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    return_request::Entity::find()
        .filter(return_request::Column::SubOrderId.eq(sub_order_id))
        .filter(return_request::Column::Status.is_in(ReturnStatus::ACTIVE))
        .one(conn)
        .await
        .map_err(ServiceError::db_error)
}

/// Puts back the sub-order and order statuses, unless something moved them since.
async fn restore_statuses<C>(
    conn: &C,
    request: &return_request::Model,
    now: DateTime<Utc>,
) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    sub_order::Entity::update_many()
        .col_expr(
            sub_order::Column::Status,
            Expr::value(request.original_sub_order_status),
        )
        .col_expr(sub_order::Column::UpdatedAt, Expr::value(now))
        .filter(sub_order::Column::Id.eq(request.sub_order_id))
        .filter(sub_order::Column::Status.eq(SubOrderStatus::Returned))
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;

    // The order stays returned while another return on it still stands.
    let standing = return_request::Entity::find()
        .filter(return_request::Column::OrderId.eq(request.order_id))
        .filter(return_request::Column::Id.ne(request.id))
        .filter(return_request::Column::Status.ne(ReturnStatus::Rejected))
        .count(conn)
        .await
        .map_err(ServiceError::db_error)?;
    if standing > 0 {
        return Ok(());
    }

    // A later sibling saw the order already returned; the first request knows
    // what it was before any return.
    let original = return_request::Entity::find()
        .filter(return_request::Column::OrderId.eq(request.order_id))
        .filter(return_request::Column::OriginalOrderStatus.ne(OrderStatus::Returned))
        .order_by_asc(return_request::Column::CreatedAt)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .map(|first| first.original_order_status)
        .unwrap_or(request.original_order_status);

    order::Entity::update_many()
        .col_expr(order::Column::Status, Expr::value(original))
        .col_expr(order::Column::UpdatedAt, Expr::value(now))
        .filter(order::Column::Id.eq(request.order_id))
        .filter(order::Column::Status.eq(OrderStatus::Returned))
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(())
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, ServiceError> {
    serde_json::to_value(value).map_err(|e| ServiceError::InternalError(e.to_string()))
}
