use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::db::UnitOfWork;
use crate::entities::{order, sub_order, OrderStatus, SubOrderStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

fn order_rank(status: OrderStatus) -> Option<u8> {
    match status {
        OrderStatus::Pending => Some(0),
        OrderStatus::Confirmed => Some(1),
        OrderStatus::Processing => Some(2),
        OrderStatus::Shipped => Some(3),
        OrderStatus::Delivered => Some(4),
        OrderStatus::Cancelled | OrderStatus::Returned => None,
    }
}

fn sub_order_rank(status: SubOrderStatus) -> Option<u8> {
    match status {
        SubOrderStatus::Pending => Some(0),
        SubOrderStatus::Processing => Some(1),
        SubOrderStatus::Shipped => Some(2),
        SubOrderStatus::Delivered => Some(3),
        SubOrderStatus::Cancelled | SubOrderStatus::Returned => None,
    }
}

/// Order moves forward along `pending → confirmed → processing → shipped →
/// delivered`; `cancelled` from any pre-delivered state; `returned` only from
/// `delivered`. Terminal states never move.
pub fn is_valid_order_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    match (from, to) {
        (Pending | Confirmed | Processing | Shipped, Cancelled) => true,
        (Delivered, Returned) => true,
        (a, b) => matches!((order_rank(a), order_rank(b)), (Some(x), Some(y)) if y > x),
    }
}

pub fn is_valid_sub_order_transition(from: SubOrderStatus, to: SubOrderStatus) -> bool {
    use SubOrderStatus::*;
    match (from, to) {
        (Pending | Processing | Shipped, Cancelled) => true,
        (Delivered, Returned) => true,
        (a, b) => matches!((sub_order_rank(a), sub_order_rank(b)), (Some(x), Some(y)) if y > x),
    }
}

/// Order status implied by its sub-orders, when it is ahead of the current one.
///
/// Live sub-orders (not cancelled) all at or beyond a fulfilment step pull the
/// order to that step; every sub-order cancelled cancels the order.
pub fn rolled_up_order_status(
    current: OrderStatus,
    sub_statuses: &[SubOrderStatus],
) -> Option<OrderStatus> {
    if sub_statuses.is_empty() {
        return None;
    }

    let live: Vec<SubOrderStatus> = sub_statuses
        .iter()
        .copied()
        .filter(|s| *s != SubOrderStatus::Cancelled)
        .collect();

    if live.is_empty() {
        return is_valid_order_transition(current, OrderStatus::Cancelled)
            .then_some(OrderStatus::Cancelled);
    }

    let floor = live
        .iter()
        .map(|s| match s {
            SubOrderStatus::Pending => OrderStatus::Pending,
            SubOrderStatus::Processing => OrderStatus::Processing,
            SubOrderStatus::Shipped => OrderStatus::Shipped,
            // Returned sub-orders were delivered first.
            SubOrderStatus::Delivered | SubOrderStatus::Returned => OrderStatus::Delivered,
            SubOrderStatus::Cancelled => OrderStatus::Pending,
        })
        .min_by_key(|s| order_rank(*s))?;

    (floor != OrderStatus::Pending && is_valid_order_transition(current, floor)).then_some(floor)
}

/// Cancels every sub-order of `order_id` that can still be cancelled.
pub async fn cascade_cancel_sub_orders<C>(conn: &C, order_id: Uuid) -> Result<u64, ServiceError>
where
    C: ConnectionTrait,
{
    let result = sub_order::Entity::update_many()
        .col_expr(
            sub_order::Column::Status,
            Expr::value(SubOrderStatus::Cancelled),
        )
        .col_expr(sub_order::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(sub_order::Column::OrderId.eq(order_id))
        .filter(sub_order::Column::Status.is_in([
            SubOrderStatus::Pending,
            SubOrderStatus::Processing,
            SubOrderStatus::Shipped,
        ]))
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(result.rows_affected)
}

#[derive(Clone)]
pub struct OrderStatusService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl OrderStatusService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Updates the status of an order; same-status is a no-op.
    #[instrument(skip(self), fields(order_id = %order_id, new_status = ?new_status))]
    pub async fn update_order_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        let uow = UnitOfWork::begin(&*self.db).await?;

        let order = order::Entity::find_by_id(order_id)
            .one(uow.conn())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let old_status = order.status;
        if old_status == new_status {
            uow.commit().await?;
            return Ok(order);
        }

        if !is_valid_order_transition(old_status, new_status) {
            error!(
                "Invalid status transition from {:?} to {:?}",
                old_status, new_status
            );
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot transition order from '{:?}' to '{:?}'",
                old_status, new_status
            )));
        }

        let result = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(new_status))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(old_status))
            .exec(uow.conn())
            .await
            .map_err(ServiceError::db_error)?;
        if result.rows_affected == 0 {
            return Err(ServiceError::InvalidStatus(format!(
                "Order {} changed status concurrently",
                order_id
            )));
        }

        let mut cancelled_sub_orders = 0;
        if new_status == OrderStatus::Cancelled {
            cancelled_sub_orders = cascade_cancel_sub_orders(uow.conn(), order_id).await?;
        }

        let updated = order::Entity::find_by_id(order_id)
            .one(uow.conn())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        uow.commit().await?;

        info!(
            cancelled_sub_orders,
            "Order {} status updated from '{:?}' to '{:?}'", order_id, old_status, new_status
        );

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            })
            .await;
        if new_status == OrderStatus::Cancelled {
            self.event_sender
                .send_or_log(Event::OrderCancelled(order_id))
                .await;
        }

        Ok(updated)
    }

    pub async fn cancel_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        self.update_order_status(order_id, OrderStatus::Cancelled)
            .await
    }

    /// Updates one seller's sub-order and rolls the order status forward when
    /// every live sub-order has caught up. Entering `delivered` stamps `delivered_at`.
    #[instrument(skip(self), fields(sub_order_id = %sub_order_id, new_status = ?new_status))]
    pub async fn update_sub_order_status(
        &self,
        sub_order_id: Uuid,
        new_status: SubOrderStatus,
    ) -> Result<sub_order::Model, ServiceError> {
        let uow = UnitOfWork::begin(&*self.db).await?;

        let sub = sub_order::Entity::find_by_id(sub_order_id)
            .one(uow.conn())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or(ServiceError::SubOrderNotFound(sub_order_id))?;

        let old_status = sub.status;
        if old_status == new_status {
            uow.commit().await?;
            return Ok(sub);
        }

        if !is_valid_sub_order_transition(old_status, new_status) {
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot transition sub-order from '{:?}' to '{:?}'",
                old_status, new_status
            )));
        }

        let now = Utc::now();
        let mut update = sub_order::Entity::update_many()
            .col_expr(sub_order::Column::Status, Expr::value(new_status))
            .col_expr(sub_order::Column::UpdatedAt, Expr::value(now));
        if new_status == SubOrderStatus::Delivered {
            update = update.col_expr(sub_order::Column::DeliveredAt, Expr::value(Some(now)));
        }
        let result = update
            .filter(sub_order::Column::Id.eq(sub_order_id))
            .filter(sub_order::Column::Status.eq(old_status))
            .exec(uow.conn())
            .await
            .map_err(ServiceError::db_error)?;
        if result.rows_affected == 0 {
            return Err(ServiceError::InvalidStatus(format!(
                "Sub-order {} changed status concurrently",
                sub_order_id
            )));
        }

        let order_change = self.roll_up(uow.conn(), sub.order_id).await?;

        let updated = sub_order::Entity::find_by_id(sub_order_id)
            .one(uow.conn())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or(ServiceError::SubOrderNotFound(sub_order_id))?;

        uow.commit().await?;

        info!(
            order_id = %sub.order_id,
            "Sub-order {} status updated from '{:?}' to '{:?}'", sub_order_id, old_status, new_status
        );

        self.event_sender
            .send_or_log(Event::SubOrderStatusChanged {
                order_id: sub.order_id,
                sub_order_id,
                old_status,
                new_status,
            })
            .await;
        if let Some((old, new)) = order_change {
            self.event_sender
                .send_or_log(Event::OrderStatusChanged {
                    order_id: sub.order_id,
                    old_status: old,
                    new_status: new,
                })
                .await;
        }

        Ok(updated)
    }

    async fn roll_up<C>(
        &self,
        conn: &C,
        order_id: Uuid,
    ) -> Result<Option<(OrderStatus, OrderStatus)>, ServiceError>
    where
        C: ConnectionTrait,
    {
        let Some(order) = order::Entity::find_by_id(order_id)
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
        else {
            warn!(%order_id, "sub-order points at a missing order");
            return Ok(None);
        };

        let statuses: Vec<SubOrderStatus> = sub_order::Entity::find()
            .filter(sub_order::Column::OrderId.eq(order_id))
            .all(conn)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|s| s.status)
            .collect();

        let Some(target) = rolled_up_order_status(order.status, &statuses) else {
            return Ok(None);
        };

        let result = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(target))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(order.status))
            .exec(conn)
            .await
            .map_err(ServiceError::db_error)?;

        Ok((result.rows_affected == 1).then_some((order.status, target)))
    }
}
