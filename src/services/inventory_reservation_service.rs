//! Inventory Reservation Service
//!
//! The only code path that decrements product stock. Runs on the caller's unit
//! of work so a failed order never leaves a partial decrement behind.

use metrics::counter;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::entities::product;
use crate::errors::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationLine {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// What a successful reservation decremented, one line per distinct product.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationReceipt {
    pub lines: Vec<ReservedLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedLine {
    pub product_id: Uuid,
    pub quantity: i32,
    pub remaining_stock: i32,
}

impl ReservationReceipt {
    pub fn total_units(&self) -> i64 {
        self.lines.iter().map(|l| l.quantity as i64).sum()
    }
}

#[derive(Clone)]
pub struct InventoryReservationService {
    db_pool: Arc<DatabaseConnection>,
}

impl InventoryReservationService {
    pub fn new(db_pool: Arc<DatabaseConnection>) -> Self {
        Self { db_pool }
    }

    /// Checks and decrements stock for every line.
    ///
    /// Duplicate product ids are merged. Each decrement is a guarded update
    /// (`stock >= qty`), so a concurrent writer that drained the product makes
    /// this call fail with `InsufficientStock` instead of driving stock negative.
    /// On error the caller must abandon its unit of work.
    #[instrument(skip(self, conn, items), fields(lines = items.len()))]
    pub async fn reserve<C>(
        &self,
        conn: &C,
        items: &[ReservationLine],
    ) -> Result<ReservationReceipt, ServiceError>
    where
        C: ConnectionTrait,
    {
        let mut wanted: BTreeMap<Uuid, i32> = BTreeMap::new();
        for item in items {
            if item.quantity < 1 {
                return Err(ServiceError::ValidationError(format!(
                    "quantity for product {} must be at least 1",
                    item.product_id
                )));
            }
            let entry = wanted.entry(item.product_id).or_insert(0);
            *entry = entry.checked_add(item.quantity).ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "quantity overflow for product {}",
                    item.product_id
                ))
            })?;
        }

        if wanted.is_empty() {
            return Ok(ReservationReceipt::default());
        }

        let products: HashMap<Uuid, product::Model> = product::Entity::find()
            .filter(product::Column::Id.is_in(wanted.keys().copied()))
            .all(conn)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        for (&product_id, &requested) in &wanted {
            let product = products.get(&product_id).ok_or_else(|| {
                counter!("inventory_reservations_rejected_total", 1, "reason" => "product_not_found");
                ServiceError::ProductNotFound(product_id)
            })?;
            if product.stock < requested {
                counter!("inventory_reservations_rejected_total", 1, "reason" => "insufficient_stock");
                return Err(ServiceError::InsufficientStock {
                    product_id,
                    available: product.stock,
                    requested,
                });
            }
        }

        let receipt = decrement_stock(conn, &wanted, &products).await?;
        debug!(units = receipt.total_units(), "inventory reserved");
        Ok(receipt)
    }

    /// Current stock of a product, outside any unit of work.
    pub async fn available_stock(&self, product_id: Uuid) -> Result<i32, ServiceError> {
        current_stock(&*self.db_pool, product_id)
            .await?
            .ok_or(ServiceError::ProductNotFound(product_id))
    }
}

/// Applies the guarded decrements. `products` is the snapshot the caller
/// checked against; a writer that committed since then is caught by the
/// `stock >= qty` guard.
async fn decrement_stock<C>(
    conn: &C,
    wanted: &BTreeMap<Uuid, i32>,
    products: &HashMap<Uuid, product::Model>,
) -> Result<ReservationReceipt, ServiceError>
where
    C: ConnectionTrait,
{
    // BTreeMap order gives every writer the same lock order.
    let mut receipt = ReservationReceipt::default();
    for (&product_id, &requested) in wanted {
        let result = product::Entity::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).sub(requested),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(chrono::Utc::now()))
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::Stock.gte(requested))
            .exec(conn)
            .await
            .map_err(ServiceError::db_error)?;

        if result.rows_affected == 0 {
            let available = current_stock(conn, product_id).await?.unwrap_or(0);
            warn!(
                %product_id,
                available,
                requested,
                "stock changed underneath reservation"
            );
            counter!("inventory_reservations_rejected_total", 1, "reason" => "insufficient_stock");
            return Err(ServiceError::InsufficientStock {
                product_id,
                available,
                requested,
            });
        }

        let before = products.get(&product_id).map(|p| p.stock).unwrap_or(requested);
        receipt.lines.push(ReservedLine {
            product_id,
            quantity: requested,
            remaining_stock: before - requested,
        });
    }
    Ok(receipt)
}

async fn current_stock<C>(conn: &C, product_id: Uuid) -> Result<Option<i32>, ServiceError>
where
    C: ConnectionTrait,
{
    Ok(product::Entity::find_by_id(product_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .map(|p| p.stock))
}
