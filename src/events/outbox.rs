use crate::entities::shipment_job::{self, ShipmentJobStatus};
use crate::errors::ServiceError;
use crate::services::shipments::ShipmentDispatcher;
use chrono::Utc;
use metrics::counter;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const BASE_BACKOFF_SECS: u64 = 2;
const MAX_BACKOFF_SECS: u64 = 300;
/// A job left in `processing` this long is assumed orphaned by a crashed worker.
const STALE_PROCESSING_SECS: i64 = 600;
const BATCH_SIZE: u64 = 50;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainStats {
    pub claimed: usize,
    pub delivered: usize,
    pub retried: usize,
    pub failed: usize,
}

/// Records the intent to package a sub-order. Call inside the order's unit of work.
pub async fn enqueue_shipment_job(
    db: &impl ConnectionTrait,
    order_id: Uuid,
    sub_order_id: Uuid,
) -> Result<Uuid, ServiceError> {
    let now = Utc::now();
    let id = Uuid::new_v4();
    shipment_job::ActiveModel {
        id: Set(id),
        sub_order_id: Set(sub_order_id),
        order_id: Set(order_id),
        status: Set(ShipmentJobStatus::Pending),
        attempts: Set(0),
        available_at: Set(now),
        last_error: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .map_err(ServiceError::db_error)?;

    debug!(%id, %order_id, %sub_order_id, "enqueued shipment job");
    Ok(id)
}

/// Background worker polling due shipment jobs.
pub fn start_worker(
    db: Arc<DatabaseConnection>,
    dispatcher: Arc<ShipmentDispatcher>,
    poll_interval: Duration,
) -> JoinHandle<()> {
    info!(?poll_interval, "starting shipment outbox worker");
    tokio::spawn(async move {
        loop {
            if let Err(e) = requeue_stale(&db).await {
                error!("outbox requeue error: {}", e);
            }
            match drain_once(&db, &dispatcher, BATCH_SIZE).await {
                Ok(stats) if stats.claimed > 0 => debug!(?stats, "outbox drained"),
                Ok(_) => {}
                Err(e) => error!("outbox worker error: {}", e),
            }
            sleep(poll_interval).await;
        }
    })
}

/// Processes up to `batch_size` due jobs.
pub async fn drain_once(
    db: &DatabaseConnection,
    dispatcher: &ShipmentDispatcher,
    batch_size: u64,
) -> Result<DrainStats, ServiceError> {
    let jobs = shipment_job::Entity::find()
        .filter(shipment_job::Column::Status.eq(ShipmentJobStatus::Pending))
        .filter(shipment_job::Column::AvailableAt.lte(Utc::now()))
        .order_by_asc(shipment_job::Column::CreatedAt)
        .limit(batch_size)
        .all(db)
        .await
        .map_err(ServiceError::db_error)?;

    run_jobs(db, dispatcher, jobs).await
}

/// Processes the due jobs of one order; used right after the order commits.
pub async fn drain_order(
    db: &DatabaseConnection,
    dispatcher: &ShipmentDispatcher,
    order_id: Uuid,
) -> Result<DrainStats, ServiceError> {
    let jobs = shipment_job::Entity::find()
        .filter(shipment_job::Column::OrderId.eq(order_id))
        .filter(shipment_job::Column::Status.eq(ShipmentJobStatus::Pending))
        .filter(shipment_job::Column::AvailableAt.lte(Utc::now()))
        .order_by_asc(shipment_job::Column::CreatedAt)
        .all(db)
        .await
        .map_err(ServiceError::db_error)?;

    run_jobs(db, dispatcher, jobs).await
}

async fn run_jobs(
    db: &DatabaseConnection,
    dispatcher: &ShipmentDispatcher,
    jobs: Vec<shipment_job::Model>,
) -> Result<DrainStats, ServiceError> {
    let mut stats = DrainStats::default();

    for job in jobs {
        if !claim(db, &job).await? {
            continue;
        }
        stats.claimed += 1;
        let attempts = job.attempts + 1;

        match dispatcher.package_sub_order(job.sub_order_id).await {
            Ok(_) => {
                finish(db, job.id, ShipmentJobStatus::Delivered, None, Utc::now()).await?;
                counter!("shipment_jobs_total", 1, "outcome" => "delivered");
                stats.delivered += 1;
            }
            Err(e) if attempts < dispatcher.max_attempts() => {
                let retry_at = Utc::now() + backoff_for(attempts);
                warn!(
                    job_id = %job.id,
                    sub_order_id = %job.sub_order_id,
                    attempts,
                    error = %e,
                    "shipment packaging failed; scheduling retry"
                );
                finish(
                    db,
                    job.id,
                    ShipmentJobStatus::Pending,
                    Some(e.to_string()),
                    retry_at,
                )
                .await?;
                counter!("shipment_jobs_total", 1, "outcome" => "retry");
                stats.retried += 1;
            }
            Err(e) => {
                error!(
                    job_id = %job.id,
                    sub_order_id = %job.sub_order_id,
                    attempts,
                    error = %e,
                    "shipment packaging gave up after max attempts"
                );
                finish(
                    db,
                    job.id,
                    ShipmentJobStatus::Failed,
                    Some(e.to_string()),
                    Utc::now(),
                )
                .await?;
                counter!("shipment_jobs_total", 1, "outcome" => "failed");
                stats.failed += 1;
            }
        }
    }

    Ok(stats)
}

/// Moves a pending job to processing; false when another worker got there first.
async fn claim(db: &DatabaseConnection, job: &shipment_job::Model) -> Result<bool, ServiceError> {
    let result = shipment_job::Entity::update_many()
        .col_expr(
            shipment_job::Column::Status,
            Expr::value(ShipmentJobStatus::Processing),
        )
        .col_expr(
            shipment_job::Column::Attempts,
            Expr::col(shipment_job::Column::Attempts).add(1),
        )
        .col_expr(shipment_job::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(shipment_job::Column::Id.eq(job.id))
        .filter(shipment_job::Column::Status.eq(ShipmentJobStatus::Pending))
        .exec(db)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(result.rows_affected == 1)
}

async fn finish(
    db: &DatabaseConnection,
    job_id: Uuid,
    status: ShipmentJobStatus,
    last_error: Option<String>,
    available_at: chrono::DateTime<Utc>,
) -> Result<(), ServiceError> {
    shipment_job::Entity::update_many()
        .col_expr(shipment_job::Column::Status, Expr::value(status))
        .col_expr(shipment_job::Column::LastError, Expr::value(last_error))
        .col_expr(shipment_job::Column::AvailableAt, Expr::value(available_at))
        .col_expr(shipment_job::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(shipment_job::Column::Id.eq(job_id))
        .exec(db)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(())
}

/// Returns orphaned `processing` jobs to the queue.
pub async fn requeue_stale(db: &DatabaseConnection) -> Result<u64, ServiceError> {
    let cutoff = Utc::now() - chrono::Duration::seconds(STALE_PROCESSING_SECS);
    let result = shipment_job::Entity::update_many()
        .col_expr(
            shipment_job::Column::Status,
            Expr::value(ShipmentJobStatus::Pending),
        )
        .col_expr(shipment_job::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(shipment_job::Column::Status.eq(ShipmentJobStatus::Processing))
        .filter(shipment_job::Column::UpdatedAt.lt(cutoff))
        .exec(db)
        .await
        .map_err(ServiceError::db_error)?;
    if result.rows_affected > 0 {
        warn!(count = result.rows_affected, "requeued stale shipment jobs");
    }
    Ok(result.rows_affected)
}

/// Exponential backoff: 2s, 4s, 8s ... capped at five minutes.
pub fn backoff_for(attempts: i32) -> chrono::Duration {
    let exp = attempts.max(1) as u32;
    let secs = BASE_BACKOFF_SECS.saturating_pow(exp).min(MAX_BACKOFF_SECS);
    chrono::Duration::seconds(secs as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff_for(1), chrono::Duration::seconds(2));
        assert_eq!(backoff_for(3), chrono::Duration::seconds(8));
        assert_eq!(backoff_for(30), chrono::Duration::seconds(300));
        assert_eq!(backoff_for(0), chrono::Duration::seconds(2));
    }
}
