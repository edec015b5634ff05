/*!
 * Unit of Work
 *
 * Wraps a database transaction so multi-write operations either commit together
 * or leave no trace. Dropping an uncommitted unit of work rolls it back.
 */

use crate::errors::ServiceError;
use metrics::{counter, histogram};
use sea_orm::{DatabaseTransaction, TransactionTrait};
use std::ops::Deref;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct UnitOfWork {
    txn: DatabaseTransaction,
    id: Uuid,
    started: Instant,
}

impl UnitOfWork {
    /// Opens a transaction on the given connection (or nested savepoint on a transaction).
    pub async fn begin<C>(db: &C) -> Result<Self, ServiceError>
    where
        C: TransactionTrait,
    {
        let txn = db.begin().await.map_err(ServiceError::db_error)?;
        let id = Uuid::new_v4();
        debug!(transaction_id = %id, "Starting database transaction");
        counter!("storefront_db.transaction.started", 1);
        Ok(Self {
            txn,
            id,
            started: Instant::now(),
        })
    }

    /// The transaction handle every query in this unit must run on.
    pub fn conn(&self) -> &DatabaseTransaction {
        &self.txn
    }

    pub async fn commit(self) -> Result<(), ServiceError> {
        let Self { txn, id, started } = self;
        match txn.commit().await {
            Ok(()) => {
                let elapsed = started.elapsed();
                histogram!("storefront_db.transaction.duration", elapsed.as_secs_f64());
                counter!("storefront_db.transaction.committed", 1);
                debug!(transaction_id = %id, "Transaction committed in {:?}", elapsed);
                Ok(())
            }
            Err(e) => {
                counter!("storefront_db.transaction.rolled_back", 1);
                warn!(transaction_id = %id, error = %e, "Transaction commit failed");
                Err(ServiceError::db_error(e))
            }
        }
    }

    pub async fn rollback(self) -> Result<(), ServiceError> {
        let Self { txn, id, started } = self;
        counter!("storefront_db.transaction.rolled_back", 1);
        warn!(transaction_id = %id, "Transaction rolled back after {:?}", started.elapsed());
        txn.rollback().await.map_err(ServiceError::db_error)
    }
}

impl Deref for UnitOfWork {
    type Target = DatabaseTransaction;

    fn deref(&self) -> &Self::Target {
        &self.txn
    }
}
