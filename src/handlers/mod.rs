pub mod orders;
pub mod payment_webhooks;
pub mod returns;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::orders::{OrderOrchestrator, OrderSettings};
use crate::services::payments::PaymentGatewayReconciler;
use crate::services::returns::{ReturnPolicy, ReturnWindowManager};
use crate::services::tax::TaxCalculator;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderOrchestrator>,
    pub payments: Arc<PaymentGatewayReconciler>,
    pub returns: Arc<ReturnWindowManager>,
}

impl AppServices {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender, config: &AppConfig) -> Self {
        let orders = Arc::new(OrderOrchestrator::new(
            db_pool.clone(),
            event_sender.clone(),
            TaxCalculator::new(config.gst_rate()),
            OrderSettings::from(config),
        ));
        let payments = Arc::new(PaymentGatewayReconciler::new(
            db_pool.clone(),
            event_sender.clone(),
            config.payment_webhook_secret.clone(),
        ));
        let returns = Arc::new(ReturnWindowManager::new(
            db_pool,
            event_sender,
            ReturnPolicy::from(config),
        ));

        Self {
            orders,
            payments,
            returns,
        }
    }
}
