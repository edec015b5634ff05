//! Shipment packaging.
//!
//! Packaging happens after the order commits: the dispatcher reads a queued
//! sub-order, asks the carrier collaborator for a package and stores the
//! result. A carrier failure never touches the order itself.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::entities::{
    order, sub_order, Address, Dimensions, LineItem, PaymentType, ShipmentPackage, SubOrderStatus,
};
use crate::errors::ServiceError;
use crate::events::outbox::{self, DrainStats};
use crate::events::{Event, EventSender};

/// Carrier integration that turns a sub-order into a trackable package.
#[async_trait]
pub trait ShipmentPackagingCollaborator: Send + Sync {
    async fn create_shipment_package(
        &self,
        sub_order: &sub_order::Model,
        delivery_address: &Address,
        buyer_phone: Option<&str>,
    ) -> Result<ShipmentPackage, ServiceError>;
}

/// Box dimensions for a set of lines: longest length and breadth, stacked
/// height and total weight.
pub fn package_dimensions(items: &[LineItem]) -> Dimensions {
    items.iter().fold(Dimensions::default(), |acc, item| {
        let qty = Decimal::from(item.quantity.max(0));
        Dimensions {
            length: acc.length.max(item.dimensions.length),
            breadth: acc.breadth.max(item.dimensions.breadth),
            height: acc.height + item.dimensions.height * qty,
            weight: acc.weight + item.dimensions.weight * qty,
        }
    })
}

#[derive(Debug, Serialize)]
struct CarrierRequest<'a> {
    reference: Uuid,
    order_id: Uuid,
    seller_id: Uuid,
    payment_type: PaymentType,
    collectable_amount: Decimal,
    declared_value: Decimal,
    items: &'a [LineItem],
    dimensions: Dimensions,
    delivery_address: &'a Address,
    phone: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CarrierResponse {
    tracking_id: String,
    courier: String,
    #[serde(default)]
    dimensions: Option<Dimensions>,
}

/// Posts packages to a carrier aggregator's JSON API.
#[derive(Clone)]
pub struct HttpShipmentCollaborator {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpShipmentCollaborator {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("carrier client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    /// `None` when no carrier endpoint is configured.
    pub fn from_config(cfg: &AppConfig) -> Result<Option<Self>, ServiceError> {
        match cfg.shipment_api_url.as_deref() {
            Some(url) if !url.trim().is_empty() => Ok(Some(Self::new(
                url,
                cfg.shipment_api_key.clone(),
                cfg.shipment_timeout(),
            )?)),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl ShipmentPackagingCollaborator for HttpShipmentCollaborator {
    #[instrument(skip_all, fields(sub_order_id = %sub_order.id))]
    async fn create_shipment_package(
        &self,
        sub_order: &sub_order::Model,
        delivery_address: &Address,
        buyer_phone: Option<&str>,
    ) -> Result<ShipmentPackage, ServiceError> {
        let items = sub_order.line_items();
        let dimensions = package_dimensions(&items);
        let collectable_amount = match sub_order.payment_type {
            PaymentType::Cod => sub_order.total_amount,
            PaymentType::Prepaid => Decimal::ZERO,
        };
        let body = CarrierRequest {
            reference: sub_order.id,
            order_id: sub_order.order_id,
            seller_id: sub_order.seller_id,
            payment_type: sub_order.payment_type,
            collectable_amount,
            declared_value: sub_order.total_amount,
            items: &items,
            dimensions,
            delivery_address,
            phone: buyer_phone,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ServiceError::ShipmentCollaboratorFailure(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ServiceError::ShipmentCollaboratorFailure(format!(
                "carrier returned {}",
                response.status()
            )));
        }

        let parsed: CarrierResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::ShipmentCollaboratorFailure(e.to_string()))?;

        Ok(ShipmentPackage {
            tracking_id: parsed.tracking_id,
            courier: parsed.courier,
            dimensions: parsed.dimensions.unwrap_or(dimensions),
        })
    }
}

/// Runs collaborator calls for queued sub-orders and records the packages.
pub struct ShipmentDispatcher {
    db: Arc<DatabaseConnection>,
    collaborator: Arc<dyn ShipmentPackagingCollaborator>,
    timeout: Duration,
    max_attempts: i32,
    event_sender: Option<EventSender>,
}

impl ShipmentDispatcher {
    pub fn new(
        db: Arc<DatabaseConnection>,
        collaborator: Arc<dyn ShipmentPackagingCollaborator>,
        timeout: Duration,
        max_attempts: i32,
    ) -> Self {
        Self {
            db,
            collaborator,
            timeout,
            max_attempts: max_attempts.max(1),
            event_sender: None,
        }
    }

    pub fn with_event_sender(mut self, event_sender: EventSender) -> Self {
        self.event_sender = Some(event_sender);
        self
    }

    pub fn max_attempts(&self) -> i32 {
        self.max_attempts
    }

    /// Packages one sub-order. `Ok(None)` when there is nothing to do: the
    /// sub-order is gone, cancelled, or already has a package.
    #[instrument(skip(self))]
    pub async fn package_sub_order(
        &self,
        sub_order_id: Uuid,
    ) -> Result<Option<ShipmentPackage>, ServiceError> {
        let Some(sub) = sub_order::Entity::find_by_id(sub_order_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
        else {
            warn!(%sub_order_id, "sub-order vanished before packaging");
            return Ok(None);
        };

        if sub.status == SubOrderStatus::Cancelled {
            debug!(%sub_order_id, "skipping cancelled sub-order");
            return Ok(None);
        }
        if sub.shipment_package.is_some() {
            debug!(%sub_order_id, "already packaged");
            return Ok(None);
        }

        let parent = order::Entity::find_by_id(sub.order_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", sub.order_id)))?;
        let address = parent.delivery_address().ok_or_else(|| {
            ServiceError::InternalError(format!("order {} has no delivery address", parent.id))
        })?;
        let contact = parent.buyer_contact();
        let phone = contact.phone.as_deref().or(address.phone.as_deref());

        let package = tokio::time::timeout(
            self.timeout,
            self.collaborator
                .create_shipment_package(&sub, &address, phone),
        )
        .await
        .map_err(|_| {
            ServiceError::ShipmentCollaboratorFailure(format!(
                "carrier timed out after {:?}",
                self.timeout
            ))
        })??;

        let stored = serde_json::to_value(&package)
            .map_err(|e| ServiceError::InternalError(e.to_string()))?;
        // Never overwrite a package a concurrent run already stored.
        let result = sub_order::Entity::update_many()
            .col_expr(sub_order::Column::ShipmentPackage, Expr::value(stored))
            .col_expr(sub_order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(sub_order::Column::Id.eq(sub_order_id))
            .filter(sub_order::Column::ShipmentPackage.is_null())
            .exec(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        if result.rows_affected == 0 {
            return Ok(None);
        }

        info!(
            %sub_order_id,
            tracking_id = %package.tracking_id,
            courier = %package.courier,
            "shipment package created"
        );
        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::ShipmentPackageCreated {
                    sub_order_id,
                    tracking_id: package.tracking_id.clone(),
                })
                .await;
        }

        Ok(Some(package))
    }

    /// Runs the queued jobs of a freshly committed order.
    pub async fn dispatch_order(&self, order_id: Uuid) -> Result<DrainStats, ServiceError> {
        outbox::drain_order(&self.db, self, order_id).await
    }

    /// Runs up to `batch_size` due jobs across all orders.
    pub async fn drain(&self, batch_size: u64) -> Result<DrainStats, ServiceError> {
        outbox::drain_once(&self.db, self, batch_size).await
    }
}
