#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use serde_json::Value;
use storefront_orchestrator::{
    config::AppConfig,
    db::{self, DbConfig},
    entities::{order, product, sub_order, Address, ShipmentPackage},
    errors::ServiceError,
    events::{self, EventSender},
    services::orders::{CreateOrderRequest, OrderItemRequest},
    services::payments::sign_payload,
    services::shipments::ShipmentPackagingCollaborator,
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const WAREHOUSE_STATE: &str = "Karnataka";

/// Configuration used by every test: in-memory SQLite, a webhook secret and
/// a warehouse in Karnataka.
pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::new(
        "sqlite::memory:".to_string(),
        "127.0.0.1".to_string(),
        18_080,
        "test".to_string(),
    );
    cfg.db_max_connections = 1;
    cfg.db_min_connections = 1;
    cfg.payment_webhook_secret = Some(TEST_WEBHOOK_SECRET.to_string());
    cfg.warehouse_state = Some(WAREHOUSE_STATE.to_string());
    cfg
}

/// Fresh migrated in-memory database. A single connection keeps every
/// statement on the same SQLite instance.
pub async fn setup_db() -> Arc<DatabaseConnection> {
    let pool = db::establish_connection_with_config(&DbConfig {
        url: "sqlite::memory:".into(),
        max_connections: 1,
        min_connections: 1,
        sqlx_logging: false,
        ..Default::default()
    })
    .await
    .expect("failed to create test database");
    db::run_migrations(&pool)
        .await
        .expect("failed to run migrations in tests");
    Arc::new(pool)
}

/// Event channel whose consumer just drains events.
pub fn event_sender() -> (EventSender, tokio::task::JoinHandle<()>) {
    let (event_tx, event_rx) = mpsc::channel(256);
    let task = tokio::spawn(events::process_events(event_rx, None));
    (EventSender::new(event_tx), task)
}

/// Helper harness for spinning up an application state backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub db: Arc<DatabaseConnection>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(cfg: AppConfig) -> Self {
        let db = setup_db().await;
        let (event_sender, event_task) = event_sender();
        let state = AppState::new(db.clone(), cfg, event_sender);
        let router = storefront_orchestrator::build_router(state.clone());

        Self {
            router,
            state,
            db,
            _event_task: event_task,
        }
    }

    /// Send a JSON request through the full middleware stack.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Send raw bytes with explicit headers; used for signed webhooks.
    pub async fn request_raw(
        &self,
        method: Method,
        uri: &str,
        body: Vec<u8>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder
            .body(Body::from(body))
            .expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

pub async fn seed_product(
    db: &DatabaseConnection,
    seller_id: Uuid,
    name: &str,
    price: Decimal,
    stock: i32,
) -> product::Model {
    let now = Utc::now();
    product::ActiveModel {
        id: Set(Uuid::new_v4()),
        seller_id: Set(seller_id),
        name: Set(name.to_string()),
        image_url: Set(None),
        price: Set(price),
        stock: Set(stock),
        length_cm: Set(Some(Decimal::from(30))),
        breadth_cm: Set(Some(Decimal::from(20))),
        height_cm: Set(Some(Decimal::from(10))),
        weight_kg: Set(Some(Decimal::from(1))),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("seed product")
}

pub async fn stock_of(db: &DatabaseConnection, product_id: Uuid) -> i32 {
    product::Entity::find_by_id(product_id)
        .one(db)
        .await
        .expect("query product")
        .expect("product exists")
        .stock
}

pub fn address(state: &str) -> Address {
    Address {
        name: Some("Asha Rao".into()),
        line1: "12 MG Road".into(),
        line2: None,
        city: "Bengaluru".into(),
        state: state.into(),
        postal_code: "560001".into(),
        country: Some("IN".into()),
        phone: Some("+919800000000".into()),
    }
}

pub fn item(product: &product::Model, quantity: i32) -> OrderItemRequest {
    OrderItemRequest {
        product_id: product.id,
        quantity,
        unit_price: product.price,
        seller_id: None,
        name: None,
        image_url: None,
    }
}

pub fn order_request(buyer_id: Uuid, items: Vec<OrderItemRequest>) -> CreateOrderRequest {
    CreateOrderRequest {
        buyer_id,
        items,
        delivery_address: address(WAREHOUSE_STATE),
        buyer_contact: None,
        billing: None,
        payment_method: "prepaid".into(),
        coupon: None,
        discount: None,
        shipping_cost: Decimal::ZERO,
        gst_rate: None,
        seller_state: None,
        gateway_order_id: None,
        clear_cart: false,
    }
}

/// Body and signature header value for a gateway delivery.
pub fn signed(body: &Value) -> (Vec<u8>, String) {
    let raw = serde_json::to_vec(body).expect("serialize webhook");
    let signature = sign_payload(TEST_WEBHOOK_SECRET, &raw);
    (raw, signature)
}

pub fn captured_event(gateway_order_id: &str, payment_id: &str) -> Value {
    serde_json::json!({
        "event": "payment.captured",
        "payload": {
            "payment": {"entity": {"id": payment_id, "order_id": gateway_order_id}}
        }
    })
}

pub fn failed_event(gateway_order_id: &str, description: &str) -> Value {
    serde_json::json!({
        "event": "payment.failed",
        "payload": {
            "payment": {"entity": {
                "id": "pay_failed",
                "order_id": gateway_order_id,
                "error_description": description
            }}
        }
    })
}

/// Marks a sub-order delivered at the given time.
pub async fn mark_delivered_at(db: &DatabaseConnection, sub_order_id: Uuid, at: DateTime<Utc>) {
    sub_order::Entity::update_many()
        .col_expr(
            sub_order::Column::Status,
            Expr::value(storefront_orchestrator::entities::SubOrderStatus::Delivered),
        )
        .col_expr(sub_order::Column::DeliveredAt, Expr::value(Some(at)))
        .col_expr(sub_order::Column::UpdatedAt, Expr::value(at))
        .filter(sub_order::Column::Id.eq(sub_order_id))
        .exec(db)
        .await
        .expect("mark delivered");
}

/// Moves an order's placement date into the past.
pub async fn backdate_order(db: &DatabaseConnection, order_id: Uuid, at: DateTime<Utc>) {
    order::Entity::update_many()
        .col_expr(order::Column::OrderDate, Expr::value(at))
        .col_expr(order::Column::CreatedAt, Expr::value(at))
        .filter(order::Column::Id.eq(order_id))
        .exec(db)
        .await
        .expect("backdate order");
}

/// Carrier double: hands out sequential tracking ids, optionally failing first.
#[derive(Default)]
pub struct MockCollaborator {
    pub calls: AtomicUsize,
    pub fail_first: usize,
}

impl MockCollaborator {
    pub fn failing(times: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_first: times,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ShipmentPackagingCollaborator for MockCollaborator {
    async fn create_shipment_package(
        &self,
        sub_order: &sub_order::Model,
        _delivery_address: &Address,
        _buyer_phone: Option<&str>,
    ) -> Result<ShipmentPackage, ServiceError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first {
            return Err(ServiceError::ShipmentCollaboratorFailure(
                "carrier unavailable".into(),
            ));
        }
        Ok(ShipmentPackage {
            tracking_id: format!("TRK-{}", &sub_order.id.simple().to_string()[..8]),
            courier: "Delhivery".into(),
            dimensions: Default::default(),
        })
    }
}
