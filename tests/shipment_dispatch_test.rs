mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{item, order_request, seed_product, MockCollaborator, TestApp};
use rust_decimal_macros::dec;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use storefront_orchestrator::{
    entities::{shipment_job, sub_order, ShipmentJobStatus},
    services::orders::{CreateOrderOptions, OrderResult},
    services::shipments::ShipmentDispatcher,
};
use uuid::Uuid;

async fn two_seller_order(app: &TestApp) -> OrderResult {
    let a = seed_product(&app.db, Uuid::new_v4(), "Jute Bag", dec!(150), 5).await;
    let b = seed_product(&app.db, Uuid::new_v4(), "Clay Diya", dec!(40), 50).await;
    app.state
        .services
        .orders
        .create_order(
            order_request(Uuid::new_v4(), vec![item(&a, 1), item(&b, 6)]),
            CreateOrderOptions::default(),
        )
        .await
        .expect("order created")
}

fn dispatcher(app: &TestApp, collaborator: Arc<MockCollaborator>, max_attempts: i32) -> ShipmentDispatcher {
    ShipmentDispatcher::new(
        app.db.clone(),
        collaborator,
        Duration::from_secs(5),
        max_attempts,
    )
}

async fn jobs_for(app: &TestApp, order_id: Uuid) -> Vec<shipment_job::Model> {
    shipment_job::Entity::find()
        .filter(shipment_job::Column::OrderId.eq(order_id))
        .all(&*app.db)
        .await
        .expect("query jobs")
}

#[tokio::test]
async fn dispatch_stores_a_package_per_sub_order() {
    let app = TestApp::new().await;
    let placed = two_seller_order(&app).await;
    let collaborator = Arc::new(MockCollaborator::default());
    let dispatcher = dispatcher(&app, collaborator.clone(), 3);

    let stats = dispatcher
        .dispatch_order(placed.order.id)
        .await
        .expect("dispatch");
    assert_eq!(stats.claimed, 2);
    assert_eq!(stats.delivered, 2);
    assert_eq!(collaborator.call_count(), 2);

    for id in &placed.sub_order_ids {
        let sub = sub_order::Entity::find_by_id(*id)
            .one(&*app.db)
            .await
            .expect("query sub-order")
            .expect("sub-order");
        let package = sub.shipment_package().expect("package stored");
        assert!(package.tracking_id.starts_with("TRK-"));
        assert_eq!(package.courier, "Delhivery");
    }
    assert!(jobs_for(&app, placed.order.id)
        .await
        .iter()
        .all(|j| j.status == ShipmentJobStatus::Delivered));

    // Already packaged sub-orders are not sent twice.
    dispatcher
        .package_sub_order(placed.sub_order_ids[0])
        .await
        .expect("repackage");
    assert_eq!(collaborator.call_count(), 2);
}

#[tokio::test]
async fn carrier_failure_reschedules_without_touching_the_order() {
    let app = TestApp::new().await;
    let placed = two_seller_order(&app).await;
    let collaborator = Arc::new(MockCollaborator::failing(2));
    let dispatcher = dispatcher(&app, collaborator.clone(), 3);

    let stats = dispatcher
        .dispatch_order(placed.order.id)
        .await
        .expect("dispatch");
    assert_eq!(stats.retried, 2);
    assert_eq!(stats.delivered, 0);

    let jobs = jobs_for(&app, placed.order.id).await;
    for job in &jobs {
        assert_eq!(job.status, ShipmentJobStatus::Pending);
        assert_eq!(job.attempts, 1);
        assert!(job.available_at > Utc::now());
        assert!(job.last_error.as_deref().unwrap_or_default().contains("carrier unavailable"));
    }

    // Backoff keeps the jobs out of an immediate drain.
    let idle = dispatcher.drain(10).await.expect("drain");
    assert_eq!(idle.claimed, 0);

    let order = app
        .state
        .services
        .orders
        .get_order(placed.order.id)
        .await
        .expect("order still readable");
    assert_eq!(order.sub_orders.len(), 2);

    shipment_job::Entity::update_many()
        .col_expr(shipment_job::Column::AvailableAt, Expr::value(Utc::now()))
        .filter(shipment_job::Column::OrderId.eq(placed.order.id))
        .exec(&*app.db)
        .await
        .expect("make due");
    let retried = dispatcher.drain(10).await.expect("drain");
    assert_eq!(retried.delivered, 2);
}

#[tokio::test]
async fn jobs_fail_after_max_attempts() {
    let app = TestApp::new().await;
    let placed = two_seller_order(&app).await;
    let dispatcher = dispatcher(&app, Arc::new(MockCollaborator::failing(usize::MAX)), 1);

    let stats = dispatcher
        .dispatch_order(placed.order.id)
        .await
        .expect("dispatch");
    assert_eq!(stats.failed, 2);
    assert!(jobs_for(&app, placed.order.id)
        .await
        .iter()
        .all(|j| j.status == ShipmentJobStatus::Failed));
}

#[tokio::test]
async fn cancelled_sub_orders_are_not_packaged() {
    let app = TestApp::new().await;
    let placed = two_seller_order(&app).await;
    app.state
        .services
        .orders
        .cancel_order(placed.order.id)
        .await
        .expect("cancel");
    let collaborator = Arc::new(MockCollaborator::default());
    let dispatcher = dispatcher(&app, collaborator.clone(), 3);

    let stats = dispatcher
        .dispatch_order(placed.order.id)
        .await
        .expect("dispatch");
    assert_eq!(stats.claimed, 2);
    assert_eq!(collaborator.call_count(), 0);
}
