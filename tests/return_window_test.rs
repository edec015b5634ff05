mod common;

use assert_matches::assert_matches;
use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use common::{
    backdate_order, body_json, item, mark_delivered_at, order_request, seed_product, TestApp,
};
use rust_decimal_macros::dec;
use serde_json::json;
use storefront_orchestrator::{
    entities::{order, sub_order, OrderStatus, ReturnStatus, SubOrderStatus},
    errors::ServiceError,
    services::orders::{CreateOrderOptions, OrderResult},
    services::returns::{ReturnRequestInput, UpdateReturnStatusInput},
};
use sea_orm::EntityTrait;
use uuid::Uuid;

struct Delivered {
    buyer: Uuid,
    placed: OrderResult,
}

/// Single-seller order delivered `days_ago` days ago.
async fn delivered_order(app: &TestApp, days_ago: i64) -> Delivered {
    let buyer = Uuid::new_v4();
    let p = seed_product(&app.db, Uuid::new_v4(), "Handloom Bedsheet", dec!(1200), 5).await;
    let placed = app
        .state
        .services
        .orders
        .create_order(
            order_request(buyer, vec![item(&p, 1)]),
            CreateOrderOptions::default(),
        )
        .await
        .expect("order created");
    let sub_id = placed.sub_order_ids[0];
    app.state
        .services
        .orders
        .update_sub_order_status(sub_id, SubOrderStatus::Delivered)
        .await
        .expect("deliver");

    let delivered_at = Utc::now() - Duration::days(days_ago);
    backdate_order(&app.db, placed.order.id, delivered_at - Duration::days(3)).await;
    mark_delivered_at(&app.db, sub_id, delivered_at).await;

    Delivered { buyer, placed }
}

fn return_input(d: &Delivered) -> ReturnRequestInput {
    ReturnRequestInput {
        order_id: d.placed.order.id,
        sub_order_id: d.placed.sub_order_ids[0],
        user_id: d.buyer,
        reason: "Colour differs from the listing".into(),
        description: None,
    }
}

async fn statuses(app: &TestApp, d: &Delivered) -> (OrderStatus, SubOrderStatus) {
    let order = order::Entity::find_by_id(d.placed.order.id)
        .one(&*app.db)
        .await
        .expect("query order")
        .expect("order");
    let sub = sub_order::Entity::find_by_id(d.placed.sub_order_ids[0])
        .one(&*app.db)
        .await
        .expect("query sub-order")
        .expect("sub-order");
    (order.status, sub.status)
}

#[tokio::test]
async fn return_outside_window_is_rejected() {
    let app = TestApp::new().await;
    let delivered = delivered_order(&app, 10).await;

    let err = app
        .state
        .services
        .returns
        .request_return(return_input(&delivered))
        .await
        .expect_err("window expired");
    assert_matches!(err, ServiceError::ReturnWindowExpired(7));
    assert_eq!(
        statuses(&app, &delivered).await,
        (OrderStatus::Delivered, SubOrderStatus::Delivered)
    );
}

#[tokio::test]
async fn return_inside_window_flips_statuses() {
    let app = TestApp::new().await;
    let delivered = delivered_order(&app, 3).await;

    let created = app
        .state
        .services
        .returns
        .request_return(return_input(&delivered))
        .await
        .expect("return accepted");

    assert_eq!(created.status, ReturnStatus::Pending);
    assert_eq!(created.refund_amount, dec!(1416));
    assert_eq!(created.return_window_days, 7);
    let history = created.history_entries();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, ReturnStatus::Pending);
    assert_eq!(
        statuses(&app, &delivered).await,
        (OrderStatus::Returned, SubOrderStatus::Returned)
    );

    let listed = app
        .state
        .services
        .returns
        .list_returns_for_order(delivered.placed.order.id)
        .await
        .expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, created.id);
}

#[tokio::test]
async fn second_active_request_is_a_conflict() {
    let app = TestApp::new().await;
    let delivered = delivered_order(&app, 1).await;
    let returns = app.state.services.returns.clone();

    let first = returns
        .request_return(return_input(&delivered))
        .await
        .expect("first request");
    let err = returns
        .request_return(return_input(&delivered))
        .await
        .expect_err("duplicate");
    assert_matches!(err, ServiceError::DuplicateActiveRequest(id) if id == first.id);
}

#[tokio::test]
async fn only_the_buyer_may_request_a_return() {
    let app = TestApp::new().await;
    let delivered = delivered_order(&app, 1).await;
    let mut input = return_input(&delivered);
    input.user_id = Uuid::new_v4();

    let err = app
        .state
        .services
        .returns
        .request_return(input)
        .await
        .expect_err("stranger");
    assert_matches!(err, ServiceError::SubOrderNotFound(_));
}

#[tokio::test]
async fn undelivered_sub_order_cannot_be_returned() {
    let app = TestApp::new().await;
    let buyer = Uuid::new_v4();
    let p = seed_product(&app.db, Uuid::new_v4(), "Planter", dec!(300), 5).await;
    let placed = app
        .state
        .services
        .orders
        .create_order(
            order_request(buyer, vec![item(&p, 1)]),
            CreateOrderOptions::default(),
        )
        .await
        .expect("order created");

    let err = app
        .state
        .services
        .returns
        .request_return(ReturnRequestInput {
            order_id: placed.order.id,
            sub_order_id: placed.sub_order_ids[0],
            user_id: buyer,
            reason: "Changed my mind".into(),
            description: None,
        })
        .await
        .expect_err("not delivered");
    assert_matches!(err, ServiceError::InvalidStatus(_));
}

#[tokio::test]
async fn returns_can_be_disabled() {
    let mut cfg = common::test_config();
    cfg.returns_enabled = false;
    let app = TestApp::with_config(cfg).await;
    let delivered = delivered_order(&app, 1).await;

    assert_matches!(
        app.state
            .services
            .returns
            .request_return(return_input(&delivered))
            .await,
        Err(ServiceError::ReturnsDisabled)
    );
}

#[tokio::test]
async fn rejection_restores_original_statuses() {
    let app = TestApp::new().await;
    let delivered = delivered_order(&app, 2).await;
    let returns = app.state.services.returns.clone();
    let created = returns
        .request_return(return_input(&delivered))
        .await
        .expect("return accepted");

    let rejected = returns
        .update_return_status(
            created.id,
            UpdateReturnStatusInput {
                status: ReturnStatus::Rejected,
                actor: "seller-ops".into(),
                note: Some("Item shows wear".into()),
            },
        )
        .await
        .expect("reject");

    assert_eq!(rejected.status, ReturnStatus::Rejected);
    let history = rejected.history_entries();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].actor, "seller-ops");
    assert_eq!(
        statuses(&app, &delivered).await,
        (OrderStatus::Delivered, SubOrderStatus::Delivered)
    );

    assert_matches!(
        returns
            .update_return_status(
                created.id,
                UpdateReturnStatusInput {
                    status: ReturnStatus::Approved,
                    actor: "seller-ops".into(),
                    note: None,
                },
            )
            .await,
        Err(ServiceError::InvalidStatus(_))
    );
}

#[tokio::test]
async fn rejecting_one_return_keeps_the_order_returned_while_a_sibling_stands() {
    let app = TestApp::new().await;
    let buyer = Uuid::new_v4();
    let a = seed_product(&app.db, Uuid::new_v4(), "Pashmina Shawl", dec!(2500), 3).await;
    let b = seed_product(&app.db, Uuid::new_v4(), "Marble Coaster", dec!(400), 3).await;
    let placed = app
        .state
        .services
        .orders
        .create_order(
            order_request(buyer, vec![item(&a, 1), item(&b, 1)]),
            CreateOrderOptions::default(),
        )
        .await
        .expect("order created");
    let delivered_at = Utc::now() - Duration::days(2);
    backdate_order(&app.db, placed.order.id, delivered_at - Duration::days(3)).await;
    for sub_id in &placed.sub_order_ids {
        app.state
            .services
            .orders
            .update_sub_order_status(*sub_id, SubOrderStatus::Delivered)
            .await
            .expect("deliver");
        mark_delivered_at(&app.db, *sub_id, delivered_at).await;
    }

    let returns = app.state.services.returns.clone();
    let mut requests = Vec::new();
    for sub_id in &placed.sub_order_ids {
        let created = returns
            .request_return(ReturnRequestInput {
                order_id: placed.order.id,
                sub_order_id: *sub_id,
                user_id: buyer,
                reason: "Arrived damaged".into(),
                description: None,
            })
            .await
            .expect("return accepted");
        requests.push(created);
    }

    let reject = || UpdateReturnStatusInput {
        status: ReturnStatus::Rejected,
        actor: "seller-ops".into(),
        note: None,
    };
    returns
        .update_return_status(requests[0].id, reject())
        .await
        .expect("reject first");

    let order_status = || {
        let db = app.db.clone();
        let id = placed.order.id;
        async move {
            order::Entity::find_by_id(id)
                .one(&*db)
                .await
                .expect("query order")
                .expect("order")
                .status
        }
    };
    let sub_status = |id: Uuid| {
        let db = app.db.clone();
        async move {
            sub_order::Entity::find_by_id(id)
                .one(&*db)
                .await
                .expect("query sub-order")
                .expect("sub-order")
                .status
        }
    };

    assert_eq!(order_status().await, OrderStatus::Returned);
    assert_eq!(sub_status(placed.sub_order_ids[0]).await, SubOrderStatus::Delivered);
    assert_eq!(sub_status(placed.sub_order_ids[1]).await, SubOrderStatus::Returned);
    let second = returns.get_return(requests[1].id).await.expect("second return");
    assert_eq!(second.status, ReturnStatus::Pending);

    returns
        .update_return_status(requests[1].id, reject())
        .await
        .expect("reject second");
    assert_eq!(order_status().await, OrderStatus::Delivered);
    assert_eq!(sub_status(placed.sub_order_ids[1]).await, SubOrderStatus::Delivered);
}

#[tokio::test]
async fn return_endpoints_round_trip_over_http() {
    let app = TestApp::new().await;
    let delivered = delivered_order(&app, 2).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/returns",
            Some(json!({
                "order_id": delivered.placed.order.id,
                "sub_order_id": delivered.placed.sub_order_ids[0],
                "user_id": delivered.buyer,
                "reason": "Wrong size"
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    let return_id = body["data"]["id"].as_str().expect("return id").to_string();

    let fetched = app
        .request(Method::GET, &format!("/api/v1/returns/{return_id}"), None)
        .await;
    assert_eq!(fetched.status(), StatusCode::OK);

    let again = app
        .request(
            Method::POST,
            "/api/v1/returns",
            Some(json!({
                "order_id": delivered.placed.order.id,
                "sub_order_id": delivered.placed.sub_order_ids[0],
                "user_id": delivered.buyer,
                "reason": "Wrong size"
            })),
        )
        .await;
    assert_eq!(again.status(), StatusCode::CONFLICT);
}
