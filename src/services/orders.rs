use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, Order,
    QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::UnitOfWork;
use crate::entities::{
    cart, order, product, sub_order, Address, BillingInfo, BuyerContact, CouponSnapshot, GstMode,
    LineItem, OrderStatus, PaymentStatus, PaymentType, SubOrderStatus,
};
use crate::errors::ServiceError;
use crate::events::{outbox, Event, EventSender};
use crate::services::inventory_reservation_service::{
    InventoryReservationService, ReservationLine,
};
use crate::services::order_status::OrderStatusService;
use crate::services::tax::{round_money, GstBreakdown, TaxCalculator};

const MAX_ORDER_NUMBER_ATTEMPTS: u32 = 3;
const MAX_ITEM_QUANTITY: i32 = 10_000;
/// Ceiling for any single client-supplied amount, in rupees.
const MAX_AMOUNT: i64 = 10_000_000_000;

/// Line of a cart-derived order request. The price is the checkout snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItemRequest {
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    /// Only consulted when inventory reservation is disabled and the product is unknown.
    #[serde(default)]
    pub seller_id: Option<Uuid>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub buyer_id: Uuid,
    #[serde(default)]
    pub items: Vec<OrderItemRequest>,
    pub delivery_address: Address,
    #[serde(default)]
    pub buyer_contact: Option<BuyerContact>,
    #[serde(default)]
    pub billing: Option<BillingInfo>,
    #[serde(default)]
    pub payment_method: String,
    #[serde(default)]
    pub coupon: Option<CouponSnapshot>,
    /// Order-level discount; defaults to the coupon's amount.
    #[serde(default)]
    pub discount: Option<Decimal>,
    #[serde(default)]
    pub shipping_cost: Decimal,
    /// GST percent override.
    #[serde(default)]
    pub gst_rate: Option<Decimal>,
    /// Ship-from state override; defaults to the configured warehouse state.
    #[serde(default)]
    pub seller_state: Option<String>,
    #[serde(default)]
    pub gateway_order_id: Option<String>,
    #[serde(default)]
    pub clear_cart: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct CreateOrderOptions {
    pub clear_cart: bool,
    pub payment_status_override: Option<PaymentStatus>,
    /// Off only for re-creating an order whose stock was never released.
    pub reserve_inventory: bool,
}

impl Default for CreateOrderOptions {
    fn default() -> Self {
        Self {
            clear_cart: false,
            payment_status_override: None,
            reserve_inventory: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub order: order::Model,
    pub order_number: String,
    pub sub_order_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDetails {
    pub order: order::Model,
    pub sub_orders: Vec<sub_order::Model>,
}

/// Money for one seller's slice of the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SellerTotals {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub shipping_cost: Decimal,
    pub gst: GstBreakdown,
    pub total: Decimal,
}

#[derive(Debug, Clone)]
pub struct OrderSettings {
    pub order_number_prefix: String,
    pub warehouse_state: Option<String>,
}

impl From<&AppConfig> for OrderSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            order_number_prefix: cfg.order_number_prefix.clone(),
            warehouse_state: cfg.warehouse_state.clone(),
        }
    }
}

pub fn format_order_number(prefix: &str, year: &str, sequence: u32) -> String {
    format!("{}-{}-{:05}", prefix, year, sequence)
}

fn order_number_stem(prefix: &str, at: DateTime<Utc>) -> (String, String) {
    let year = at.format("%y").to_string();
    let stem = format!("{}-{}-", prefix, year);
    (year, stem)
}

pub fn parse_order_sequence(order_number: &str, stem: &str) -> Option<u32> {
    order_number.strip_prefix(stem)?.parse().ok()
}

/// Splits `amount` across `weights` proportionally. Shares are truncated to
/// cents and the last share takes the remainder, so they always sum to the
/// rounded amount and none goes negative.
pub fn prorate(amount: Decimal, weights: &[Decimal]) -> Vec<Decimal> {
    if weights.is_empty() {
        return Vec::new();
    }
    let amount = round_money(amount.max(Decimal::ZERO));
    let total_weight: Decimal = weights.iter().map(|w| w.max(&Decimal::ZERO)).sum();
    let count = Decimal::from(weights.len() as u64);

    let mut shares = Vec::with_capacity(weights.len());
    let mut allocated = Decimal::ZERO;
    for weight in &weights[..weights.len() - 1] {
        let raw = if total_weight.is_zero() {
            amount / count
        } else {
            amount * weight.max(&Decimal::ZERO) / total_weight
        };
        let share = raw.round_dp_with_strategy(2, RoundingStrategy::ToZero);
        allocated += share;
        shares.push(share);
    }
    shares.push(amount - allocated);
    shares
}

/// Per-seller totals. Discount and shipping are pro-rated by subtotal share;
/// GST is computed on each seller's own taxable base with the order's mode and
/// rate, so sub-order totals reconcile to the order total within a cent each.
pub fn split_seller_totals(
    calculator: &TaxCalculator,
    subtotals: &[Decimal],
    discount: Decimal,
    shipping_cost: Decimal,
    mode: GstMode,
    rate: Decimal,
) -> Vec<SellerTotals> {
    let discounts = prorate(discount, subtotals);
    let shipping = prorate(shipping_cost, subtotals);

    subtotals
        .iter()
        .zip(discounts)
        .zip(shipping)
        .map(|((&subtotal, discount), shipping_cost)| {
            let gst =
                calculator.compute_with_mode(subtotal, discount, shipping_cost, mode, Some(rate));
            SellerTotals {
                subtotal,
                discount,
                shipping_cost,
                gst,
                total: TaxCalculator::total_with_tax(&gst),
            }
        })
        .collect()
}

fn validate_request(request: &CreateOrderRequest) -> Result<(), ServiceError> {
    let invalid = |msg: &str| Err(ServiceError::InvalidOrderRequest(msg.to_string()));
    let max_amount = Decimal::from(MAX_AMOUNT);

    if request.items.is_empty() {
        return invalid("order must contain at least one item");
    }
    if request.buyer_id.is_nil() {
        return invalid("buyer id is required");
    }
    if request.payment_method.trim().is_empty() {
        return invalid("payment method is required");
    }
    for item in &request.items {
        if item.quantity < 1 {
            return Err(ServiceError::InvalidOrderRequest(format!(
                "quantity for product {} must be at least 1",
                item.product_id
            )));
        }
        if item.quantity > MAX_ITEM_QUANTITY {
            return Err(ServiceError::InvalidOrderRequest(format!(
                "quantity for product {} exceeds {}",
                item.product_id, MAX_ITEM_QUANTITY
            )));
        }
        if item.unit_price < Decimal::ZERO {
            return Err(ServiceError::InvalidOrderRequest(format!(
                "unit price for product {} cannot be negative",
                item.product_id
            )));
        }
        if item.unit_price > max_amount {
            return Err(ServiceError::InvalidOrderRequest(format!(
                "unit price for product {} exceeds {}",
                item.product_id, max_amount
            )));
        }
    }
    if let Some(discount) = request.discount {
        if discount < Decimal::ZERO {
            return invalid("discount cannot be negative");
        }
        if discount > max_amount {
            return invalid("discount is too large");
        }
    }
    if request.shipping_cost < Decimal::ZERO {
        return invalid("shipping cost cannot be negative");
    }
    if request.shipping_cost > max_amount {
        return invalid("shipping cost is too large");
    }
    if request
        .gst_rate
        .map(|r| r > Decimal::ONE_HUNDRED)
        .unwrap_or(false)
    {
        return invalid("gst rate cannot exceed 100 percent");
    }
    if request.delivery_address.state.trim().is_empty() {
        return invalid("delivery address must include a state");
    }
    Ok(())
}

fn amount_overflow() -> ServiceError {
    ServiceError::InvalidOrderRequest("order amount is too large".into())
}

fn checked_sum(mut amounts: impl Iterator<Item = Decimal>) -> Result<Decimal, ServiceError> {
    amounts.try_fold(Decimal::ZERO, |acc, amount| {
        acc.checked_add(amount).ok_or_else(amount_overflow)
    })
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, ServiceError> {
    serde_json::to_value(value)
        .map_err(|e| ServiceError::InternalError(format!("failed to serialize snapshot: {}", e)))
}

/// Creates orders from checkout requests: one Order, one SubOrder per seller,
/// inventory reserved and shipment jobs queued in a single unit of work.
#[derive(Clone)]
pub struct OrderOrchestrator {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    reservations: InventoryReservationService,
    status: OrderStatusService,
    tax: TaxCalculator,
    settings: OrderSettings,
}

impl OrderOrchestrator {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        tax: TaxCalculator,
        settings: OrderSettings,
    ) -> Self {
        Self {
            reservations: InventoryReservationService::new(db.clone()),
            status: OrderStatusService::new(db.clone(), event_sender.clone()),
            db,
            event_sender,
            tax,
            settings,
        }
    }

    #[instrument(skip(self, request), fields(buyer_id = %request.buyer_id, items = request.items.len()))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
        options: CreateOrderOptions,
    ) -> Result<OrderResult, ServiceError> {
        validate_request(&request)?;

        let mut attempt = 0;
        let result = loop {
            attempt += 1;
            match self.try_create_order(&request, &options).await {
                Err(e) if e.is_unique_violation() && attempt < MAX_ORDER_NUMBER_ATTEMPTS => {
                    warn!(attempt, "order number collision; retrying");
                }
                other => break other,
            }
        };

        let result = result.map_err(|e| {
            error!(error = %e, buyer_id = %request.buyer_id, "Order creation failed");
            e
        })?;

        counter!("orders_created_total", 1);
        info!(
            order_id = %result.order.id,
            order_number = %result.order_number,
            sub_orders = result.sub_order_ids.len(),
            total = %result.order.total_amount,
            "Order created successfully"
        );

        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id: result.order.id,
                order_number: result.order_number.clone(),
            })
            .await;

        Ok(result)
    }

    async fn try_create_order(
        &self,
        request: &CreateOrderRequest,
        options: &CreateOrderOptions,
    ) -> Result<OrderResult, ServiceError> {
        let uow = UnitOfWork::begin(&*self.db).await?;
        let now = Utc::now();

        // Group by owning seller; BTreeMap keeps sub-order order stable.
        let product_ids: Vec<Uuid> = request.items.iter().map(|i| i.product_id).collect();
        let products: HashMap<Uuid, product::Model> = product::Entity::find()
            .filter(product::Column::Id.is_in(product_ids))
            .all(uow.conn())
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let mut groups: BTreeMap<Uuid, Vec<LineItem>> = BTreeMap::new();
        for item in &request.items {
            let line_total = item
                .unit_price
                .checked_mul(Decimal::from(item.quantity))
                .map(round_money)
                .ok_or_else(amount_overflow)?;
            let (seller_id, line) = match products.get(&item.product_id) {
                Some(p) => (
                    p.seller_id,
                    LineItem {
                        product_id: p.id,
                        name: p.name.clone(),
                        image_url: p.image_url.clone(),
                        quantity: item.quantity,
                        unit_price: item.unit_price,
                        line_total,
                        dimensions: p.dimensions(),
                    },
                ),
                None if options.reserve_inventory => {
                    return Err(ServiceError::ProductNotFound(item.product_id));
                }
                None => match item.seller_id {
                    Some(seller_id) => (
                        seller_id,
                        LineItem {
                            product_id: item.product_id,
                            name: item.name.clone().unwrap_or_default(),
                            image_url: item.image_url.clone(),
                            quantity: item.quantity,
                            unit_price: item.unit_price,
                            line_total,
                            dimensions: Default::default(),
                        },
                    ),
                    None => {
                        warn!(product_id = %item.product_id, "skipping unresolvable item");
                        continue;
                    }
                },
            };
            groups.entry(seller_id).or_default().push(line);
        }

        if groups.is_empty() {
            return Err(ServiceError::InvalidOrderRequest(
                "no item could be resolved to a seller".into(),
            ));
        }

        // Order-level money.
        let subtotals: Vec<Decimal> = groups
            .values()
            .map(|lines| checked_sum(lines.iter().map(|l| l.line_total)))
            .collect::<Result<_, _>>()?;
        let subtotal = checked_sum(subtotals.iter().copied())?;
        let discount = round_money(
            request
                .discount
                .or_else(|| request.coupon.as_ref().map(|c| c.discount_amount))
                .unwrap_or_default()
                .max(Decimal::ZERO),
        );
        if discount > subtotal {
            return Err(ServiceError::InvalidOrderRequest(format!(
                "discount {} exceeds subtotal {}",
                discount, subtotal
            )));
        }
        let shipping_cost = round_money(request.shipping_cost);
        let seller_state = request
            .seller_state
            .as_deref()
            .or(self.settings.warehouse_state.as_deref());
        let mode =
            TaxCalculator::resolve_mode(Some(request.delivery_address.state.as_str()), seller_state);
        let gst = self
            .tax
            .compute_with_mode(subtotal, discount, shipping_cost, mode, request.gst_rate);
        let total_amount = TaxCalculator::total_with_tax(&gst);

        let order_number = next_order_number(
            uow.conn(),
            &self.settings.order_number_prefix,
            now,
        )
        .await?;

        if options.reserve_inventory {
            let lines: Vec<ReservationLine> = groups
                .values()
                .flatten()
                .map(|l| ReservationLine {
                    product_id: l.product_id,
                    quantity: l.quantity,
                })
                .collect();
            self.reservations.reserve(uow.conn(), &lines).await?;
        }

        let order_id = Uuid::new_v4();
        let sub_order_ids: Vec<Uuid> = groups.keys().map(|_| Uuid::new_v4()).collect();
        let payment_status = options
            .payment_status_override
            .unwrap_or(PaymentStatus::Pending);
        let status = if payment_status == PaymentStatus::Paid {
            OrderStatus::Confirmed
        } else {
            OrderStatus::Pending
        };

        let order_model = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.clone()),
            buyer_id: Set(request.buyer_id),
            buyer_contact: Set(to_json(&request.buyer_contact.clone().unwrap_or_default())?),
            delivery_address: Set(to_json(&request.delivery_address)?),
            billing: Set(request.billing.as_ref().map(to_json).transpose()?),
            coupon: Set(request.coupon.as_ref().map(to_json).transpose()?),
            subtotal: Set(subtotal),
            discount: Set(discount),
            shipping_cost: Set(shipping_cost),
            taxable_amount: Set(gst.taxable_amount),
            gst_mode: Set(gst.mode),
            gst_rate: Set(gst.rate),
            cgst: Set(gst.cgst),
            sgst: Set(gst.sgst),
            igst: Set(gst.igst),
            gst_total: Set(gst.total),
            total_amount: Set(total_amount),
            payment_method: Set(request.payment_method.trim().to_string()),
            payment_status: Set(payment_status),
            gateway_order_id: Set(request.gateway_order_id.clone()),
            payment_transaction_id: Set(None),
            payment_failure_reason: Set(None),
            status: Set(status),
            sub_order_ids: Set(to_json(&sub_order_ids)?),
            order_date: Set(now),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(uow.conn())
        .await
        .map_err(ServiceError::db_error)?;

        let seller_totals = split_seller_totals(
            &self.tax,
            &subtotals,
            discount,
            shipping_cost,
            mode,
            gst.rate,
        );
        let payment_type = PaymentType::from_method(&request.payment_method);

        for (((seller_id, lines), totals), &sub_order_id) in groups
            .iter()
            .zip(seller_totals.iter())
            .zip(sub_order_ids.iter())
        {
            sub_order::ActiveModel {
                id: Set(sub_order_id),
                order_id: Set(order_id),
                seller_id: Set(*seller_id),
                items: Set(to_json(lines)?),
                subtotal: Set(totals.subtotal),
                discount: Set(totals.discount),
                shipping_cost: Set(totals.shipping_cost),
                taxable_amount: Set(totals.gst.taxable_amount),
                gst_mode: Set(totals.gst.mode),
                gst_rate: Set(totals.gst.rate),
                cgst: Set(totals.gst.cgst),
                sgst: Set(totals.gst.sgst),
                igst: Set(totals.gst.igst),
                gst_total: Set(totals.gst.total),
                total_amount: Set(totals.total),
                payment_type: Set(payment_type),
                status: Set(SubOrderStatus::Pending),
                shipment_package: Set(None),
                delivered_at: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(uow.conn())
            .await
            .map_err(ServiceError::db_error)?;

            outbox::enqueue_shipment_job(uow.conn(), order_id, sub_order_id).await?;
        }

        if request.clear_cart || options.clear_cart {
            clear_cart(uow.conn(), request.buyer_id, now).await?;
        }

        uow.commit().await?;

        Ok(OrderResult {
            order: order_model,
            order_number,
            sub_order_ids,
        })
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderDetails, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        self.with_sub_orders(order).await
    }

    /// Lookup used by clients that timed out after submitting an order.
    #[instrument(skip(self))]
    pub async fn get_order_by_number(
        &self,
        order_number: &str,
    ) -> Result<OrderDetails, ServiceError> {
        let order = order::Entity::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_number)))?;
        self.with_sub_orders(order).await
    }

    /// Sub-orders in the order recorded on the parent.
    pub async fn list_sub_orders(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<sub_order::Model>, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        Ok(self.with_sub_orders(order).await?.sub_orders)
    }

    async fn with_sub_orders(&self, order: order::Model) -> Result<OrderDetails, ServiceError> {
        let position: HashMap<Uuid, usize> = order
            .sub_order_id_list()
            .into_iter()
            .enumerate()
            .map(|(i, id)| (id, i))
            .collect();

        let mut sub_orders = sub_order::Entity::find()
            .filter(sub_order::Column::OrderId.eq(order.id))
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        sub_orders.sort_by_key(|s| position.get(&s.id).copied().unwrap_or(usize::MAX));

        Ok(OrderDetails { order, sub_orders })
    }

    pub async fn update_order_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        self.status.update_order_status(order_id, new_status).await
    }

    pub async fn update_sub_order_status(
        &self,
        sub_order_id: Uuid,
        new_status: SubOrderStatus,
    ) -> Result<sub_order::Model, ServiceError> {
        self.status
            .update_sub_order_status(sub_order_id, new_status)
            .await
    }

    pub async fn cancel_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        self.status.cancel_order(order_id).await
    }
}

/// Next number for the current year, scanning the latest issued in this unit of work.
async fn next_order_number<C>(
    conn: &C,
    prefix: &str,
    now: DateTime<Utc>,
) -> Result<String, ServiceError>
where
    C: ConnectionTrait,
{
    let (year, stem) = order_number_stem(prefix, now);
    let latest = order::Entity::find()
        .filter(order::Column::OrderNumber.starts_with(stem.as_str()))
        // Longer sequences sort first once they outgrow the zero padding.
        .order_by(Expr::cust("LENGTH(order_number)"), Order::Desc)
        .order_by_desc(order::Column::OrderNumber)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?;

    let next = latest
        .and_then(|o| parse_order_sequence(&o.order_number, &stem))
        .map(|n| n.saturating_add(1))
        .unwrap_or(1);
    Ok(format_order_number(prefix, &year, next))
}

async fn clear_cart<C>(conn: &C, buyer_id: Uuid, now: DateTime<Utc>) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    cart::Entity::insert(cart::ActiveModel {
        buyer_id: Set(buyer_id),
        items: Set(serde_json::json!([])),
        updated_at: Set(now),
    })
    .on_conflict(
        OnConflict::column(cart::Column::BuyerId)
            .update_columns([cart::Column::Items, cart::Column::UpdatedAt])
            .to_owned(),
    )
    .exec(conn)
    .await
    .map_err(ServiceError::db_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn request() -> CreateOrderRequest {
        CreateOrderRequest {
            buyer_id: Uuid::new_v4(),
            items: vec![OrderItemRequest {
                product_id: Uuid::new_v4(),
                quantity: 1,
                unit_price: dec!(10),
                seller_id: None,
                name: None,
                image_url: None,
            }],
            delivery_address: Address {
                line1: "1 MG Road".into(),
                city: "Bengaluru".into(),
                state: "Karnataka".into(),
                postal_code: "560001".into(),
                ..Default::default()
            },
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

    #[test]
    fn order_number_format_and_parse() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let (year, stem) = order_number_stem("ORD", at);
        assert_eq!(stem, "ORD-24-");
        assert_eq!(format_order_number("ORD", &year, 7), "ORD-24-00007");
        assert_eq!(format_order_number("ORD", &year, 123_456), "ORD-24-123456");
        assert_eq!(parse_order_sequence("ORD-24-00042", &stem), Some(42));
        assert_eq!(parse_order_sequence("ORD-23-00042", &stem), None);
    }

    #[test]
    fn validation_rejects_before_side_effects() {
        assert!(validate_request(&request()).is_ok());

        let mut r = request();
        r.items.clear();
        assert!(matches!(validate_request(&r), Err(ServiceError::InvalidOrderRequest(_))));

        let mut r = request();
        r.buyer_id = Uuid::nil();
        assert!(matches!(validate_request(&r), Err(ServiceError::InvalidOrderRequest(_))));

        let mut r = request();
        r.payment_method = "  ".into();
        assert!(matches!(validate_request(&r), Err(ServiceError::InvalidOrderRequest(_))));

        let mut r = request();
        r.items[0].quantity = 0;
        assert!(matches!(validate_request(&r), Err(ServiceError::InvalidOrderRequest(_))));

        let mut r = request();
        r.items[0].unit_price = dec!(-1);
        assert!(matches!(validate_request(&r), Err(ServiceError::InvalidOrderRequest(_))));
    }

    #[test]
    fn oversized_amounts_are_rejected_not_panicking() {
        let mut r = request();
        r.items[0].unit_price = Decimal::MAX;
        r.items[0].quantity = 2;
        assert!(matches!(validate_request(&r), Err(ServiceError::InvalidOrderRequest(_))));

        let mut r = request();
        r.items[0].quantity = MAX_ITEM_QUANTITY + 1;
        assert!(matches!(validate_request(&r), Err(ServiceError::InvalidOrderRequest(_))));

        let mut r = request();
        r.shipping_cost = Decimal::MAX;
        assert!(matches!(validate_request(&r), Err(ServiceError::InvalidOrderRequest(_))));

        let mut r = request();
        r.discount = Some(Decimal::MAX);
        assert!(matches!(validate_request(&r), Err(ServiceError::InvalidOrderRequest(_))));

        let mut r = request();
        r.gst_rate = Some(dec!(101));
        assert!(matches!(validate_request(&r), Err(ServiceError::InvalidOrderRequest(_))));

        let mut r = request();
        r.items[0].unit_price = Decimal::from(MAX_AMOUNT);
        r.items[0].quantity = MAX_ITEM_QUANTITY;
        assert!(validate_request(&r).is_ok());
    }

    #[test]
    fn checked_sum_reports_overflow() {
        assert_eq!(
            checked_sum([dec!(1.50), dec!(2.25)].into_iter()).ok(),
            Some(dec!(3.75))
        );
        assert!(matches!(
            checked_sum([Decimal::MAX, Decimal::ONE].into_iter()),
            Err(ServiceError::InvalidOrderRequest(_))
        ));
    }

    #[test]
    fn prorate_gives_remainder_to_last() {
        assert_eq!(
            prorate(dec!(10), &[dec!(1), dec!(1), dec!(1)]),
            vec![dec!(3.33), dec!(3.33), dec!(3.34)]
        );
        assert_eq!(
            prorate(dec!(0.02), &[dec!(1), dec!(1), dec!(1), dec!(1)]),
            vec![dec!(0.00), dec!(0.00), dec!(0.00), dec!(0.02)]
        );
        assert_eq!(prorate(dec!(5), &[dec!(0), dec!(0)]), vec![dec!(2.50), dec!(2.50)]);
        assert!(prorate(dec!(5), &[]).is_empty());
    }

    #[test]
    fn two_sellers_split_the_example_cart() {
        let calc = TaxCalculator::default();
        let totals = split_seller_totals(
            &calc,
            &[dec!(200), dec!(200)],
            Decimal::ZERO,
            Decimal::ZERO,
            GstMode::CgstSgst,
            dec!(18),
        );
        assert_eq!(totals.len(), 2);
        for t in &totals {
            assert_eq!(t.gst.total, dec!(36));
            assert_eq!(t.total, dec!(236));
        }
    }

    fn cents() -> impl Strategy<Value = Decimal> {
        (1i64..5_000_000).prop_map(|c| Decimal::new(c, 2))
    }

    proptest! {
        #[test]
        fn prorated_shares_sum_exactly(
            amount in 0i64..1_000_000,
            weights in prop::collection::vec(0i64..1_000_000, 1..8),
        ) {
            let amount = Decimal::new(amount, 2);
            let weights: Vec<Decimal> = weights.into_iter().map(|w| Decimal::new(w, 2)).collect();
            let shares = prorate(amount, &weights);
            prop_assert_eq!(shares.len(), weights.len());
            prop_assert_eq!(shares.iter().copied().sum::<Decimal>(), amount);
            prop_assert!(shares.iter().all(|s| *s >= Decimal::ZERO));
        }

        #[test]
        fn sub_order_totals_reconcile_within_a_cent_each(
            subtotals in prop::collection::vec(cents(), 1..6),
            discount_pct in 0u32..50,
            shipping in 0i64..50_000,
            intra in any::<bool>(),
        ) {
            let calc = TaxCalculator::default();
            let subtotal: Decimal = subtotals.iter().copied().sum();
            let discount = round_money(subtotal * Decimal::from(discount_pct) / dec!(100));
            let shipping = Decimal::new(shipping, 2);
            let mode = if intra { GstMode::CgstSgst } else { GstMode::Igst };

            let order_gst = calc.compute_with_mode(subtotal, discount, shipping, mode, None);
            let order_total = TaxCalculator::total_with_tax(&order_gst);
            let parts = split_seller_totals(&calc, &subtotals, discount, shipping, mode, dec!(18));

            let sum: Decimal = parts.iter().map(|p| p.total).sum();
            let tolerance = dec!(0.01) * Decimal::from(parts.len() as u64);
            prop_assert!((sum - order_total).abs() <= tolerance);
            prop_assert_eq!(parts.iter().map(|p| p.discount).sum::<Decimal>(), discount);
            prop_assert_eq!(parts.iter().map(|p| p.shipping_cost).sum::<Decimal>(), shipping);
        }
    }
}
