pub mod cart;
pub mod order;
pub mod payment_webhook_event;
pub mod product;
pub mod return_request;
pub mod shipment_job;
pub mod sub_order;

pub use order::{
    Address, BillingInfo, BuyerContact, CouponSnapshot, GstMode, OrderStatus, PaymentStatus,
};
pub use return_request::{ReturnHistoryEntry, ReturnStatus};
pub use shipment_job::ShipmentJobStatus;
pub use sub_order::{Dimensions, LineItem, PaymentType, ShipmentPackage, SubOrderStatus};
