// Order orchestration
pub mod orders;
pub mod order_status;

// Pricing and stock
pub mod inventory_reservation_service;
pub mod tax;

// Post-order flows
pub mod payments;
pub mod returns;
pub mod shipments;

pub use inventory_reservation_service::InventoryReservationService;
pub use orders::OrderOrchestrator;
pub use payments::PaymentGatewayReconciler;
pub use returns::ReturnWindowManager;
pub use shipments::{ShipmentDispatcher, ShipmentPackagingCollaborator};
pub use tax::TaxCalculator;
