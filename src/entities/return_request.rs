use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::order::OrderStatus;
use super::sub_order::SubOrderStatus;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum ReturnStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "approved")]
    Approved,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "rejected")]
    Rejected,
    #[sea_orm(string_value = "completed")]
    Completed,
}

impl ReturnStatus {
    /// Statuses that block another request for the same sub-order.
    pub const ACTIVE: [ReturnStatus; 3] = [
        ReturnStatus::Pending,
        ReturnStatus::Approved,
        ReturnStatus::Processing,
    ];

    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }
}

/// One append-only entry in a return's audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnHistoryEntry {
    pub status: ReturnStatus,
    pub actor: String,
    #[serde(default)]
    pub note: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "return_requests")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(indexed)]
    pub order_id: Uuid,
    #[sea_orm(indexed)]
    pub sub_order_id: Uuid,
    pub user_id: Uuid,
    pub seller_id: Uuid,
    pub reason: String,
    pub description: Option<String>,
    #[sea_orm(column_type = "Json")]
    pub items: Json,
    pub refund_amount: Decimal,
    pub return_window_days: i64,
    pub original_sub_order_status: SubOrderStatus,
    pub original_order_status: OrderStatus,
    pub status: ReturnStatus,
    #[sea_orm(column_type = "Json")]
    pub history: Json,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn history_entries(&self) -> Vec<ReturnHistoryEntry> {
        serde_json::from_value(self.history.clone()).unwrap_or_default()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
    #[sea_orm(
        belongs_to = "super::sub_order::Entity",
        from = "Column::SubOrderId",
        to = "super::sub_order::Column::Id"
    )]
    SubOrder,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl Related<super::sub_order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SubOrder.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
