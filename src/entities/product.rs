use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::sub_order::Dimensions;

/// Catalog product as seen by the orchestration core: owning seller, price
/// snapshot source and the stock counter reservations decrement.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(indexed)]
    pub seller_id: Uuid,
    pub name: String,
    pub image_url: Option<String>,
    pub price: Decimal,
    /// Available units; never negative.
    pub stock: i32,
    pub length_cm: Option<Decimal>,
    pub breadth_cm: Option<Decimal>,
    pub height_cm: Option<Decimal>,
    pub weight_kg: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            length: self.length_cm.unwrap_or_default(),
            breadth: self.breadth_cm.unwrap_or_default(),
            height: self.height_cm.unwrap_or_default(),
            weight: self.weight_kg.unwrap_or_default(),
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
