use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Catalog collaborator. Owned by the catalog subsystem; this service only
/// reads it when creating orders.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "restaurants")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub is_active: bool,
    pub is_approved: bool,
    pub delivery_fee: Decimal,
    /// Subtotal at or above which the delivery fee is waived.
    pub free_delivery_min_amount: Decimal,
    pub packaging_fee: Decimal,
    pub prep_time_minutes: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl Model {
    pub fn accepts_orders(&self) -> bool {
        self.is_active && self.is_approved
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::menu_item::Entity")]
    MenuItems,
}

impl Related<super::menu_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MenuItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
