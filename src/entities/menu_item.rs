use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// A customization option within a group, e.g. "Extra cheese" for +20.00.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CustomizationOption {
    pub name: String,
    pub price: Decimal,
}

/// A named customization group on a menu item, e.g. "Toppings".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CustomizationGroup {
    pub group_name: String,
    pub options: Vec<CustomizationOption>,
}

/// The menu item's full customization catalog, stored as a JSON column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, FromJsonQueryResult, Default)]
pub struct Customizations(pub Vec<CustomizationGroup>);

/// Catalog collaborator. Read-only from this service's perspective.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "menu_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub restaurant_id: Uuid,
    pub name: String,
    pub price: Decimal,
    /// Zero means no discount is active.
    pub discounted_price: Decimal,
    pub is_available: bool,
    #[sea_orm(column_type = "Json")]
    pub customizations: Customizations,
    pub created_at: DateTime<Utc>,
}

impl Model {
    /// Unit price to snapshot into an order line: the discounted price when
    /// one is set, otherwise the list price.
    pub fn effective_price(&self) -> Decimal {
        if self.discounted_price > Decimal::ZERO {
            self.discounted_price
        } else {
            self.price
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::restaurant::Entity",
        from = "Column::RestaurantId",
        to = "super::restaurant::Column::Id"
    )]
    Restaurant,
}

impl Related<super::restaurant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Restaurant.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
