use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use utoipa::ToSchema;
use uuid::Uuid;

use super::menu_item::CustomizationGroup;

/// Order lifecycle states. `completed` and `refunded` are terminal.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "confirmed")]
    Confirmed,
    #[sea_orm(string_value = "preparing")]
    Preparing,
    #[sea_orm(string_value = "ready")]
    Ready,
    #[sea_orm(string_value = "out_for_delivery")]
    OutForDelivery,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "refunded")]
    Refunded,
    #[sea_orm(string_value = "refund_requested")]
    RefundRequested,
    #[sea_orm(string_value = "refund_failed")]
    RefundFailed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Refunded)
    }
}

/// The order's view of its payment, kept in step with the Payment record.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    Display,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderPaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

impl OrderPaymentStatus {
    /// Rank-guarded transitions: a late failure can never demote `paid`,
    /// and `refunded` is terminal.
    pub fn can_transition_to(&self, next: OrderPaymentStatus) -> bool {
        use OrderPaymentStatus::*;
        matches!(
            (*self, next),
            (Pending, Paid) | (Pending, Failed) | (Failed, Paid) | (Paid, Refunded)
        )
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    Display,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderType {
    #[sea_orm(string_value = "delivery")]
    Delivery,
    #[sea_orm(string_value = "pickup")]
    Pickup,
    #[sea_orm(string_value = "dine_in")]
    DineIn,
}

/// One line of an order. Name and prices are snapshots taken at order time,
/// immune to later menu edits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderItem {
    pub menu_item_id: Uuid,
    pub name: String,
    /// Unit price at order time (discounted price when one was active).
    pub price: Decimal,
    pub quantity: u32,
    /// Selected customization groups with the chosen options snapshotted.
    #[serde(default)]
    pub customizations: Vec<CustomizationGroup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub special_instructions: Option<String>,
    /// (unit price + customization prices) * quantity.
    pub total_price: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, FromJsonQueryResult, Default)]
pub struct OrderItems(pub Vec<OrderItem>);

/// Append-only record of a status change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StatusEntry {
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, FromJsonQueryResult, Default)]
pub struct StatusHistory(pub Vec<StatusEntry>);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, FromJsonQueryResult, ToSchema)]
pub struct DeliveryAddress {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    pub restaurant_id: Uuid,
    #[sea_orm(column_type = "Json")]
    pub items: OrderItems,
    pub status: OrderStatus,
    #[sea_orm(column_type = "Json")]
    pub status_history: StatusHistory,
    pub order_type: OrderType,
    pub payment_method: String,
    pub payment_id: Option<Uuid>,
    pub payment_status: OrderPaymentStatus,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub delivery_fee: Decimal,
    pub packaging_fee: Decimal,
    pub discount: Decimal,
    pub coupon_code: Option<String>,
    pub total_amount: Decimal,
    #[sea_orm(column_type = "Json", nullable)]
    pub delivery_address: Option<DeliveryAddress>,
    pub contact_phone: String,
    pub estimated_delivery_time: Option<DateTime<Utc>>,
    pub actual_delivery_time: Option<DateTime<Utc>>,
    pub delivery_person_id: Option<Uuid>,
    pub cancellation_reason: Option<String>,
    pub cancellation_time: Option<DateTime<Utc>>,
    pub cancelled_by: Option<Uuid>,
    pub refund_amount: Option<Decimal>,
    pub refund_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency token. Every write filters on the expected
    /// version and increments it.
    pub version: i32,
}

impl Model {
    /// Cancellation is allowed from any state except the post-delivery and
    /// refunded ones, for privileged actors too.
    pub fn can_be_cancelled(&self) -> bool {
        !matches!(
            self.status,
            OrderStatus::Delivered | OrderStatus::Completed | OrderStatus::Refunded
        )
    }

    /// Item-level modification is only possible before the kitchen starts.
    pub fn can_be_modified(&self) -> bool {
        !matches!(
            self.status,
            OrderStatus::Preparing
                | OrderStatus::Ready
                | OrderStatus::OutForDelivery
                | OrderStatus::Delivered
                | OrderStatus::Completed
                | OrderStatus::Cancelled
                | OrderStatus::Refunded
        )
    }

    /// Server-side total: subtotal + tax + fees - discount.
    pub fn computed_total(&self) -> Decimal {
        self.subtotal + self.tax_amount + self.delivery_fee + self.packaging_fee - self.discount
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
