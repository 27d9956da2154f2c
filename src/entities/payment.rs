use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use utoipa::ToSchema;
use uuid::Uuid;

/// Payment lifecycle. `refunded` and `cancelled` are terminal; `completed`
/// can only move forward to `refunded`.
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
pub enum PaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "refunded")]
    Refunded,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl PaymentStatus {
    /// Monotonic transition guard. A successful or refunded payment can
    /// never be demoted by a late failure event; a failed payment may still
    /// be captured by a retry.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        if *self == next {
            return false;
        }
        matches!(
            (*self, next),
            (Pending, Processing)
                | (Pending, Completed)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Pending, Refunded)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
                | (Processing, Refunded)
                | (Failed, Processing)
                | (Failed, Completed)
                | (Failed, Cancelled)
                | (Completed, Refunded)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Refunded | Self::Cancelled)
    }
}

/// Refund sub-state, orthogonal to the payment status.
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
pub enum RefundStatus {
    #[sea_orm(string_value = "none")]
    None,
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "processed")]
    Processed,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl RefundStatus {
    pub fn can_transition_to(&self, next: RefundStatus) -> bool {
        matches!(
            (*self, next),
            (RefundStatus::None, RefundStatus::Pending)
                | (RefundStatus::None, RefundStatus::Processed)
                | (RefundStatus::None, RefundStatus::Failed)
                | (RefundStatus::Pending, RefundStatus::Processed)
                | (RefundStatus::Pending, RefundStatus::Failed)
        )
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: String,
    pub payment_gateway: String,
    pub status: PaymentStatus,
    /// Gateway intent/order identifier, set once the intent is created.
    pub gateway_order_id: Option<String>,
    /// Gateway payment identifier, set at verification or capture.
    pub gateway_payment_id: Option<String>,
    pub gateway_signature: Option<String>,
    pub refund_status: RefundStatus,
    pub refund_amount: Option<Decimal>,
    pub refund_reason: Option<String>,
    pub refund_id: Option<String>,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub notes: Option<String>,
    #[sea_orm(column_type = "Json", nullable)]
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency token, same discipline as orders.
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
