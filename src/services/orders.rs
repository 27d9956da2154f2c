use chrono::{Duration, Utc};
use metrics::counter;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait,
    IntoActiveModel, PaginatorTrait, QueryFilter, QueryOrder,
};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthUser;
use crate::db::DbPool;
use crate::entities::menu_item::{CustomizationGroup, CustomizationOption};
use crate::entities::order::{
    self, DeliveryAddress, OrderItem, OrderItems, OrderPaymentStatus, OrderStatus, OrderType,
    StatusEntry, StatusHistory,
};
use crate::entities::restaurant;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::catalog::CatalogService;
use crate::services::order_status;

/// Default kitchen prep time when the restaurant has not configured one.
const DEFAULT_PREP_MINUTES: i64 = 30;
/// Flat delivery leg added on top of prep time for the estimate.
const DELIVERY_MINUTES: i64 = 20;

/// A requested customization: group name plus the chosen option names.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CustomizationSelection {
    pub group_name: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct NewOrderItem {
    pub menu_item_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: u32,
    #[serde(default)]
    pub customizations: Vec<CustomizationSelection>,
    pub special_instructions: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct NewOrder {
    pub restaurant_id: Uuid,
    #[validate(length(min = 1, message = "Order must contain at least one item"))]
    pub items: Vec<NewOrderItem>,
    pub order_type: OrderType,
    #[validate(length(min = 1, message = "Payment method is required"))]
    pub payment_method: String,
    pub delivery_address: Option<DeliveryAddress>,
    #[validate(length(min = 5, message = "Contact phone is required"))]
    pub contact_phone: String,
    pub coupon_code: Option<String>,
}

#[derive(Clone)]
pub struct OrderService {
    db: DbPool,
    events: EventSender,
    tax_rate: Decimal,
}

/// Guarded write: matches on `(id, version)` so a concurrent writer makes
/// this update affect zero rows instead of clobbering newer state.
pub(crate) async fn guarded_order_update<C: ConnectionTrait>(
    conn: &C,
    current: &order::Model,
    mut fields: order::ActiveModel,
) -> Result<(), ServiceError> {
    fields.updated_at = Set(Utc::now());
    fields.version = Set(current.version + 1);
    let result = order::Entity::update_many()
        .set(fields)
        .filter(order::Column::Id.eq(current.id))
        .filter(order::Column::Version.eq(current.version))
        .exec(conn)
        .await?;
    if result.rows_affected == 0 {
        return Err(ServiceError::ConcurrentModification(current.id));
    }
    Ok(())
}

/// Builds the field set for a status change: new status, history entry, and
/// the status-specific side effects.
pub(crate) fn status_change_fields(
    current: &order::Model,
    new_status: OrderStatus,
    actor: Option<Uuid>,
    note: Option<String>,
) -> order::ActiveModel {
    let now = Utc::now();
    let mut history = current.status_history.clone();
    history.0.push(StatusEntry {
        status: new_status,
        timestamp: now,
        updated_by: actor,
        note: note.clone(),
    });

    let mut fields = order::ActiveModel {
        status: Set(new_status),
        status_history: Set(history),
        ..Default::default()
    };
    match new_status {
        OrderStatus::Delivered => {
            fields.actual_delivery_time = Set(Some(now));
        }
        OrderStatus::Cancelled => {
            fields.cancellation_time = Set(Some(now));
            fields.cancelled_by = Set(actor);
            fields.cancellation_reason =
                Set(Some(note.unwrap_or_else(|| "No reason provided".to_string())));
        }
        OrderStatus::Refunded => {
            fields.refund_time = Set(Some(now));
        }
        _ => {}
    }
    fields
}

impl OrderService {
    pub fn new(db: DbPool, events: EventSender, tax_rate: f64) -> Self {
        Self {
            db,
            events,
            tax_rate: Decimal::from_f64(tax_rate).unwrap_or_else(|| Decimal::new(5, 2)),
        }
    }

    /// Create an order: snapshot prices and names from the live menu,
    /// compute totals server-side, persist as `pending`.
    #[instrument(skip(self, input), fields(restaurant_id = %input.restaurant_id))]
    pub async fn create_order(
        &self,
        user_id: Uuid,
        input: NewOrder,
    ) -> Result<order::Model, ServiceError> {
        input.validate()?;
        for item in &input.items {
            item.validate()?;
        }
        if input.order_type == OrderType::Delivery && input.delivery_address.is_none() {
            return Err(ServiceError::ValidationError(
                "Delivery orders require a delivery address".into(),
            ));
        }

        let restaurant = CatalogService::resolve_restaurant(&self.db, input.restaurant_id).await?;

        let mut lines: Vec<OrderItem> = Vec::with_capacity(input.items.len());
        let mut subtotal = Decimal::ZERO;
        for requested in &input.items {
            let item = CatalogService::find_menu_item(&self.db, requested.menu_item_id)
                .await?
                .filter(|m| m.restaurant_id == restaurant.id && m.is_available)
                .ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "Menu item {} is not available",
                        requested.menu_item_id
                    ))
                })?;

            let unit_price = item.effective_price();
            let customizations =
                resolve_customizations(&item.customizations.0, &requested.customizations, item.id);
            let options_price: Decimal = customizations
                .iter()
                .flat_map(|g| g.options.iter())
                .map(|o| o.price)
                .sum();
            let total_price =
                (unit_price + options_price) * Decimal::from(requested.quantity);

            subtotal += total_price;
            lines.push(OrderItem {
                menu_item_id: item.id,
                name: item.name,
                price: unit_price,
                quantity: requested.quantity,
                customizations,
                special_instructions: requested.special_instructions.clone(),
                total_price,
            });
        }

        let tax_amount = (subtotal * self.tax_rate).round_dp(2);
        let delivery_fee = if input.order_type == OrderType::Delivery {
            if restaurant.free_delivery_min_amount > Decimal::ZERO
                && subtotal >= restaurant.free_delivery_min_amount
            {
                Decimal::ZERO
            } else {
                restaurant.delivery_fee
            }
        } else {
            Decimal::ZERO
        };
        let packaging_fee = restaurant.packaging_fee;
        let discount = Decimal::ZERO;
        let total_amount = subtotal + tax_amount + delivery_fee + packaging_fee - discount;

        let now = Utc::now();
        let estimated_delivery_time = (input.order_type == OrderType::Delivery).then(|| {
            let prep = restaurant
                .prep_time_minutes
                .map(i64::from)
                .unwrap_or(DEFAULT_PREP_MINUTES);
            now + Duration::minutes(prep + DELIVERY_MINUTES)
        });

        let order = order::Model {
            id: Uuid::new_v4(),
            user_id,
            restaurant_id: restaurant.id,
            items: OrderItems(lines),
            status: OrderStatus::Pending,
            status_history: StatusHistory(vec![StatusEntry {
                status: OrderStatus::Pending,
                timestamp: now,
                updated_by: Some(user_id),
                note: None,
            }]),
            order_type: input.order_type,
            payment_method: input.payment_method,
            payment_id: None,
            payment_status: OrderPaymentStatus::Pending,
            subtotal,
            tax_amount,
            delivery_fee,
            packaging_fee,
            discount,
            coupon_code: input.coupon_code,
            total_amount,
            delivery_address: input.delivery_address,
            contact_phone: input.contact_phone,
            estimated_delivery_time,
            actual_delivery_time: None,
            delivery_person_id: None,
            cancellation_reason: None,
            cancellation_time: None,
            cancelled_by: None,
            refund_amount: None,
            refund_time: None,
            created_at: now,
            updated_at: now,
            version: 1,
        };

        let active = order.clone().into_active_model().reset_all();
        order::Entity::insert(active).exec(&self.db).await?;

        counter!("orders.created", 1);
        self.events.send(Event::OrderCreated {
            order_id: order.id,
            user_id,
            restaurant_id: restaurant.id,
        });
        Ok(order)
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        order::Entity::find_by_id(order_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))
    }

    /// Fetch an order the actor is allowed to see: the customer who placed
    /// it, the restaurant's owner, the assigned courier, or an admin.
    pub async fn get_order_for(
        &self,
        order_id: Uuid,
        actor: &AuthUser,
    ) -> Result<order::Model, ServiceError> {
        let order = self.get_order(order_id).await?;
        self.check_order_access(&order, actor).await?;
        Ok(order)
    }

    async fn check_order_access(
        &self,
        order: &order::Model,
        actor: &AuthUser,
    ) -> Result<(), ServiceError> {
        if actor.is_admin()
            || order.user_id == actor.id
            || order.delivery_person_id == Some(actor.id)
        {
            return Ok(());
        }
        if actor.role == crate::auth::Role::RestaurantOwner {
            let owns = restaurant::Entity::find_by_id(order.restaurant_id)
                .one(&self.db)
                .await?
                .map(|r| r.owner_id == actor.id)
                .unwrap_or(false);
            if owns {
                return Ok(());
            }
        }
        Err(ServiceError::Forbidden(
            "You do not have access to this order".into(),
        ))
    }

    pub async fn list_user_orders(
        &self,
        user_id: Uuid,
        status: Option<OrderStatus>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let mut query = order::Entity::find().filter(order::Column::UserId.eq(user_id));
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status));
        }
        let paginator = query
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&self.db, per_page.max(1));
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((orders, total))
    }

    /// Orders for one restaurant, for its owner or an admin.
    pub async fn list_restaurant_orders(
        &self,
        restaurant_id: Uuid,
        actor: &AuthUser,
        status: Option<OrderStatus>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        if !actor.is_admin() {
            let owns = restaurant::Entity::find_by_id(restaurant_id)
                .one(&self.db)
                .await?
                .map(|r| r.owner_id == actor.id)
                .unwrap_or(false);
            if !owns {
                return Err(ServiceError::Forbidden(
                    "You do not manage this restaurant".into(),
                ));
            }
        }
        let mut query =
            order::Entity::find().filter(order::Column::RestaurantId.eq(restaurant_id));
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status));
        }
        let paginator = query
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&self.db, per_page.max(1));
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((orders, total))
    }

    /// Generic status update. Unprivileged actors are bound by the
    /// transition table; actors with the force capability bypass it.
    #[instrument(skip(self, actor, note), fields(actor_id = %actor.id))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
        actor: &AuthUser,
        note: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        let order = self.get_order(order_id).await?;
        self.check_order_access(&order, actor).await?;
        if order.status == new_status {
            return Ok(order);
        }
        order_status::check_transition(order.status, new_status, actor.can_force_transition())?;

        let fields = status_change_fields(&order, new_status, Some(actor.id), note);
        guarded_order_update(&self.db, &order, fields).await?;

        self.events.send(Event::OrderStatusChanged {
            order_id,
            from: order.status,
            to: new_status,
        });
        self.get_order(order_id).await
    }

    /// Cancel path. `can_be_cancelled` gates every actor, privileged or not.
    #[instrument(skip(self, actor, reason), fields(actor_id = %actor.id))]
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        actor: &AuthUser,
        reason: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        let order = self.get_order(order_id).await?;
        self.check_order_access(&order, actor).await?;
        if !order.can_be_cancelled() {
            return Err(ServiceError::conflict(format!(
                "Order in status {} cannot be cancelled",
                order.status
            )));
        }
        if order.status == OrderStatus::Cancelled {
            return Ok(order);
        }

        let fields = status_change_fields(&order, OrderStatus::Cancelled, Some(actor.id), reason);
        guarded_order_update(&self.db, &order, fields).await?;

        self.events.send(Event::OrderCancelled {
            order_id,
            cancelled_by: actor.id,
        });
        counter!("orders.cancelled", 1);
        self.get_order(order_id).await
    }

    /// Assign the courier. Restricted to admins and the restaurant's owner.
    pub async fn assign_delivery_person(
        &self,
        order_id: Uuid,
        delivery_person_id: Uuid,
        actor: &AuthUser,
    ) -> Result<order::Model, ServiceError> {
        if !actor.can_manage_orders() {
            return Err(ServiceError::Forbidden(
                "Only admins or restaurant owners can assign couriers".into(),
            ));
        }
        let order = self.get_order(order_id).await?;
        self.check_order_access(&order, actor).await?;
        if order.order_type != OrderType::Delivery {
            return Err(ServiceError::ValidationError(
                "Only delivery orders can have a courier assigned".into(),
            ));
        }
        if order.status.is_terminal() || order.status == OrderStatus::Cancelled {
            return Err(ServiceError::conflict(format!(
                "Cannot assign a courier to an order in status {}",
                order.status
            )));
        }

        let fields = order::ActiveModel {
            delivery_person_id: Set(Some(delivery_person_id)),
            ..Default::default()
        };
        guarded_order_update(&self.db, &order, fields).await?;
        self.get_order(order_id).await
    }
}

/// Match requested customizations against the menu item's definitions,
/// snapshotting the matched option prices. Unknown groups and options are
/// skipped rather than failing the order; each skip is logged and counted
/// because it silently drops something the customer asked for.
fn resolve_customizations(
    available: &[CustomizationGroup],
    requested: &[CustomizationSelection],
    menu_item_id: Uuid,
) -> Vec<CustomizationGroup> {
    let mut resolved = Vec::new();
    for selection in requested {
        let Some(group) = available
            .iter()
            .find(|g| g.group_name == selection.group_name)
        else {
            warn!(
                %menu_item_id,
                group = %selection.group_name,
                "skipping unknown customization group"
            );
            counter!("orders.customizations_skipped", 1);
            continue;
        };
        let mut options: Vec<CustomizationOption> = Vec::new();
        for name in &selection.options {
            match group.options.iter().find(|o| &o.name == name) {
                Some(option) => options.push(option.clone()),
                None => {
                    warn!(
                        %menu_item_id,
                        group = %selection.group_name,
                        option = %name,
                        "skipping unknown customization option"
                    );
                    counter!("orders.customizations_skipped", 1);
                }
            }
        }
        if !options.is_empty() {
            resolved.push(CustomizationGroup {
                group_name: group.group_name.clone(),
                options,
            });
        }
    }
    resolved
}
