use sea_orm::{ConnectionTrait, EntityTrait};
use uuid::Uuid;

use crate::entities::{menu_item, restaurant};
use crate::errors::ServiceError;

/// Read-only access to the catalog tables. Catalog CRUD belongs to the
/// catalog subsystem; order creation only needs lookups.
#[derive(Clone)]
pub struct CatalogService;

impl CatalogService {
    /// Restaurant that is present, active and approved.
    pub async fn resolve_restaurant<C: ConnectionTrait>(
        conn: &C,
        restaurant_id: Uuid,
    ) -> Result<restaurant::Model, ServiceError> {
        let restaurant = restaurant::Entity::find_by_id(restaurant_id)
            .one(conn)
            .await?
            .filter(|r| r.accepts_orders())
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Restaurant {restaurant_id} is not available for orders"
                ))
            })?;
        Ok(restaurant)
    }

    pub async fn find_menu_item<C: ConnectionTrait>(
        conn: &C,
        menu_item_id: Uuid,
    ) -> Result<Option<menu_item::Model>, ServiceError> {
        Ok(menu_item::Entity::find_by_id(menu_item_id).one(conn).await?)
    }
}
