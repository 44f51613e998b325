use chrono::{DateTime, Utc};
use diesel::prelude::{AsChangeset, Identifiable, Insertable, Queryable};
use diesel::Selectable;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

// Catalog

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, ToSchema)]
#[diesel(table_name = crate::schema::categories)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CategoryEntity {
    pub id: i32,
    pub name: String,
    pub slug: String,
    pub image: String,
}

#[derive(Queryable, Selectable, Identifiable, Serialize, Deserialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::products)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ProductEntity {
    pub id: i32,
    pub name: String,
    pub slug: String,
    pub description: Option<Value>,
    pub price: f32,
    pub rating: f32,
    pub fast_delivery: bool,
    pub in_stock: bool,
    pub quantity: i32,
    pub seller: String,
    pub image: String,
}

#[derive(Queryable, Selectable, Serialize, Debug, ToSchema)]
#[diesel(table_name = crate::schema::top_categories)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TopCategoryEntity {
    pub id: i32,
    pub category_id: i32,
    pub total_purchases: i32,
}

// Carts

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, ToSchema)]
#[diesel(table_name = crate::schema::carts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CartEntity {
    pub id: i32,
    pub user_id: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Serialize, Debug, ToSchema)]
#[diesel(table_name = crate::schema::cart_items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CartItemEntity {
    pub id: i32,
    pub cart_id: i32,
    pub product_id: i32,
    pub quantity: i32,
    pub is_selected: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::carts)]
pub struct CreateCartEntity {
    pub user_id: i32,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::cart_items)]
pub struct CreateCartItemEntity {
    pub cart_id: i32,
    pub product_id: i32,
    pub quantity: i32,
    pub is_selected: bool,
}

/// Partial cart-item update; `None` fields are left untouched.
#[derive(AsChangeset, Debug, Default, PartialEq)]
#[diesel(table_name = crate::schema::cart_items)]
pub struct UpdateCartItemChangeset {
    pub quantity: Option<i32>,
    pub is_selected: Option<bool>,
}

// Orders

#[derive(Queryable, Selectable, Serialize, Debug, ToSchema)]
#[diesel(table_name = crate::schema::orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderEntity {
    pub order_id: Uuid,
    pub user_id: i32,
    pub total_amount: f32,
    pub payment_method: String,
    pub shipping_address: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::orders)]
pub struct CreateOrderEntity {
    pub order_id: Uuid,
    pub user_id: i32,
    pub total_amount: f32,
    pub payment_method: String,
    pub shipping_address: String,
}

#[derive(Queryable, Selectable, Serialize, Debug, ToSchema)]
#[diesel(table_name = crate::schema::order_items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderItemEntity {
    pub id: i32,
    pub order_id: Uuid,
    pub product_id: i32,
    pub price: f32,
    pub quantity: i32,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::order_items)]
pub struct CreateOrderItemEntity {
    pub order_id: Uuid,
    pub product_id: i32,
    pub price: f32,
    pub quantity: i32,
}

// Shipping addresses

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, ToSchema)]
#[diesel(table_name = crate::schema::shipping_addresses)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ShippingAddressEntity {
    pub id: i32,
    pub user_id: i32,
    pub full_name: String,
    pub mobile_number: String,
    pub pin_code: String,
    pub address1: String,
    pub address2: String,
    pub city: String,
    pub state: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::shipping_addresses)]
pub struct CreateShippingAddressEntity {
    pub user_id: i32,
    pub full_name: String,
    pub mobile_number: String,
    pub pin_code: String,
    pub address1: String,
    pub address2: String,
    pub city: String,
    pub state: String,
    pub is_default: bool,
}

/// Partial address update; the transient `is_selected` display flag never
/// appears here, it is stripped at the request boundary.
#[derive(AsChangeset, Debug, Default, PartialEq)]
#[diesel(table_name = crate::schema::shipping_addresses)]
pub struct UpdateShippingAddressChangeset {
    pub full_name: Option<String>,
    pub mobile_number: Option<String>,
    pub pin_code: Option<String>,
    pub address1: Option<String>,
    pub address2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub is_default: Option<bool>,
}

impl UpdateShippingAddressChangeset {
    pub fn has_changes(&self) -> bool {
        self.full_name.is_some()
            || self.mobile_number.is_some()
            || self.pin_code.is_some()
            || self.address1.is_some()
            || self.address2.is_some()
            || self.city.is_some()
            || self.state.is_some()
            || self.is_default.is_some()
    }
}
